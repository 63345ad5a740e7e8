use std::sync::{Arc, RwLock};

use crate::error::{Result, RotationError};

/// Inclusive port bounds for new assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min >= max {
            return Err(RotationError::InvalidPortRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSettings {
    pub update_interval_hours: u32,
    pub port_range: PortRange,
}

impl RotationSettings {
    pub fn update_interval_secs(&self) -> i64 {
        i64::from(self.update_interval_hours) * 3600
    }
}

/// Read-mostly handle over the mutable rotation settings. Handlers update it
/// through the explicit setters; the coordinator snapshots it per rotation so
/// one rotation never observes a mid-flight settings change.
///
/// The lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<RotationSettings>>,
}

impl SharedSettings {
    pub fn new(settings: RotationSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> RotationSettings {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_interval(&self, hours: u32) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .update_interval_hours = hours;
    }

    pub fn set_port_range(&self, range: PortRange) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .port_range = range;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_range() {
        assert!(matches!(
            PortRange::new(2000, 2000),
            Err(RotationError::InvalidPortRange { .. })
        ));
        assert!(matches!(
            PortRange::new(2001, 2000),
            Err(RotationError::InvalidPortRange { .. })
        ));
        assert!(PortRange::new(2000, 2001).is_ok());
    }

    #[test]
    fn setters_are_visible_to_snapshots() {
        let settings = SharedSettings::new(RotationSettings {
            update_interval_hours: 24,
            port_range: PortRange::new(10000, 20000).unwrap(),
        });

        settings.set_interval(6);
        settings.set_port_range(PortRange::new(30000, 40000).unwrap());

        let snap = settings.snapshot();
        assert_eq!(snap.update_interval_hours, 6);
        assert_eq!(snap.update_interval_secs(), 6 * 3600);
        assert_eq!(snap.port_range.min(), 30000);
        assert_eq!(snap.port_range.max(), 40000);
    }
}
