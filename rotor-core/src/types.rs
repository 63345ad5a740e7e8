use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rest period a released domain must sit out, measured from the moment it
/// was last assigned, before it becomes eligible again.
pub const DOMAIN_COOLDOWN_SECS: i64 = 3 * 3600;

/// Endpoint family of a managed record. Each kind lives in its own inventory
/// table owned by the surrounding panel database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Vless,
    Shadowsocks,
    Vmess,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] =
        [RecordKind::Vless, RecordKind::Shadowsocks, RecordKind::Vmess];

    /// Inventory table holding records of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Vless => "v2_server_vless",
            RecordKind::Shadowsocks => "v2_server_shadowsocks",
            RecordKind::Vmess => "v2_server_vmess",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Vless => "vless",
            RecordKind::Shadowsocks => "shadowsocks",
            RecordKind::Vmess => "vmess",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vless" => Ok(RecordKind::Vless),
            "shadowsocks" => Ok(RecordKind::Shadowsocks),
            "vmess" => Ok(RecordKind::Vmess),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown record kind: {}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

/// A managed endpoint record. Created and deleted by the external inventory
/// system; the engine only mutates the assignment fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    pub kind: RecordKind,
    pub id: i32,
    pub name: String,
    /// Display form of the port, mirrored into `numeric_port`.
    pub port: String,
    pub numeric_port: u16,
    /// Currently assigned domain; empty when none has been assigned yet.
    pub host: String,
    /// Unix seconds; 0 means "due now".
    pub next_due_time: i64,
    /// Free-text outcome of the last rotation attempt.
    pub last_status: String,
}

/// One candidate domain in a record's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEntry {
    pub id: i64,
    pub kind: RecordKind,
    pub owner_id: i32,
    pub domain: String,
    pub in_use: bool,
    /// Audit bookkeeping only; never consulted for selection.
    pub sort_order: i32,
    /// Unix seconds of the last assignment; 0 = never used.
    pub last_used_time: i64,
}

impl DomainEntry {
    /// Eligible for reuse: free, and either never used or past cooldown.
    pub fn eligible_at(&self, now: i64) -> bool {
        !self.in_use
            && (self.last_used_time == 0
                || now - self.last_used_time >= DOMAIN_COOLDOWN_SECS)
    }
}

/// Committed result of one rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationSuccess {
    pub port: u16,
    pub host: String,
    pub next_due_time: i64,
}

/// Pool totals shown alongside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub total: u32,
    pub available: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("trojan".parse::<RecordKind>().is_err());
    }

    #[test]
    fn eligibility_respects_cooldown() {
        let now = 1_700_000_000;
        let entry = |in_use, last_used_time| DomainEntry {
            id: 1,
            kind: RecordKind::Vless,
            owner_id: 4,
            domain: "d1.com".into(),
            in_use,
            sort_order: 1,
            last_used_time,
        };

        assert!(entry(false, 0).eligible_at(now));
        assert!(entry(false, now - DOMAIN_COOLDOWN_SECS).eligible_at(now));
        assert!(!entry(false, now - DOMAIN_COOLDOWN_SECS + 1).eligible_at(now));
        assert!(!entry(true, 0).eligible_at(now));
    }
}
