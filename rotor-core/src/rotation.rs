//! Rotation transaction coordinator.
//!
//! One rotation swaps a record's public port and fronting domain inside a
//! single unit of work: release the old domain, draw a fresh port, pick the
//! least-recently-used eligible domain, write the record, claim the domain.
//! Any failure aborts the whole unit of work; partial rotations are never
//! observable. Writing `last_status` is the caller's job, except for the
//! on-demand path which reports its own outcome.

use std::sync::Arc;

use tracing::{info, warn};

use crate::allocator;
use crate::error::{Result, RotationError};
use crate::settings::SharedSettings;
use crate::store::RotationStore;
use crate::types::{RecordKind, RotationSuccess};

pub const STATUS_SUCCESS: &str = "success";

pub fn failure_status(err: &RotationError) -> String {
    format!("failed: {err}")
}

#[derive(Clone)]
pub struct Rotator {
    store: Arc<dyn RotationStore>,
    settings: SharedSettings,
}

impl std::fmt::Debug for Rotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotator").finish_non_exhaustive()
    }
}

impl Rotator {
    pub fn new(store: Arc<dyn RotationStore>, settings: SharedSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn RotationStore> {
        &self.store
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Rotate one record's port and domain. `bump_order` maintains the pool's
    /// audit ordering and is set on scheduler-driven rotations only.
    pub async fn rotate(
        &self,
        kind: RecordKind,
        id: i32,
        now: i64,
        bump_order: bool,
    ) -> Result<RotationSuccess> {
        let settings = self.settings.snapshot();
        let range = settings.port_range;

        let mut tx = self.store.begin().await?;

        let record = tx.fetch_record(kind, id).await?;

        if !record.host.is_empty()
            && !tx.release_domain(kind, id, &record.host).await?
        {
            // The record points at a domain the pool does not know about.
            // Rotation still proceeds; the pool simply has nothing to free.
            warn!(
                kind = %kind,
                id,
                host = %record.host,
                "current host missing from domain pool"
            );
        }

        let exclude_port =
            (record.numeric_port != 0).then_some(record.numeric_port);
        let port =
            allocator::pick_port(range.min(), range.max(), exclude_port)?;

        let exclude_host =
            (!record.host.is_empty()).then_some(record.host.as_str());
        let eligible = tx.eligible_domains(kind, id, now, exclude_host).await?;
        let Some(next) = eligible.first() else {
            // Dropping the transaction rolls the release back.
            return Err(RotationError::NoAvailableDomain);
        };

        let next_due_time = now + settings.update_interval_secs();
        tx.update_assignment(kind, id, port, &next.domain, next_due_time)
            .await?;
        tx.claim_domain(next.id, now).await?;
        if bump_order {
            tx.bump_order(kind, id, next.id).await?;
        }
        tx.commit().await?;

        info!(
            kind = %kind,
            id,
            port,
            host = %next.domain,
            next_due_time,
            "rotated record"
        );

        Ok(RotationSuccess {
            port,
            host: next.domain.clone(),
            next_due_time,
        })
    }

    /// Operator-triggered rotation: exactly one attempt, no retry, and the
    /// outcome is written to `last_status` here before being returned.
    pub async fn rotate_now(
        &self,
        kind: RecordKind,
        id: i32,
        now: i64,
    ) -> Result<RotationSuccess> {
        match self.rotate(kind, id, now, false).await {
            Ok(success) => {
                self.store.write_status(kind, id, STATUS_SUCCESS).await?;
                Ok(success)
            }
            Err(err) => {
                warn!(kind = %kind, id, error = %err, "on-demand rotation failed");
                // A missing record has no status row to write to.
                if !matches!(err, RotationError::RecordNotFound { .. }) {
                    self.store
                        .write_status(kind, id, &failure_status(&err))
                        .await?;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{PortRange, RotationSettings};
    use crate::store::MemoryRotationStore;
    use crate::types::ResourceRecord;

    const KIND: RecordKind = RecordKind::Vless;
    const OWNER: i32 = 4;
    const NOW: i64 = 1_700_000_000;
    const INTERVAL_HOURS: u32 = 24;

    fn rotator(store: &MemoryRotationStore) -> Rotator {
        let settings = SharedSettings::new(RotationSettings {
            update_interval_hours: INTERVAL_HOURS,
            port_range: PortRange::new(10_000, 20_000).unwrap(),
        });
        Rotator::new(Arc::new(store.clone()), settings)
    }

    fn record(host: &str, port: u16) -> ResourceRecord {
        ResourceRecord {
            kind: KIND,
            id: OWNER,
            name: "node-4".into(),
            port: port.to_string(),
            numeric_port: port,
            host: host.into(),
            next_due_time: 0,
            last_status: String::new(),
        }
    }

    #[tokio::test]
    async fn rotation_picks_least_recently_used_domain() {
        // Scenario: current host in use, one never-used domain, one rested
        // domain. The never-used one sorts first.
        let store = MemoryRotationStore::new();
        store.put_record(record("d1.com", 8080)).await;
        store.put_domain(KIND, OWNER, "d1.com", true, NOW - 1).await;
        store.put_domain(KIND, OWNER, "d2.com", false, 0).await;
        store.put_domain(KIND, OWNER, "d3.com", false, NOW - 20_000).await;

        let outcome = rotator(&store)
            .rotate(KIND, OWNER, NOW, false)
            .await
            .unwrap();

        assert_eq!(outcome.host, "d2.com");
        assert_eq!(
            outcome.next_due_time,
            NOW + i64::from(INTERVAL_HOURS) * 3600
        );
        assert!((10_000..=20_000).contains(&outcome.port));
        assert_ne!(outcome.port, 8080);

        let updated = store.fetch_record(KIND, OWNER).await.unwrap();
        assert_eq!(updated.host, "d2.com");
        assert_eq!(updated.numeric_port, outcome.port);
        assert_eq!(updated.port, outcome.port.to_string());
        assert_eq!(updated.next_due_time, outcome.next_due_time);

        let pool = store.list_domains(KIND, OWNER).await.unwrap();
        let by_name = |n: &str| pool.iter().find(|d| d.domain == n).unwrap();
        let d1 = by_name("d1.com");
        assert!(!d1.in_use);
        assert_eq!(d1.last_used_time, NOW - 1);
        let d2 = by_name("d2.com");
        assert!(d2.in_use);
        assert_eq!(d2.last_used_time, NOW);
        assert!(!by_name("d3.com").in_use);
    }

    #[tokio::test]
    async fn empty_pool_fails_and_leaves_everything_untouched() {
        let store = MemoryRotationStore::new();
        store.put_record(record("d1.com", 8080)).await;
        // d1 would be released mid-rotation, but the abort must undo it.
        store.put_domain(KIND, OWNER, "d1.com", true, NOW - 1).await;
        store.put_domain(KIND, OWNER, "cooling.com", false, NOW - 60).await;

        let before = store.dump().await;
        let err = rotator(&store)
            .rotate(KIND, OWNER, NOW, false)
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::NoAvailableDomain));
        assert_eq!(store.dump().await, before);
    }

    #[tokio::test]
    async fn commit_failure_leaves_everything_untouched() {
        let store = MemoryRotationStore::new();
        store.put_record(record("d1.com", 8080)).await;
        store.put_domain(KIND, OWNER, "d1.com", true, NOW - 1).await;
        store.put_domain(KIND, OWNER, "d2.com", false, 0).await;

        let before = store.dump().await;
        store.fail_next_commit();
        let err = rotator(&store)
            .rotate(KIND, OWNER, NOW, false)
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::StoreFailure(_)));
        assert_eq!(store.dump().await, before);
    }

    #[tokio::test]
    async fn missing_record_is_reported() {
        let store = MemoryRotationStore::new();
        let err = rotator(&store)
            .rotate(KIND, 999, NOW, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RotationError::RecordNotFound { kind: KIND, id: 999 }
        ));
    }

    #[tokio::test]
    async fn record_with_no_host_rotates_without_release() {
        let store = MemoryRotationStore::new();
        store.put_record(record("", 0)).await;
        store.put_domain(KIND, OWNER, "d1.com", false, 0).await;

        let outcome = rotator(&store)
            .rotate(KIND, OWNER, NOW, false)
            .await
            .unwrap();
        assert_eq!(outcome.host, "d1.com");
    }

    #[tokio::test]
    async fn bump_order_moves_claimed_entry_past_the_pool_maximum() {
        let store = MemoryRotationStore::new();
        store.put_record(record("", 0)).await;
        store.put_domain(KIND, OWNER, "d1.com", false, 0).await;
        store.put_domain(KIND, OWNER, "d2.com", false, 1).await;

        rotator(&store).rotate(KIND, OWNER, NOW, true).await.unwrap();

        let pool = store.list_domains(KIND, OWNER).await.unwrap();
        let d1 = pool.iter().find(|d| d.domain == "d1.com").unwrap();
        assert!(d1.in_use);
        assert_eq!(d1.sort_order, 3);
    }

    #[tokio::test]
    async fn rotate_now_writes_status_both_ways() {
        let store = MemoryRotationStore::new();
        store.put_record(record("", 0)).await;
        store.put_domain(KIND, OWNER, "d1.com", false, 0).await;

        rotator(&store).rotate_now(KIND, OWNER, NOW).await.unwrap();
        let rec = store.fetch_record(KIND, OWNER).await.unwrap();
        assert_eq!(rec.last_status, STATUS_SUCCESS);

        // Pool is now exhausted; the failure is recorded too.
        let err = rotator(&store)
            .rotate_now(KIND, OWNER, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::NoAvailableDomain));
        let rec = store.fetch_record(KIND, OWNER).await.unwrap();
        assert!(rec.last_status.starts_with("failed:"));
    }
}
