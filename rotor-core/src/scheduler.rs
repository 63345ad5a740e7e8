//! Periodic rotation sweep.
//!
//! A single background task wakes on a fixed cadence, finds every record
//! whose `next_due_time` has passed and rotates it with a bounded retry. A
//! record that keeps failing gets its failure recorded and its next attempt
//! pushed a full interval out, so a broken record cannot turn every sweep
//! into a tight failure loop. One record's failure never stops the sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::RotationError;
use crate::rotation::{failure_status, Rotator, STATUS_SUCCESS};
use crate::store::RotationStore;
use crate::types::RecordKind;

/// Attempts per due record within one sweep, no inter-attempt delay.
const MAX_ATTEMPTS: u32 = 3;

/// Sweep cadence of the reference deployment.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct Sweeper {
    rotator: Rotator,
    store: Arc<dyn RotationStore>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper").finish_non_exhaustive()
    }
}

impl Sweeper {
    pub fn new(rotator: Rotator) -> Self {
        let store = Arc::clone(rotator.store());
        Self { rotator, store }
    }

    /// Run sweeps forever on the given cadence. Intended to be spawned as a
    /// background task; it never returns.
    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "rotation sweeper started");

        loop {
            ticker.tick().await;
            self.sweep(Utc::now().timestamp()).await;
        }
    }

    /// One pass over all kinds: rotate every due record.
    pub async fn sweep(&self, now: i64) {
        debug!(now, "starting rotation sweep");
        for kind in RecordKind::ALL {
            let due = match self.store.due_records(kind, now).await {
                Ok(due) => due,
                Err(err) => {
                    error!(kind = %kind, error = %err, "failed to list due records");
                    continue;
                }
            };

            for id in due {
                if let Err(err) = self.rotate_with_retry(kind, id, now).await {
                    error!(
                        kind = %kind,
                        id,
                        error = %err,
                        "failed to record rotation outcome"
                    );
                }
            }
        }
    }

    async fn rotate_with_retry(
        &self,
        kind: RecordKind,
        id: i32,
        now: i64,
    ) -> crate::error::Result<()> {
        let mut last_err: Option<RotationError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.rotator.rotate(kind, id, now, true).await {
                Ok(_) => {
                    return self.store.write_status(kind, id, STATUS_SUCCESS).await;
                }
                Err(err) => {
                    warn!(
                        kind = %kind,
                        id,
                        attempt,
                        error = %err,
                        "rotation attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or(RotationError::NoAvailableDomain);
        if matches!(err, RotationError::RecordNotFound { .. }) {
            // Nothing to write a status to; the record vanished mid-sweep.
            return Ok(());
        }

        let interval = self.rotator.settings().snapshot().update_interval_secs();
        error!(
            kind = %kind,
            id,
            error = %err,
            "rotation failed after {MAX_ATTEMPTS} attempts, deferring record"
        );
        self.store
            .write_status_and_reschedule(
                kind,
                id,
                &failure_status(&err),
                now + interval,
            )
            .await
    }
}
