//! Storage seams for the rotation engine.
//!
//! [`RotationStore`] covers pool-scope reads and the bookkeeping writes that
//! happen outside a rotation (status, rescheduling, pool CRUD).
//! [`RotationTx`] is the all-or-nothing unit of work one rotation runs in:
//! dropping a transaction without committing discards every staged write.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DomainEntry, PoolCounts, RecordKind, ResourceRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRotationStore;
pub use postgres::PostgresRotationStore;

#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Open a transactional unit of work for one rotation.
    async fn begin(&self) -> Result<Box<dyn RotationTx>>;

    async fn fetch_record(
        &self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord>;

    async fn all_records(&self, kind: RecordKind) -> Result<Vec<ResourceRecord>>;

    /// Ids of records whose `next_due_time` has passed.
    async fn due_records(&self, kind: RecordKind, now: i64) -> Result<Vec<i32>>;

    /// Every pool entry for one record, least-recently-used first.
    async fn list_domains(
        &self,
        kind: RecordKind,
        owner_id: i32,
    ) -> Result<Vec<DomainEntry>>;

    /// Register a new pool entry. Fails with `DuplicateDomain` when the
    /// `(kind, owner, domain)` uniqueness invariant would be violated.
    async fn add_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<DomainEntry>;

    /// Delete a pool entry. Fails with `InUse` for claimed entries and with
    /// `IsCurrentHost` when the entry backs the record's current host, even
    /// if its usage flag has drifted out of sync.
    async fn remove_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()>;

    async fn pool_counts(
        &self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
    ) -> Result<PoolCounts>;

    async fn write_status(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
    ) -> Result<()>;

    /// Terminal failure bookkeeping: record the outcome and push the next
    /// attempt a full interval out so a broken record is not retried every
    /// sweep.
    async fn write_status_and_reschedule(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
        next_due_time: i64,
    ) -> Result<()>;

    /// Reset `next_due_time` on every record of every kind, used when the
    /// rotation interval changes.
    async fn reschedule_all(&self, next_due_time: i64) -> Result<()>;
}

#[async_trait]
pub trait RotationTx: Send {
    /// Read the record under the transaction. The Postgres adapter locks the
    /// row, serializing concurrent rotations of the same record.
    async fn fetch_record(
        &mut self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord>;

    /// Free the entry backing `domain`. `last_used_time` is deliberately left
    /// untouched: it records when the domain was last assigned, and the
    /// cooldown is measured from that moment. Returns `false` when no pool
    /// entry matches the record's current host (a non-fatal inconsistency).
    async fn release_domain(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<bool>;

    /// Entries eligible for reuse right now, least-recently-used first with
    /// never-used entries leading, ties broken by insertion order. The
    /// Postgres adapter locks the returned rows so selection and claim
    /// execute under a pool-scoped lock.
    async fn eligible_domains(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
        exclude_domain: Option<&str>,
    ) -> Result<Vec<DomainEntry>>;

    async fn update_assignment(
        &mut self,
        kind: RecordKind,
        id: i32,
        port: u16,
        host: &str,
        next_due_time: i64,
    ) -> Result<()>;

    /// Mark the entry as in use and stamp `last_used_time`. Compare-and-set:
    /// losing a claim race aborts the unit of work.
    async fn claim_domain(&mut self, entry_id: i64, now: i64) -> Result<()>;

    /// Push the entry's `sort_order` past the current maximum. Audit
    /// bookkeeping on scheduled rotations; never read for selection.
    async fn bump_order(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
