//! In-memory adapter for the rotation stores.
//!
//! Backs the engine's scenario tests and makes the transactional contract
//! easy to reason about: a transaction clones the whole state, works on the
//! clone, and swaps it in on commit. Dropping a transaction discards the
//! clone, so aborted rotations leave nothing behind. The owned mutex guard
//! held for the transaction's lifetime doubles as the pool-scoped lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RotationStore, RotationTx};
use crate::error::{Result, RotationError};
use crate::types::{DomainEntry, PoolCounts, RecordKind, ResourceRecord};

#[derive(Debug, Default, Clone)]
struct MemState {
    records: Vec<ResourceRecord>,
    domains: Vec<DomainEntry>,
    next_entry_id: i64,
}

impl MemState {
    fn record(&self, kind: RecordKind, id: i32) -> Result<&ResourceRecord> {
        self.records
            .iter()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or(RotationError::RecordNotFound { kind, id })
    }

    fn record_mut(
        &mut self,
        kind: RecordKind,
        id: i32,
    ) -> Result<&mut ResourceRecord> {
        self.records
            .iter_mut()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or(RotationError::RecordNotFound { kind, id })
    }

    fn pool(&self, kind: RecordKind, owner_id: i32) -> Vec<DomainEntry> {
        let mut pool: Vec<DomainEntry> = self
            .domains
            .iter()
            .filter(|d| d.kind == kind && d.owner_id == owner_id)
            .cloned()
            .collect();
        // Ids are assigned monotonically, so the id tie-break preserves
        // insertion order.
        pool.sort_by_key(|d| (d.last_used_time, d.id));
        pool
    }

    fn max_order(&self, kind: RecordKind, owner_id: i32) -> i32 {
        self.domains
            .iter()
            .filter(|d| d.kind == kind && d.owner_id == owner_id)
            .map(|d| d.sort_order)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRotationStore {
    state: Arc<Mutex<MemState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_record(&self, record: ResourceRecord) {
        let mut state = self.state.lock().await;
        state.records.retain(|r| !(r.kind == record.kind && r.id == record.id));
        state.records.push(record);
    }

    /// Seed a pool entry with explicit usage state, bypassing the
    /// `add_domain` invariants. Intended for tests and demos.
    pub async fn put_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
        in_use: bool,
        last_used_time: i64,
    ) -> DomainEntry {
        let mut state = self.state.lock().await;
        state.next_entry_id += 1;
        let entry = DomainEntry {
            id: state.next_entry_id,
            kind,
            owner_id,
            domain: domain.to_string(),
            in_use,
            sort_order: state.max_order(kind, owner_id) + 1,
            last_used_time,
        };
        state.domains.push(entry.clone());
        entry
    }

    /// Make the next transaction commit fail with a store error, leaving the
    /// state untouched. Lets tests exercise the commit-failure path.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Full copy of the current state, for before/after comparisons.
    pub async fn dump(&self) -> (Vec<ResourceRecord>, Vec<DomainEntry>) {
        let state = self.state.lock().await;
        (state.records.clone(), state.domains.clone())
    }
}

#[async_trait]
impl RotationStore for MemoryRotationStore {
    async fn begin(&self) -> Result<Box<dyn RotationTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryRotationTx {
            guard,
            work,
            fail_commit: Arc::clone(&self.fail_next_commit),
        }))
    }

    async fn fetch_record(
        &self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord> {
        self.state.lock().await.record(kind, id).cloned()
    }

    async fn all_records(&self, kind: RecordKind) -> Result<Vec<ResourceRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<ResourceRecord> = state
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn due_records(&self, kind: RecordKind, now: i64) -> Result<Vec<i32>> {
        let state = self.state.lock().await;
        let mut ids: Vec<i32> = state
            .records
            .iter()
            .filter(|r| r.kind == kind && r.next_due_time <= now)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_domains(
        &self,
        kind: RecordKind,
        owner_id: i32,
    ) -> Result<Vec<DomainEntry>> {
        Ok(self.state.lock().await.pool(kind, owner_id))
    }

    async fn add_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<DomainEntry> {
        let mut state = self.state.lock().await;
        if state
            .domains
            .iter()
            .any(|d| d.kind == kind && d.owner_id == owner_id && d.domain == domain)
        {
            return Err(RotationError::DuplicateDomain(domain.to_string()));
        }

        state.next_entry_id += 1;
        let entry = DomainEntry {
            id: state.next_entry_id,
            kind,
            owner_id,
            domain: domain.to_string(),
            in_use: false,
            sort_order: state.max_order(kind, owner_id) + 1,
            last_used_time: 0,
        };
        state.domains.push(entry.clone());
        Ok(entry)
    }

    async fn remove_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .domains
            .iter()
            .find(|d| d.id == entry_id && d.kind == kind && d.owner_id == owner_id)
            .cloned()
            .ok_or(RotationError::DomainNotFound { entry_id })?;

        if entry.in_use {
            return Err(RotationError::InUse(entry.domain));
        }
        if let Ok(record) = state.record(kind, owner_id)
            && record.host == entry.domain
        {
            return Err(RotationError::IsCurrentHost(entry.domain));
        }

        state.domains.retain(|d| d.id != entry_id);
        Ok(())
    }

    async fn pool_counts(
        &self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
    ) -> Result<PoolCounts> {
        let state = self.state.lock().await;
        let pool: Vec<&DomainEntry> = state
            .domains
            .iter()
            .filter(|d| d.kind == kind && d.owner_id == owner_id)
            .collect();
        Ok(PoolCounts {
            total: pool.len() as u32,
            available: pool.iter().filter(|d| d.eligible_at(now)).count() as u32,
        })
    }

    async fn write_status(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record_mut(kind, id)?.last_status = status.to_string();
        Ok(())
    }

    async fn write_status_and_reschedule(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
        next_due_time: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(kind, id)?;
        record.last_status = status.to_string();
        record.next_due_time = next_due_time;
        Ok(())
    }

    async fn reschedule_all(&self, next_due_time: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        for record in &mut state.records {
            record.next_due_time = next_due_time;
        }
        Ok(())
    }
}

struct MemoryRotationTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl RotationTx for MemoryRotationTx {
    async fn fetch_record(
        &mut self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord> {
        self.work.record(kind, id).cloned()
    }

    async fn release_domain(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<bool> {
        match self
            .work
            .domains
            .iter_mut()
            .find(|d| d.kind == kind && d.owner_id == owner_id && d.domain == domain)
        {
            Some(entry) => {
                entry.in_use = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn eligible_domains(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
        exclude_domain: Option<&str>,
    ) -> Result<Vec<DomainEntry>> {
        Ok(self
            .work
            .pool(kind, owner_id)
            .into_iter()
            .filter(|d| d.eligible_at(now))
            .filter(|d| Some(d.domain.as_str()) != exclude_domain)
            .collect())
    }

    async fn update_assignment(
        &mut self,
        kind: RecordKind,
        id: i32,
        port: u16,
        host: &str,
        next_due_time: i64,
    ) -> Result<()> {
        let record = self.work.record_mut(kind, id)?;
        record.port = port.to_string();
        record.numeric_port = port;
        record.host = host.to_string();
        record.next_due_time = next_due_time;
        Ok(())
    }

    async fn claim_domain(&mut self, entry_id: i64, now: i64) -> Result<()> {
        let entry = self
            .work
            .domains
            .iter_mut()
            .find(|d| d.id == entry_id && !d.in_use)
            .ok_or_else(|| {
                RotationError::StoreFailure(format!(
                    "domain entry {entry_id} was claimed by a concurrent rotation"
                ))
            })?;
        entry.in_use = true;
        entry.last_used_time = now;
        Ok(())
    }

    async fn bump_order(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()> {
        let next = self.work.max_order(kind, owner_id) + 1;
        if let Some(entry) =
            self.work.domains.iter_mut().find(|d| d.id == entry_id)
        {
            entry.sort_order = next;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(RotationError::StoreFailure(
                "commit failed (injected)".to_string(),
            ));
        }
        let mut this = *self;
        *this.guard = this.work;
        Ok(())
    }
}
