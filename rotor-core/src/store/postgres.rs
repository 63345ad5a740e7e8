//! Postgres adapter for the rotation stores.
//!
//! The domain pool lives in the engine-owned `server_domains` table; the
//! resource records live in inventory tables owned by the surrounding panel,
//! which the engine only extends with its two bookkeeping columns. Record
//! table names come from the closed [`RecordKind`] enum, never from caller
//! input, so interpolating them into SQL is safe.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{RotationStore, RotationTx};
use crate::error::{Result, RotationError};
use crate::types::{
    DOMAIN_COOLDOWN_SECS, DomainEntry, PoolCounts, RecordKind, ResourceRecord,
};

#[derive(Debug, FromRow)]
struct DomainRow {
    id: i64,
    server_id: i32,
    domain: String,
    in_use: bool,
    sort_order: i32,
    last_used_time: i64,
}

impl DomainRow {
    fn into_entry(self, kind: RecordKind) -> DomainEntry {
        DomainEntry {
            id: self.id,
            kind,
            owner_id: self.server_id,
            domain: self.domain,
            in_use: self.in_use,
            sort_order: self.sort_order,
            last_used_time: self.last_used_time,
        }
    }
}

const DOMAIN_COLUMNS: &str =
    "id, server_id, domain, in_use, sort_order, last_used_time";

fn record_from_row(kind: RecordKind, row: &PgRow) -> Result<ResourceRecord> {
    let server_port: i32 = row
        .try_get("server_port")
        .map_err(|e| RotationError::store("decode record row", e))?;
    Ok(ResourceRecord {
        kind,
        id: row
            .try_get("id")
            .map_err(|e| RotationError::store("decode record row", e))?,
        name: row.try_get("name").unwrap_or_default(),
        port: row.try_get("port").unwrap_or_default(),
        numeric_port: u16::try_from(server_port).unwrap_or(0),
        host: row.try_get("host").unwrap_or_default(),
        next_due_time: row.try_get("next_update_time").unwrap_or(0),
        last_status: row.try_get("last_update_status").unwrap_or_default(),
    })
}

fn record_select(kind: RecordKind, suffix: &str) -> String {
    format!(
        "SELECT id, COALESCE(name, '') AS name, COALESCE(port, '') AS port, \
         COALESCE(server_port, 0) AS server_port, COALESCE(host, '') AS host, \
         COALESCE(next_update_time, 0) AS next_update_time, \
         COALESCE(last_update_status, '') AS last_update_status \
         FROM {table} {suffix}",
        table = kind.table(),
    )
}

fn unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[derive(Debug, Clone)]
pub struct PostgresRotationStore {
    pool: PgPool,
}

impl PostgresRotationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent schema evolution: create the engine-owned pool table and
    /// its scan index, and add the bookkeeping columns to the externally
    /// owned inventory tables where they are missing.
    pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
        info!("ensuring rotation schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_domains (
                id BIGSERIAL PRIMARY KEY,
                server_table TEXT NOT NULL,
                server_id INT NOT NULL,
                domain TEXT NOT NULL,
                in_use BOOLEAN NOT NULL DEFAULT FALSE,
                sort_order INT NOT NULL DEFAULT 0,
                last_used_time BIGINT NOT NULL DEFAULT 0,
                CONSTRAINT unique_domain_per_server
                    UNIQUE (server_table, server_id, domain)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| RotationError::store("create server_domains", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_server_domains_pool \
             ON server_domains (server_table, server_id, last_used_time)",
        )
        .execute(pool)
        .await
        .map_err(|e| RotationError::store("create pool index", e))?;

        for kind in RecordKind::ALL {
            let table = kind.table();
            sqlx::query(&format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS \
                 next_update_time BIGINT NOT NULL DEFAULT 0"
            ))
            .execute(pool)
            .await
            .map_err(|e| RotationError::store("add next_update_time", e))?;

            sqlx::query(&format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS \
                 last_update_status TEXT NOT NULL DEFAULT ''"
            ))
            .execute(pool)
            .await
            .map_err(|e| RotationError::store("add last_update_status", e))?;
        }

        Ok(())
    }

    /// Startup reconciliation: reset every usage flag, then re-mark the
    /// domain backing each record's current host as in use. Pending
    /// cooldowns do not survive a restart.
    pub async fn reconcile_pool(pool: &PgPool, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE server_domains SET in_use = FALSE, last_used_time = 0",
        )
        .execute(pool)
        .await
        .map_err(|e| RotationError::store("reset pool usage", e))?;

        for kind in RecordKind::ALL {
            let table = kind.table();
            let marked = sqlx::query(&format!(
                "UPDATE server_domains d \
                 SET in_use = TRUE, last_used_time = $1 \
                 FROM {table} r \
                 WHERE d.server_table = $2 \
                   AND d.server_id = r.id \
                   AND d.domain = r.host \
                   AND r.host <> ''"
            ))
            .bind(now)
            .bind(table)
            .execute(pool)
            .await
            .map_err(|e| RotationError::store("mark current hosts", e))?;

            debug!(
                kind = %kind,
                marked = marked.rows_affected(),
                "reconciled current hosts"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl RotationStore for PostgresRotationStore {
    async fn begin(&self) -> Result<Box<dyn RotationTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RotationError::store("begin transaction", e))?;
        Ok(Box::new(PostgresRotationTx { tx }))
    }

    async fn fetch_record(
        &self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord> {
        let row = sqlx::query(&record_select(kind, "WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| RotationError::store("fetch record", e))?
            .ok_or(RotationError::RecordNotFound { kind, id })?;

        record_from_row(kind, &row)
    }

    async fn all_records(&self, kind: RecordKind) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query(&record_select(kind, "ORDER BY id"))
            .fetch_all(self.pool())
            .await
            .map_err(|e| RotationError::store("list records", e))?;

        rows.iter().map(|row| record_from_row(kind, row)).collect()
    }

    async fn due_records(&self, kind: RecordKind, now: i64) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>(&format!(
            "SELECT id FROM {table} \
             WHERE COALESCE(next_update_time, 0) <= $1 ORDER BY id",
            table = kind.table(),
        ))
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RotationError::store("find due records", e))
    }

    async fn list_domains(
        &self,
        kind: RecordKind,
        owner_id: i32,
    ) -> Result<Vec<DomainEntry>> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM server_domains \
             WHERE server_table = $1 AND server_id = $2 \
             ORDER BY last_used_time ASC, id ASC"
        ))
        .bind(kind.table())
        .bind(owner_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RotationError::store("list domains", e))?;

        Ok(rows.into_iter().map(|r| r.into_entry(kind)).collect())
    }

    async fn add_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<DomainEntry> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO server_domains \
                 (server_table, server_id, domain, in_use, sort_order, last_used_time) \
             SELECT $1, $2, $3, FALSE, \
                 COALESCE((SELECT MAX(sort_order) FROM server_domains \
                           WHERE server_table = $1 AND server_id = $2), 0) + 1, \
                 0 \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(kind.table())
        .bind(owner_id)
        .bind(domain)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                RotationError::DuplicateDomain(domain.to_string())
            } else {
                RotationError::store("add domain", e)
            }
        })?;

        info!(kind = %kind, owner_id, domain, "registered pool domain");
        Ok(row.into_entry(kind))
    }

    async fn remove_domain(
        &self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RotationError::store("begin transaction", e))?;

        let entry = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM server_domains \
             WHERE id = $1 AND server_table = $2 AND server_id = $3 \
             FOR UPDATE"
        ))
        .bind(entry_id)
        .bind(kind.table())
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RotationError::store("fetch domain entry", e))?
        .ok_or(RotationError::DomainNotFound { entry_id })?;

        if entry.in_use {
            return Err(RotationError::InUse(entry.domain));
        }

        // The usage flag can lag an in-flight rotation; also refuse to drop
        // whatever the record currently points at.
        let current_host: Option<String> = sqlx::query_scalar(&format!(
            "SELECT COALESCE(host, '') FROM {table} WHERE id = $1",
            table = kind.table(),
        ))
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RotationError::store("fetch current host", e))?;

        if current_host.as_deref() == Some(entry.domain.as_str()) {
            return Err(RotationError::IsCurrentHost(entry.domain));
        }

        sqlx::query("DELETE FROM server_domains WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RotationError::store("delete domain", e))?;

        tx.commit()
            .await
            .map_err(|e| RotationError::store("commit domain removal", e))?;

        info!(kind = %kind, owner_id, domain = %entry.domain, "removed pool domain");
        Ok(())
    }

    async fn pool_counts(
        &self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
    ) -> Result<PoolCounts> {
        let cutoff = now - DOMAIN_COOLDOWN_SECS;
        let (total, available) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE in_use = FALSE \
                        AND (last_used_time = 0 OR last_used_time <= $3)) \
             FROM server_domains \
             WHERE server_table = $1 AND server_id = $2",
        )
        .bind(kind.table())
        .bind(owner_id)
        .bind(cutoff)
        .fetch_one(self.pool())
        .await
        .map_err(|e| RotationError::store("count pool domains", e))?;

        Ok(PoolCounts {
            total: total as u32,
            available: available as u32,
        })
    }

    async fn write_status(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {table} SET last_update_status = $1 WHERE id = $2",
            table = kind.table(),
        ))
        .bind(status)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| RotationError::store("write status", e))?;
        Ok(())
    }

    async fn write_status_and_reschedule(
        &self,
        kind: RecordKind,
        id: i32,
        status: &str,
        next_due_time: i64,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {table} \
             SET last_update_status = $1, next_update_time = $2 \
             WHERE id = $3",
            table = kind.table(),
        ))
        .bind(status)
        .bind(next_due_time)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| RotationError::store("write status and reschedule", e))?;
        Ok(())
    }

    async fn reschedule_all(&self, next_due_time: i64) -> Result<()> {
        for kind in RecordKind::ALL {
            sqlx::query(&format!(
                "UPDATE {table} SET next_update_time = $1",
                table = kind.table(),
            ))
            .bind(next_due_time)
            .execute(self.pool())
            .await
            .map_err(|e| RotationError::store("reschedule records", e))?;
        }
        Ok(())
    }
}

struct PostgresRotationTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RotationTx for PostgresRotationTx {
    async fn fetch_record(
        &mut self,
        kind: RecordKind,
        id: i32,
    ) -> Result<ResourceRecord> {
        let row = sqlx::query(&record_select(kind, "WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| RotationError::store("fetch record", e))?
            .ok_or(RotationError::RecordNotFound { kind, id })?;

        record_from_row(kind, &row)
    }

    async fn release_domain(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        domain: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE server_domains SET in_use = FALSE \
             WHERE server_table = $1 AND server_id = $2 AND domain = $3",
        )
        .bind(kind.table())
        .bind(owner_id)
        .bind(domain)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| RotationError::store("release domain", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn eligible_domains(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        now: i64,
        exclude_domain: Option<&str>,
    ) -> Result<Vec<DomainEntry>> {
        let cutoff = now - DOMAIN_COOLDOWN_SECS;
        // FOR UPDATE pins the candidate rows for the rest of the unit of
        // work, so a concurrent rotation against the same pool waits here
        // instead of claiming the same entry.
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM server_domains \
             WHERE server_table = $1 AND server_id = $2 \
               AND in_use = FALSE \
               AND (last_used_time = 0 OR last_used_time <= $3) \
               AND ($4::text IS NULL OR domain <> $4) \
             ORDER BY last_used_time ASC, id ASC \
             FOR UPDATE"
        ))
        .bind(kind.table())
        .bind(owner_id)
        .bind(cutoff)
        .bind(exclude_domain)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| RotationError::store("list eligible domains", e))?;

        Ok(rows.into_iter().map(|r| r.into_entry(kind)).collect())
    }

    async fn update_assignment(
        &mut self,
        kind: RecordKind,
        id: i32,
        port: u16,
        host: &str,
        next_due_time: i64,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {table} \
             SET port = $1, server_port = $2, host = $3, next_update_time = $4 \
             WHERE id = $5",
            table = kind.table(),
        ))
        .bind(port.to_string())
        .bind(i32::from(port))
        .bind(host)
        .bind(next_due_time)
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| RotationError::store("update assignment", e))?;
        Ok(())
    }

    async fn claim_domain(&mut self, entry_id: i64, now: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE server_domains \
             SET in_use = TRUE, last_used_time = $2 \
             WHERE id = $1 AND in_use = FALSE",
        )
        .bind(entry_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| RotationError::store("claim domain", e))?;

        if result.rows_affected() != 1 {
            return Err(RotationError::StoreFailure(format!(
                "domain entry {entry_id} was claimed by a concurrent rotation"
            )));
        }
        Ok(())
    }

    async fn bump_order(
        &mut self,
        kind: RecordKind,
        owner_id: i32,
        entry_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE server_domains \
             SET sort_order = COALESCE((SELECT MAX(sort_order) \
                 FROM server_domains \
                 WHERE server_table = $1 AND server_id = $2), 0) + 1 \
             WHERE id = $3",
        )
        .bind(kind.table())
        .bind(owner_id)
        .bind(entry_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| RotationError::store("bump domain order", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| RotationError::store("commit rotation", e))
    }
}
