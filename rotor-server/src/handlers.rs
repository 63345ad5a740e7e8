use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use rotor_core::{DomainEntry, PortRange, RecordKind, ResourceRecord};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// A record as shown in the panel: assignment fields plus pool totals.
#[derive(Debug, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: ResourceRecord,
    pub domain_total: u32,
    pub domain_available: u32,
}

pub async fn list_records(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<RecordView>>> {
    let now = Utc::now().timestamp();
    let mut views = Vec::new();

    for kind in RecordKind::ALL {
        for record in state.store.all_records(kind).await? {
            let counts = state.store.pool_counts(kind, record.id, now).await?;
            views.push(RecordView {
                record,
                domain_total: counts.total,
                domain_available: counts.available,
            });
        }
    }

    Ok(Json(views))
}

pub async fn rotate_now(
    State(state): State<AppState>,
    Path((kind, id)): Path<(RecordKind, i32)>,
) -> AppResult<Json<Value>> {
    let now = Utc::now().timestamp();
    let outcome = state.rotator.rotate_now(kind, id, now).await?;
    let counts = state.store.pool_counts(kind, id, now).await?;

    Ok(Json(json!({
        "message": "record rotated",
        "port": outcome.port,
        "host": outcome.host,
        "next_update_time": outcome.next_due_time,
        "domain_total": counts.total,
        "domain_available": counts.available,
    })))
}

#[derive(Debug, Serialize)]
pub struct DomainList {
    pub domains: Vec<DomainEntry>,
}

pub async fn list_domains(
    State(state): State<AppState>,
    Path((kind, id)): Path<(RecordKind, i32)>,
) -> AppResult<Json<DomainList>> {
    let domains = state.store.list_domains(kind, id).await?;
    Ok(Json(DomainList { domains }))
}

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    pub domain: String,
}

pub async fn add_domain(
    State(state): State<AppState>,
    Path((kind, id)): Path<(RecordKind, i32)>,
    Json(req): Json<AddDomainRequest>,
) -> AppResult<Json<Value>> {
    let domain = req.domain.trim();
    if domain.is_empty() {
        return Err(AppError::bad_request("domain must not be empty"));
    }

    let entry = state.store.add_domain(kind, id, domain).await?;
    let counts = state
        .store
        .pool_counts(kind, id, Utc::now().timestamp())
        .await?;

    Ok(Json(json!({
        "message": format!("domain {} added", entry.domain),
        "domain": entry,
        "domain_total": counts.total,
        "domain_available": counts.available,
    })))
}

pub async fn remove_domain(
    State(state): State<AppState>,
    Path((kind, id, domain_id)): Path<(RecordKind, i32, i64)>,
) -> AppResult<Json<Value>> {
    state.store.remove_domain(kind, id, domain_id).await?;
    let counts = state
        .store
        .pool_counts(kind, id, Utc::now().timestamp())
        .await?;

    Ok(Json(json!({
        "message": "domain removed",
        "domain_total": counts.total,
        "domain_available": counts.available,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetIntervalRequest {
    pub hours: u32,
}

pub async fn set_interval(
    State(state): State<AppState>,
    Json(req): Json<SetIntervalRequest>,
) -> AppResult<Json<Value>> {
    if req.hours == 0 {
        return Err(AppError::bad_request("interval must be positive"));
    }

    state.settings.set_interval(req.hours);
    // Every record starts a fresh cycle under the new cadence.
    let next_due = Utc::now().timestamp() + i64::from(req.hours) * 3600;
    state.store.reschedule_all(next_due).await?;

    info!(hours = req.hours, "rotation interval updated");
    Ok(Json(json!({
        "message": format!("update interval set to {} hours", req.hours),
        "next_update_time": next_due,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetPortRangeRequest {
    pub min: u16,
    pub max: u16,
}

pub async fn set_port_range(
    State(state): State<AppState>,
    Json(req): Json<SetPortRangeRequest>,
) -> AppResult<Json<Value>> {
    let range = PortRange::new(req.min, req.max)?;
    state.settings.set_port_range(range);

    info!(min = req.min, max = req.max, "port range updated");
    Ok(Json(json!({
        "message": format!("port range set to {}-{}", req.min, req.max),
    })))
}
