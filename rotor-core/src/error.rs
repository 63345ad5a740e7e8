use thiserror::Error;

use crate::types::RecordKind;

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("record not found: {kind}/{id}")]
    RecordNotFound { kind: RecordKind, id: i32 },

    #[error("no distinct port available in {min}..={max}")]
    NoDistinctPort { min: u16, max: u16 },

    #[error("no available domain (pool exhausted or cooling down)")]
    NoAvailableDomain,

    #[error("domain already registered: {0}")]
    DuplicateDomain(String),

    #[error("domain entry not found: {entry_id}")]
    DomainNotFound { entry_id: i64 },

    #[error("domain is currently in use: {0}")]
    InUse(String),

    #[error("domain is the record's current host: {0}")]
    IsCurrentHost(String),

    #[error("invalid port range: min {min} must be below max {max}")]
    InvalidPortRange { min: u16, max: u16 },

    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl RotationError {
    pub(crate) fn store(context: &str, err: sqlx::Error) -> Self {
        Self::StoreFailure(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, RotationError>;
