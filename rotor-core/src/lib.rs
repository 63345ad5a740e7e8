//! # Rotor Core
//!
//! Resource rotation engine for managed proxy endpoint records. Each record
//! owns a pool of reusable fronting domains; on a schedule (or on demand)
//! the engine atomically swaps the record's public port and domain, picking
//! the least-recently-used domain that has cleared its cooldown.
//!
//! Components:
//! - [`store`] — domain pool and record storage seams, with Postgres and
//!   in-memory adapters
//! - [`allocator`] — stateless distinct-port selection
//! - [`rotation`] — the transaction coordinator performing one atomic swap
//! - [`scheduler`] — the periodic sweep with bounded retry
//! - [`settings`] — runtime-mutable interval and port bounds

pub mod allocator;
pub mod error;
pub mod rotation;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod types;

pub use error::{Result, RotationError};
pub use rotation::Rotator;
pub use scheduler::{DEFAULT_SWEEP_PERIOD, Sweeper};
pub use settings::{PortRange, RotationSettings, SharedSettings};
pub use store::{MemoryRotationStore, PostgresRotationStore, RotationStore};
pub use types::{
    DOMAIN_COOLDOWN_SECS, DomainEntry, PoolCounts, RecordKind, ResourceRecord,
    RotationSuccess,
};
