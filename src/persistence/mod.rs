//! The transactional operation log behind the coordination runtime
//!
//! The runtime persists every committed operation through the
//! [`OperationLog`] port. Durable engines (embedded SQL, LSM stores)
//! live outside this crate; [`MemoryLog`] is the in-process reference
//! implementation used by tests and demos.

pub mod memory;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::operation::Operation;

pub use memory::MemoryLog;

/// Error types for log operations
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Log is not open")]
    NotOpen,

    #[error("Log is already open")]
    AlreadyOpen,

    #[error("Log has been closed")]
    Closed,

    #[error("A transaction is already active; transactions do not nest")]
    TransactionActive,

    #[error("No transaction is active")]
    NoTransaction,

    #[error("No operation with id {0}")]
    UnknownOperation(u64),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// The persistence port: a durable, transactional log keyed by operation id.
///
/// Contract: transactions do not nest; `store`, `mark_undone` and
/// `mark_redone` are only valid inside an open transaction; `last`,
/// `last_undone` and `history` return snapshots independent of later
/// mutation. `max_history` passed to `open` bounds retained entries with
/// oldest-first eviction, which must never remove the newest applied
/// entry (the undo target) or the newest undone entry (the redo target).
#[async_trait]
pub trait OperationLog: Send + Sync {
    /// Open the log at `db_path`, retaining at most `max_history` entries
    async fn open(&self, db_path: &Path, max_history: usize) -> Result<(), LogError>;

    /// Begin a transaction
    async fn begin(&self) -> Result<(), LogError>;

    /// Commit the active transaction
    async fn commit(&self) -> Result<(), LogError>;

    /// Roll back the active transaction
    async fn rollback(&self) -> Result<(), LogError>;

    /// Append an operation, returning its log-assigned id
    async fn store(&self, operation: &Operation) -> Result<u64, LogError>;

    /// The newest entry not currently marked undone
    async fn last(&self) -> Result<Option<Operation>, LogError>;

    /// The newest entry marked undone and not yet redone
    async fn last_undone(&self) -> Result<Option<Operation>, LogError>;

    /// Up to `limit` entries, newest first
    async fn history(&self, limit: usize) -> Result<Vec<Operation>, LogError>;

    /// Flag an entry as undone
    async fn mark_undone(&self, operation_id: u64) -> Result<(), LogError>;

    /// Clear the undone flag on an entry
    async fn mark_redone(&self, operation_id: u64) -> Result<(), LogError>;

    /// Close the log and release its resources
    async fn close(&self) -> Result<(), LogError>;
}
