//! The coordination runtime
//!
//! An [`Instance`] owns one persistence port and one distribution port,
//! serializes all log access behind a single instance lock, and runs one
//! background task that reconciles with peers on a fixed interval.
//! Callers submit operations, undo and redo them, and observe inbound
//! peer batches through a registered callback.

pub mod config;
pub mod instance;

use thiserror::Error;

use crate::distribution::DistributionError;
use crate::operation::OperationError;
use crate::persistence::LogError;

pub use config::InstanceConfig;
pub use instance::Instance;

/// Error types for runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(#[from] OperationError),

    #[error("Failed to open the operation log: {0}")]
    PersistenceInit(#[source] LogError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] LogError),

    #[error("Failed to join the peer network: {0}")]
    NetworkInit(#[source] DistributionError),

    #[error("Distribution failure: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Operation {operation_id} committed locally but failed to distribute: {source}")]
    DistributionFailed {
        operation_id: u64,
        #[source]
        source: DistributionError,
    },

    #[error("No operation to undo")]
    NoOperationToUndo,

    #[error("No operation to redo")]
    NoOperationToRedo,

    #[error("Instance is already shut down")]
    AlreadyShutDown,
}
