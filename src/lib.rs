// Syncopate - Coordination runtime for collaborative editing instances

pub mod distribution;
pub mod metrics;
pub mod notify;
pub mod operation;
pub mod persistence;
pub mod runtime;

pub use distribution::{DistributionError, Distributor, LoopbackDistributor, LoopbackNetwork};
pub use metrics::{InstanceMetrics, MetricsSnapshot};
pub use notify::{ObserverSlot, OperationCallback};
pub use operation::{InstanceId, OpKind, Operation, OperationError};
pub use persistence::{LogError, MemoryLog, OperationLog};
pub use runtime::{Instance, InstanceConfig, RuntimeError};
