//! Peer distribution of committed operations
//!
//! The runtime broadcasts every locally committed operation through the
//! [`Distributor`] port and periodically drains peer-originated
//! operations back out of it. Transport, discovery and encryption are
//! pluggable behind this contract; [`LoopbackNetwork`] provides a
//! complete in-process implementation for tests and demos.

pub mod loopback;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::operation::Operation;

pub use loopback::{LoopbackDistributor, LoopbackNetwork};

/// Error types for distribution operations
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Distributor is not open")]
    NotOpen,

    #[error("Peer channel closed")]
    ChannelClosed,

    #[error("Timed out")]
    Timeout,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Serialize a value to CBOR bytes.
fn cbor_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, String> {
    ciborium::from_reader(data).map_err(|e| e.to_string())
}

/// Encode an operation into its wire frame.
pub fn encode_operation(op: &Operation) -> Result<Vec<u8>, DistributionError> {
    cbor_serialize(op).map_err(DistributionError::Encode)
}

/// Decode an operation from a wire frame.
pub fn decode_operation(data: &[u8]) -> Result<Operation, DistributionError> {
    cbor_deserialize(data).map_err(DistributionError::Decode)
}

/// The distribution port: best-effort broadcast plus inbound drain.
///
/// Contract: `distribute` is an at-least-once delivery attempt with no
/// acknowledgement; `drain_pending` must return within bounded time (an
/// implementation that cannot should surface [`DistributionError::Timeout`]
/// rather than stall the caller); the returned batch is owned by the
/// caller.
#[async_trait]
pub trait Distributor: Send + Sync {
    /// Join the peer network as `instance_id` on `port`
    async fn open(
        &self,
        instance_id: &str,
        port: u16,
        encryption_enabled: bool,
    ) -> Result<(), DistributionError>;

    /// Broadcast one operation to all peers
    async fn distribute(&self, operation: &Operation) -> Result<(), DistributionError>;

    /// Best-effort reconciliation handshake with peers
    async fn sync_state(&self) -> Result<(), DistributionError>;

    /// Drain the batch of peer-originated operations received since the
    /// last call; possibly empty, never blocking indefinitely
    async fn drain_pending(&self) -> Result<Vec<Operation>, DistributionError>;

    /// Leave the network and release transport resources
    async fn shutdown(&self) -> Result<(), DistributionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_frame_round_trip() {
        let op = Operation::replace("src/lib.rs", 4, 2, "new", "old", "inst-a");
        let frame = encode_operation(&op).unwrap();
        let back = decode_operation(&frame).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_operation(&[0xff, 0x00, 0x13]),
            Err(DistributionError::Decode(_))
        ));
    }
}
