//! In-process distribution network
//!
//! Provides a loopback hub through which multiple instances in the same
//! process exchange operations. Used for integration testing and demos
//! without a real transport, in the same spirit as an in-process
//! simulated radio: the hub is the shared medium, each distributor is an
//! endpoint on it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{decode_operation, encode_operation, DistributionError, Distributor};
use crate::operation::Operation;

const ENDPOINT_QUEUE_DEPTH: usize = 256;

/// The shared medium connecting loopback endpoints.
pub struct LoopbackNetwork {
    /// Registered endpoints keyed by instance id.
    endpoints: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl LoopbackNetwork {
    /// Create a new loopback network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Create an unopened distributor attached to this network.
    pub fn distributor(self: &Arc<Self>) -> LoopbackDistributor {
        LoopbackDistributor {
            network: Arc::clone(self),
            endpoint: Mutex::new(None),
        }
    }
}

struct Endpoint {
    instance_id: String,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// A [`Distributor`] endpoint on a [`LoopbackNetwork`].
pub struct LoopbackDistributor {
    network: Arc<LoopbackNetwork>,
    endpoint: Mutex<Option<Endpoint>>,
}

#[async_trait]
impl Distributor for LoopbackDistributor {
    async fn open(
        &self,
        instance_id: &str,
        port: u16,
        encryption_enabled: bool,
    ) -> Result<(), DistributionError> {
        let mut endpoint = self.endpoint.lock().await;
        if endpoint.is_some() {
            return Err(DistributionError::Backend(
                "endpoint already open".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE_DEPTH);
        {
            let mut endpoints = self.network.endpoints.lock().await;
            if endpoints.contains_key(instance_id) {
                return Err(DistributionError::Backend(format!(
                    "instance {} is already registered",
                    instance_id
                )));
            }
            endpoints.insert(instance_id.to_string(), tx);
        }
        *endpoint = Some(Endpoint {
            instance_id: instance_id.to_string(),
            rx,
        });
        log::debug!(
            "Loopback endpoint {} joined (port {} and encryption={} are transport hints, unused in-process)",
            instance_id,
            port,
            encryption_enabled
        );
        Ok(())
    }

    async fn distribute(&self, operation: &Operation) -> Result<(), DistributionError> {
        let endpoint = self.endpoint.lock().await;
        let endpoint = endpoint.as_ref().ok_or(DistributionError::NotOpen)?;

        let frame = encode_operation(operation)?;

        let peers: Vec<(String, mpsc::Sender<Vec<u8>>)> = {
            let endpoints = self.network.endpoints.lock().await;
            endpoints
                .iter()
                .filter(|(id, _)| **id != endpoint.instance_id)
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect()
        };

        // Best-effort fan-out: a full or closed peer queue drops the frame
        // for that peer only.
        for (peer, tx) in peers {
            if let Err(e) = tx.try_send(frame.clone()) {
                log::warn!("Dropping operation for peer {}: {}", peer, e);
            }
        }
        Ok(())
    }

    async fn sync_state(&self) -> Result<(), DistributionError> {
        let endpoint = self.endpoint.lock().await;
        if endpoint.is_none() {
            return Err(DistributionError::NotOpen);
        }
        // The hub delivers eagerly; there is no reconciliation handshake.
        Ok(())
    }

    async fn drain_pending(&self) -> Result<Vec<Operation>, DistributionError> {
        let mut endpoint = self.endpoint.lock().await;
        let endpoint = endpoint.as_mut().ok_or(DistributionError::NotOpen)?;

        let mut batch = Vec::new();
        while let Ok(frame) = endpoint.rx.try_recv() {
            match decode_operation(&frame) {
                Ok(op) => batch.push(op),
                Err(e) => {
                    log::warn!(
                        "Skipping undecodable frame on endpoint {}: {}",
                        endpoint.instance_id,
                        e
                    );
                }
            }
        }
        Ok(batch)
    }

    async fn shutdown(&self) -> Result<(), DistributionError> {
        let mut endpoint = self.endpoint.lock().await;
        if let Some(endpoint) = endpoint.take() {
            let mut endpoints = self.network.endpoints.lock().await;
            endpoints.remove(&endpoint.instance_id);
            log::debug!("Loopback endpoint {} left", endpoint.instance_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_pair(network: &Arc<LoopbackNetwork>) -> (LoopbackDistributor, LoopbackDistributor) {
        let a = network.distributor();
        let b = network.distributor();
        a.open("inst-a", 0, false).await.unwrap();
        b.open("inst-b", 0, false).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_distribute_reaches_peers_not_self() {
        let network = LoopbackNetwork::new();
        let (a, b) = open_pair(&network).await;

        let op = Operation::insert("a.txt", 1, 1, "hello", "inst-a");
        a.distribute(&op).await.unwrap();

        let at_b = b.drain_pending().await.unwrap();
        assert_eq!(at_b.len(), 1);
        assert_eq!(at_b[0], op);

        let at_a = a.drain_pending().await.unwrap();
        assert!(at_a.is_empty());
    }

    #[tokio::test]
    async fn test_drain_batches_multiple_frames() {
        let network = LoopbackNetwork::new();
        let (a, b) = open_pair(&network).await;

        for line in 1..=3 {
            let op = Operation::insert("a.txt", line, 1, "x", "inst-a");
            a.distribute(&op).await.unwrap();
        }
        let batch = b.drain_pending().await.unwrap();
        assert_eq!(batch.len(), 3);
        // Delivery order is preserved per sender.
        assert_eq!(batch[0].line, 1);
        assert_eq!(batch[2].line, 3);
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_skipped() {
        let network = LoopbackNetwork::new();
        let (a, b) = open_pair(&network).await;

        {
            let endpoints = network.endpoints.lock().await;
            endpoints["inst-b"].try_send(vec![0xde, 0xad]).unwrap();
        }
        let op = Operation::insert("a.txt", 1, 1, "x", "inst-a");
        a.distribute(&op).await.unwrap();

        let batch = b.drain_pending().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0], op);
    }

    #[tokio::test]
    async fn test_requires_open() {
        let network = LoopbackNetwork::new();
        let d = network.distributor();
        let op = Operation::insert("a.txt", 1, 1, "x", "inst-a");
        assert!(matches!(
            d.distribute(&op).await,
            Err(DistributionError::NotOpen)
        ));
        assert!(matches!(
            d.drain_pending().await,
            Err(DistributionError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let network = LoopbackNetwork::new();
        let a = network.distributor();
        let b = network.distributor();
        a.open("inst-a", 0, false).await.unwrap();
        assert!(b.open("inst-a", 0, false).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_deregisters() {
        let network = LoopbackNetwork::new();
        let (a, b) = open_pair(&network).await;
        b.shutdown().await.unwrap();

        let op = Operation::insert("a.txt", 1, 1, "x", "inst-a");
        // No peers left; distribute still succeeds as a best-effort send.
        a.distribute(&op).await.unwrap();
        assert_eq!(network.endpoints.lock().await.len(), 1);
        // Second shutdown is a quiet no-op.
        b.shutdown().await.unwrap();
    }
}
