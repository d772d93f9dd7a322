//! Instance lifecycle, submit/undo/redo, and the background sync loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::{InstanceConfig, RuntimeError};
use crate::distribution::Distributor;
use crate::metrics::{InstanceMetrics, MetricsSnapshot};
use crate::notify::ObserverSlot;
use crate::operation::Operation;
use crate::persistence::{LogError, OperationLog};

/// One running coordination instance.
///
/// Owns its persistence and distribution ports for its whole lifetime.
/// All log access, foreground and background, is serialized by a single
/// instance lock; distribution happens outside the lock so local commits
/// never wait on the network.
pub struct Instance {
    config: InstanceConfig,
    log: Arc<dyn OperationLog>,
    network: Arc<dyn Distributor>,
    observers: ObserverSlot,
    metrics: InstanceMetrics,
    /// Serializes every transaction against the log.
    op_lock: Mutex<()>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    sync_task: StdMutex<Option<JoinHandle<()>>>,
    /// Last issued commit timestamp, for per-instance monotonicity.
    last_timestamp: AtomicU64,
}

impl Instance {
    /// Validate the configuration, open both ports, and start the sync
    /// loop. If the distribution port fails to open, the already-opened
    /// persistence port is closed before returning, so a failed
    /// initialization leaks nothing.
    pub async fn initialize(
        config: InstanceConfig,
        log: Arc<dyn OperationLog>,
        network: Arc<dyn Distributor>,
    ) -> Result<Arc<Self>, RuntimeError> {
        config.validate()?;

        log.open(&config.db_path, config.max_history_entries)
            .await
            .map_err(RuntimeError::PersistenceInit)?;

        if let Err(e) = network
            .open(
                &config.instance_id,
                config.coordination_port,
                config.encryption_enabled,
            )
            .await
        {
            if let Err(close_err) = log.close().await {
                log::warn!(
                    "Closing the log after a failed network init also failed: {}",
                    close_err
                );
            }
            return Err(RuntimeError::NetworkInit(e));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let instance = Arc::new(Self {
            config,
            log,
            network,
            observers: ObserverSlot::new(),
            metrics: InstanceMetrics::new(),
            op_lock: Mutex::new(()),
            running: AtomicBool::new(true),
            shutdown_tx,
            sync_task: StdMutex::new(None),
            last_timestamp: AtomicU64::new(0),
        });

        let handle = instance.spawn_sync_loop();
        *instance.sync_task.lock().expect("sync task slot poisoned") = Some(handle);

        log::info!(
            "Instance {} initialized (sync every {}ms)",
            instance.config.instance_id,
            instance.config.sync_interval_ms
        );
        Ok(instance)
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replace the observer that receives inbound peer batches.
    /// The next delivered batch uses the new callback.
    pub fn register_callback(&self, callback: impl Fn(&[Operation]) + Send + Sync + 'static) {
        self.observers.register(Box::new(callback));
    }

    /// Drop the current observer, if any.
    pub fn clear_callback(&self) {
        self.observers.clear();
    }

    /// Commit an operation locally, then broadcast it to peers.
    ///
    /// The commit happens under the instance lock; distribution does not.
    /// A distribution failure is reported but never rolls back the local
    /// commit: the operation is durable and peers catch up through the
    /// periodic sync pass, not through a submit-side retry.
    pub async fn submit(&self, mut operation: Operation) -> Result<u64, RuntimeError> {
        self.ensure_running()?;
        operation.validate()?;

        let operation_id = {
            let _guard = self.op_lock.lock().await;
            operation.timestamp_ns = self.next_timestamp();
            self.log.begin().await?;
            let id = match self.log.store(&operation).await {
                Ok(id) => id,
                Err(e) => {
                    self.try_rollback().await;
                    return Err(RuntimeError::Persistence(e));
                }
            };
            if let Err(e) = self.log.commit().await {
                self.try_rollback().await;
                return Err(RuntimeError::Persistence(e));
            }
            id
        };
        operation.operation_id = operation_id;
        self.metrics.record_submitted();
        log::debug!(
            "Committed {:?} on {} as operation {}",
            operation.kind,
            operation.file_path,
            operation_id
        );

        match self.network.distribute(&operation).await {
            Ok(()) => {
                self.metrics.record_distributed();
                Ok(operation_id)
            }
            Err(source) => {
                log::warn!(
                    "Operation {} committed but failed to distribute: {}",
                    operation_id,
                    source
                );
                Err(RuntimeError::DistributionFailed { operation_id, source })
            }
        }
    }

    /// Reverse the most recent applied operation.
    ///
    /// Marks the entry undone in its own transaction, then distributes
    /// the computed reversal to peers. The reversal itself is not
    /// appended locally; the undone flag is the local record.
    pub async fn undo(&self) -> Result<Operation, RuntimeError> {
        self.ensure_running()?;

        let (undone_id, reversal) = {
            let _guard = self.op_lock.lock().await;
            let last = self
                .log
                .last()
                .await?
                .ok_or(RuntimeError::NoOperationToUndo)?;
            self.log.begin().await?;
            if let Err(e) = self.log.mark_undone(last.operation_id).await {
                self.try_rollback().await;
                return Err(RuntimeError::Persistence(e));
            }
            if let Err(e) = self.log.commit().await {
                self.try_rollback().await;
                return Err(RuntimeError::Persistence(e));
            }
            let mut reversal = last.reversal(self.config.instance_id.clone());
            reversal.timestamp_ns = self.next_timestamp();
            (last.operation_id, reversal)
        };
        self.metrics.record_undo();
        log::debug!("Undid operation {}", undone_id);

        match self.network.distribute(&reversal).await {
            Ok(()) => {
                self.metrics.record_distributed();
                Ok(reversal)
            }
            Err(source) => Err(RuntimeError::DistributionFailed {
                operation_id: undone_id,
                source,
            }),
        }
    }

    /// Re-apply the most recently undone operation.
    ///
    /// Symmetric to [`undo`](Self::undo): clears the undone flag in its
    /// own transaction, recomputes the forward operation, and distributes
    /// it with a fresh timestamp and this instance as origin.
    pub async fn redo(&self) -> Result<Operation, RuntimeError> {
        self.ensure_running()?;

        let (redone_id, forward) = {
            let _guard = self.op_lock.lock().await;
            let target = self
                .log
                .last_undone()
                .await?
                .ok_or(RuntimeError::NoOperationToRedo)?;
            self.log.begin().await?;
            if let Err(e) = self.log.mark_redone(target.operation_id).await {
                self.try_rollback().await;
                return Err(RuntimeError::Persistence(e));
            }
            if let Err(e) = self.log.commit().await {
                self.try_rollback().await;
                return Err(RuntimeError::Persistence(e));
            }
            let mut forward = target.clone();
            forward.operation_id = 0;
            forward.origin = self.config.instance_id.clone();
            forward.timestamp_ns = self.next_timestamp();
            (target.operation_id, forward)
        };
        self.metrics.record_redo();
        log::debug!("Redid operation {}", redone_id);

        match self.network.distribute(&forward).await {
            Ok(()) => {
                self.metrics.record_distributed();
                Ok(forward)
            }
            Err(source) => Err(RuntimeError::DistributionFailed {
                operation_id: redone_id,
                source,
            }),
        }
    }

    /// Bounded reverse-chronological snapshot of the log.
    pub async fn history(&self, limit: usize) -> Result<Vec<Operation>, RuntimeError> {
        self.ensure_running()?;
        let _guard = self.op_lock.lock().await;
        Ok(self.log.history(limit).await?)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.config.instance_id)
    }

    /// Stop the sync loop, wait for it to finish its current iteration,
    /// then close the distribution and persistence ports in that order.
    /// Idempotent in the sense that a second call reports
    /// [`RuntimeError::AlreadyShutDown`] without touching the ports again.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyShutDown);
        }
        let _ = self.shutdown_tx.send(());

        let handle = self.sync_task.lock().expect("sync task slot poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Sync task ended abnormally: {}", e);
            }
        }

        // Any in-flight submission holds the lock until its transaction
        // resolves; taking it here means the ports close only after that.
        let _guard = self.op_lock.lock().await;
        let network_result = self.network.shutdown().await;
        let log_result = self.log.close().await;
        network_result.map_err(RuntimeError::Distribution)?;
        log_result?;

        log::info!("Instance {} shut down", self.config.instance_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Background synchronization
    // ------------------------------------------------------------------

    fn spawn_sync_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let instance = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let interval = self.config.sync_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if !instance.running.load(Ordering::SeqCst) {
                            break;
                        }
                        instance.sync_pass(interval).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
            log::debug!("Sync loop for {} stopped", instance.config.instance_id);
        })
    }

    /// One reconciliation pass: handshake, drain, notify, persist.
    /// Every failure is contained to this pass; the loop always reaches
    /// its next sleep.
    async fn sync_pass(&self, interval: Duration) {
        match tokio::time::timeout(interval, self.network.sync_state()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_sync_failure();
                log::warn!("State sync with peers failed: {}", e);
            }
            Err(_) => {
                self.metrics.record_sync_failure();
                log::warn!(
                    "State sync exceeded the {}ms interval; skipping this pass",
                    interval.as_millis()
                );
            }
        }

        let batch = match tokio::time::timeout(interval, self.network.drain_pending()).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                self.metrics.record_sync_failure();
                log::warn!("Draining pending operations failed: {}", e);
                return;
            }
            Err(_) => {
                self.metrics.record_sync_failure();
                log::warn!(
                    "Drain exceeded the {}ms interval; skipping this pass",
                    interval.as_millis()
                );
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        self.metrics.record_received(batch.len() as u64);
        log::debug!(
            "Received {} peer operations on {}",
            batch.len(),
            self.config.instance_id
        );

        // Observer first, without the instance lock, so the callback may
        // re-enter submit/undo safely.
        self.observers.deliver(&batch);
        self.persist_batch(&batch).await;
    }

    /// Persist an inbound batch under the instance lock, one transaction
    /// per entry, best effort: one failure never blocks the rest.
    async fn persist_batch(&self, batch: &[Operation]) {
        let _guard = self.op_lock.lock().await;
        let mut failures = 0usize;
        for op in batch {
            match self.persist_one(op).await {
                Ok(_) => self.metrics.record_persisted_from_peers(1),
                Err(e) => {
                    failures += 1;
                    self.metrics.record_persist_failure();
                    log::warn!("Failed to persist peer operation from {}: {}", op.origin, e);
                }
            }
        }
        if failures > 0 {
            log::error!(
                "{} of {} peer operations could not be persisted on {}",
                failures,
                batch.len(),
                self.config.instance_id
            );
        }
    }

    async fn persist_one(&self, op: &Operation) -> Result<u64, LogError> {
        self.log.begin().await?;
        let id = match self.log.store(op).await {
            Ok(id) => id,
            Err(e) => {
                self.try_rollback().await;
                return Err(e);
            }
        };
        if let Err(e) = self.log.commit().await {
            self.try_rollback().await;
            return Err(e);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyShutDown);
        }
        Ok(())
    }

    /// Issue a commit timestamp that never decreases within this instance.
    fn next_timestamp(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        let prev = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }

    async fn try_rollback(&self) {
        if let Err(e) = self.log.rollback().await {
            log::warn!("Rollback failed: {}", e);
        }
    }
}
