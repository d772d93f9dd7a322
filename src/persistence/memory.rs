//! In-memory operation log
//!
//! A complete, transactional implementation of [`OperationLog`] backed by
//! a plain vector. Used for integration testing and demos without a
//! durable engine, and as the reference behavior external backends are
//! expected to match.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LogError, OperationLog};
use crate::operation::Operation;

#[derive(Clone)]
struct Entry {
    op: Operation,
    undone: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Lifecycle {
    Created,
    Open,
    Closed,
}

struct State {
    lifecycle: Lifecycle,
    db_path: Option<PathBuf>,
    /// Retention bound; zero means unbounded.
    max_history: usize,
    next_id: u64,
    entries: Vec<Entry>,
    /// Snapshot taken at `begin`, restored on `rollback`.
    snapshot: Option<(Vec<Entry>, u64)>,
}

impl State {
    fn require_open(&self) -> Result<(), LogError> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Created => Err(LogError::NotOpen),
            Lifecycle::Closed => Err(LogError::Closed),
        }
    }

    fn require_transaction(&self) -> Result<(), LogError> {
        self.require_open()?;
        if self.snapshot.is_none() {
            return Err(LogError::NoTransaction);
        }
        Ok(())
    }

    /// Oldest-first eviction down to the retention bound, skipping the
    /// newest applied entry (undo target) and the newest undone entry
    /// (redo target).
    fn evict(&mut self) {
        if self.max_history == 0 {
            return;
        }
        let protected: Vec<u64> = [
            self.entries.iter().rev().find(|e| !e.undone),
            self.entries.iter().rev().find(|e| e.undone),
        ]
        .into_iter()
        .flatten()
        .map(|e| e.op.operation_id)
        .collect();

        while self.entries.len() > self.max_history {
            let victim = self
                .entries
                .iter()
                .position(|e| !protected.contains(&e.op.operation_id));
            match victim {
                Some(index) => {
                    let evicted = self.entries.remove(index);
                    log::debug!("Evicted operation {} from history", evicted.op.operation_id);
                }
                None => break,
            }
        }
    }
}

/// In-memory [`OperationLog`]
pub struct MemoryLog {
    state: Mutex<State>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                lifecycle: Lifecycle::Created,
                db_path: None,
                max_history: 0,
                next_id: 1,
                entries: Vec::new(),
                snapshot: None,
            }),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationLog for MemoryLog {
    async fn open(&self, db_path: &Path, max_history: usize) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        match state.lifecycle {
            Lifecycle::Open => return Err(LogError::AlreadyOpen),
            Lifecycle::Closed => return Err(LogError::Closed),
            Lifecycle::Created => {}
        }
        state.lifecycle = Lifecycle::Open;
        state.db_path = Some(db_path.to_path_buf());
        state.max_history = max_history;
        log::debug!(
            "Opened in-memory log (path hint {:?}, retaining {} entries)",
            db_path,
            max_history
        );
        Ok(())
    }

    async fn begin(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_open()?;
        if state.snapshot.is_some() {
            return Err(LogError::TransactionActive);
        }
        state.snapshot = Some((state.entries.clone(), state.next_id));
        Ok(())
    }

    async fn commit(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_transaction()?;
        state.snapshot = None;
        state.evict();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_transaction()?;
        let (entries, next_id) = state.snapshot.take().expect("checked above");
        state.entries = entries;
        state.next_id = next_id;
        Ok(())
    }

    /// Append an operation inside the active transaction.
    ///
    /// Ids are assigned per log: whatever `operation_id` the operation
    /// arrived with (a peer log's id, or zero) is replaced with this
    /// log's next id.
    async fn store(&self, operation: &Operation) -> Result<u64, LogError> {
        let mut state = self.state.lock().await;
        state.require_transaction()?;
        let id = state.next_id;
        state.next_id += 1;
        let mut op = operation.clone();
        op.operation_id = id;
        state.entries.push(Entry { op, undone: false });
        Ok(id)
    }

    async fn last(&self) -> Result<Option<Operation>, LogError> {
        let state = self.state.lock().await;
        state.require_open()?;
        Ok(state.entries.iter().rev().find(|e| !e.undone).map(|e| e.op.clone()))
    }

    async fn last_undone(&self) -> Result<Option<Operation>, LogError> {
        let state = self.state.lock().await;
        state.require_open()?;
        Ok(state.entries.iter().rev().find(|e| e.undone).map(|e| e.op.clone()))
    }

    async fn history(&self, limit: usize) -> Result<Vec<Operation>, LogError> {
        let state = self.state.lock().await;
        state.require_open()?;
        Ok(state
            .entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.op.clone())
            .collect())
    }

    async fn mark_undone(&self, operation_id: u64) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_transaction()?;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.op.operation_id == operation_id)
            .ok_or(LogError::UnknownOperation(operation_id))?;
        entry.undone = true;
        Ok(())
    }

    async fn mark_redone(&self, operation_id: u64) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_transaction()?;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.op.operation_id == operation_id)
            .ok_or(LogError::UnknownOperation(operation_id))?;
        entry.undone = false;
        Ok(())
    }

    async fn close(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        state.require_open()?;
        if state.snapshot.is_some() {
            log::warn!("Log closed with an active transaction; discarding staged changes");
            let (entries, next_id) = state.snapshot.take().expect("checked above");
            state.entries = entries;
            state.next_id = next_id;
        }
        state.lifecycle = Lifecycle::Closed;
        Ok(())
    }
}
