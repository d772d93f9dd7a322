//! Observer dispatch for inbound operation batches
//!
//! One observer slot per instance; the background sync loop delivers each
//! drained batch to whichever callback is registered at that moment.

use std::sync::RwLock;

use crate::operation::Operation;

/// Callback invoked with each batch of peer-originated operations.
/// User context is whatever the closure captures.
pub type OperationCallback = Box<dyn Fn(&[Operation]) + Send + Sync>;

/// Single-slot observer registration; the last registration wins.
///
/// Delivery is synchronous from the sync loop, so observers should not
/// block for long periods. No instance lock is held during the callback,
/// which makes re-entrant calls back into the runtime safe.
pub struct ObserverSlot {
    slot: RwLock<Option<OperationCallback>>,
}

impl ObserverSlot {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replace the current observer. Guarantees the next delivered batch
    /// uses the new callback.
    pub fn register(&self, callback: OperationCallback) {
        let mut slot = self.slot.write().expect("observer slot poisoned");
        *slot = Some(callback);
    }

    /// Remove the current observer, if any.
    pub fn clear(&self) {
        let mut slot = self.slot.write().expect("observer slot poisoned");
        *slot = None;
    }

    pub fn is_registered(&self) -> bool {
        self.slot.read().expect("observer slot poisoned").is_some()
    }

    /// Deliver a batch to the registered observer, if one exists.
    /// Returns whether a callback was invoked.
    pub fn deliver(&self, batch: &[Operation]) -> bool {
        let slot = self.slot.read().expect("observer slot poisoned");
        match slot.as_ref() {
            Some(callback) => {
                callback(batch);
                true
            }
            None => false,
        }
    }
}

impl Default for ObserverSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_deliver_without_observer() {
        let slot = ObserverSlot::new();
        assert!(!slot.is_registered());
        assert!(!slot.deliver(&[]));
    }

    #[test]
    fn test_last_registration_wins() {
        let slot = ObserverSlot::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&first);
        slot.register(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        let count = Arc::clone(&second);
        slot.register(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        let batch = vec![Operation::insert("a.txt", 1, 1, "x", "inst-a")];
        assert!(slot.deliver(&batch));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_unregisters() {
        let slot = ObserverSlot::new();
        slot.register(Box::new(|_| {}));
        assert!(slot.is_registered());
        slot.clear();
        assert!(!slot.deliver(&[]));
    }

    #[test]
    fn test_batch_passed_through() {
        let slot = ObserverSlot::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        slot.register(Box::new(move |batch| {
            count.store(batch.len(), Ordering::SeqCst);
        }));
        let batch = vec![
            Operation::insert("a.txt", 1, 1, "x", "inst-a"),
            Operation::delete("a.txt", 1, 1, "x", "inst-a"),
        ];
        slot.deliver(&batch);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
