//! Completion barrier for one analysis batch
//!
//! Each dependency in a batch is identified by its index in the collected
//! sequence. Marking the last unresolved index fires the completion callback,
//! exactly once, whatever the order or concurrency of the calls.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::AggregatorError;

type Callback = Box<dyn FnOnce() + Send>;

/// One-shot barrier over a fixed set of dependency indices
pub struct CompletionAggregator {
    resolved: Box<[AtomicBool]>,
    remaining: AtomicUsize,
    on_complete: Mutex<Option<Callback>>,
}

impl CompletionAggregator {
    /// Create a barrier for `len` dependencies.
    ///
    /// An empty batch is complete on construction and fires `on_complete`
    /// before returning.
    pub fn new(len: usize, on_complete: impl FnOnce() + Send + 'static) -> Self {
        let aggregator = Self {
            resolved: (0..len).map(|_| AtomicBool::new(false)).collect(),
            remaining: AtomicUsize::new(len),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };
        if len == 0 {
            aggregator.fire();
        }
        aggregator
    }

    /// Mark one dependency as resolved.
    ///
    /// Returns `Ok(true)` for the call that completed the batch. Marking an
    /// index twice is a no-op; an index outside the batch is rejected.
    pub fn mark_resolved(&self, index: usize) -> Result<bool, AggregatorError> {
        let flag = self
            .resolved
            .get(index)
            .ok_or(AggregatorError::UnknownDependency {
                index,
                len: self.resolved.len(),
            })?;

        if flag.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fire();
            return Ok(true);
        }
        Ok(false)
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.resolved
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Number of dependencies in the batch
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    fn fire(&self) {
        let callback = match self.on_complete.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}
