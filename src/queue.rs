//! [`HandoffQueue`]: the single-producer, single-consumer FIFO between the
//! listener and the dispatcher.
//!
//! Modelled on the `Mutex` + `Condvar` + `VecDeque` shape of
//! `UnorderedElementQueue` (`btrfs_send_stream_upgrade/src/mp/sync/unordered_element_queue.rs`),
//! adapted from its unordered dequeue-one semantics to FIFO batch-splice
//! semantics plus the `busy` quiescence probe this pipeline needs.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::event::Event;

struct Inner {
    queue: VecDeque<Event>,
    /// Set just before a drained batch is handed to the dispatcher, cleared
    /// just before the next wait, so [`HandoffQueue::is_busy`] can see that
    /// the pipeline is still working a snapshot even once the queue itself
    /// has been emptied by the drain.
    busy: bool,
    shutdown: bool,
}

/// The FIFO of pending events, shared between exactly one listener (the
/// producer) and one dispatcher (the consumer).
pub struct HandoffQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for HandoffQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                busy: false,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Splices `batch` onto the tail of the queue and wakes the dispatcher.
    /// Called by the listener under a single lock acquisition, preserving
    /// listener-insertion order for everything flushed in one call.
    pub fn append_batch(&self, batch: VecDeque<Event>) {
        if batch.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.extend(batch);
        self.condvar.notify_one();
    }

    /// Waits for the queue to become non-empty (or for shutdown), then
    /// atomically transfers the entire queue to the caller. Returns an
    /// empty batch only when shutdown has been requested and nothing was
    /// left to deliver.
    pub fn drain(&self) -> VecDeque<Event> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if !inner.queue.is_empty() || inner.shutdown {
                break;
            }
            inner.busy = false;
            inner = self
                .condvar
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner.busy = true;
        std::mem::take(&mut inner.queue)
    }

    /// `true` iff there is pending work: either the queue is non-empty, or
    /// the dispatcher is still servicing the last batch it drained.
    pub fn is_busy(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        !inner.queue.is_empty() || inner.busy
    }

    /// Requests shutdown: wakes a blocked `drain()` so it can observe
    /// `shutdown` and return (possibly with a final non-empty batch, if one
    /// was appended before shutdown was requested).
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shutdown = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::env::EnvMap;
    use crate::source::SourceHandle;

    fn ev(kernel: &str) -> Event {
        Event::new(
            Action::Add,
            format!("/devices/.../{kernel}").into_boxed_str(),
            EnvMap::default(),
            SourceHandle::noop(),
        )
    }

    #[test]
    fn append_then_drain_preserves_order() {
        let q = HandoffQueue::new();
        let mut batch = VecDeque::new();
        batch.push_back(ev("sda"));
        batch.push_back(ev("sdb"));
        q.append_batch(batch);

        let drained = q.drain();
        let kernels: Vec<&str> = drained.iter().map(Event::kernel).collect();
        assert_eq!(kernels, vec!["sda", "sdb"]);
    }

    #[test]
    fn is_busy_true_while_draining_and_false_after_shutdown_drain() {
        let q = HandoffQueue::new();
        assert!(!q.is_busy());

        let mut batch = VecDeque::new();
        batch.push_back(ev("sda"));
        q.append_batch(batch);
        assert!(q.is_busy());

        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        // Busy stays true until the *next* drain call starts waiting.
        assert!(q.is_busy());
    }

    #[test]
    fn shutdown_unblocks_drain_with_empty_batch() {
        let q = HandoffQueue::new();
        q.shutdown();
        let drained = q.drain();
        assert!(drained.is_empty());
    }
}
