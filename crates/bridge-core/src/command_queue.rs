//! Command queue: the inbound path from clients back to the simulator
//! host. Transports push parsed `CommandRecord`s in as they arrive; the
//! orchestrator drains the whole queue once per host tick and forwards the
//! result through the ABI as a command frame.
//!
//! No duplicate suppression is performed here: multiple commands for the
//! same variable arriving between two ticks are all kept, in FIFO order.
//! Later commands naturally override earlier ones once the host applies
//! them in order, so collapsing them here would just move that same
//! last-wins behavior earlier without changing the outcome.
//!
//! Backed by a plain `std::sync::Mutex` rather than a `tokio::sync` channel:
//! pushes come from several independent transport tasks and the single
//! drain happens from the synchronous, non-suspending `on_update` tick, so
//! there is no `.await` point on either side of the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bridge_protocol::CommandRecord;

pub struct CommandQueue {
    inner: Mutex<VecDeque<CommandRecord>>,
    capacity: usize,
    overflow_count: AtomicU64,
    reject_count: AtomicU64,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            overflow_count: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
        }
    }

    /// Records a command line that failed to parse as JSON, or whose shape
    /// was wrong. Kept on the queue rather than the transport layer so
    /// every transport's rejections land in the same counter the
    /// orchestrator reads.
    pub fn record_reject(&self) {
        self.reject_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(Ordering::Relaxed)
    }

    /// Enqueues a command in FIFO order. Returns `false` (and counts an
    /// overflow) once the queue is at capacity; the producer drops the
    /// command rather than blocking.
    pub fn try_enqueue(&self, record: CommandRecord) -> bool {
        let mut guard = self.inner.lock().expect("command queue mutex poisoned");
        if guard.len() >= self.capacity {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        guard.push_back(record);
        true
    }

    /// Drains every pending command into `out`, in the order each
    /// variable was first seen since the last drain.
    pub fn drain_into(&self, out: &mut Vec<CommandRecord>) {
        let mut guard = self.inner.lock().expect("command queue mutex poisoned");
        out.extend(guard.drain(..));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("command queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(variable: &str, value: f64) -> CommandRecord {
        CommandRecord { variable: variable.to_owned(), value }
    }

    #[test]
    fn enqueue_then_drain_preserves_order() {
        let q = CommandQueue::new(8);
        assert!(q.try_enqueue(cmd("Controls.Throttle", 0.5)));
        assert!(q.try_enqueue(cmd("Controls.Flaps", 1.0)));
        let mut out = Vec::new();
        q.drain_into(&mut out);
        assert_eq!(out, vec![cmd("Controls.Throttle", 0.5), cmd("Controls.Flaps", 1.0)]);
        assert!(q.is_empty());
    }

    #[test]
    fn repeated_commands_for_the_same_variable_are_all_kept_in_fifo_order() {
        let q = CommandQueue::new(8);
        assert!(q.try_enqueue(cmd("Controls.Throttle", 0.1)));
        assert!(q.try_enqueue(cmd("Controls.Throttle", 0.2)));
        assert!(q.try_enqueue(cmd("Controls.Throttle", 0.9)));
        assert_eq!(q.len(), 3);
        let mut out = Vec::new();
        q.drain_into(&mut out);
        assert_eq!(
            out,
            vec![
                cmd("Controls.Throttle", 0.1),
                cmd("Controls.Throttle", 0.2),
                cmd("Controls.Throttle", 0.9),
            ]
        );
    }

    #[test]
    fn full_queue_counts_overflow_and_rejects_further_pushes() {
        let q = CommandQueue::new(2);
        assert!(q.try_enqueue(cmd("A", 1.0)));
        assert!(q.try_enqueue(cmd("B", 2.0)));
        assert!(!q.try_enqueue(cmd("C", 3.0)));
        assert_eq!(q.overflow_count(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_on_empty_queue_is_a_no_op() {
        let q = CommandQueue::new(4);
        let mut out = Vec::new();
        q.drain_into(&mut out);
        assert!(out.is_empty());
    }
}
