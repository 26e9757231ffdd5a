/*
 * Thread Queues
 *
 * FIFO collections of thread ids used for both the ready queue and wait
 * queues. The queues themselves carry no locking discipline: the ready
 * queue is only touched under the scheduler lock, and wait queues are only
 * mutated from scheduler entry points (sleep/wakeup), which run with
 * preemption masked.
 */

use std::collections::VecDeque;
use std::sync::Arc;

use super::thread::ThreadId;

/// Plain FIFO of thread ids. No duplicates by discipline: a thread is in at
/// most one queue at a time.
#[derive(Debug, Default)]
pub(crate) struct FifoQueue {
    items: VecDeque<ThreadId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, tid: ThreadId) {
        self.items.push_back(tid);
    }

    pub fn pop_front(&mut self) -> Option<ThreadId> {
        self.items.pop_front()
    }

    /// Remove a specific thread from the queue. Returns whether it was found.
    pub fn remove(&mut self, tid: ThreadId) -> bool {
        match self.items.iter().position(|&t| t == tid) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.items.contains(&tid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A wait queue threads can sleep on until another thread wakes them.
///
/// Handles are cheap clones of the same underlying queue, so a lock, a
/// condition variable and the scheduler can all refer to one queue. Dropping
/// the last handle destroys the queue; the sync primitives assert emptiness
/// in their `destroy` before letting that happen.
#[derive(Debug, Clone, Default)]
pub struct WaitQueue {
    inner: Arc<spin::Mutex<FifoQueue>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(spin::Mutex::new(FifoQueue::new())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn push_back(&self, tid: ThreadId) {
        self.inner.lock().push_back(tid);
    }

    pub(crate) fn pop_front(&self) -> Option<ThreadId> {
        self.inner.lock().pop_front()
    }
}
