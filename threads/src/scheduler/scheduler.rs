/*
 * Scheduler Table
 *
 * The mechanism half of the scheduler: a fixed-size thread table indexed by
 * thread id, the FIFO ready queue, and the bookkeeping shared by every
 * entry point (lazy reaping, wakeup). The policy is strict FIFO: ready
 * threads run in the order they became ready.
 *
 * Everything here is called with the scheduler lock held and preemption
 * masked; see the public API layer in mod.rs.
 */

use super::queue::{FifoQueue, WaitQueue};
use super::thread::{Tcb, ThreadId, ThreadState};

pub(crate) struct Scheduler {
    pub slots: Vec<Tcb>,
    pub ready: FifoQueue,
    pub running: ThreadId,
    /// Set by thread exit; the next scheduler entry reaps exited slots.
    pub reap_pending: bool,
}

impl Scheduler {
    /// Build the table with the bootstrap thread (slot 0) running.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "thread table needs room for the bootstrap thread");

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Tcb::uninit());
        }
        slots[0].state = ThreadState::Running;

        Self {
            slots,
            ready: FifoQueue::new(),
            running: ThreadId(0),
            reap_pending: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_range(&self, tid: ThreadId) -> bool {
        tid.0 < self.slots.len()
    }

    pub fn state(&self, tid: ThreadId) -> ThreadState {
        self.slots[tid.0].state
    }

    /// Lowest-numbered free slot; thread ids are reused lowest-first.
    pub fn lowest_uninit(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|tcb| tcb.state == ThreadState::Uninit)
    }

    /// Lazy reap: join the backing OS thread of every exited slot and reset
    /// it to UNINIT. Cheap when nothing exited since the last pass.
    ///
    /// The bootstrap slot has no join handle; its backing thread is the
    /// process main thread and is never joined.
    pub fn reap(&mut self) {
        if !self.reap_pending {
            return;
        }
        self.reap_pending = false;

        for (i, tcb) in self.slots.iter_mut().enumerate() {
            if tcb.state != ThreadState::Exited {
                continue;
            }
            if let Some(handle) = tcb.handle.take() {
                if handle.join().is_err() {
                    log::warn!("backing thread of {} ended abnormally", ThreadId(i));
                }
            }
            *tcb = Tcb::uninit();
            log::debug!("reaped {}", ThreadId(i));
        }
    }

    /// Move threads from `wq` to the ready-queue tail, FIFO order preserved.
    ///
    /// A sleeping thread becomes READY; a thread killed while sleeping keeps
    /// its KILLED state so the next schedule terminates it. Returns how many
    /// threads were moved.
    pub fn wake_from(&mut self, wq: &WaitQueue, all: bool) -> usize {
        let mut woken = 0;
        while let Some(tid) = wq.pop_front() {
            if self.slots[tid.0].state == ThreadState::Sleeping {
                self.slots[tid.0].state = ThreadState::Ready;
            }
            self.ready.push_back(tid);
            woken += 1;
            if !all {
                break;
            }
        }
        woken
    }
}
