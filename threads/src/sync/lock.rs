/*
 * Blocking Lock
 *
 * State is {held, owner} plus a wait queue of blocked acquirers. Release
 * wakes the entire queue; the first woken thread to be scheduled takes the
 * lock and the rest observe it held and go back to sleep. That trades a
 * thundering herd for immunity to lost wakeups.
 */

use std::sync::Arc;

use crate::scheduler::queue::WaitQueue;
use crate::scheduler::preempt::PreemptOff;
use crate::scheduler::{ThreadId, ThreadSystem};

struct LockState {
    held: bool,
    owner: Option<ThreadId>,
}

pub struct Lock {
    pub(crate) sys: Arc<ThreadSystem>,
    state: spin::Mutex<LockState>,
    waiters: WaitQueue,
}

impl Lock {
    pub fn new(sys: Arc<ThreadSystem>) -> Self {
        Self {
            sys,
            state: spin::Mutex::new(LockState {
                held: false,
                owner: None,
            }),
            waiters: WaitQueue::new(),
        }
    }

    /// Block until the lock is free, then take it.
    pub fn acquire(&self) {
        let _mask = PreemptOff::new();
        let cur = self.sys.id();
        loop {
            {
                let mut state = self.state.lock();
                if !state.held {
                    state.held = true;
                    state.owner = Some(cur);
                    return;
                }
            }
            let _ = self.sys.sleep(&self.waiters);
        }
    }

    /// Release the lock and wake every waiter.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold the lock; releasing a
    /// lock one does not own is a programming fault, not an error case.
    pub fn release(&self) {
        let _mask = PreemptOff::new();
        let cur = self.sys.id();
        {
            let mut state = self.state.lock();
            assert_eq!(
                state.owner,
                Some(cur),
                "lock released by a thread that does not hold it"
            );
            state.held = false;
            state.owner = None;
        }
        self.sys.wakeup(&self.waiters, true);
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    pub(crate) fn owned_by_current(&self) -> bool {
        self.state.lock().owner == Some(self.sys.id())
    }

    pub(crate) fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Tear the lock down.
    ///
    /// # Panics
    /// Panics if the lock is still held or threads are still waiting on it.
    pub fn destroy(self) {
        assert!(!self.state.lock().held, "destroying a held lock");
        assert!(self.waiters.is_empty(), "destroying a lock with waiters");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ThreadError, YieldTo};

    fn drain(sys: &Arc<ThreadSystem>) {
        while sys.yield_to(YieldTo::Any).is_ok() {}
    }

    #[test]
    fn uncontended_acquire_release() {
        let sys = ThreadSystem::with_capacity(2);
        let lock = Lock::new(Arc::clone(&sys));
        assert_eq!(lock.owner(), None);
        lock.acquire();
        assert_eq!(lock.owner(), Some(sys.id()));
        lock.release();
        assert_eq!(lock.owner(), None);
        lock.destroy();
    }

    // 8 threads, 10 000 lock-protected increments each.
    #[test]
    fn counter_increments_add_up() {
        let sys = ThreadSystem::with_capacity(16);
        let lock = Arc::new(Lock::new(Arc::clone(&sys)));
        let counter = Arc::new(spin::Mutex::new(0u64));

        for _ in 0..8 {
            let lock2 = Arc::clone(&lock);
            let counter2 = Arc::clone(&counter);
            sys.create(move || {
                for _ in 0..10_000 {
                    lock2.acquire();
                    *counter2.lock() += 1;
                    lock2.release();
                }
            })
            .unwrap();
        }

        drain(&sys);
        assert_eq!(*counter.lock(), 80_000);
    }

    // Same shape but with a yield inside the critical section, so every
    // increment is a read-modify-write interleaved with the other threads.
    // Only the lock keeps the result exact.
    #[test]
    fn mutual_exclusion_under_contention() {
        let sys = ThreadSystem::with_capacity(16);
        let lock = Arc::new(Lock::new(Arc::clone(&sys)));
        let counter = Arc::new(spin::Mutex::new(0u64));

        for _ in 0..8 {
            let sys2 = Arc::clone(&sys);
            let lock2 = Arc::clone(&lock);
            let counter2 = Arc::clone(&counter);
            sys.create(move || {
                for _ in 0..200 {
                    lock2.acquire();
                    let seen = *counter2.lock();
                    let _ = sys2.yield_to(YieldTo::Any);
                    *counter2.lock() = seen + 1;
                    lock2.release();
                }
            })
            .unwrap();
        }

        drain(&sys);
        assert_eq!(*counter.lock(), 8 * 200);
        assert!(lock.waiters().is_empty());
    }

    #[test]
    fn blocked_acquirers_sleep_not_spin() {
        let sys = ThreadSystem::with_capacity(4);
        let lock = Arc::new(Lock::new(Arc::clone(&sys)));

        lock.acquire();
        let lock2 = Arc::clone(&lock);
        let t = sys.create(move || {
            lock2.acquire();
            lock2.release();
        })
        .unwrap();

        // The contender runs, observes the lock held, and goes to sleep on
        // the lock's wait queue.
        assert_eq!(sys.yield_to(YieldTo::Any), Ok(t));
        assert_eq!(lock.waiters().len(), 1);
        assert_eq!(sys.ready_count(), 0);
        assert_eq!(sys.yield_to(YieldTo::Any), Err(ThreadError::NoneRunnable));

        lock.release();
        drain(&sys);
        assert_eq!(lock.owner(), None);
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn release_by_non_owner_panics() {
        let sys = ThreadSystem::with_capacity(2);
        let lock = Lock::new(sys);
        lock.release();
    }

    #[test]
    #[should_panic(expected = "destroying a held lock")]
    fn destroy_of_held_lock_panics() {
        let sys = ThreadSystem::with_capacity(2);
        let lock = Lock::new(sys);
        lock.acquire();
        lock.destroy();
    }
}
