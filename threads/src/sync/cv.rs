/*
 * Condition Variable
 *
 * Mesa semantics: signalling moves waiters to the ready queue but the
 * signaller keeps running; a woken waiter re-acquires the lock and must
 * re-check its predicate in a loop. The release-and-sleep in `wait` runs
 * under the preemption mask, so no wakeup can slip between the two.
 */

use std::sync::Arc;

use crate::scheduler::preempt::PreemptOff;
use crate::scheduler::queue::WaitQueue;
use crate::scheduler::ThreadSystem;

use super::Lock;

pub struct CondVar {
    sys: Arc<ThreadSystem>,
    waiters: WaitQueue,
}

impl CondVar {
    pub fn new(sys: Arc<ThreadSystem>) -> Self {
        Self {
            sys,
            waiters: WaitQueue::new(),
        }
    }

    /// Release `lock`, sleep until signalled, re-acquire `lock`.
    ///
    /// The caller must hold `lock` and must re-check its predicate after
    /// this returns.
    pub fn wait(&self, lock: &Lock) {
        let _mask = PreemptOff::new();
        assert!(
            lock.owned_by_current(),
            "cv wait requires holding the lock"
        );
        lock.release();
        let _ = self.sys.sleep(&self.waiters);
        lock.acquire();
    }

    /// Wake the longest-sleeping waiter. The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        let _mask = PreemptOff::new();
        assert!(
            lock.owned_by_current(),
            "cv signal requires holding the lock"
        );
        self.sys.wakeup(&self.waiters, false);
    }

    /// Wake every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        let _mask = PreemptOff::new();
        assert!(
            lock.owned_by_current(),
            "cv broadcast requires holding the lock"
        );
        self.sys.wakeup(&self.waiters, true);
    }

    /// Tear the condition variable down.
    ///
    /// # Panics
    /// Panics if threads are still waiting on it.
    pub fn destroy(self) {
        assert!(self.waiters.is_empty(), "destroying a cv with waiters");
    }
}
