/*
 * User-Level Thread Scheduler
 *
 * This module is the public API layer over the scheduler table: thread
 * creation, yielding, exiting, killing, sleeping/waking and waiting. The
 * execution model is single-core cooperative with timer-driven preemption:
 * at most one thread of a system runs at a time, ready threads are
 * scheduled strict-FIFO, and the only concurrency the scheduler has to
 * defend against is a preemption tick arriving at a preemption point.
 *
 * Every entry point follows the same discipline:
 * 1. Mask preemption for the whole call (restored on every exit path).
 * 2. Take the scheduler lock, reap exited threads if an exit is pending,
 *    and update the table and queues.
 * 3. Drop the lock, then perform the context switch by signalling the
 *    target's baton and blocking on our own.
 * 4. On resumption, terminate instead of returning if we were killed.
 *
 * Systems are instances, not process globals: tests build several
 * independent schedulers side by side. The thread that calls `init`
 * becomes the bootstrap thread (id 0) of that system.
 */

pub mod preempt;
pub mod queue;
pub mod thread;

mod context;
mod scheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use self::context::Baton;
use self::preempt::PreemptOff;
use self::scheduler::Scheduler;
use self::thread::Tcb;

pub use self::queue::WaitQueue;
pub use self::thread::{
    MAX_THREADS, MIN_STACK, ThreadError, ThreadId, ThreadState, ThreadStats, YieldTo,
};

/// One user-level threading instance: thread table, ready queue and
/// preemption state.
pub struct ThreadSystem {
    table: spin::Mutex<Scheduler>,
    pub(crate) tick_pending: AtomicBool,
    ticker_started: AtomicBool,
}

/// Everything a context switch needs once the table has been updated.
/// Batons are cloned out so the scheduler lock is not held across the
/// switch itself.
struct SwitchPlan {
    next: ThreadId,
    next_baton: Arc<Baton>,
    cur_baton: Arc<Baton>,
}

impl ThreadSystem {
    /// One-time setup. The calling OS thread becomes the bootstrap thread
    /// (id 0, RUNNING); the ready queue starts empty.
    pub fn init() -> Arc<Self> {
        Self::with_capacity(MAX_THREADS)
    }

    /// Like [`init`](Self::init) with a smaller fixed thread table. The
    /// table never grows.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        context::install_exit_hook();
        context::CURRENT_TID.set(0);
        preempt::set(false);
        log::info!("thread system initialized with {} slots", capacity);
        Arc::new(Self {
            table: spin::Mutex::new(Scheduler::new(capacity)),
            tick_pending: AtomicBool::new(false),
            ticker_started: AtomicBool::new(false),
        })
    }

    /// Id of the calling thread.
    pub fn id(&self) -> ThreadId {
        ThreadId(context::CURRENT_TID.get())
    }

    /// Number of threads currently in the ready queue.
    pub fn ready_count(&self) -> usize {
        self.table.lock().ready.len()
    }

    /// Size of the thread table.
    pub fn capacity(&self) -> usize {
        self.table.lock().capacity()
    }

    /// Id of the thread the scheduler last dispatched. Always equals
    /// [`id`](Self::id) when called from a thread of this system.
    pub fn running_tid(&self) -> ThreadId {
        self.table.lock().running
    }

    /// Snapshot of every in-use table slot.
    pub fn stats(&self) -> Vec<ThreadStats> {
        let sched = self.table.lock();
        sched
            .slots
            .iter()
            .enumerate()
            .filter(|(_, tcb)| tcb.state != ThreadState::Uninit)
            .map(|(i, tcb)| ThreadStats {
                id: ThreadId(i),
                state: tcb.state,
            })
            .collect()
    }

    /// Create a new thread running `entry`, READY at the tail of the ready
    /// queue.
    ///
    /// Exited slots are reaped first, and the lowest free slot wins.
    /// Errors: [`NoMore`](ThreadError::NoMore) when the table is full,
    /// [`NoMemory`](ThreadError::NoMemory) when the OS cannot back the
    /// thread.
    pub fn create<F>(self: &Arc<Self>, entry: F) -> Result<ThreadId, ThreadError>
    where
        F: FnOnce() + Send + 'static,
    {
        let _mask = PreemptOff::new();
        let baton = Arc::new(Baton::new());

        let slot = {
            let mut sched = self.table.lock();
            sched.reap();
            match sched.lowest_uninit() {
                None => return Err(ThreadError::NoMore),
                Some(i) => {
                    sched.slots[i] = Tcb::fresh(Arc::clone(&baton));
                    i
                }
            }
        };
        let tid = ThreadId(slot);

        match context::spawn_stub(Arc::clone(self), tid, baton, entry) {
            Ok(handle) => {
                let mut sched = self.table.lock();
                sched.slots[slot].handle = Some(handle);
                sched.ready.push_back(tid);
                log::debug!("created {}", tid);
                Ok(tid)
            }
            Err(err) => {
                log::warn!("could not back {}: {}", tid, err);
                let mut sched = self.table.lock();
                sched.slots[slot] = Tcb::uninit();
                Err(ThreadError::NoMemory)
            }
        }
    }

    /// Give up the CPU to another thread.
    ///
    /// * `Any` — move to the tail of the ready queue and run its head;
    ///   returns the id of the thread that ran, or
    ///   [`NoneRunnable`](ThreadError::NoneRunnable) when the caller is the
    ///   only runnable thread.
    /// * `Current` — no-op switch back to the caller; returns
    ///   `NoneRunnable`.
    /// * `Tid(t)` — switch to `t`, valid only while `t` is READY or KILLED.
    ///
    /// A thread that was killed while suspended terminates here instead of
    /// returning.
    pub fn yield_to(&self, want: YieldTo) -> Result<ThreadId, ThreadError> {
        let _mask = PreemptOff::new();
        let cur = self.id();

        let plan = {
            let mut sched = self.table.lock();
            sched.reap();
            match want {
                YieldTo::Current => None,
                YieldTo::Tid(t) if t == cur => None,
                YieldTo::Any => {
                    sched.ready.push_back(cur);
                    let next = sched
                        .ready
                        .pop_front()
                        .expect("ready queue holds at least the caller");
                    if next == cur {
                        return Err(ThreadError::NoneRunnable);
                    }
                    Some(Self::prepare_switch(&mut sched, cur, next))
                }
                YieldTo::Tid(t) => {
                    if !sched.in_range(t) {
                        return Err(ThreadError::Invalid);
                    }
                    match sched.state(t) {
                        ThreadState::Ready | ThreadState::Killed => {
                            let removed = sched.ready.remove(t);
                            assert!(removed, "READY/KILLED thread not in ready queue");
                            sched.ready.push_back(cur);
                            Some(Self::prepare_switch(&mut sched, cur, t))
                        }
                        _ => return Err(ThreadError::Invalid),
                    }
                }
            }
        };

        match plan {
            Some(plan) => Ok(self.perform_switch(cur, plan)),
            None => {
                // No-op switch: pass the baton to ourselves.
                let baton = self.table.lock().slots[cur.0].baton.clone();
                baton.signal();
                baton.block();
                self.divert_if_killed(cur);
                Err(ThreadError::NoneRunnable)
            }
        }
    }

    /// Terminate the calling thread.
    ///
    /// Wakes every thread waiting on this one, schedules the lazy reap, and
    /// hands the CPU to the ready-queue head. If nothing is runnable the
    /// process terminates with exit code 0.
    pub fn exit(&self) -> ! {
        preempt::off();
        let cur = self.id();
        let bootstrap = self.table.lock().slots[cur.0].handle.is_none();
        if bootstrap {
            // The bootstrap thread backs the process main thread, which
            // must stay alive while other threads run.
            self.finish_current();
            loop {
                std::thread::park();
            }
        }
        std::panic::panic_any(context::ExitSignal)
    }

    /// Mark `tid` killed. Teardown is deferred: the target terminates when
    /// it is next scheduled, before re-entering user code.
    pub fn kill(&self, tid: ThreadId) -> Result<ThreadId, ThreadError> {
        let _mask = PreemptOff::new();
        let cur = self.id();
        let mut sched = self.table.lock();
        sched.reap();

        if tid == cur || !sched.in_range(tid) {
            return Err(ThreadError::Invalid);
        }
        match sched.state(tid) {
            ThreadState::Uninit | ThreadState::Exited | ThreadState::Running => {
                Err(ThreadError::Invalid)
            }
            ThreadState::Ready | ThreadState::Sleeping | ThreadState::Killed => {
                sched.slots[tid.0].killed = true;
                sched.slots[tid.0].state = ThreadState::Killed;
                log::debug!("{} killed by {}", tid, cur);
                Ok(tid)
            }
        }
    }

    /// Block the calling thread on `wq` until another thread wakes it.
    ///
    /// Returns the id of the thread that was switched to, or
    /// [`NoneRunnable`](ThreadError::NoneRunnable) without sleeping when no
    /// other thread is runnable (sleeping then would deadlock the system).
    pub fn sleep(&self, wq: &WaitQueue) -> Result<ThreadId, ThreadError> {
        let _mask = PreemptOff::new();
        let cur = self.id();

        let plan = {
            let mut sched = self.table.lock();
            if sched.ready.is_empty() {
                return Err(ThreadError::NoneRunnable);
            }
            wq.push_back(cur);
            sched.slots[cur.0].state = ThreadState::Sleeping;
            let next = sched
                .ready
                .pop_front()
                .expect("ready queue checked non-empty");
            Self::prepare_switch(&mut sched, cur, next)
        };

        Ok(self.perform_switch(cur, plan))
    }

    /// Move threads from `wq` to the ready-queue tail: the head thread when
    /// `all` is false, the whole queue otherwise. Returns the number moved.
    pub fn wakeup(&self, wq: &WaitQueue, all: bool) -> usize {
        let _mask = PreemptOff::new();
        let mut sched = self.table.lock();
        sched.wake_from(wq, all)
    }

    /// Block until thread `tid` exits.
    pub fn wait(&self, tid: ThreadId) -> Result<ThreadId, ThreadError> {
        let _mask = PreemptOff::new();
        let cur = self.id();

        let joiners = {
            let sched = self.table.lock();
            if tid == cur || !sched.in_range(tid) {
                return Err(ThreadError::Invalid);
            }
            match sched.state(tid) {
                ThreadState::Uninit | ThreadState::Exited => return Err(ThreadError::Invalid),
                _ => sched.slots[tid.0].joiners.clone(),
            }
        };

        self.sleep(&joiners)?;
        Ok(tid)
    }

    /// Start delivering preemption ticks to this system and enable
    /// preemption for the calling thread. Created threads enable preemption
    /// themselves on first entry.
    pub fn enable_preemption(self: &Arc<Self>) {
        if !self.ticker_started.swap(true, Ordering::AcqRel) {
            preempt::start_ticker(self, preempt::PREEMPT_INTERVAL);
        }
        preempt::on();
    }

    /// Preemption point: yield to the ready-queue head if preemption is
    /// enabled for the calling thread and a tick is pending.
    pub fn preempt_point(&self) {
        if preempt::enabled() && self.tick_pending.swap(false, Ordering::AcqRel) {
            let _ = self.yield_to(YieldTo::Any);
        }
    }

    /// Update table state for a switch from `cur` to `next`.
    ///
    /// The caller keeps its state when it is EXITED or SLEEPING and becomes
    /// READY otherwise; the target becomes RUNNING (a killed target keeps
    /// its kill mark and terminates on resumption).
    fn prepare_switch(sched: &mut Scheduler, cur: ThreadId, next: ThreadId) -> SwitchPlan {
        let cur_state = sched.slots[cur.0].state;
        if cur_state != ThreadState::Exited && cur_state != ThreadState::Sleeping {
            sched.slots[cur.0].state = ThreadState::Ready;
        }
        sched.slots[next.0].state = ThreadState::Running;
        sched.running = next;
        SwitchPlan {
            next,
            next_baton: sched.slots[next.0].baton.clone(),
            cur_baton: sched.slots[cur.0].baton.clone(),
        }
    }

    /// The switch itself: wake the target, suspend until scheduled again.
    fn perform_switch(&self, cur: ThreadId, plan: SwitchPlan) -> ThreadId {
        plan.next_baton.signal();
        plan.cur_baton.block();
        self.divert_if_killed(cur);
        plan.next
    }

    /// Cancellation check at every resumption point: a thread that was
    /// killed while suspended terminates here, never returning to user
    /// code.
    fn divert_if_killed(&self, cur: ThreadId) {
        let (killed, bootstrap) = {
            let sched = self.table.lock();
            (
                sched.slots[cur.0].killed,
                sched.slots[cur.0].handle.is_none(),
            )
        };
        if !killed {
            return;
        }
        log::debug!("{} scheduled after kill; terminating", cur);
        if bootstrap {
            self.finish_current();
            loop {
                std::thread::park();
            }
        }
        std::panic::panic_any(context::ExitSignal)
    }

    pub(crate) fn is_killed(&self, tid: ThreadId) -> bool {
        self.table.lock().slots[tid.0].killed
    }

    /// Terminal half of thread exit, run on the exiting thread's last
    /// unwind-free footing (the stub, or the bootstrap thread in place).
    pub(crate) fn finish_current(&self) {
        preempt::off();
        let cur = self.id();

        let handoff = {
            let mut sched = self.table.lock();
            sched.reap();
            sched.slots[cur.0].state = ThreadState::Exited;
            sched.reap_pending = true;

            let joiners = sched.slots[cur.0].joiners.clone();
            let woken = sched.wake_from(&joiners, true);
            if woken > 0 {
                log::debug!("{} exit woke {} waiter(s)", cur, woken);
            }

            match sched.ready.pop_front() {
                None => None,
                Some(next) => Some(Self::prepare_switch(&mut sched, cur, next)),
            }
        };

        match handoff {
            Some(plan) => plan.next_baton.signal(),
            None => {
                log::info!("last runnable thread exited; terminating process");
                std::process::exit(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    fn drain(sys: &Arc<ThreadSystem>) {
        while sys.yield_to(YieldTo::Any).is_ok() {}
    }

    #[test]
    fn yield_any_is_strict_fifo() {
        let sys = ThreadSystem::with_capacity(8);
        let order: Arc<spin::Mutex<Vec<String>>> = Arc::new(spin::Mutex::new(Vec::new()));

        let mut tids = Vec::new();
        for name in ["a", "b", "c"] {
            let sys2 = Arc::clone(&sys);
            let order2 = Arc::clone(&order);
            let tid = sys
                .create(move || {
                    order2.lock().push(format!("{name}1"));
                    let _ = sys2.yield_to(YieldTo::Any);
                    order2.lock().push(format!("{name}2"));
                })
                .unwrap();
            tids.push(tid);
        }

        // First round runs a, b, c in creation order and comes back here;
        // second round resumes them in the same order until all exit.
        assert_eq!(sys.yield_to(YieldTo::Any), Ok(tids[0]));
        assert_eq!(sys.yield_to(YieldTo::Any), Ok(tids[0]));
        assert_eq!(sys.yield_to(YieldTo::Any), Err(ThreadError::NoneRunnable));
        assert_eq!(*order.lock(), ["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn yield_to_specific_thread() {
        let sys = ThreadSystem::with_capacity(8);
        let order: Arc<spin::Mutex<Vec<u32>>> = Arc::new(spin::Mutex::new(Vec::new()));

        let mut tids = Vec::new();
        for i in 0..2u32 {
            let order2 = Arc::clone(&order);
            tids.push(sys.create(move || order2.lock().push(i)).unwrap());
        }

        // Run the second-created thread first.
        assert_eq!(sys.yield_to(YieldTo::Tid(tids[1])), Ok(tids[1]));
        drain(&sys);
        assert_eq!(*order.lock(), [1, 0]);
    }

    #[test]
    fn yield_current_is_a_noop_switch() {
        let sys = ThreadSystem::with_capacity(4);
        assert_eq!(
            sys.yield_to(YieldTo::Current),
            Err(ThreadError::NoneRunnable)
        );
        assert_eq!(
            sys.yield_to(YieldTo::Tid(sys.id())),
            Err(ThreadError::NoneRunnable)
        );
    }

    #[test]
    fn kill_before_first_run_skips_user_code() {
        let sys = ThreadSystem::with_capacity(4);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        let t = sys.create(move || ran2.store(true, Ordering::Release)).unwrap();
        assert_eq!(sys.kill(t), Ok(t));
        assert_eq!(sys.yield_to(YieldTo::Any), Ok(t));
        assert!(!ran.load(Ordering::Acquire));

        // The killed thread's slot is reaped and reused by the next create.
        let t2 = sys.create(|| {}).unwrap();
        assert_eq!(t2, t);
        drain(&sys);
    }

    #[test]
    fn wait_returns_after_target_exits() {
        let sys = ThreadSystem::with_capacity(4);
        let t = sys
            .create(|| std::thread::sleep(Duration::from_millis(10)))
            .unwrap();

        let start = Instant::now();
        assert_eq!(sys.wait(t), Ok(t));
        assert!(start.elapsed() >= Duration::from_millis(10));

        // The target is dead now; waiting again is invalid.
        assert_eq!(sys.wait(t), Err(ThreadError::Invalid));
    }

    #[test]
    fn exit_wakes_every_joiner() {
        let sys = ThreadSystem::with_capacity(8);
        let joined: Arc<spin::Mutex<Vec<&'static str>>> = Arc::new(spin::Mutex::new(Vec::new()));

        let sys2 = Arc::clone(&sys);
        let target = sys.create(move || {
            let _ = sys2.yield_to(YieldTo::Any);
        }).unwrap();

        for name in ["j1", "j2"] {
            let sys2 = Arc::clone(&sys);
            let joined2 = Arc::clone(&joined);
            sys.create(move || {
                assert_eq!(sys2.wait(target), Ok(target));
                joined2.lock().push(name);
            })
            .unwrap();
        }

        drain(&sys);
        assert_eq!(*joined.lock(), ["j1", "j2"]);
    }

    #[test]
    fn sleep_alone_would_deadlock() {
        let sys = ThreadSystem::with_capacity(2);
        let wq = WaitQueue::new();
        assert_eq!(sys.sleep(&wq), Err(ThreadError::NoneRunnable));
        assert!(wq.is_empty());
    }

    #[test]
    fn wakeup_one_then_all() {
        let sys = ThreadSystem::with_capacity(8);
        let wq = WaitQueue::new();
        let woken: Arc<spin::Mutex<Vec<usize>>> = Arc::new(spin::Mutex::new(Vec::new()));

        for i in 0..3 {
            let sys2 = Arc::clone(&sys);
            let wq2 = wq.clone();
            let woken2 = Arc::clone(&woken);
            sys.create(move || {
                sys2.sleep(&wq2).unwrap();
                woken2.lock().push(i);
            })
            .unwrap();
        }

        // Let all three go to sleep.
        let _ = sys.yield_to(YieldTo::Any);
        assert_eq!(wq.len(), 3);
        assert_eq!(sys.ready_count(), 0);

        assert_eq!(sys.wakeup(&wq, false), 1);
        assert_eq!(sys.wakeup(&wq, true), 2);
        assert_eq!(sys.wakeup(&wq, true), 0);

        drain(&sys);
        assert_eq!(*woken.lock(), [0, 1, 2]);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let sys = ThreadSystem::with_capacity(4);
        assert_eq!(sys.kill(sys.id()), Err(ThreadError::Invalid));
        assert_eq!(sys.kill(ThreadId(3)), Err(ThreadError::Invalid));
        assert_eq!(sys.kill(ThreadId(99)), Err(ThreadError::Invalid));
        assert_eq!(sys.wait(sys.id()), Err(ThreadError::Invalid));
        assert_eq!(sys.wait(ThreadId(3)), Err(ThreadError::Invalid));
        assert_eq!(sys.yield_to(YieldTo::Tid(ThreadId(3))), Err(ThreadError::Invalid));
        assert_eq!(
            sys.yield_to(YieldTo::Tid(ThreadId(99))),
            Err(ThreadError::Invalid)
        );
    }

    #[test]
    fn table_exhaustion_reports_no_more() {
        let sys = ThreadSystem::with_capacity(3);
        sys.create(|| {}).unwrap();
        sys.create(|| {}).unwrap();
        assert_eq!(sys.create(|| {}), Err(ThreadError::NoMore));

        // Once the threads run to completion their slots free up again.
        drain(&sys);
        assert!(sys.create(|| {}).is_ok());
        drain(&sys);
    }

    #[test]
    fn exited_slot_is_reused_by_create() {
        let sys = ThreadSystem::with_capacity(4);
        let t1 = sys.create(|| {}).unwrap();
        drain(&sys);
        let t2 = sys.create(|| {}).unwrap();
        assert_eq!(t2, t1);
        drain(&sys);
    }

    #[test]
    fn stats_reflect_table_state() {
        crate::logger::init();
        let sys = ThreadSystem::with_capacity(4);
        let t = sys.create(|| {}).unwrap();
        assert_eq!(sys.ready_count(), 1);
        assert_eq!(sys.running_tid(), sys.id());

        let stats = sys.stats();
        assert_eq!(stats.len(), 2);
        assert!(stats
            .iter()
            .any(|s| s.id == ThreadId(0) && s.state == ThreadState::Running));
        assert!(stats.iter().any(|s| s.id == t && s.state == ThreadState::Ready));
        drain(&sys);
    }

    #[test]
    fn user_panic_is_contained() {
        let sys = ThreadSystem::with_capacity(4);
        sys.create(|| panic!("user bug")).unwrap();
        drain(&sys);

        // The system keeps scheduling after the panicking thread died.
        let done = Arc::new(AtomicBool::new(false));
        let done2 = Arc::clone(&done);
        sys.create(move || done2.store(true, Ordering::Release)).unwrap();
        drain(&sys);
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn explicit_exit_cuts_the_thread_short() {
        let sys = ThreadSystem::with_capacity(4);
        let reached = Arc::new(AtomicBool::new(false));
        let past_exit = Arc::new(AtomicBool::new(false));

        let sys2 = Arc::clone(&sys);
        let reached2 = Arc::clone(&reached);
        let past2 = Arc::clone(&past_exit);
        let t = sys.create(move || {
            reached2.store(true, Ordering::Release);
            sys2.exit();
            #[allow(unreachable_code)]
            past2.store(true, Ordering::Release);
        })
        .unwrap();

        assert_eq!(sys.wait(t), Ok(t));
        assert!(reached.load(Ordering::Acquire));
        assert!(!past_exit.load(Ordering::Acquire));
    }

    #[test]
    fn preempt_point_yields_on_tick() {
        let sys = ThreadSystem::with_capacity(4);
        sys.enable_preemption();

        let done = Arc::new(AtomicBool::new(false));
        let spins = Arc::new(AtomicU64::new(0));

        let sys2 = Arc::clone(&sys);
        let done2 = Arc::clone(&done);
        let spins2 = Arc::clone(&spins);
        sys.create(move || {
            while !done2.load(Ordering::Acquire) {
                spins2.fetch_add(1, Ordering::Relaxed);
                sys2.preempt_point();
            }
        })
        .unwrap();

        // The spinner never yields voluntarily; only a preemption tick can
        // bring control back here.
        let _ = sys.yield_to(YieldTo::Any);
        done.store(true, Ordering::Release);
        drain(&sys);
        assert!(spins.load(Ordering::Relaxed) > 0);
    }
}
