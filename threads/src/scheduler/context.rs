/*
 * Thread Contexts
 *
 * Every thread keeps its own OS-backed context and the scheduler passes a
 * run token between them: a thread "switches away" by signalling the
 * target's baton and blocking on its own. At most one thread of a system
 * holds the token, which preserves the single-core execution model the
 * scheduler is written against.
 *
 * Cancellation rides the same mechanism: a thread that resumes and finds
 * itself marked killed unwinds back to the stub with a private payload and
 * exits without re-entering user code. A process-wide panic-hook shim
 * keeps that unwind silent.
 */

use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use lazy_static::lazy_static;

use super::ThreadSystem;
use super::preempt;
use super::thread::{MIN_STACK, ThreadId};

thread_local! {
    /// Id of the thread running on this OS thread; 0 is the bootstrap.
    pub(crate) static CURRENT_TID: Cell<usize> = const { Cell::new(0) };
}

/// Unwind payload used to terminate a thread without returning to user code.
pub(crate) struct ExitSignal;

lazy_static! {
    /// One-time panic-hook shim that swallows [`ExitSignal`] unwinds and
    /// forwards everything else to the previous hook.
    static ref EXIT_HOOK: () = {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<ExitSignal>() {
                return;
            }
            prev(info);
        }));
    };
}

pub(crate) fn install_exit_hook() {
    lazy_static::initialize(&EXIT_HOOK);
}

/// The run token a suspended thread blocks on.
///
/// `signal` may arrive before `block`; the flag makes the hand-off
/// order-independent. Spurious condvar wakeups are absorbed by the loop.
pub(crate) struct Baton {
    resumed: Mutex<bool>,
    cond: Condvar,
}

impl Baton {
    pub fn new() -> Self {
        Self {
            resumed: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Hand the token to the owning thread.
    pub fn signal(&self) {
        let mut resumed = self.resumed.lock().expect("baton mutex poisoned");
        *resumed = true;
        self.cond.notify_one();
    }

    /// Block until the token arrives, then consume it.
    pub fn block(&self) {
        let mut resumed = self.resumed.lock().expect("baton mutex poisoned");
        while !*resumed {
            resumed = self.cond.wait(resumed).expect("baton mutex poisoned");
        }
        *resumed = false;
    }
}

/// Spawn the backing OS thread for a new thread, parked in the stub.
///
/// The stub is the fixed entry point of every created thread:
/// 1. wait to be scheduled for the first time,
/// 2. bail out if killed before ever running (the user closure must not run),
/// 3. enable preemption,
/// 4. run the user closure,
/// 5. exit the thread.
///
/// A panicking closure is contained: the thread exits, the system survives.
pub(crate) fn spawn_stub<F>(
    sys: Arc<ThreadSystem>,
    tid: ThreadId,
    baton: Arc<Baton>,
    entry: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("uthread-{}", tid.0))
        .stack_size(MIN_STACK)
        .spawn(move || {
            CURRENT_TID.set(tid.0);
            baton.block();

            if sys.is_killed(tid) {
                sys.finish_current();
                return;
            }

            preempt::set(true);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                if !payload.is::<ExitSignal>() {
                    log::error!("{} panicked; treating as thread exit", tid);
                }
            }
            sys.finish_current();
        })
}
