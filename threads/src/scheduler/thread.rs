/*
 * Thread Control Blocks
 *
 * This module defines the per-thread types for the scheduler: thread
 * identifiers, the thread state machine, the control block itself, and the
 * error codes returned by the public thread operations.
 */

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::context::Baton;
use super::queue::WaitQueue;

/// Default thread-table capacity.
pub const MAX_THREADS: usize = 1024;

/// Stack size for every created thread (32 KiB).
///
/// The bootstrap thread keeps the stack of the OS thread that called
/// [`init`](super::ThreadSystem::init); this constant applies only to
/// threads created through the library.
pub const MIN_STACK: usize = 32 * 1024;

/// Thread identifier: an index into the thread table, in `[0, capacity)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Thread state machine.
///
/// A slot starts `Uninit` and returns to `Uninit` when the exited thread is
/// reaped. `Killed` marks a thread that has been cancelled but not yet
/// scheduled; it stays in the ready queue and terminates the moment it is
/// next picked, before re-entering user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Uninit,
    Ready,
    Running,
    Sleeping,
    Killed,
    Exited,
}

/// Error codes for the thread operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// No other thread is runnable (yielding alone, or sleeping would
    /// deadlock the system).
    NoneRunnable,
    /// Bad argument: out-of-range or dead thread id, self where forbidden.
    Invalid,
    /// The thread table is full.
    NoMore,
    /// The OS refused to give us a new thread (stack allocation failed).
    NoMemory,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::NoneRunnable => write!(f, "no other runnable thread"),
            ThreadError::Invalid => write!(f, "invalid thread id"),
            ThreadError::NoMore => write!(f, "thread table full"),
            ThreadError::NoMemory => write!(f, "thread stack allocation failed"),
        }
    }
}

impl std::error::Error for ThreadError {}

/// Target of a [`yield_to`](super::ThreadSystem::yield_to) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldTo {
    /// Switch to the head of the ready queue.
    Any,
    /// No-op switch back to the calling thread.
    Current,
    /// Switch to one specific thread, which must be READY or KILLED.
    Tid(ThreadId),
}

/// Thread control block: one table slot.
///
/// `handle` is the join handle of the backing OS thread; it is `None` only
/// for the bootstrap thread, whose stack the library does not own. `joiners`
/// holds the threads blocked in `wait()` on this thread's exit.
pub(crate) struct Tcb {
    pub state: ThreadState,
    pub killed: bool,
    pub baton: Arc<Baton>,
    pub joiners: WaitQueue,
    pub handle: Option<JoinHandle<()>>,
}

impl Tcb {
    /// An empty, never-used slot.
    pub fn uninit() -> Self {
        Self {
            state: ThreadState::Uninit,
            killed: false,
            baton: Arc::new(Baton::new()),
            joiners: WaitQueue::new(),
            handle: None,
        }
    }

    /// A freshly created, not-yet-spawned thread in the READY state.
    pub fn fresh(baton: Arc<Baton>) -> Self {
        Self {
            state: ThreadState::Ready,
            killed: false,
            baton,
            joiners: WaitQueue::new(),
            handle: None,
        }
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("state", &self.state)
            .field("killed", &self.killed)
            .field("bootstrap", &self.handle.is_none())
            .finish()
    }
}

/// Per-thread snapshot returned by [`stats`](super::ThreadSystem::stats).
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub id: ThreadId,
    pub state: ThreadState,
}
