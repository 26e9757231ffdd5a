//! User-level threading library.
//!
//! Cooperative and preemptive threads multiplexed over a single logical
//! CPU, with synchronization primitives layered above the scheduler:
//!
//! - [`scheduler`]: thread table, FIFO ready queue, wait queues, create /
//!   yield / exit / kill / sleep / wakeup / wait, and the preemption
//!   discipline.
//! - [`sync`]: blocking locks and Mesa-style condition variables.
//!
//! Threads of one [`ThreadSystem`] run one at a time, scheduled
//! strict-FIFO. Each thread is backed by an OS thread parked while not
//! scheduled, which gives every thread its own stack while keeping the
//! single-core execution model; see `scheduler/context.rs` for the
//! hand-off mechanism.
//!
//! ```
//! use uthreads::{ThreadSystem, YieldTo};
//!
//! let sys = ThreadSystem::init();
//! let sys2 = std::sync::Arc::clone(&sys);
//! let tid = sys
//!     .create(move || {
//!         let _ = sys2.yield_to(YieldTo::Any);
//!     })
//!     .unwrap();
//! sys.wait(tid).unwrap();
//! ```

pub mod logger;
pub mod scheduler;
pub mod sync;

pub use scheduler::{
    MAX_THREADS, MIN_STACK, ThreadError, ThreadId, ThreadState, ThreadStats, ThreadSystem,
    WaitQueue, YieldTo, preempt,
};
pub use sync::{CondVar, Lock};
