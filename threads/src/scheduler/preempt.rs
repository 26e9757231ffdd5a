/*
 * Preemption Discipline
 *
 * Preemption is driven by a 200us timer. With OS-thread-backed contexts
 * there is no safe way to interrupt the running thread asynchronously, so
 * the timer sets a pending flag that is consumed at preemption points: a
 * thread that has preemption enabled and observes a pending tick yields.
 *
 * The enable/disable state is per thread, like the signal mask it replaces.
 * Every scheduler entry point masks preemption for its whole duration and
 * restores the caller's state on exit via the scoped guard below, on every
 * path out including unwinding.
 */

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use super::ThreadSystem;

/// Interval between preemption ticks.
pub const PREEMPT_INTERVAL: Duration = Duration::from_micros(200);

thread_local! {
    static PREEMPT_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Set the calling thread's preemption state, returning the previous one.
pub fn set(enabled: bool) -> bool {
    PREEMPT_ENABLED.replace(enabled)
}

/// Is preemption currently enabled for the calling thread?
pub fn enabled() -> bool {
    PREEMPT_ENABLED.get()
}

/// Enable preemption for the calling thread, returning the previous state.
pub fn on() -> bool {
    set(true)
}

/// Disable preemption for the calling thread, returning the previous state.
pub fn off() -> bool {
    set(false)
}

/// Scoped preemption mask: disables on construction, restores the previous
/// state when dropped.
pub(crate) struct PreemptOff {
    prev: bool,
}

impl PreemptOff {
    pub fn new() -> Self {
        Self { prev: off() }
    }
}

impl Drop for PreemptOff {
    fn drop(&mut self) {
        set(self.prev);
    }
}

/// Start the ticker for one thread system.
///
/// The ticker holds a weak handle so it cannot keep the system alive; it
/// stops on its own once every other handle is gone.
pub(crate) fn start_ticker(sys: &Arc<ThreadSystem>, interval: Duration) {
    let weak = Arc::downgrade(sys);
    let spawned = thread::Builder::new()
        .name("preempt-ticker".into())
        .spawn(move || {
            loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(sys) => sys.tick_pending.store(true, Ordering::Release),
                    None => break,
                }
            }
            log::debug!("preempt ticker stopping: thread system dropped");
        });
    if let Err(err) = spawned {
        log::warn!("failed to start preempt ticker: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_state() {
        set(true);
        {
            let _mask = PreemptOff::new();
            assert!(!enabled());
            {
                let _inner = PreemptOff::new();
                assert!(!enabled());
            }
            assert!(!enabled());
        }
        assert!(enabled());
        set(false);
    }

    #[test]
    fn set_returns_previous() {
        set(false);
        assert!(!on());
        assert!(off());
        assert!(!enabled());
    }
}
