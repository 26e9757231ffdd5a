/*
 * Synchronization Primitives
 *
 * Blocking locks and Mesa-style condition variables, built on the
 * scheduler's sleep/wakeup and wait queues. Nothing here spins for
 * exclusion: a contended thread goes to sleep and the release path wakes
 * the whole queue, letting FIFO scheduling decide who wins the retry.
 */

mod cv;
mod lock;

pub use cv::CondVar;
pub use lock::Lock;
