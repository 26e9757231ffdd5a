/*
 * Server Core
 *
 * An acceptor hands connection descriptors to `Server::request`, which
 * enqueues them on the bounded request queue; a pool of worker threads
 * pops descriptors and drives the request layer, resolving file contents
 * through the cache.
 *
 * Locking: one mutex guards the request queue, with two condition
 * variables beside it. Producers wait on `nonfull` while the queue is at
 * capacity; workers wait on `nonempty` while it is empty. Transitions are
 * broadcast, not signalled, so a woken thread re-checking its predicate is
 * the only correctness requirement. The cache keeps its own mutex; neither
 * lock is held across request I/O.
 *
 * Shutdown is cooperative: `exit` raises the exiting flag, broadcasts
 * `nonempty` so every parked worker observes it, and joins the pool.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::cache::FileCache;
use crate::queue::RequestQueue;
use crate::request::{ConnFd, FileData, RequestLayer};

pub struct Server {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    nr_threads: usize,
}

struct Shared {
    queue: Mutex<RequestQueue>,
    nonempty: Condvar,
    nonfull: Condvar,
    exiting: AtomicBool,
    cache: FileCache,
    layer: Box<dyn RequestLayer>,
}

impl Server {
    /// Build the request queue (capacity `max_requests`), the file cache
    /// (capacity `max_cache_size` bytes) and `nr_threads` workers.
    ///
    /// With `nr_threads == 0` there is no pool and `request` handles each
    /// connection inline on the caller.
    pub fn init(
        nr_threads: usize,
        max_requests: usize,
        max_cache_size: usize,
        layer: Box<dyn RequestLayer>,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::new(max_requests)),
            nonempty: Condvar::new(),
            nonfull: Condvar::new(),
            exiting: AtomicBool::new(false),
            cache: FileCache::new(max_cache_size),
            layer,
        });

        let workers = (0..nr_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::info!(
            "server up: {} workers, queue capacity {}, cache {} bytes",
            nr_threads,
            max_requests,
            max_cache_size
        );
        Server {
            shared,
            workers,
            nr_threads,
        }
    }

    /// Hand a connection to the pool, blocking while the queue is full.
    pub fn request(&self, connfd: ConnFd) {
        if self.nr_threads == 0 {
            do_request(&self.shared, connfd);
            return;
        }

        let mut queue = self.shared.queue.lock();
        while queue.is_full() {
            self.shared.nonfull.wait(&mut queue);
        }
        assert!(queue.push_back(connfd), "push into non-full queue failed");
        if queue.len() == 1 {
            self.shared.nonempty.notify_all();
        }
    }

    /// Graceful shutdown: wake every worker, join the pool, then drop the
    /// queue and cache. (The work happens in `Drop`, so a `Server` that
    /// merely goes out of scope shuts down the same way.)
    pub fn exit(self) {}
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.exiting.store(true, Ordering::Release);
        {
            let _queue = self.shared.queue.lock();
            self.shared.nonempty.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("worker thread ended abnormally");
            }
        }
        log::info!("server shut down");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let connfd = {
            let mut queue = shared.queue.lock();
            while queue.is_empty() && !shared.exiting.load(Ordering::Acquire) {
                shared.nonempty.wait(&mut queue);
            }
            if shared.exiting.load(Ordering::Acquire) {
                return;
            }
            let connfd = queue.pop_front().expect("queue non-empty past the wait");
            if queue.len() == queue.max_size() - 1 {
                shared.nonfull.notify_all();
            }
            connfd
        };

        do_request(shared, connfd);
    }
}

/// Serve one connection end to end. Failures stay contained here: the
/// request is dropped and the worker moves on.
fn do_request(shared: &Shared, connfd: ConnFd) {
    let mut data = FileData::new();
    let Some(mut request) = shared.layer.open(connfd, &mut data) else {
        log::debug!("request on fd {} failed to parse", connfd);
        return;
    };

    match shared.cache.lookup(&data.name) {
        Some(cached) => data = cached,
        None => {
            if !request.read_file(&mut data) {
                log::debug!("could not read {} for fd {}", data.name, connfd);
                return;
            }
            shared.cache.insert(&data);
        }
    }

    request.send_file(&data);
}
