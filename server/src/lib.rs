//! Multi-threaded web-server core.
//!
//! The concurrency core of a file-serving web server, protocol left to an
//! external request layer:
//!
//! - [`queue`]: bounded FIFO of connection descriptors between the
//!   acceptor and the worker pool.
//! - [`server`]: the pool itself, the nonempty/nonfull coordination and
//!   the graceful shutdown path.
//! - [`cache`]: bounded in-memory file cache with largest-first eviction.
//! - [`request`]: the contract the external HTTP layer implements.
//!
//! A listener calls [`Server::request`] for every accepted connection;
//! workers drive the request layer and resolve file contents through the
//! cache.

pub mod cache;
pub mod logger;
pub mod queue;
pub mod request;
pub mod server;

pub use cache::FileCache;
pub use queue::RequestQueue;
pub use request::{ConnFd, FileData, Request, RequestLayer};
pub use server::Server;
