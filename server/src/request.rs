/*
 * Request Layer Contract
 *
 * The server core does not parse HTTP; an external request layer owns the
 * protocol. These traits are the seam the worker loop drives:
 *
 * 1. `RequestLayer::open` parses the request on a connection and fills in
 *    the requested file name.
 * 2. The server resolves the file through its cache, or asks the request
 *    to read it from disk on a miss.
 * 3. `Request::send_file` ships the data back to the client.
 * 4. Dropping the request closes the connection.
 */

/// Connection descriptor handed to the server by the listener.
pub type ConnFd = i32;

/// An owned file: name, contents, size. `Clone` produces the deep copy the
/// cache hands out, so callers never hold references into the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileData {
    pub name: String,
    pub buf: Vec<u8>,
    pub size: usize,
}

impl FileData {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One parsed request on one connection.
pub trait Request: Send {
    /// Read the requested file into `data.buf`/`data.size`. Returns false
    /// when the file cannot be read; the server then drops the request.
    fn read_file(&mut self, data: &mut FileData) -> bool;

    /// Send `data` to the client.
    fn send_file(&mut self, data: &FileData);
}

/// Factory for requests, implemented by the external HTTP layer.
pub trait RequestLayer: Send + Sync {
    /// Parse the request arriving on `connfd`, filling `data.name` with the
    /// requested file name. Returns `None` when parsing fails; the
    /// connection is closed and the worker moves on.
    fn open(&self, connfd: ConnFd, data: &mut FileData) -> Option<Box<dyn Request>>;
}
