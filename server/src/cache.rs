/*
 * File Cache
 *
 * Bounded in-memory cache of served files: a hash table keyed by file name
 * next to a size-ordered list (descending) used for eviction. One mutex
 * serializes everything, including the descending list, and lookups return
 * deep copies so nothing the caller holds can dangle across an eviction.
 *
 * Eviction is largest-first, not LRU: the head of the size list frees the
 * most bytes in one step, and the cache exists to cut per-request disk
 * reads, not to model recency.
 */

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::request::FileData;

pub struct FileCache {
    max_bytes: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<String, FileData>,
    /// (size, name) pairs sorted descending by size; ties keep insertion
    /// order. Every key in `entries` appears here exactly once.
    by_size: Vec<(usize, String)>,
    curr_bytes: usize,
}

impl FileCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                by_size: Vec::new(),
                curr_bytes: 0,
            }),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn curr_bytes(&self) -> usize {
        self.inner.lock().curr_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    /// Look a file up by name; a hit returns an owned copy.
    pub fn lookup(&self, name: &str) -> Option<FileData> {
        self.inner.lock().entries.get(name).cloned()
    }

    /// Insert a copy of `data`, evicting largest-first until it fits.
    ///
    /// A file bigger than the whole cache is refused outright (served
    /// uncached). Otherwise eviction runs first and the duplicate check
    /// second: an insert under an already-cached name still evicts to make
    /// room before being refused, and succeeds outright if the eviction
    /// pass claimed the old entry itself.
    pub fn insert(&self, data: &FileData) -> bool {
        if data.size > self.max_bytes {
            log::debug!(
                "{} ({} bytes) exceeds cache capacity, serving uncached",
                data.name,
                data.size
            );
            return false;
        }

        let mut inner = self.inner.lock();
        let free = self.max_bytes - inner.curr_bytes;
        if data.size > free {
            Self::evict(&mut inner, data.size - free);
        }

        if inner.entries.contains_key(&data.name) {
            return false;
        }

        let pos = inner
            .by_size
            .iter()
            .position(|(size, _)| *size < data.size)
            .unwrap_or(inner.by_size.len());
        inner.by_size.insert(pos, (data.size, data.name.clone()));
        inner.curr_bytes += data.size;
        inner.entries.insert(data.name.clone(), data.clone());
        log::debug!(
            "cached {} ({} bytes, {} in use)",
            data.name,
            data.size,
            inner.curr_bytes
        );
        true
    }

    /// Drop the largest entries until at least `need` bytes were freed.
    ///
    /// The caller guarantees the request can be satisfied: eviction runs
    /// only for files that fit in an empty cache, so the size list cannot
    /// run dry first.
    fn evict(inner: &mut CacheInner, need: usize) {
        let mut freed = 0;
        while freed < need {
            assert!(
                !inner.by_size.is_empty(),
                "eviction target exceeds cached bytes"
            );
            let (size, name) = inner.by_size.remove(0);
            let evicted = inner.entries.remove(&name);
            assert!(evicted.is_some(), "size list out of sync with hash table");
            inner.curr_bytes -= size;
            freed += size;
            log::debug!("evicted {} ({} bytes)", name, size);
        }
    }
}
