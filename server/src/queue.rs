/*
 * Bounded Request Queue
 *
 * Plain FIFO of connection descriptors with a fixed capacity. The queue
 * itself carries no locking; the server owns the mutex and the two
 * condition variables (nonempty/nonfull) that coordinate producers and
 * workers around it.
 */

use std::collections::VecDeque;

use crate::request::ConnFd;

#[derive(Debug)]
pub struct RequestQueue {
    items: VecDeque<ConnFd>,
    max_size: usize,
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Append a descriptor; refuses when the queue is full.
    pub fn push_back(&mut self, connfd: ConnFd) -> bool {
        if self.items.len() < self.max_size {
            self.items.push_back(connfd);
            true
        } else {
            false
        }
    }

    pub fn pop_front(&mut self) -> Option<ConnFd> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.max_size
    }
}
