//! Fixed-capacity object pools linking pipeline stages
//!
//! A pool pre-allocates `capacity` objects. Each object is always in exactly
//! one of three places: the free list, the populated list, or checked out by
//! a caller, so `free + populated + checked_out == capacity` holds at every
//! point. Producers take from the free list and publish to the populated
//! list; consumers take from the populated list and hand objects back to the
//! free list.
//!
//! Two implementations share the [`BufferPool`] trait and are picked with
//! [`PoolKind`] when the pool is built:
//!
//! - [`AtomicBufferPool`]: lock-free free list plus a blocking populated
//!   queue, for producer and consumer on different threads.
//! - [`UnsynchronizedBufferPool`]: plain lists for a single thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Creates pooled objects and scrubs them on their way back
pub trait BufferFactory<T>: Send + Sync {
    fn create_free_buffer(&self) -> T;

    /// Called on every object returned with `free_populated`
    fn cleanup_object(&self, _object: &mut T) {}
}

impl<T, F> BufferFactory<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn create_free_buffer(&self) -> T {
        self()
    }
}

/// Which pool implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Cross-thread pool with blocking take
    #[default]
    Atomic,
    /// Single-threaded pool, no synchronization
    Unsynchronized,
}

/// Free/populated list pair over a fixed set of objects
pub trait BufferPool<T>: Send {
    fn kind(&self) -> PoolKind;

    /// Number of objects owned by the pool
    fn capacity(&self) -> usize;

    fn free_count(&self) -> usize;

    fn populated_count(&self) -> usize;

    /// Objects currently held by callers
    fn checked_out(&self) -> usize {
        self.capacity()
            .saturating_sub(self.free_count() + self.populated_count())
    }

    /// Take a free object, or `None` if all are in use
    fn poll_free(&self) -> Option<T>;

    /// Publish a filled object to consumers
    fn add_populated(&self, object: T);

    /// Clean up an object and return it to the free list
    fn free_populated(&self, object: T);

    /// Take the oldest populated object without blocking
    fn poll_populated(&self) -> Option<T>;

    /// Inspect the oldest populated object without removing it
    fn peek_populated(&self, inspect: &mut dyn FnMut(&T)) -> bool;

    /// Take the oldest populated object, waiting until one is published
    fn take_populated(&self) -> Result<T, PoolError> {
        Err(PoolError::BlockingUnsupported)
    }

    /// Return every populated object to the free list
    fn clear_populated(&self) {
        while let Some(object) = self.poll_populated() {
            self.free_populated(object);
        }
    }

    /// Another handle to the same pool for use on a different thread
    fn share(&self) -> Result<Box<dyn BufferPool<T>>, PoolError>;

    /// Wake blocked consumers; subsequent blocking takes fail with `Closed`
    fn close(&self) {}
}

/// Build a pool of the requested kind
pub fn new_pool<T, F>(kind: PoolKind, capacity: usize, factory: F) -> Box<dyn BufferPool<T>>
where
    T: Send + 'static,
    F: BufferFactory<T> + 'static,
{
    match kind {
        PoolKind::Atomic => Box::new(AtomicBufferPool::new(capacity, factory)),
        PoolKind::Unsynchronized => Box::new(UnsynchronizedBufferPool::new(capacity, factory)),
    }
}

struct AtomicShared<T> {
    capacity: usize,
    factory: Arc<dyn BufferFactory<T>>,
    free: ArrayQueue<T>,
    populated: Mutex<VecDeque<T>>,
    available: Condvar,
    closed: AtomicBool,
}

/// Thread-safe pool; clones are handles to the same objects
pub struct AtomicBufferPool<T> {
    shared: Arc<AtomicShared<T>>,
}

impl<T: Send + 'static> AtomicBufferPool<T> {
    pub fn new<F: BufferFactory<T> + 'static>(capacity: usize, factory: F) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be non-zero");

        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(factory.create_free_buffer());
        }

        Self {
            shared: Arc::new(AtomicShared {
                capacity,
                factory: Arc::new(factory),
                free,
                populated: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// True once [`BufferPool::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> Clone for AtomicBufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> BufferPool<T> for AtomicBufferPool<T> {
    fn kind(&self) -> PoolKind {
        PoolKind::Atomic
    }

    fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn free_count(&self) -> usize {
        self.shared.free.len()
    }

    fn populated_count(&self) -> usize {
        self.shared.populated.lock().len()
    }

    fn poll_free(&self) -> Option<T> {
        self.shared.free.pop()
    }

    fn add_populated(&self, object: T) {
        self.shared.populated.lock().push_back(object);
        self.shared.available.notify_one();
    }

    fn free_populated(&self, mut object: T) {
        self.shared.factory.cleanup_object(&mut object);
        if self.shared.free.push(object).is_err() {
            tracing::error!("Buffer pool overflow: object returned twice or from another pool");
        }
    }

    fn poll_populated(&self) -> Option<T> {
        self.shared.populated.lock().pop_front()
    }

    fn peek_populated(&self, inspect: &mut dyn FnMut(&T)) -> bool {
        match self.shared.populated.lock().front() {
            Some(object) => {
                inspect(object);
                true
            }
            None => false,
        }
    }

    fn take_populated(&self) -> Result<T, PoolError> {
        let mut populated = self.shared.populated.lock();
        loop {
            if let Some(object) = populated.pop_front() {
                return Ok(object);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }
            self.shared.available.wait(&mut populated);
        }
    }

    fn share(&self) -> Result<Box<dyn BufferPool<T>>, PoolError> {
        Ok(Box::new(self.clone()))
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        // Taking the lock orders the flag against a consumer about to wait
        drop(self.shared.populated.lock());
        self.shared.available.notify_all();
    }
}

/// Single-threaded pool with no synchronization
pub struct UnsynchronizedBufferPool<T> {
    capacity: usize,
    factory: Arc<dyn BufferFactory<T>>,
    free: RefCell<VecDeque<T>>,
    populated: RefCell<VecDeque<T>>,
}

impl<T: Send + 'static> UnsynchronizedBufferPool<T> {
    pub fn new<F: BufferFactory<T> + 'static>(capacity: usize, factory: F) -> Self {
        let free = (0..capacity).map(|_| factory.create_free_buffer()).collect();

        Self {
            capacity,
            factory: Arc::new(factory),
            free: RefCell::new(free),
            populated: RefCell::new(VecDeque::with_capacity(capacity)),
        }
    }
}

impl<T: Send + 'static> BufferPool<T> for UnsynchronizedBufferPool<T> {
    fn kind(&self) -> PoolKind {
        PoolKind::Unsynchronized
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn free_count(&self) -> usize {
        self.free.borrow().len()
    }

    fn populated_count(&self) -> usize {
        self.populated.borrow().len()
    }

    fn poll_free(&self) -> Option<T> {
        self.free.borrow_mut().pop_front()
    }

    fn add_populated(&self, object: T) {
        self.populated.borrow_mut().push_back(object);
    }

    fn free_populated(&self, mut object: T) {
        self.factory.cleanup_object(&mut object);
        let mut free = self.free.borrow_mut();
        if free.len() >= self.capacity {
            tracing::error!("Buffer pool overflow: object returned twice or from another pool");
            return;
        }
        free.push_back(object);
    }

    fn poll_populated(&self) -> Option<T> {
        self.populated.borrow_mut().pop_front()
    }

    fn peek_populated(&self, inspect: &mut dyn FnMut(&T)) -> bool {
        match self.populated.borrow().front() {
            Some(object) => {
                inspect(object);
                true
            }
            None => false,
        }
    }

    fn share(&self) -> Result<Box<dyn BufferPool<T>>, PoolError> {
        Err(PoolError::NotShareable)
    }
}
