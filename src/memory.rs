// src/memory.rs
//
//! Bounded memory pool for upload part buffers.
//!
//! The pool is the single point of write-path back-pressure: every part a
//! writer materializes holds one pool buffer from first touch until its
//! terminal state, so total upload memory never exceeds
//! `capacity * buf_size`.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Fixed-size pool of `capacity` byte buffers of `buf_size` bytes each.
///
/// `get` suspends when the pool is empty and resumes when a buffer is
/// returned; `put` gives a buffer back. The invariant
/// `available + outstanding == capacity` holds at every synchronization
/// point.
#[derive(Debug)]
pub struct MemoryBufferPool {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    permits: Semaphore,
    buf_size: usize,
    capacity: usize,
}

impl MemoryBufferPool {
    pub fn new(capacity: usize, buf_size: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..capacity {
            // receiver is alive; unbounded send cannot fail here
            let _ = tx.send(vec![0u8; buf_size]);
        }
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            permits: Semaphore::new(capacity),
            buf_size,
            capacity,
        })
    }

    /// Size of every buffer handed out by this pool (the part size).
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently available without blocking.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Take a buffer, waiting for one to be returned if the pool is empty.
    /// Cancellation of `token` aborts the wait with [`Error::Cancelled`];
    /// a closed pool yields [`Error::Exhausted`].
    pub async fn get(&self, token: &CancellationToken) -> Result<Vec<u8>> {
        let permit = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| Error::Exhausted)?,
        };
        permit.forget();
        // permit count == free-list length, so a buffer is guaranteed here
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::Exhausted)
    }

    /// Return a buffer to the pool. The buffer must be the full `buf_size`
    /// (callers keep buffers whole and track valid prefixes separately).
    pub fn put(&self, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.buf_size);
        if self.tx.send(buf).is_ok() {
            self.permits.add_permits(1);
        }
    }

    /// Close the pool: pending and future `get` calls fail with
    /// [`Error::Exhausted`].
    pub fn close(&self) {
        self.permits.close();
    }
}
