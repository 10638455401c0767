//! Bounded pull-based sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{AudioSink, SinkError, WriteOutcome};
use crate::error::{Error, Result};

/// Default ring capacity in bytes.
pub const DEFAULT_PULL_CAPACITY: usize = 64 * 1024;

/// A fixed-size byte ring the session writes into and the caller reads from.
///
/// Writers suspend while the ring is full; readers suspend while it is empty
/// and not closed. Once closed, reads drain what is left and then return
/// empty buffers.
///
/// Clones share the same ring.
///
/// # Example
///
/// ```
/// use giztoy_synthesis::{AudioSink, PullSink};
///
/// # tokio_test::block_on(async {
/// let sink = PullSink::new(4);
/// sink.accept(b"abc").await.unwrap();
/// sink.close().await.unwrap();
///
/// assert_eq!(&sink.read(8).await[..], b"abc");
/// assert!(sink.read(8).await.is_empty());
/// # });
/// ```
#[derive(Clone)]
pub struct PullSink {
    inner: Arc<PullInner>,
}

struct PullInner {
    state: Mutex<RingState>,
    not_full: Notify,
    not_empty: Notify,
}

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    count: usize,
    closed: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn push(&mut self, data: &[u8]) -> usize {
        let cap = self.capacity();
        let n = data.len().min(cap - self.count);
        let tail = (self.head + self.count) % cap;
        let first = n.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.count += n;
        n
    }

    fn pop(&mut self, max_len: usize) -> Bytes {
        let cap = self.capacity();
        let n = max_len.min(self.count);
        let first = n.min(cap - self.head);
        let mut out = Vec::with_capacity(n);
        out.extend_from_slice(&self.buf[self.head..self.head + first]);
        out.extend_from_slice(&self.buf[..n - first]);
        self.head = (self.head + n) % cap;
        self.count -= n;
        Bytes::from(out)
    }
}

impl Default for PullSink {
    fn default() -> Self {
        Self::new(DEFAULT_PULL_CAPACITY)
    }
}

impl PullSink {
    /// Creates a sink holding at most `capacity` unread bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PullInner {
                state: Mutex::new(RingState {
                    buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
                    head: 0,
                    count: 0,
                    closed: false,
                }),
                not_full: Notify::new(),
                not_empty: Notify::new(),
            }),
        }
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.inner.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Reads up to `max_len` bytes.
    ///
    /// Suspends while the ring is empty and open. Returns an empty buffer
    /// once the sink is closed and drained.
    pub async fn read(&self, max_len: usize) -> Bytes {
        if max_len == 0 {
            return Bytes::new();
        }
        loop {
            let notified = self.inner.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.state.lock();
                if state.count > 0 {
                    let out = state.pop(max_len);
                    drop(state);
                    self.inner.not_full.notify_waiters();
                    return out;
                }
                if state.closed {
                    return Bytes::new();
                }
            }
            notified.await;
        }
    }

    /// Like [`read`](Self::read) but gives up after `timeout`.
    pub async fn read_timeout(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.read(max_len))
            .await
            .map_err(|_| Error::TimedOut)
    }

    /// Reads until the sink is closed and drained.
    pub async fn read_to_end(&self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(DEFAULT_PULL_CAPACITY).await;
            if chunk.is_empty() {
                return out;
            }
            out.extend_from_slice(&chunk);
        }
    }
}

#[async_trait]
impl AudioSink for PullSink {
    /// Writes as much of `data` as fits, suspending while the ring is full.
    async fn accept(&self, data: &[u8]) -> WriteOutcome {
        if data.is_empty() {
            return Ok(0);
        }
        loop {
            let notified = self.inner.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(SinkError::Closed);
                }
                if state.count < state.capacity() {
                    let n = state.push(data);
                    drop(state);
                    self.inner.not_empty.notify_waiters();
                    return Ok(n);
                }
            }
            notified.await;
        }
    }

    async fn close(&self) -> std::result::Result<(), SinkError> {
        self.inner.state.lock().closed = true;
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
        Ok(())
    }
}
