//! Open-stream accounting per archive.
//!
//! Every entry stream handed out by a controller is registered here with the
//! thread that opened it. Sync consults the pool so an archive is never
//! rewritten while streams opened by *other* threads are still open; a
//! thread's own streams never block that same thread's sync request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Direction of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Stream reading entry data.
    Input,
    /// Stream staging entry data for a later commit.
    Output,
}

/// One registered stream.
#[derive(Debug)]
struct OpenStream {
    kind: StreamKind,
    thread: ThreadId,
    revoked: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct PoolState {
    streams: HashMap<u64, OpenStream>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct PoolInner {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Stream accounting pool of one archive controller.
#[derive(Debug, Clone, Default)]
pub struct StreamPool {
    inner: Arc<PoolInner>,
}

impl StreamPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream opened by the current thread.
    pub fn register(&self, kind: StreamKind) -> StreamTicket {
        let revoked: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let mut state = self.inner.state.lock();
        let id: u64 = state.next_id;
        state.next_id += 1;
        state.streams.insert(
            id,
            OpenStream {
                kind,
                thread: thread::current().id(),
                revoked: Arc::clone(&revoked),
            },
        );
        StreamTicket {
            pool: Arc::clone(&self.inner),
            id,
            revoked,
        }
    }

    /// Number of live streams of a kind opened by threads other than the
    /// current one.
    pub fn strangers(&self, kind: StreamKind) -> usize {
        let me: ThreadId = thread::current().id();
        self.inner
            .state
            .lock()
            .streams
            .values()
            .filter(|s| {
                s.kind == kind && s.thread != me && !s.revoked.load(Ordering::Acquire)
            })
            .count()
    }

    /// Wait up to `timeout` for stranger streams of a kind to close.
    ///
    /// Interruption or timeout degrades to "the wait has elapsed": the
    /// remaining stranger count is returned either way.
    pub fn wait_for_strangers(&self, kind: StreamKind, timeout: Duration) -> usize {
        let me: ThreadId = thread::current().id();
        let deadline: Option<Instant> = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        loop {
            let remaining: usize = state
                .streams
                .values()
                .filter(|s| {
                    s.kind == kind && s.thread != me && !s.revoked.load(Ordering::Acquire)
                })
                .count();
            if remaining == 0 {
                return 0;
            }
            match deadline {
                // Duration::MAX overflows Instant: wait unconditionally.
                None => self.inner.cond.wait(&mut state),
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        return remaining;
                    }
                }
            }
        }
    }

    /// Force-close all stranger streams of a kind.
    ///
    /// # Returns
    /// Number of streams revoked.
    pub fn revoke_strangers(&self, kind: StreamKind) -> usize {
        let me: ThreadId = thread::current().id();
        let state = self.inner.state.lock();
        let mut revoked: usize = 0;
        for stream in state.streams.values() {
            if stream.kind == kind
                && stream.thread != me
                && !stream.revoked.swap(true, Ordering::AcqRel)
            {
                revoked += 1;
            }
        }
        if revoked > 0 {
            debug!(kind = ?kind, revoked, "force-closed stranger streams");
            self.inner.cond.notify_all();
        }
        revoked
    }
}

/// RAII registration of one open stream.
///
/// Dropping the ticket deregisters the stream and wakes any sync waiting for
/// it to close.
#[derive(Debug)]
pub struct StreamTicket {
    pool: Arc<PoolInner>,
    id: u64,
    revoked: Arc<AtomicBool>,
}

impl StreamTicket {
    /// Whether a forced sync revoked this stream.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

impl Drop for StreamTicket {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.streams.remove(&self.id);
        self.pool.cond.notify_all();
    }
}
