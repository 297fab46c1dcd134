//! Reentrant read/write lock with per-thread hold counts.
//!
//! `parking_lot` has no reentrant read/write lock, so the archive model
//! carries its own: hold counts are tracked per thread, a writer may take
//! additional read holds, and the hold counts are inspectable so the locking
//! controller can perform the documented upgrade dance — record the read hold
//! count, release it fully, block for the write lock, then restore the read
//! holds. That sequence is deliberately not atomic; callers must re-validate
//! whatever they checked before the upgrade.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

/// Shared lock state.
#[derive(Debug, Default)]
struct LockState {
    /// Thread currently holding the write lock, if any.
    writer: Option<ThreadId>,
    /// Write hold count of the writer.
    write_holds: usize,
    /// Read hold counts per thread.
    readers: HashMap<ThreadId, usize>,
}

/// Reentrant read/write lock pair of one archive model.
#[derive(Debug, Default)]
pub struct ReentrantRwLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ReentrantRwLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one read hold, blocking while another thread writes.
    ///
    /// Reentrant: a thread that already holds the read or write lock is
    /// granted immediately.
    pub fn lock_read(&self) {
        let me: ThreadId = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let own_read: bool = state.readers.get(&me).copied().unwrap_or(0) > 0;
            let foreign_writer: bool = matches!(state.writer, Some(w) if w != me);
            if own_read || !foreign_writer {
                *state.readers.entry(me).or_insert(0) += 1;
                return;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Release one read hold.
    pub fn unlock_read(&self) {
        let me: ThreadId = thread::current().id();
        let mut state = self.state.lock();
        let holds: &mut usize = state
            .readers
            .get_mut(&me)
            .expect("unlock_read without read hold");
        *holds -= 1;
        if *holds == 0 {
            state.readers.remove(&me);
            self.cond.notify_all();
        }
    }

    /// Acquire one write hold, blocking while other threads read or write.
    ///
    /// Reentrant for the current writer. Must not be called while holding
    /// only the read lock — that is what the upgrade dance is for.
    pub fn lock_write(&self) {
        let me: ThreadId = thread::current().id();
        let mut state = self.state.lock();
        debug_assert!(
            state.writer == Some(me) || state.readers.get(&me).copied().unwrap_or(0) == 0,
            "write acquisition while holding only the read lock; upgrade instead"
        );
        loop {
            match state.writer {
                Some(w) if w == me => {
                    state.write_holds += 1;
                    return;
                }
                None if state.readers.is_empty() => {
                    state.writer = Some(me);
                    state.write_holds = 1;
                    return;
                }
                _ => {}
            }
            self.cond.wait(&mut state);
        }
    }

    /// Release one write hold.
    pub fn unlock_write(&self) {
        let me: ThreadId = thread::current().id();
        let mut state = self.state.lock();
        debug_assert_eq!(state.writer, Some(me), "unlock_write by non-writer");
        state.write_holds -= 1;
        if state.write_holds == 0 {
            state.writer = None;
            self.cond.notify_all();
        }
    }

    /// Read hold count of the current thread.
    pub fn read_holds(&self) -> usize {
        let me: ThreadId = thread::current().id();
        self.state.lock().readers.get(&me).copied().unwrap_or(0)
    }

    /// Whether the current thread holds the write lock.
    pub fn write_held(&self) -> bool {
        let me: ThreadId = thread::current().id();
        self.state.lock().writer == Some(me)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_reentrant_read() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        lock.lock_read();
        lock.lock_read();
        assert_eq!(lock.read_holds(), 2);
        lock.unlock_read();
        lock.unlock_read();
        assert_eq!(lock.read_holds(), 0);
    }

    #[test]
    fn test_reentrant_write() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        lock.lock_write();
        lock.lock_write();
        assert!(lock.write_held());
        lock.unlock_write();
        assert!(lock.write_held());
        lock.unlock_write();
        assert!(!lock.write_held());
    }

    #[test]
    fn test_writer_may_take_read_holds() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        lock.lock_write();
        lock.lock_read();
        assert_eq!(lock.read_holds(), 1);
        lock.unlock_read();
        lock.unlock_write();
    }

    #[test]
    fn test_write_excludes_foreign_reader() {
        let lock: Arc<ReentrantRwLock> = Arc::new(ReentrantRwLock::new());
        lock.lock_read();

        let acquired: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let handle = {
            let lock: Arc<ReentrantRwLock> = Arc::clone(&lock);
            let acquired: Arc<AtomicBool> = Arc::clone(&acquired);
            thread::spawn(move || {
                lock.lock_write();
                acquired.store(true, Ordering::SeqCst);
                lock.unlock_write();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        lock.unlock_read();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_upgrade_dance_restores_holds() {
        let lock: ReentrantRwLock = ReentrantRwLock::new();
        lock.lock_read();
        lock.lock_read();

        let holds: usize = lock.read_holds();
        for _ in 0..holds {
            lock.unlock_read();
        }
        lock.lock_write();
        for _ in 0..holds {
            lock.lock_read();
        }

        assert!(lock.write_held());
        assert_eq!(lock.read_holds(), 2);

        lock.unlock_write();
        lock.unlock_read();
        lock.unlock_read();
        assert_eq!(lock.read_holds(), 0);
        assert!(!lock.write_held());
    }
}
