//! Recursive lock guarding the connection's shared state
//!
//! Display topology changes are applied under this lock and then broadcast to
//! every thread context. The broadcast path may re-enter connection state, so
//! the lock is recursive. Waits are bounded: a wait that exceeds the first
//! bound is reported as a likely deadlock and retried with a longer bound
//! instead of hanging silently.

use log::warn;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::time::{Duration, Instant};

pub struct SharedLock {
    mutex: ReentrantMutex<()>,
    first_wait: Duration,
    retry_wait: Duration,
}

pub type SharedGuard<'a> = ReentrantMutexGuard<'a, ()>;

impl SharedLock {
    pub fn new(first_wait: Duration, retry_wait: Duration) -> Self {
        Self {
            mutex: ReentrantMutex::new(()),
            first_wait,
            retry_wait,
        }
    }

    /// Acquires the lock, warning each time a bounded wait expires.
    pub fn acquire(&self) -> SharedGuard<'_> {
        if let Some(guard) = self.mutex.try_lock_for(self.first_wait) {
            return guard;
        }

        let started = Instant::now();
        let mut attempts = 1u32;
        loop {
            warn!(
                "🔒 Shared connection lock still busy after {:?} (attempt {}), possible deadlock",
                self.first_wait + started.elapsed(),
                attempts
            );
            if let Some(guard) = self.mutex.try_lock_for(self.retry_wait) {
                warn!("🔒 Shared connection lock acquired after {} retries", attempts);
                return guard;
            }
            attempts = attempts.saturating_add(1);
        }
    }

    /// Acquires without waiting, for diagnostics and tests.
    pub fn try_acquire(&self) -> Option<SharedGuard<'_>> {
        self.mutex.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_is_recursive() {
        let lock = SharedLock::new(Duration::from_millis(10), Duration::from_millis(10));
        let outer = lock.acquire();
        let inner = lock.acquire();
        assert!(lock.is_locked());
        drop(inner);
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_contended_lock_retries_until_released() {
        let lock = Arc::new(SharedLock::new(
            Duration::from_millis(5),
            Duration::from_millis(5),
        ));
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _guard = lock.acquire();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };

        locked_rx.recv().unwrap();
        assert!(lock.try_acquire().is_none());

        // Outlive several bounded waits before releasing the holder
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            release_tx.send(()).unwrap();
        });

        let _guard = lock.acquire();
        holder.join().unwrap();
        releaser.join().unwrap();
    }
}
