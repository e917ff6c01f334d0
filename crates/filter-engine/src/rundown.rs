//! Reference-drain primitive guarding filter-set teardown.
//!
//! Callers take a reference before touching a filter set and drop it
//! when done. Teardown first blocks new acquisitions, then waits until
//! every outstanding reference has been released. This keeps lookups
//! cheap (one atomic op) while still allowing safe concurrent
//! destruction.

use std::sync::{
    Condvar, Mutex, MutexGuard,
    atomic::{AtomicUsize, Ordering},
};

const CLOSING: usize = 1 << (usize::BITS - 1);

pub(crate) struct Rundown {
    // Low bits count live references, the top bit is the closing flag.
    state: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

// A poisoned lock only means another thread panicked mid-notify; the
// protected state lives in `state`, so continuing is sound.
fn relock<'a>(lock: &'a Mutex<()>) -> MutexGuard<'a, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Rundown {
    pub(crate) fn new() -> Self {
        Rundown {
            state: AtomicUsize::new(0),
            lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Takes one reference. Fails once [`close`](Rundown::close) has
    /// begun; the caller must report the target as unavailable.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & CLOSING != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops one reference, waking the closer when the last one goes.
    pub(crate) fn release(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(previous & !CLOSING, 0);
        if previous - 1 == CLOSING {
            let _guard = relock(&self.lock);
            self.drained.notify_all();
        }
    }

    /// Blocks new acquisitions, then waits for outstanding references
    /// to drain. Idempotent; concurrent closers all block until drained.
    pub(crate) fn close(&self) {
        self.state.fetch_or(CLOSING, Ordering::AcqRel);

        let mut guard = relock(&self.lock);
        while self.state.load(Ordering::Acquire) != CLOSING {
            guard = self
                .drained
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn acquire_fails_after_close() {
        let rundown = Rundown::new();
        assert!(rundown.try_acquire());
        rundown.release();
        rundown.close();
        assert!(!rundown.try_acquire());
        // Closing an already drained, closed rundown returns at once.
        rundown.close();
    }

    #[test]
    fn close_waits_for_outstanding_references() {
        let rundown = Arc::new(Rundown::new());
        assert!(rundown.try_acquire());

        let holder = Arc::clone(&rundown);
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            holder.release();
        });

        rundown.close();
        // close returned, so the reference must be gone by now.
        assert!(!rundown.try_acquire());
        releaser.join().unwrap();
    }

    #[test]
    fn many_threads_drain_cleanly() {
        let rundown = Arc::new(Rundown::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let rundown = Arc::clone(&rundown);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if rundown.try_acquire() {
                            rundown.release();
                        }
                    }
                })
            })
            .collect();

        rundown.close();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(!rundown.try_acquire());
    }
}
