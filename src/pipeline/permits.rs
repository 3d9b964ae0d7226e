//! Counting semaphore bounding frames decoded but not yet written.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Debug)]
struct Inner {
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

/// Fixed pool of in-flight permits.
///
/// Tokens live in a bounded channel; acquiring takes one out, dropping the
/// [`Permit`] puts it back. Release therefore happens exactly once per
/// acquisition, whichever path the holder takes.
#[derive(Debug, Clone)]
pub struct Permits {
    inner: Arc<Inner>,
}

impl Permits {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tokens_tx, tokens_rx) = bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel has room for every token
            let _ = tokens_tx.try_send(());
        }
        Self {
            inner: Arc::new(Inner {
                tokens_tx,
                tokens_rx,
                capacity,
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait up to `timeout` for a permit
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit> {
        self.inner.tokens_rx.recv_timeout(timeout).ok()?;
        let in_use = self.inner.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(in_use, Ordering::SeqCst);
        Some(Permit {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn try_acquire(&self) -> Option<Permit> {
        self.acquire_timeout(Duration::ZERO)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

/// One in-flight frame slot, released on drop
#[derive(Debug)]
pub struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.in_use.fetch_sub(1, Ordering::SeqCst);
        let _ = self.inner.tokens_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let permits = Permits::new(2);
        let a = permits.try_acquire().unwrap();
        let _b = permits.try_acquire().unwrap();
        assert!(permits.try_acquire().is_none());
        assert_eq!(permits.in_use(), 2);

        drop(a);
        assert_eq!(permits.in_use(), 1);
        assert!(permits.try_acquire().is_some());
        assert_eq!(permits.peak(), 2);
    }

    #[test]
    fn test_acquire_times_out() {
        let permits = Permits::new(1);
        let _held = permits.try_acquire().unwrap();
        let started = std::time::Instant::now();
        assert!(permits.acquire_timeout(Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_release_across_threads() {
        let permits = Permits::new(4);
        let held: Vec<Permit> = (0..4).filter_map(|_| permits.try_acquire()).collect();
        assert_eq!(held.len(), 4);

        std::thread::scope(|s| {
            for permit in held {
                s.spawn(move || drop(permit));
            }
        });

        assert_eq!(permits.in_use(), 0);
        assert_eq!(permits.peak(), 4);
        assert!(permits.acquire_timeout(Duration::from_millis(10)).is_some());
    }
}
