//! Admission permits bounding the number of in-flight loads.
//!
//! A [`Permit`] is held from the moment a request is admitted for dispatch until its decode
//! attempt finishes. Dropping the permit releases it, so every exit path of a worker
//! (success, failure, unwinding) gives it back exactly once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Counters {
    in_flight: usize,
    peak_in_flight: usize,
    admitted: u64,
    released: u64,
}

/// Counting permit pool of fixed capacity.
#[derive(Debug)]
pub struct PermitPool {
    capacity: usize,
    counters: Mutex<Counters>,
    available: Condvar,
}

impl PermitPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            counters: Mutex::new(Counters::default()),
            available: Condvar::new(),
        })
    }

    /// Block until a permit is free and take it.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut counters = self.counters.lock();
        while counters.in_flight >= self.capacity {
            self.available.wait(&mut counters);
        }
        self.admit(&mut counters)
    }

    fn admit(self: &Arc<Self>, counters: &mut Counters) -> Permit {
        counters.in_flight += 1;
        counters.admitted += 1;
        counters.peak_in_flight = counters.peak_in_flight.max(counters.in_flight);
        Permit {
            pool: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut counters = self.counters.lock();
        debug_assert!(counters.in_flight > 0, "permit released more often than acquired");
        counters.in_flight = counters.in_flight.saturating_sub(1);
        counters.released += 1;
        drop(counters);
        // Both blocked acquirers and idle waiters listen on the same condvar.
        self.available.notify_all();
    }

    /// Wait up to `timeout` for any permit to be released.
    pub fn wait_for_release(&self, timeout: Duration) {
        let mut counters = self.counters.lock();
        self.available.wait_for(&mut counters, timeout);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.counters.lock().in_flight
    }

    /// Highest number of permits ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.lock().peak_in_flight
    }

    pub fn admitted(&self) -> u64 {
        self.counters.lock().admitted
    }

    pub fn released(&self) -> u64 {
        self.counters.lock().released
    }
}

/// A held admission permit. Released on drop.
#[derive(Debug)]
pub struct Permit {
    pool: Arc<PermitPool>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_capacity_bounds_permits() {
        let pool = PermitPool::new(2);
        let a = pool.acquire();
        let _b = pool.acquire();
        assert_eq!(pool.in_flight(), 2);
        pool.wait_for_release(Duration::from_millis(20));
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        let _c = pool.acquire();
        assert_eq!(pool.peak_in_flight(), 2);
        assert_eq!(pool.admitted(), 3);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let pool = PermitPool::new(0);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = PermitPool::new(1);
        let held = pool.acquire();

        let (tx, rx) = flume::bounded(1);
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _permit = pool.acquire();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();

        assert_eq!(pool.admitted(), 2);
        assert_eq!(pool.released(), 2);
        assert_eq!(pool.peak_in_flight(), 1);
    }

    #[test]
    fn test_released_on_panic() {
        let pool = PermitPool::new(1);
        let worker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _permit = pool.acquire();
                panic!("decode blew up");
            })
        };
        assert!(worker.join().is_err());
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.admitted(), pool.released());
    }
}
