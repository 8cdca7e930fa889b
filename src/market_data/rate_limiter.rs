// =============================================================================
// Per-Provider Rate Limiter — Token Bucket
// =============================================================================
//
// Each provider gets its own bucket with a fixed capacity and a steady refill
// rate. Capacity is restored lazily on `try_acquire` based on elapsed time,
// so the limiter needs no background ticking task — the same "no extra
// tasks, compute lazily from elapsed time" approach the teacher's rate-limit
// tracker uses for its window counters.
// =============================================================================

use parking_lot::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempt to take one token. Returns `true` if allowed.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_blocks() {
        let rl = RateLimiter::new(2.0, 0.0);
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let rl = RateLimiter::new(1.0, 1000.0);
        assert!(rl.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(rl.try_acquire());
    }
}
