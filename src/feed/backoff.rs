use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const MIN_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 60;

/// Exponential backoff for upstream reconnection attempts.
///
/// Delay sequence: 1s, 2s, 4s, 8s, 16s, 32s, then 60s for every further
/// attempt. `reset` is called only after a successful connection; a reset
/// racing a concurrent `next_delay` resolves last-write-wins, and the atomic
/// counter guarantees no attempt is lost or double-counted.
#[derive(Debug, Default)]
pub struct BackoffPolicy {
    attempts: AtomicU32,
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the attempt counter and returns the delay before the next
    /// reconnection attempt: min(2^(attempt-1), 60) seconds.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        // 2^6 = 64 already exceeds the cap; short-circuit to avoid shifting
        // past the width of the counter on long outages.
        if attempt > 6 {
            return Duration::from_secs(MAX_DELAY_SECS);
        }
        let delay = (MIN_DELAY_SECS << (attempt - 1)).min(MAX_DELAY_SECS);
        Duration::from_secs(delay)
    }

    /// Zeroes the attempt counter after a successful connection.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Attempts since the last successful connection.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delay_sequence_follows_exponential_curve() {
        let policy = BackoffPolicy::new();
        let delays: Vec<u64> = (0..8).map(|_| policy.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.attempt_count(), 8);
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let policy = BackoffPolicy::new();
        for _ in 0..5 {
            policy.next_delay();
        }
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay().as_secs(), 1);
    }

    #[test]
    fn stays_capped_far_beyond_the_knee() {
        let policy = BackoffPolicy::new();
        for _ in 0..100 {
            policy.next_delay();
        }
        assert_eq!(policy.next_delay().as_secs(), 60);
    }

    #[test]
    fn concurrent_attempts_are_never_lost() {
        let policy = Arc::new(BackoffPolicy::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        policy.next_delay();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(policy.attempt_count(), 800);
    }
}
