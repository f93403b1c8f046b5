use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::ledger::KeyLedger;

/// Added to the computed wait so callers do not re-poll an instant early.
const SATURATION_BUFFER: Duration = Duration::from_secs(1);

/// Outcome of asking the limiter for a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquired {
    /// This key has been reserved for exactly one call.
    Ready(usize),
    /// Every key is at its RPM ceiling; retry after this long.
    Saturated(Duration),
}

/// Front door to the [`KeyLedger`]: sticks with the caller's key when it has
/// room, otherwise swaps to any free key in random order.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    ledger: Arc<KeyLedger>,
    indices: Vec<usize>,
}

impl RateLimiter {
    pub fn new(ledger: Arc<KeyLedger>) -> Self {
        let indices = ledger.indices();
        Self { ledger, indices }
    }

    pub fn ledger(&self) -> &KeyLedger {
        &self.ledger
    }

    pub fn acquire(&self, current: Option<usize>) -> Acquired {
        self.acquire_at(current, Instant::now())
    }

    pub fn acquire_at(&self, current: Option<usize>, now: Instant) -> Acquired {
        // Randomized fallback order keeps workers from piling onto one key
        let mut order = self.indices.clone();
        order.shuffle(&mut rand::rng());

        match self.ledger.reserve_any(current, &order, now) {
            Ok(index) => {
                if current.is_some_and(|c| c != index) {
                    metrics::counter!("credential_swaps_total").increment(1);
                    tracing::debug!(from = ?current, to = index, "Swapped to a free key");
                }
                Acquired::Ready(index)
            }
            Err(earliest_reset) => {
                metrics::counter!("credential_saturation_waits_total").increment(1);
                Acquired::Saturated(earliest_reset + SATURATION_BUFFER)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn limiter(keys: usize, rpm: u32, now: Instant) -> RateLimiter {
        RateLimiter::new(Arc::new(KeyLedger::new(1..=keys, rpm, now)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sticks_with_current_key() {
        let now = Instant::now();
        let limiter = limiter(3, 5, now);
        for _ in 0..5 {
            assert_eq!(limiter.acquire_at(Some(2), now), Acquired::Ready(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_current_key_takes_any() {
        let now = Instant::now();
        let limiter = limiter(2, 1, now);
        let first = limiter.acquire_at(None, now);
        let second = limiter.acquire_at(None, now);
        let mut seen = HashSet::new();
        for acquired in [first, second] {
            match acquired {
                Acquired::Ready(idx) => assert!(seen.insert(idx)),
                other => panic!("expected a key, got {other:?}"),
            }
        }
        assert!(matches!(limiter.acquire_at(None, now), Acquired::Saturated(_)));
    }

    /// Three keys at RPM 2, ten rapid calls from one worker starting on key 1.
    #[tokio::test(start_paused = true)]
    async fn test_swap_then_saturate() {
        let start = Instant::now();
        let limiter = limiter(3, 2, start);
        let mut current = 1;
        let mut used = Vec::new();

        for call in 0..6u64 {
            let now = start + Duration::from_millis(call * 100);
            match limiter.acquire_at(Some(current), now) {
                Acquired::Ready(idx) => {
                    current = idx;
                    used.push(idx);
                }
                other => panic!("call {} should have found a key, got {other:?}", call + 1),
            }
        }

        assert_eq!(&used[..2], &[1, 1]);
        assert_ne!(used[2], 1);
        assert_eq!(used[2], used[3]);
        assert_eq!(used[4], used[5]);
        let distinct: HashSet<_> = used.iter().copied().collect();
        assert_eq!(distinct.len(), 3);

        // Calls 7-10: key 1's window (opened at t=0) resets first
        for call in 6..10u64 {
            let now = start + Duration::from_millis(call * 100);
            let expected = Duration::from_secs(60) - Duration::from_millis(call * 100)
                + Duration::from_secs(1);
            assert_eq!(limiter.acquire_at(Some(current), now), Acquired::Saturated(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturation_wait_is_sufficient() {
        let start = Instant::now();
        let limiter = limiter(2, 3, start);
        while let Acquired::Ready(_) = limiter.acquire_at(Some(1), start) {}

        let Acquired::Saturated(wait) = limiter.acquire_at(Some(1), start) else {
            panic!("pool should be saturated");
        };
        assert!(wait > Duration::from_secs(60));

        let after = start + wait;
        assert!(matches!(limiter.acquire_at(Some(1), after), Acquired::Ready(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_never_exceeded_across_tasks() {
        let now = Instant::now();
        let limiter = limiter(4, 3, now);
        let mut tasks = Vec::new();
        for worker in 0..8usize {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                let mut current = Some(1 + worker % 4);
                let mut granted = Vec::new();
                for _ in 0..10 {
                    if let Acquired::Ready(idx) = limiter.acquire_at(current, now) {
                        current = Some(idx);
                        granted.push(idx);
                    }
                    tokio::task::yield_now().await;
                }
                granted
            }));
        }

        let mut per_key = [0u32; 5];
        for granted in futures::future::join_all(tasks).await {
            for idx in granted.unwrap() {
                per_key[idx] += 1;
            }
        }
        assert_eq!(&per_key[1..], &[3, 3, 3, 3]);
    }
}
