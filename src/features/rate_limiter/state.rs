use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of a single token acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// A token was consumed; `remaining` is the floor of what is left.
    Admitted { remaining: u64 },
    /// No token available; one becomes available after `retry_after`.
    Rejected { retry_after: Duration },
}

#[async_trait]
pub trait RateLimitState: Send + Sync {
    /// Refills the bucket for `key` (created full on first use) and tries to
    /// consume one token.
    async fn acquire(&self, key: &str, capacity: u32, refill_rate: f64) -> Decision;
    /// Removes buckets unused for at least `evict_after`, returning how many
    /// were dropped.
    async fn evict_idle(&self, evict_after: Duration) -> usize;
    /// Current number of live buckets, for monitoring
    fn active_buckets(&self) -> usize;
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant, // only moves on admitted calls
}

#[derive(Default)]
pub struct InMemoryRateLimitState {
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl InMemoryRateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_for(&self, key: &str, capacity: u32, now: Instant) -> Arc<Mutex<Bucket>> {
        // Fast path: shared shard lock only
        if let Some(existing) = self.buckets.get(key) {
            return existing.value().clone();
        }

        // Slow path: `entry` takes the shard write lock and re-checks
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: f64::from(capacity),
                    last_refill: now,
                    last_used: now,
                }))
            })
            .value()
            .clone()
    }
}

#[async_trait]
impl RateLimitState for InMemoryRateLimitState {
    async fn acquire(&self, key: &str, capacity: u32, refill_rate: f64) -> Decision {
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Decision::Rejected {
                retry_after: Duration::from_secs(1),
            };
        }

        let now = Instant::now();
        // No map guard is alive past this line
        let bucket = self.bucket_for(key, capacity, now);
        let mut bucket = bucket.lock().await;

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(f64::from(capacity));
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.last_used = now;
            Decision::Admitted {
                remaining: bucket.tokens.floor() as u64,
            }
        } else {
            let needed = 1.0 - bucket.tokens;
            Decision::Rejected {
                retry_after: Duration::from_secs_f64(needed / refill_rate),
            }
        }
    }

    async fn evict_idle(&self, evict_after: Duration) -> usize {
        let now = Instant::now();

        // Snapshot first so no shard lock is held while buckets are inspected
        let snapshot: Vec<(String, Arc<Mutex<Bucket>>)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut stale = Vec::new();
        for (key, bucket) in snapshot {
            let last_used = bucket.lock().await.last_used;
            if now.saturating_duration_since(last_used) >= evict_after {
                stale.push((key, bucket));
            }
        }

        // A bucket recreated under the same key since the snapshot is kept
        let mut removed = 0;
        for (key, bucket) in stale {
            if self
                .buckets
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &bucket))
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Cleaned up {} idle rate limit buckets", removed);
        }
        removed
    }

    fn active_buckets(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full_and_drains() {
        let state = InMemoryRateLimitState::new();

        assert_eq!(state.acquire("k", 2, 2.0).await, Decision::Admitted { remaining: 1 });
        assert_eq!(state.acquire("k", 2, 2.0).await, Decision::Admitted { remaining: 0 });
        match state.acquire("k", 2, 2.0).await {
            Decision::Rejected { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_millis(500));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(state.active_buckets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_capacity() {
        let state = InMemoryRateLimitState::new();
        state.acquire("k", 3, 1.0).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(state.acquire("k", 3, 1.0).await, Decision::Admitted { remaining: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let state = InMemoryRateLimitState::new();
        assert_eq!(state.acquire("a", 1, 1.0).await, Decision::Admitted { remaining: 0 });
        assert_eq!(state.acquire("b", 1, 1.0).await, Decision::Admitted { remaining: 0 });
        assert!(matches!(state.acquire("a", 1, 1.0).await, Decision::Rejected { .. }));
        assert_eq!(state.active_buckets(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_removes_only_stale_buckets() {
        let state = InMemoryRateLimitState::new();
        state.acquire("old", 1, 1.0).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        state.acquire("fresh", 1, 1.0).await;

        assert_eq!(state.evict_idle(Duration::from_secs(5)).await, 1);
        assert_eq!(state.active_buckets(), 1);
        // Evicted key comes back with full capacity
        assert_eq!(state.acquire("old", 1, 1.0).await, Decision::Admitted { remaining: 0 });
    }

    #[tokio::test]
    async fn test_degenerate_rate_rejects_without_state() {
        let state = InMemoryRateLimitState::new();
        assert_eq!(
            state.acquire("k", 5, 0.0).await,
            Decision::Rejected { retry_after: Duration::from_secs(1) }
        );
        assert_eq!(state.active_buckets(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_creates_one_bucket() {
        let state = Arc::new(InMemoryRateLimitState::new());

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.acquire("fresh", 5, 0.001).await })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), Decision::Admitted { .. }) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(state.active_buckets(), 1);
    }
}
