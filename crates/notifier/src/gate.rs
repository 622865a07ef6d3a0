//! Send-rate gates.
//!
//! A gate bounds how many send attempts may start per unit of time. One gate
//! instance is shared by every job of a dispatch call and by overlapping calls
//! that hold the same `Arc`. `RedisWindowGate` extends the bound across
//! processes.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait RateGate: Send + Sync {
    /// Wait until one more send attempt may start.
    async fn acquire(&self);
}

/// Gate that never waits. Useful for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

#[async_trait]
impl RateGate for Unthrottled {
    async fn acquire(&self) {}
}

/// In-process gate spacing attempt starts evenly: `rate` per second means one
/// start every `1s / rate`.
#[derive(Debug)]
pub struct IntervalGate {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn per_second(rate: NonZeroU32) -> Self {
        Self::with_spacing(Duration::from_secs(1) / rate.get())
    }

    pub fn with_spacing(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }
}

#[async_trait]
impl RateGate for IntervalGate {
    async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.spacing);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// Fixed one-second windows counted in Redis, shared by every process using
/// the same key prefix. Falls back to a local `IntervalGate` when Redis is
/// unreachable so a Redis outage never stalls a dispatch run.
pub struct RedisWindowGate {
    redis: ConnectionManager,
    key_prefix: String,
    limit: u32,
    fallback: IntervalGate,
    outage: OutageState,
}

/// Tracks whether the gate is running on its fallback, so an outage is
/// reported once when it starts and once when it ends.
#[derive(Debug, Default)]
struct OutageState {
    degraded: AtomicBool,
}

impl OutageState {
    /// Returns true only for the first failure of an outage.
    fn record_failure(&self) -> bool {
        !self.degraded.swap(true, Ordering::AcqRel)
    }

    /// Returns true only for the first success after an outage.
    fn record_success(&self) -> bool {
        self.degraded.swap(false, Ordering::AcqRel)
    }
}

impl RedisWindowGate {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>, limit: NonZeroU32) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            limit: limit.get(),
            fallback: IntervalGate::per_second(limit),
            outage: OutageState::default(),
        }
    }

    /// Count one attempt in the current window. `Ok(false)` means the window is full.
    async fn try_acquire(&self) -> Result<bool, redis::RedisError> {
        let key = window_key(&self.key_prefix, Utc::now());
        let mut conn = self.redis.clone();

        let count: u32 = conn.incr(&key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(&key, 2).await?;
        }

        Ok(count <= self.limit)
    }
}

#[async_trait]
impl RateGate for RedisWindowGate {
    async fn acquire(&self) {
        loop {
            let attempt = self.try_acquire().await;
            if attempt.is_ok() && self.outage.record_success() {
                tracing::info!("Redis rate gate recovered");
            }

            match attempt {
                Ok(true) => return,
                Ok(false) => {
                    let wait = until_next_window(Utc::now());
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        limit = self.limit,
                        "Send window full, waiting for next window"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    if self.outage.record_failure() {
                        tracing::warn!(
                            error = %e,
                            "Redis rate gate unavailable, falling back to local gate"
                        );
                    } else {
                        tracing::debug!(error = %e, "Redis rate gate still unavailable");
                    }
                    self.fallback.acquire().await;
                    return;
                }
            }
        }
    }
}

fn window_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}:{}", prefix, now.timestamp())
}

/// Time left until the next whole second.
fn until_next_window(now: DateTime<Utc>) -> Duration {
    let elapsed = Duration::from_nanos(u64::from(now.timestamp_subsec_nanos().min(999_999_999)));
    Duration::from_secs(1).saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn test_spacing_from_rate() {
        let gate = IntervalGate::per_second(NonZeroU32::new(4).unwrap());
        assert_eq!(gate.spacing(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let gate = IntervalGate::per_second(NonZeroU32::new(2).unwrap());
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_are_spaced() {
        let gate = IntervalGate::per_second(NonZeroU32::new(5).unwrap());
        let start = Instant::now();
        for _ in 0..6 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_share_the_gate() {
        let gate = Arc::new(IntervalGate::per_second(NonZeroU32::new(10).unwrap()));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.acquire().await;
                Instant::now()
            }));
        }

        let mut started = Vec::new();
        for handle in handles {
            started.push(handle.await.unwrap());
        }
        started.sort();

        assert!(started.windows(2).all(|w| w[1] - w[0] >= Duration::from_millis(100)));
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gate_does_not_bank_capacity() {
        let gate = IntervalGate::per_second(NonZeroU32::new(1).unwrap());
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_window_key_uses_unix_second() {
        let now = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(window_key("airwatch:send", now), "airwatch:send:1700000000");
    }

    #[test]
    fn test_until_next_window() {
        let now = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(until_next_window(now), Duration::from_millis(750));

        let on_boundary = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(until_next_window(on_boundary), Duration::from_secs(1));
    }

    #[test]
    fn test_outage_reported_once_each_way() {
        let outage = OutageState::default();
        assert!(!outage.record_success(), "healthy gate has nothing to recover");

        assert!(outage.record_failure());
        assert!(!outage.record_failure());
        assert!(!outage.record_failure());

        assert!(outage.record_success());
        assert!(!outage.record_success());

        assert!(outage.record_failure(), "a new outage is reported again");
    }
}
