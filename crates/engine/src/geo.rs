//! ZIP code to coordinates resolution with a stale-while-revalidate cache.
//!
//! A fresh entry is served without touching the provider. A stale entry is
//! served immediately and refreshed by a background task; at most one refresh
//! per ZIP code is in flight. A miss is resolved synchronously and cached.
//! Short-lived processes call [`GeoResolver::drain`] before exiting so
//! pending refreshes are written or logged instead of being dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use airwatch_common::error::GeoError;
use airwatch_common::retry::RetryPolicy;
use airwatch_common::types::Coordinates;
use airwatch_providers::GeocodingProvider;

use crate::store::CoordinateStore;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REFRESH_DAYS: i64 = 30;

/// Result of a background refresh, published when an event sink is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshEvent {
    pub zip_code: String,
    pub result: Result<Coordinates, GeoError>,
}

pub struct GeoResolver {
    store: Arc<dyn CoordinateStore>,
    provider: Arc<dyn GeocodingProvider>,
    lookup_timeout: Duration,
    refresh_after: chrono::Duration,
    refresh_retry: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
    refreshes: TaskTracker,
    events: Option<mpsc::UnboundedSender<RefreshEvent>>,
}

impl GeoResolver {
    pub fn new(store: Arc<dyn CoordinateStore>, provider: Arc<dyn GeocodingProvider>) -> Self {
        Self {
            store,
            provider,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            refresh_after: chrono::Duration::days(DEFAULT_REFRESH_DAYS),
            refresh_retry: RetryPolicy::new(3, Duration::from_secs(2), 2.0),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            refreshes: TaskTracker::new(),
            events: None,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// How long a newly written entry stays fresh.
    pub fn with_refresh_after(mut self, refresh_after: chrono::Duration) -> Self {
        self.refresh_after = refresh_after;
        self
    }

    pub fn with_refresh_retry(mut self, policy: RetryPolicy) -> Self {
        self.refresh_retry = policy;
        self
    }

    pub fn with_refresh_events(mut self, events: mpsc::UnboundedSender<RefreshEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn resolve(&self, zip_code: &str) -> Result<Coordinates, GeoError> {
        if let Some(entry) = self.store.find_coordinates(zip_code).await? {
            if entry.is_fresh(Utc::now()) {
                tracing::debug!(zip_code, "Coordinate cache hit");
                return Ok(entry.coordinates());
            }

            tracing::debug!(
                zip_code,
                refresh_after = %entry.refresh_after,
                "Serving stale coordinates, scheduling refresh"
            );
            self.spawn_refresh(zip_code);
            return Ok(entry.coordinates());
        }

        let coordinates = lookup(self.provider.as_ref(), zip_code, self.lookup_timeout)
            .await
            .inspect_err(|e| tracing::warn!(zip_code, error = %e, "Geocoding failed"))?;

        self.store
            .upsert_coordinates(zip_code, coordinates, refresh_deadline(self.refresh_after))
            .await?;

        tracing::info!(
            zip_code,
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "Cached coordinates for new ZIP code"
        );
        Ok(coordinates)
    }

    /// Whether a background refresh for `zip_code` is currently running.
    pub fn refresh_in_flight(&self, zip_code: &str) -> bool {
        lock_in_flight(&self.in_flight).contains(zip_code)
    }

    /// Wait for background refreshes to finish, up to `timeout`. Returns
    /// `false` when some were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.refreshes.close();
        let pending = self.refreshes.len();
        let finished = tokio::time::timeout(timeout, self.refreshes.wait())
            .await
            .is_ok();
        self.refreshes.reopen();

        if finished {
            tracing::debug!(pending, "Coordinate refreshes drained");
        } else {
            tracing::warn!(
                remaining = self.refreshes.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Coordinate refreshes still running at drain deadline"
            );
        }
        finished
    }

    fn spawn_refresh(&self, zip_code: &str) {
        if !lock_in_flight(&self.in_flight).insert(zip_code.to_string()) {
            tracing::debug!(zip_code, "Coordinate refresh already in flight");
            return;
        }
        let claim = InFlightClaim {
            in_flight: Arc::clone(&self.in_flight),
            zip_code: zip_code.to_string(),
        };

        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        let events = self.events.clone();
        let timeout = self.lookup_timeout;
        let refresh_after = self.refresh_after;
        let retry = self.refresh_retry;

        self.refreshes.spawn(async move {
            let provider: &dyn GeocodingProvider = provider.as_ref();
            let zip: &str = &claim.zip_code;

            let result = match retry
                .run(|_| lookup(provider, zip, timeout), GeoError::is_transient)
                .await
            {
                Ok(found) => store
                    .upsert_coordinates(zip, found.value, refresh_deadline(refresh_after))
                    .await
                    .map(|_| found.value)
                    .map_err(GeoError::from),
                Err(failure) => Err(failure.error),
            };

            match &result {
                Ok(_) => tracing::info!(zip_code = zip, "Refreshed cached coordinates"),
                Err(e) => tracing::warn!(
                    zip_code = zip,
                    error = %e,
                    "Coordinate refresh failed, keeping stale entry"
                ),
            }

            let zip_code = claim.zip_code.clone();
            drop(claim);

            if let Some(events) = events {
                let _ = events.send(RefreshEvent { zip_code, result });
            }
        });
    }
}

/// Marks a ZIP code as being refreshed; released on drop, including when the
/// refresh task panics or is cancelled.
struct InFlightClaim {
    in_flight: Arc<Mutex<HashSet<String>>>,
    zip_code: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.zip_code);
    }
}

fn refresh_deadline(refresh_after: chrono::Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(refresh_after)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn lock_in_flight(in_flight: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn lookup(
    provider: &dyn GeocodingProvider,
    zip_code: &str,
    timeout: Duration,
) -> Result<Coordinates, GeoError> {
    match tokio::time::timeout(timeout, provider.geocode(zip_code)).await {
        Ok(result) => result,
        Err(_) => Err(GeoError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use airwatch_common::types::CoordinateCacheEntry;

    use crate::store::MemoryStore;

    const NYC: Coordinates = Coordinates {
        latitude: 40.7128,
        longitude: -74.006,
    };

    enum Behavior {
        Found(Coordinates),
        Missing,
        Hang,
        FailThenFind(u32),
        Panic,
    }

    struct FakeGeocoder {
        behavior: Behavior,
        delay: Duration,
        calls: AtomicU32,
    }

    impl FakeGeocoder {
        fn new(behavior: Behavior) -> Arc<Self> {
            Self::delayed(behavior, Duration::ZERO)
        }

        fn delayed(behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeocodingProvider for FakeGeocoder {
        async fn geocode(&self, zip_code: &str) -> Result<Coordinates, GeoError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            match &self.behavior {
                Behavior::Found(c) => Ok(*c),
                Behavior::Missing => Err(GeoError::NotFound(zip_code.to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(NYC)
                }
                Behavior::FailThenFind(failures) if call <= *failures => {
                    Err(GeoError::ProviderUnavailable("status 503".to_string()))
                }
                Behavior::FailThenFind(_) => Ok(NYC),
                Behavior::Panic => panic!("geocoder exploded"),
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn entry(zip: &str, fresh: bool) -> CoordinateCacheEntry {
        let now = Utc::now();
        CoordinateCacheEntry {
            zip_code: zip.to_string(),
            latitude: 1.0,
            longitude: 2.0,
            refresh_after: if fresh {
                now + chrono::Duration::days(10)
            } else {
                now - chrono::Duration::days(1)
            },
            updated_at: now - chrono::Duration::days(31),
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_provider() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", true)).await;
        let geocoder = FakeGeocoder::new(Behavior::Found(NYC));
        let resolver = GeoResolver::new(store, geocoder.clone());

        let coords = resolver.resolve("10001").await.unwrap();
        assert_eq!(coords.latitude, 1.0);
        assert_eq!(coords.longitude, 2.0);
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_then_refreshed_once() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::delayed(Behavior::Found(NYC), Duration::from_millis(500));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = GeoResolver::new(store.clone(), geocoder.clone()).with_refresh_events(tx);

        let start = tokio::time::Instant::now();
        let first = resolver.resolve("10001").await.unwrap();
        let second = resolver.resolve("10001").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO, "stale reads must not wait on the provider");
        assert_eq!(first.latitude, 1.0);
        assert_eq!(second.latitude, 1.0);
        assert!(resolver.refresh_in_flight("10001"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.zip_code, "10001");
        assert_eq!(event.result, Ok(NYC));
        assert_eq!(geocoder.calls(), 1, "concurrent stale reads share one refresh");
        assert!(!resolver.refresh_in_flight("10001"));

        let cached = store.find_coordinates("10001").await.unwrap().unwrap();
        assert_eq!(cached.coordinates(), NYC);
        assert!(cached.is_fresh(Utc::now()));

        let third = resolver.resolve("10001").await.unwrap();
        assert_eq!(third, NYC);
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_entry() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::new(Behavior::Missing);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = GeoResolver::new(store.clone(), geocoder.clone()).with_refresh_events(tx);

        resolver.resolve("10001").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.result, Err(GeoError::NotFound("10001".to_string())));
        assert_eq!(geocoder.calls(), 1, "permanent failures are not retried");

        let cached = store.find_coordinates("10001").await.unwrap().unwrap();
        assert_eq!(cached.latitude, 1.0);
        assert!(!cached.is_fresh(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_transient_failures() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::new(Behavior::FailThenFind(2));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = GeoResolver::new(store, geocoder.clone())
            .with_refresh_retry(RetryPolicy::new(3, Duration::from_millis(100), 2.0))
            .with_refresh_events(tx);

        resolver.resolve("10001").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.result, Ok(NYC));
        assert_eq!(geocoder.calls(), 3);
    }

    #[tokio::test]
    async fn test_miss_resolves_and_caches() {
        let store = Arc::new(MemoryStore::new());
        let geocoder = FakeGeocoder::new(Behavior::Found(NYC));
        let resolver = GeoResolver::new(store.clone(), geocoder.clone())
            .with_refresh_after(chrono::Duration::days(7));

        let before = Utc::now();
        assert_eq!(resolver.resolve("10001").await.unwrap(), NYC);
        assert_eq!(geocoder.calls(), 1);

        let cached = store.find_coordinates("10001").await.unwrap().unwrap();
        assert_eq!(cached.coordinates(), NYC);
        assert!(cached.refresh_after >= before + chrono::Duration::days(7));

        resolver.resolve("10001").await.unwrap();
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_zip_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let geocoder = FakeGeocoder::new(Behavior::Missing);
        let resolver = GeoResolver::new(store.clone(), geocoder);

        let err = resolver.resolve("00000").await.unwrap_err();
        assert_eq!(err, GeoError::NotFound("00000".to_string()));
        assert_eq!(err.user_message(), "Invalid ZIP code: 00000");
        assert!(store.find_coordinates("00000").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let store = Arc::new(MemoryStore::new());
        let geocoder = FakeGeocoder::new(Behavior::Hang);
        let resolver = GeoResolver::new(store.clone(), geocoder)
            .with_lookup_timeout(Duration::from_secs(5));

        let err = resolver.resolve("10001").await.unwrap_err();
        assert_eq!(err, GeoError::Timeout(Duration::from_secs(5)));
        assert!(store.find_coordinates("10001").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_pending_refresh() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::delayed(Behavior::Found(NYC), Duration::from_millis(300));
        let resolver = GeoResolver::new(store.clone(), geocoder.clone());

        resolver.resolve("10001").await.unwrap();
        assert!(resolver.drain(Duration::from_secs(30)).await);

        let cached = store.find_coordinates("10001").await.unwrap().unwrap();
        assert_eq!(cached.coordinates(), NYC);
        assert!(cached.is_fresh(Utc::now()));
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_at_deadline() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::new(Behavior::Hang);
        let resolver = GeoResolver::new(store.clone(), geocoder)
            .with_lookup_timeout(Duration::from_secs(3600))
            .with_refresh_retry(RetryPolicy::no_retry());

        resolver.resolve("10001").await.unwrap();
        assert!(!resolver.drain(Duration::from_secs(1)).await);
        assert!(resolver.refresh_in_flight("10001"));

        // A later drain that outlasts the lookup timeout completes.
        assert!(resolver.drain(Duration::from_secs(7200)).await);
        assert!(!resolver.refresh_in_flight("10001"));
    }

    #[tokio::test]
    async fn test_panicking_refresh_releases_zip() {
        let store = Arc::new(MemoryStore::new());
        store.put_coordinates(entry("10001", false)).await;
        let geocoder = FakeGeocoder::new(Behavior::Panic);
        let resolver = GeoResolver::new(store.clone(), geocoder.clone());

        resolver.resolve("10001").await.unwrap();
        assert!(resolver.drain(Duration::from_secs(5)).await);
        assert!(!resolver.refresh_in_flight("10001"));

        resolver.resolve("10001").await.unwrap();
        resolver.drain(Duration::from_secs(5)).await;
        assert_eq!(geocoder.calls(), 2, "a later stale read schedules a new refresh");
    }
}
