//! Weather enrichment for station coordinates.
//!
//! [`EnrichmentCache`] keeps one observation per coordinate pair for a fixed
//! lifetime and only falls through to the [`WeatherSource`] on a miss. A
//! failed lookup never reaches the caller: it yields a zero observation and
//! is not cached, so the next cycle retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::error::LookupError;
use crate::models::WeatherObservation;

// ---

/// Timeout for a single weather API request.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time past the cache lifetime before the janitor sweeps.
pub const SWEEP_GRACE: Duration = Duration::from_secs(10);

/// Something that can resolve a coordinate pair to current weather.
#[async_trait]
pub trait WeatherSource: Send + Sync + 'static {
    async fn fetch(
        &self,
        longitude: &str,
        latitude: &str,
    ) -> Result<WeatherObservation, LookupError>;
}

/// OpenWeatherMap "current weather" response, reduced to what we publish.
#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: MainBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    humidity: f64,
}

/// HTTP client for the OpenWeatherMap current-weather endpoint.
pub struct OpenWeatherClient {
    // ---
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    // ---
    pub fn new(api_url: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        Self::with_timeout(api_url, api_key, LOOKUP_TIMEOUT)
    }

    /// Same as [`OpenWeatherClient::new`] with a custom per-request timeout.
    pub fn with_timeout(
        api_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // ---
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(
        &self,
        longitude: &str,
        latitude: &str,
    ) -> Result<WeatherObservation, LookupError> {
        // ---
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("lat", latitude),
                ("lon", longitude),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let parsed: WeatherResponse = serde_json::from_slice(&body)?;

        Ok(WeatherObservation {
            temperature: parsed.main.temp,
            humidity_percent: parsed.main.humidity,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    observation: WeatherObservation,
    expires_at: Instant,
}

/// TTL cache in front of a [`WeatherSource`], shared by both loops.
pub struct EnrichmentCache {
    // ---
    source: Arc<dyn WeatherSource>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl EnrichmentCache {
    // ---
    pub fn new(source: Arc<dyn WeatherSource>, ttl: Duration) -> Self {
        // ---
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cache key for a coordinate pair. Exact strings, order-sensitive.
    pub fn cache_key(longitude: &str, latitude: &str) -> String {
        format!("{longitude},{latitude}")
    }

    /// Return the weather at the given coordinates.
    ///
    /// Served entries are never older than the configured lifetime. On any
    /// lookup failure the zero observation is returned.
    pub async fn lookup(&self, longitude: &str, latitude: &str) -> WeatherObservation {
        // ---
        let key = Self::cache_key(longitude, latitude);

        if let Some(observation) = self.get_fresh(&key) {
            trace!(%key, "weather cache hit");
            return observation;
        }

        match self.source.fetch(longitude, latitude).await {
            Ok(observation) => {
                // Entries are inserted whole, readers never see partial data.
                self.entries.write().insert(
                    key,
                    CacheEntry {
                        observation,
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                info!(
                    longitude,
                    latitude,
                    temperature = observation.temperature,
                    humidity = observation.humidity_percent,
                    "fetched weather observation"
                );
                observation
            }
            Err(e) => {
                error!(longitude, latitude, error = %e, "weather lookup failed");
                WeatherObservation::default()
            }
        }
    }

    fn get_fresh(&self, key: &str) -> Option<WeatherObservation> {
        // ---
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.observation)
    }

    /// Interval at which [`spawn_janitor`](Self::spawn_janitor) sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.ttl + SWEEP_GRACE
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        // ---
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawn the background sweep. The task ends once the cache is dropped.
    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        // ---
        let cache = Arc::downgrade(self);
        let period = self.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.evict_expired();
                if cache.is_empty() {
                    debug!(evicted, "weather cache sweep left cache empty");
                } else {
                    debug!(evicted, remaining = cache.len(), "weather cache sweep");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    /// Counts calls and returns a fixed observation, or fails on demand.
    pub(crate) struct FakeWeather {
        pub calls: AtomicUsize,
        pub fail: bool,
        pub observation: WeatherObservation,
    }

    impl FakeWeather {
        pub(crate) fn ok(temperature: f64, humidity_percent: f64) -> Self {
            // ---
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                observation: WeatherObservation {
                    temperature,
                    humidity_percent,
                },
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok(0.0, 0.0)
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherSource for FakeWeather {
        async fn fetch(
            &self,
            _longitude: &str,
            _latitude: &str,
        ) -> Result<WeatherObservation, LookupError> {
            // ---
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(self.observation)
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_cache_key_is_order_sensitive() {
        // ---
        assert_eq!(EnrichmentCache::cache_key("121.47", "31.23"), "121.47,31.23");
        assert_ne!(
            EnrichmentCache::cache_key("121.47", "31.23"),
            EnrichmentCache::cache_key("31.23", "121.47")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_issues_one_call() {
        // ---
        let source = Arc::new(FakeWeather::ok(22.5, 61.0));
        let cache = EnrichmentCache::new(source.clone(), TTL);

        let first = cache.lookup("121.47", "31.23").await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = cache.lookup("121.47", "31.23").await;

        assert_eq!(source.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second.temperature, 22.5);
        assert_eq!(second.humidity_percent, 61.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_are_cached_separately() {
        // ---
        let source = Arc::new(FakeWeather::ok(10.0, 50.0));
        let cache = EnrichmentCache::new(source.clone(), TTL);

        cache.lookup("121.47", "31.23").await;
        cache.lookup("31.23", "121.47").await;
        cache.lookup("121.470", "31.23").await;
        cache.lookup("121.47", "31.23").await;

        assert_eq!(source.calls(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_after_expiry_fetches_again() {
        // ---
        let source = Arc::new(FakeWeather::ok(22.5, 61.0));
        let cache = EnrichmentCache::new(source.clone(), TTL);

        cache.lookup("121.47", "31.23").await;
        tokio::time::advance(cache.sweep_interval() + Duration::from_millis(1)).await;
        cache.lookup("121.47", "31.23").await;

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_never_served() {
        // ---
        let source = Arc::new(FakeWeather::ok(22.5, 61.0));
        let cache = EnrichmentCache::new(source.clone(), TTL);

        cache.lookup("121.47", "31.23").await;
        // Past the lifetime but before any sweep.
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        cache.lookup("121.47", "31.23").await;

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_returns_zero_and_is_not_cached() {
        // ---
        let source = Arc::new(FakeWeather::failing());
        let cache = EnrichmentCache::new(source.clone(), TTL);

        let obs = cache.lookup("121.47", "31.23").await;
        assert_eq!(obs, WeatherObservation::default());
        assert!(cache.is_empty());

        cache.lookup("121.47", "31.23").await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_evicts_expired_entries() {
        // ---
        let source = Arc::new(FakeWeather::ok(1.0, 2.0));
        let cache = Arc::new(EnrichmentCache::new(source, TTL));
        let janitor = cache.spawn_janitor();

        cache.lookup("121.47", "31.23").await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(cache.sweep_interval() + Duration::from_secs(1)).await;
        assert!(cache.is_empty());

        janitor.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_lookups_see_whole_entries() {
        // ---
        let source = Arc::new(FakeWeather::ok(18.25, 73.0));
        let cache = Arc::new(EnrichmentCache::new(source, TTL));

        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let lon = format!("12{}.0", i % 4);
                cache.lookup(&lon, "31.23").await
            }));
        }

        for handle in handles {
            let obs = handle.await.unwrap();
            assert_eq!(obs.temperature, 18.25);
            assert_eq!(obs.humidity_percent, 73.0);
        }
        assert_eq!(cache.len(), 4);
    }

    async fn spawn_weather_api(app: Router) -> String {
        // ---
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/data/2.5/weather")
    }

    #[tokio::test]
    async fn test_client_sends_both_coordinates() {
        // ---
        async fn weather(
            Query(params): Query<HashMap<String, String>>,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let expected = params.get("lat").map(String::as_str) == Some("31.23")
                && params.get("lon").map(String::as_str) == Some("121.47")
                && params.get("appid").map(String::as_str) == Some("test-key")
                && params.get("units").map(String::as_str) == Some("metric");
            if !expected {
                return (StatusCode::BAD_REQUEST, Json(json!({ "cod": 400 })));
            }
            (
                StatusCode::OK,
                Json(json!({ "main": { "temp": 18.4, "humidity": 71, "pressure": 1012 } })),
            )
        }

        let url = spawn_weather_api(Router::new().route("/data/2.5/weather", get(weather))).await;
        let client = OpenWeatherClient::new(&url, "test-key").unwrap();

        let obs = client.fetch("121.47", "31.23").await.unwrap();
        assert_eq!(obs.temperature, 18.4);
        assert_eq!(obs.humidity_percent, 71.0);
    }

    #[tokio::test]
    async fn test_client_reports_status_and_decode_errors() {
        // ---
        let app = Router::new()
            .route(
                "/data/2.5/weather",
                get(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
            )
            .route("/garbled", get(|| async { "not json" }));
        let url = spawn_weather_api(app).await;

        let client = OpenWeatherClient::new(&url, "bad-key").unwrap();
        let err = client.fetch("121.47", "31.23").await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 401, .. }));

        let garbled = url.replace("/data/2.5/weather", "/garbled");
        let client = OpenWeatherClient::new(&garbled, "key").unwrap();
        let err = client.fetch("121.47", "31.23").await.unwrap_err();
        assert!(matches!(err, LookupError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_degrades_to_zero() {
        // ---
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OpenWeatherClient::new(&format!("http://{addr}/weather"), "key").unwrap();
        let cache = EnrichmentCache::new(Arc::new(client), TTL);

        let obs = cache.lookup("121.47", "31.23").await;
        assert_eq!(obs.temperature, 0.0);
        assert_eq!(obs.humidity_percent, 0.0);
    }

    #[tokio::test]
    async fn test_slow_api_times_out_to_zero() {
        // ---
        let app = Router::new().route(
            "/data/2.5/weather",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "main": { "temp": 18.4, "humidity": 71 } }))
            }),
        );
        let url = spawn_weather_api(app).await;

        let client = OpenWeatherClient::with_timeout(&url, "key", Duration::from_millis(200))
            .unwrap();
        match client.fetch("121.47", "31.23").await {
            Err(LookupError::Http(e)) => assert!(e.is_timeout(), "{e}"),
            other => panic!("expected a timeout, got {other:?}"),
        }

        let cache = EnrichmentCache::new(Arc::new(client), TTL);
        let obs = cache.lookup("121.47", "31.23").await;
        assert_eq!(obs, WeatherObservation::default());
        assert!(cache.is_empty());
    }
}
