use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::models::{Coordinates, Event};

pub const CURRENT_POSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Public Nominatim allows one request per second.
const RATE_LIMIT_WINDOW_MS: u64 = 1100;

/// Degrees added on each axis around the default city.
pub const DEFAULT_JITTER: f64 = 0.02;

pub const DEFAULT_CITY: (&str, f64, f64) = ("São Paulo", -23.5505, -46.6333);

const KNOWN_CITIES: [(&str, f64, f64); 18] = [
    ("são paulo", -23.5505, -46.6333),
    ("sao paulo", -23.5505, -46.6333),
    ("rio de janeiro", -22.9068, -43.1729),
    ("belo horizonte", -19.9167, -43.9345),
    ("brasília", -15.7939, -47.8828),
    ("brasilia", -15.7939, -47.8828),
    ("curitiba", -25.4284, -49.2733),
    ("porto alegre", -30.0346, -51.2177),
    ("salvador", -12.9777, -38.5016),
    ("recife", -8.0476, -34.8770),
    ("fortaleza", -3.7319, -38.5267),
    ("florianópolis", -27.5954, -48.5480),
    ("florianopolis", -27.5954, -48.5480),
    ("campinas", -22.9099, -47.0626),
    ("lisboa", 38.7223, -9.1393),
    ("lisbon", 38.7223, -9.1393),
    ("new york", 40.7128, -74.0060),
    ("london", 51.5074, -0.1278),
];

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no result for {0}")]
    NotFound(String),
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, GeoError>;
}

/// Sends the configured client identifier on every request, which the public
/// geocoder requires.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str) -> Result<Self, GeoError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| GeoError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<String, GeoError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| GeoError::Http(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| GeoError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(GeoError::Http(format!("status {}: {}", status, text)));
        }

        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct ReverseDoc {
    display_name: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordinateSource {
    Stored,
    Cache,
    Lookup,
    KnownCity(&'static str),
    DefaultCity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub coordinates: Coordinates,
    pub source: CoordinateSource,
}

/// Issues per-key sequence numbers so that a late response for an older
/// request can be recognised and dropped.
#[derive(Default)]
pub struct RequestTracker {
    next: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl RequestTracker {
    pub fn begin(&self, key: &str) -> u64 {
        let seq = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), seq);
        seq
    }

    pub fn is_current(&self, key: &str, seq: u64) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .map(|latest| *latest == seq)
            .unwrap_or(false)
    }

    /// Ends request `seq`. Returns whether it was still the newest one for
    /// `key`; if so the key is forgotten.
    pub fn finish(&self, key: &str, seq: u64) -> bool {
        let mut latest = self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if latest.get(key) == Some(&seq) {
            latest.remove(key);
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> usize {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Outcome of one event in [`Geocoder::resolve_all`]. `current` is false
/// when a newer request for the same event was issued meanwhile; such a
/// result is still usable for display but must not be written back.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub event_id: String,
    pub resolution: Resolution,
    pub current: bool,
}

pub struct Geocoder {
    base_url: String,
    client: Arc<dyn HttpClient>,
    cache: Mutex<HashMap<String, Coordinates>>,
    last_request: AsyncMutex<Option<Instant>>,
    rate_window: Duration,
    tracker: RequestTracker,
}

impl Geocoder {
    pub fn new(base_url: &str, client: Arc<dyn HttpClient>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache: Mutex::new(HashMap::new()),
            last_request: AsyncMutex::new(None),
            rate_window: Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            tracker: RequestTracker::default(),
        }
    }

    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Address to coordinates. Failures are logged and become `None`.
    pub async fn forward(&self, address: &str) -> Option<Coordinates> {
        let key = cache_key(address);
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.cached(&key) {
            tracing::debug!(address = %address, "geocode cache hit");
            return Some(hit);
        }

        match self.lookup(address).await {
            Ok(coordinates) => {
                self.cache
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(key, coordinates);
                Some(coordinates)
            }
            Err(err) => {
                tracing::warn!(address = %address, error = %err, "geocode lookup failed");
                None
            }
        }
    }

    /// Coordinates to a display address. Failures are logged and become `None`.
    pub async fn reverse(&self, coordinates: Coordinates) -> Option<String> {
        match self.reverse_lookup(coordinates).await {
            Ok(name) => Some(name),
            Err(err) => {
                tracing::warn!(%coordinates, error = %err, "reverse geocode failed");
                None
            }
        }
    }

    /// Always yields coordinates usable for a marker: stored, looked up, a
    /// known city or the jittered default city.
    pub async fn resolve(&self, event: &Event) -> Resolution {
        if let Some(coordinates) = event.coordinates() {
            return Resolution {
                coordinates,
                source: CoordinateSource::Stored,
            };
        }
        if let Some(coordinates) = self.cached(&cache_key(&event.location)) {
            return Resolution {
                coordinates,
                source: CoordinateSource::Cache,
            };
        }
        if let Some(coordinates) = self.forward(&event.location).await {
            return Resolution {
                coordinates,
                source: CoordinateSource::Lookup,
            };
        }
        fallback_for(&event.location)
    }

    /// Resolves and keeps the result on the event for the rest of the
    /// session. Nothing is written back to storage here.
    pub async fn resolve_into(&self, event: &mut Event) -> Resolution {
        let resolution = self.resolve(event).await;
        if resolution.source != CoordinateSource::DefaultCity {
            event.latitude = Some(resolution.coordinates.latitude);
            event.longitude = Some(resolution.coordinates.longitude);
        }
        resolution
    }

    /// Resolves every event concurrently, in list order. Every event gets
    /// coordinates. A result superseded by a newer request for the same
    /// event prefers whatever the newer one left in the cache.
    pub async fn resolve_all(&self, events: &[Event]) -> Vec<Resolved> {
        let tasks = events.iter().map(|event| async move {
            let seq = self.tracker.begin(&event.id);
            let mut resolution = self.resolve(event).await;
            let current = self.tracker.finish(&event.id, seq);
            if !current {
                tracing::debug!(event_id = %event.id, seq, "geocode result superseded");
                if let Some(coordinates) = self.cached(&cache_key(&event.location)) {
                    if resolution.source != CoordinateSource::Stored {
                        resolution = Resolution {
                            coordinates,
                            source: CoordinateSource::Cache,
                        };
                    }
                }
            }
            Resolved {
                event_id: event.id.clone(),
                resolution,
                current,
            }
        });
        join_all(tasks).await
    }

    /// Like [`Geocoder::resolve_all`], then keeps current, non-default
    /// results on the events for the rest of the session.
    pub async fn resolve_all_into(&self, events: &mut [Event]) -> Vec<Resolved> {
        let results = self.resolve_all(events).await;
        for (event, resolved) in events.iter_mut().zip(&results) {
            if resolved.current && resolved.resolution.source != CoordinateSource::DefaultCity {
                event.latitude = Some(resolved.resolution.coordinates.latitude);
                event.longitude = Some(resolved.resolution.coordinates.longitude);
            }
        }
        results
    }

    fn cached(&self, key: &str) -> Option<Coordinates> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
    }

    async fn lookup(&self, address: &str) -> Result<Coordinates, GeoError> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))
            .map_err(|err| GeoError::Http(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("q", address.trim())
            .append_pair("format", "json")
            .append_pair("limit", "1");

        let text = self.fetch(url).await?;
        let docs: Vec<SearchDoc> =
            serde_json::from_str(&text).map_err(|err| GeoError::Parse(err.to_string()))?;
        let doc = docs
            .into_iter()
            .next()
            .ok_or_else(|| GeoError::NotFound(address.to_string()))?;
        let latitude = doc
            .lat
            .parse::<f64>()
            .map_err(|err| GeoError::Parse(err.to_string()))?;
        let longitude = doc
            .lon
            .parse::<f64>()
            .map_err(|err| GeoError::Parse(err.to_string()))?;
        Coordinates::new(latitude, longitude)
            .ok_or_else(|| GeoError::Parse(format!("out of range: {latitude}, {longitude}")))
    }

    async fn reverse_lookup(&self, coordinates: Coordinates) -> Result<String, GeoError> {
        let mut url = Url::parse(&format!("{}/reverse", self.base_url))
            .map_err(|err| GeoError::Http(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("lat", &coordinates.latitude.to_string())
            .append_pair("lon", &coordinates.longitude.to_string())
            .append_pair("format", "json");

        let text = self.fetch(url).await?;
        let doc: ReverseDoc =
            serde_json::from_str(&text).map_err(|err| GeoError::Parse(err.to_string()))?;
        if let Some(error) = doc.error {
            return Err(GeoError::NotFound(error));
        }
        doc.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| GeoError::NotFound(coordinates.to_string()))
    }

    async fn fetch(&self, url: Url) -> Result<String, GeoError> {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_window {
                sleep(self.rate_window - elapsed).await;
            }
        }
        let result = self.client.get(url.as_str()).await;
        *last = Some(Instant::now());
        result
    }
}

fn cache_key(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn fallback_for(location: &str) -> Resolution {
    let lower = location.to_lowercase();
    for &(name, latitude, longitude) in KNOWN_CITIES.iter() {
        if lower.contains(name) {
            if let Some(coordinates) = Coordinates::new(latitude, longitude) {
                return Resolution {
                    coordinates,
                    source: CoordinateSource::KnownCity(name),
                };
            }
        }
    }
    Resolution {
        coordinates: jittered_default(),
        source: CoordinateSource::DefaultCity,
    }
}

fn jittered_default() -> Coordinates {
    let (_, latitude, longitude) = DEFAULT_CITY;
    let mut rng = rand::thread_rng();
    Coordinates {
        latitude: latitude + rng.gen_range(-DEFAULT_JITTER..=DEFAULT_JITTER),
        longitude: longitude + rng.gen_range(-DEFAULT_JITTER..=DEFAULT_JITTER),
    }
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn position(&self) -> Result<Coordinates, GeoError>;
}

/// Position taken from configuration, for hosts without a positioning
/// service.
pub struct StaticPositionSource {
    coordinates: Option<Coordinates>,
}

impl StaticPositionSource {
    pub fn new(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl PositionSource for StaticPositionSource {
    async fn position(&self) -> Result<Coordinates, GeoError> {
        self.coordinates
            .ok_or_else(|| GeoError::Unavailable("no position configured".to_string()))
    }
}

/// Current device position. Unlike lookups this propagates failures, and it
/// never serves a remembered position.
pub async fn current_position(source: &dyn PositionSource) -> Result<Coordinates, GeoError> {
    match tokio::time::timeout(CURRENT_POSITION_TIMEOUT, source.position()).await {
        Ok(result) => result,
        Err(_) => Err(GeoError::Timeout(CURRENT_POSITION_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;

    #[derive(Default)]
    struct MockClient {
        search: Option<String>,
        reverse: Option<String>,
        requests: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn get(&self, url: &str) -> Result<String, GeoError> {
            self.requests.lock().unwrap().push(url.to_string());
            let body = if url.contains("/search") {
                self.search.clone()
            } else {
                self.reverse.clone()
            };
            body.ok_or_else(|| GeoError::Http("connection refused".into()))
        }
    }

    fn geocoder(client: Arc<MockClient>) -> Geocoder {
        Geocoder::new("https://geo.test/", client).with_rate_window(Duration::ZERO)
    }

    fn unplaced(location: &str) -> Event {
        let mut event = seed::default_events().remove(1);
        event.location = location.to_string();
        event.latitude = None;
        event.longitude = None;
        event
    }

    #[tokio::test]
    async fn stored_coordinates_skip_lookup() {
        let client = Arc::new(MockClient::default());
        let geo = geocoder(client.clone());
        let event = seed::default_events().remove(0);
        let resolution = geo.resolve(&event).await;
        assert_eq!(resolution.source, CoordinateSource::Stored);
        assert_eq!(Some(resolution.coordinates), event.coordinates());
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn lookup_results_are_cached_for_the_session() {
        let client = Arc::new(MockClient {
            search: Some(r#"[{"lat":"-8.1187","lon":"-34.9003","display_name":"Boa Viagem"}]"#.into()),
            ..Default::default()
        });
        let geo = geocoder(client.clone());
        let mut event = unplaced("Boa Viagem, Recife, PE");

        let first = geo.resolve_into(&mut event).await;
        assert_eq!(first.source, CoordinateSource::Lookup);
        assert_eq!(event.latitude, Some(-8.1187));

        let again = geo.resolve(&unplaced("boa viagem,  recife, pe")).await;
        assert_eq!(again.source, CoordinateSource::Cache);
        assert_eq!(client.request_count(), 1);
        assert!(client.requests.lock().unwrap()[0].starts_with("https://geo.test/search?q="));
    }

    #[tokio::test]
    async fn failed_lookup_uses_known_city() {
        let geo = geocoder(Arc::new(MockClient::default()));
        let resolution = geo.resolve(&unplaced("Parque Barigui, Curitiba, PR")).await;
        assert_eq!(resolution.source, CoordinateSource::KnownCity("curitiba"));
        assert_eq!(resolution.coordinates.latitude, -25.4284);
    }

    #[tokio::test]
    async fn empty_result_set_falls_back() {
        let client = Arc::new(MockClient {
            search: Some("[]".into()),
            ..Default::default()
        });
        let geo = geocoder(client);
        let resolution = geo.resolve(&unplaced("Salvador, BA")).await;
        assert_eq!(resolution.source, CoordinateSource::KnownCity("salvador"));
    }

    #[tokio::test]
    async fn unknown_place_lands_near_default_city() {
        let geo = geocoder(Arc::new(MockClient::default()));
        for _ in 0..20 {
            let mut event = unplaced("Somewhere Unmapped");
            let resolution = geo.resolve_into(&mut event).await;
            assert_eq!(resolution.source, CoordinateSource::DefaultCity);
            let (_, lat, lon) = DEFAULT_CITY;
            assert!((resolution.coordinates.latitude - lat).abs() <= DEFAULT_JITTER + 1e-9);
            assert!((resolution.coordinates.longitude - lon).abs() <= DEFAULT_JITTER + 1e-9);
            assert_eq!(event.latitude, None);
        }
    }

    #[tokio::test]
    async fn reverse_is_fail_soft() {
        let ok = geocoder(Arc::new(MockClient {
            reverse: Some(r#"{"display_name":"Avenida Paulista, São Paulo"}"#.into()),
            ..Default::default()
        }));
        let here = Coordinates::new(-23.56, -46.65).unwrap();
        assert_eq!(
            ok.reverse(here).await.as_deref(),
            Some("Avenida Paulista, São Paulo")
        );

        let not_found = geocoder(Arc::new(MockClient {
            reverse: Some(r#"{"error":"Unable to geocode"}"#.into()),
            ..Default::default()
        }));
        assert_eq!(not_found.reverse(here).await, None);

        let offline = geocoder(Arc::new(MockClient::default()));
        assert_eq!(offline.reverse(here).await, None);
    }

    #[tokio::test]
    async fn resolve_all_keeps_list_order() {
        let geo = geocoder(Arc::new(MockClient::default()));
        let events = seed::default_events();
        let results = geo.resolve_all(&events).await;
        let ids: Vec<_> = results.iter().map(|r| r.event_id.clone()).collect();
        let expected: Vec<_> = events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, expected);
        assert!(results.iter().all(|r| r.current));
        assert_eq!(geo.tracker().pending(), 0);
    }

    /// Answers every search after a delay, so two batches overlap.
    struct SlowClient {
        body: Option<String>,
    }

    #[async_trait]
    impl HttpClient for SlowClient {
        async fn get(&self, _url: &str) -> Result<String, GeoError> {
            sleep(Duration::from_millis(200)).await;
            self.body
                .clone()
                .ok_or_else(|| GeoError::Http("connection refused".into()))
        }
    }

    fn unplaced_seed() -> Vec<Event> {
        seed::default_events()
            .into_iter()
            .filter(|e| e.coordinates().is_none())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_batches_all_get_coordinates() {
        let geo = Geocoder::new("https://geo.test", Arc::new(SlowClient { body: None }))
            .with_rate_window(Duration::ZERO);
        let events = unplaced_seed();
        assert!(!events.is_empty());

        let (older, newer) = tokio::join!(geo.resolve_all(&events), geo.resolve_all(&events));
        assert_eq!(older.len(), events.len());
        assert_eq!(newer.len(), events.len());
        assert!(older.iter().all(|r| !r.current));
        assert!(newer.iter().all(|r| r.current));
        assert_eq!(geo.tracker().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_batch_does_not_write_back() {
        let geo = Geocoder::new(
            "https://geo.test",
            Arc::new(SlowClient {
                body: Some(r#"[{"lat":"-8.0476","lon":"-34.8770"}]"#.into()),
            }),
        )
        .with_rate_window(Duration::ZERO);
        let mut older = vec![unplaced("Marco Zero, Recife")];
        let mut newer = older.clone();

        let (stale, fresh) = tokio::join!(
            geo.resolve_all_into(&mut older),
            geo.resolve_all_into(&mut newer)
        );
        assert!(!stale[0].current);
        assert_eq!(stale[0].resolution.coordinates.latitude, -8.0476);
        assert_eq!(older[0].latitude, None);
        assert!(fresh[0].current);
        assert_eq!(newer[0].latitude, Some(-8.0476));
    }

    #[test]
    fn tracker_only_honours_latest_request() {
        let tracker = RequestTracker::default();
        let first = tracker.begin("evt");
        let second = tracker.begin("evt");
        let other = tracker.begin("other");
        assert!(!tracker.is_current("evt", first));
        assert!(tracker.is_current("evt", second));
        assert!(tracker.is_current("other", other));
        assert!(!tracker.is_current("missing", 1));

        assert!(!tracker.finish("evt", first));
        assert_eq!(tracker.pending(), 2);
        assert!(tracker.finish("evt", second));
        assert!(tracker.finish("other", other));
        assert_eq!(tracker.pending(), 0);
    }

    struct SlowSource;

    #[async_trait]
    impl PositionSource for SlowSource {
        async fn position(&self) -> Result<Coordinates, GeoError> {
            sleep(Duration::from_secs(30)).await;
            Err(GeoError::Unavailable("never".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn current_position_times_out() {
        let err = current_position(&SlowSource).await.unwrap_err();
        assert!(matches!(err, GeoError::Timeout(d) if d == CURRENT_POSITION_TIMEOUT));
    }

    #[tokio::test]
    async fn current_position_propagates_failure() {
        let missing = StaticPositionSource::new(None);
        assert!(matches!(
            current_position(&missing).await,
            Err(GeoError::Unavailable(_))
        ));

        let here = Coordinates::new(-22.9, -43.2).unwrap();
        let fixed = StaticPositionSource::new(Some(here));
        assert_eq!(current_position(&fixed).await.unwrap(), here);
    }

    #[tokio::test]
    async fn reqwest_client_sends_client_identifier() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "Recife")
                    .header("user-agent", "race-events-test/1.0");
                then.status(200)
                    .body(r#"[{"lat":"-8.0476","lon":"-34.8770"}]"#);
            })
            .await;

        let client = Arc::new(ReqwestClient::new("race-events-test/1.0").unwrap());
        let geo = Geocoder::new(&server.base_url(), client).with_rate_window(Duration::ZERO);
        let coordinates = geo.forward("Recife").await.unwrap();
        assert_eq!(coordinates.latitude, -8.0476);
        mock.assert_async().await;
    }
}
