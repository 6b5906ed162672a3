use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Geo provider credential is not configured")]
    MissingCredential,

    #[error("Invalid geo provider base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Geo provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Geo provider returned status {0}")]
    Status(u16),
}

/// Location ping sent when a tracked create request arrives
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct GeofenceSearch {
    pub latitude: f64,
    pub longitude: f64,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub radius_meters: Option<u32>,
}

/// One typed method per provider action family. Every implementation maps a
/// call to exactly one outbound request and returns the provider's JSON body
/// unchanged - interpretation belongs to the caller.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Write-type: ingest a location ping
    async fn track(&self, req: &TrackRequest) -> Result<Value, GeoError>;

    /// Read-type: places and geofences containing a coordinate
    async fn context(&self, latitude: f64, longitude: f64) -> Result<Value, GeoError>;

    /// Read-type: text to coordinates
    async fn geocode_forward(&self, query: &str) -> Result<Value, GeoError>;

    /// Read-type: coordinates to address
    async fn geocode_reverse(&self, latitude: f64, longitude: f64) -> Result<Value, GeoError>;

    /// Read-type: geofences near a coordinate, optionally filtered by tag
    async fn search_geofences(&self, search: &GeofenceSearch) -> Result<Value, GeoError>;

    /// Read-type: travel distance between two coordinates
    async fn route_distance(
        &self,
        origin: (f64, f64),
        destination: (f64, f64),
        modes: &str,
    ) -> Result<Value, GeoError>;
}

/// HTTP client for the Radar location API. Write-type actions authenticate
/// with the privileged secret key; read-type actions use the restricted
/// publishable key when one is configured. The split is least-privilege by
/// intent, not an accident of the provider's API.
pub struct RadarClient {
    http: reqwest::Client,
    base_url: Url,
    secret_key: String,
    publishable_key: Option<String>,
}

impl RadarClient {
    pub fn new(secret_key: String, publishable_key: Option<String>) -> Result<Self, GeoError> {
        if secret_key.trim().is_empty() {
            return Err(GeoError::MissingCredential);
        }

        let config = &crate::config::CONFIG.geo;
        let base_url = Url::parse(&config.base_url)
            .map_err(|_| GeoError::InvalidBaseUrl(config.base_url.clone()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            secret_key,
            publishable_key: publishable_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Reads GEO_SECRET_KEY / GEO_PUBLISHABLE_KEY. Missing secret key is a
    /// construction-time failure, not a first-request surprise.
    pub fn from_env() -> Result<Self, GeoError> {
        let secret = std::env::var("GEO_SECRET_KEY").map_err(|_| GeoError::MissingCredential)?;
        let publishable = std::env::var("GEO_PUBLISHABLE_KEY").ok();
        Self::new(secret, publishable)
    }

    fn read_key(&self) -> &str {
        self.publishable_key.as_deref().unwrap_or(&self.secret_key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, GeoError> {
        self.base_url
            .join(path)
            .map_err(|_| GeoError::InvalidBaseUrl(path.to_string()))
    }

    async fn get(&self, path: &str, key: &str, query: &[(&str, String)]) -> Result<Value, GeoError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(key)
            .query(query)
            .send()
            .await?;
        Self::into_body(response).await
    }

    async fn post(&self, path: &str, key: &str, body: Value) -> Result<Value, GeoError> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        Self::into_body(response).await
    }

    async fn into_body(response: reqwest::Response) -> Result<Value, GeoError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl GeoProvider for RadarClient {
    async fn track(&self, req: &TrackRequest) -> Result<Value, GeoError> {
        let mut body = serde_json::json!({
            "deviceId": req.device_id,
            "latitude": req.latitude,
            "longitude": req.longitude,
        });
        if let Some(accuracy) = req.accuracy {
            body["accuracy"] = serde_json::json!(accuracy);
        }
        self.post("track", &self.secret_key, body).await
    }

    async fn context(&self, latitude: f64, longitude: f64) -> Result<Value, GeoError> {
        self.get(
            "context",
            self.read_key(),
            &[("coordinates", format!("{},{}", latitude, longitude))],
        )
        .await
    }

    async fn geocode_forward(&self, query: &str) -> Result<Value, GeoError> {
        self.get("geocode/forward", self.read_key(), &[("query", query.to_string())])
            .await
    }

    async fn geocode_reverse(&self, latitude: f64, longitude: f64) -> Result<Value, GeoError> {
        self.get(
            "geocode/reverse",
            self.read_key(),
            &[("coordinates", format!("{},{}", latitude, longitude))],
        )
        .await
    }

    async fn search_geofences(&self, search: &GeofenceSearch) -> Result<Value, GeoError> {
        let mut query = vec![(
            "near",
            format!("{},{}", search.latitude, search.longitude),
        )];
        if let Some(tag) = &search.tag {
            query.push(("tags", tag.clone()));
        }
        if let Some(limit) = search.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(radius) = search.radius_meters {
            query.push(("radiusMeters", radius.to_string()));
        }
        self.get("search/geofences", self.read_key(), &query).await
    }

    async fn route_distance(
        &self,
        origin: (f64, f64),
        destination: (f64, f64),
        modes: &str,
    ) -> Result<Value, GeoError> {
        self.get(
            "route/distance",
            self.read_key(),
            &[
                ("origin", format!("{},{}", origin.0, origin.1)),
                ("destination", format!("{},{}", destination.0, destination.1)),
                ("modes", modes.to_string()),
                ("units", "metric".to_string()),
            ],
        )
        .await
    }
}
