//! deCONZ REST API client and gateway discovery.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use conbee_common::{SensorList, decode_sensors};

/// Errors talking to the gateway or the discovery service.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway returned {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("No gateways found, try setting the gateway URL explicitly with --conbee-uri")]
    NoGateways,
}

impl From<conbee_common::Error> for GatewayError {
    fn from(e: conbee_common::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

/// One candidate returned by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveredGateway {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub internalipaddress: String,
    #[serde(default = "default_gateway_port")]
    pub internalport: u16,
    #[serde(default)]
    pub macaddress: String,
}

fn default_gateway_port() -> u16 {
    80
}

impl DiscoveredGateway {
    /// Base URL for API requests.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.internalipaddress, self.internalport)
    }
}

/// Error entry of a deCONZ error response, e.g. for an invalid API key.
#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: i64,
    #[serde(default)]
    description: String,
}

/// Parse the discovery response and pick the first candidate.
pub fn parse_discovery(body: &[u8]) -> Result<DiscoveredGateway, GatewayError> {
    let candidates: Vec<DiscoveredGateway> =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

    if candidates.len() > 1 {
        debug!(count = candidates.len(), "Multiple gateways discovered, using the first");
    }

    candidates.into_iter().next().ok_or(GatewayError::NoGateways)
}

/// Find a gateway through the discovery service.
pub async fn discover(
    discovery_url: &str,
    timeout: Duration,
) -> Result<DiscoveredGateway, GatewayError> {
    info!(url = discovery_url, "Discovering gateways");

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(discovery_url).send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        return Err(GatewayError::Status {
            status,
            message: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    let gateway = parse_discovery(&body)?;
    info!(
        name = %gateway.name,
        address = %gateway.internalipaddress,
        port = gateway.internalport,
        "Using discovered gateway"
    );
    Ok(gateway)
}

/// Normalize a user-supplied gateway address into a base URL.
///
/// A bare `host:port` gets an `http://` scheme; trailing slashes are removed.
pub fn normalize_base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Authenticated client for one deCONZ gateway.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GatewayClient {
    /// Create a client for the gateway at `base_url`.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("conbee-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
        })
    }

    /// Gateway base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sensors_url(&self) -> String {
        format!("{}/api/{}/sensors", self.base_url, self.api_key)
    }

    /// Fetch and decode every sensor.
    pub async fn fetch_sensors(&self) -> Result<SensorList, GatewayError> {
        // The request URL embeds the API key, keep it out of error messages.
        let response = self
            .http
            .get(self.sensors_url())
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.without_url()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Http(e.without_url()))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status,
                message: describe_error_body(&body),
            });
        }

        let list = decode_sensors(&body)?;
        for rejected in &list.rejected {
            warn!(sensor = %rejected.id, reason = %rejected.reason, "Skipping undecodable sensor");
        }

        debug!(
            sensors = list.sensors.len(),
            rejected = list.rejected.len(),
            "Fetched sensors"
        );
        Ok(list)
    }
}

/// Extract a readable message from a deCONZ error body.
fn describe_error_body(body: &[u8]) -> String {
    match serde_json::from_slice::<Vec<ApiErrorEntry>>(body) {
        Ok(entries) if !entries.is_empty() => entries
            .iter()
            .map(|e| format!("{} (type {})", e.error.description, e.error.kind))
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::from_utf8_lossy(body).trim().to_string(),
    }
}
