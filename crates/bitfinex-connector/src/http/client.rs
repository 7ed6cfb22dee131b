/*
[INPUT]:  HTTP configuration (base URL, timeouts)
[OUTPUT]: Configured reqwest client and JSON request execution with exchange error mapping
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};

/// Base URL for the public REST API
pub const DEFAULT_REST_URL: &str = "https://api-pub.bitfinex.com/v2/";

const ERROR_BODY_MAX_CHARS: usize = 256;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// REST client for historical trades and candles
#[derive(Debug, Clone)]
pub struct BitfinexClient {
    http_client: Client,
    base_url: Url,
}

impl BitfinexClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.clone();
        Self::with_config_and_base_url(config, &base_url)
    }

    /// Create a client against a different host, e.g. a local mock server
    pub fn with_config_and_base_url(config: ClientConfig, base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        // Relative endpoints join under the last path segment only with a trailing slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(endpoint)?;
        Ok(self
            .http_client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    /// Send a request and decode a JSON body.
    ///
    /// Non-2xx responses become [`ConnectorError::Api`], using the exchange's
    /// `["error", code, "message"]` body when it has one.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let err = error_from_body(status, &body);
            warn!(%url, %status, error = %err, "REST request failed");
            return Err(err);
        }

        debug!(%url, bytes = body.len(), "REST response");
        Ok(serde_json::from_str(&body)?)
    }
}

fn error_from_body(status: reqwest::StatusCode, body: &str) -> ConnectorError {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body)
        && items.first().and_then(Value::as_str) == Some("error")
    {
        let code = items
            .get(1)
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(status.as_u16() as i32);
        let message = items
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return ConnectorError::Api { code, message };
    }

    let message: String = body.chars().take(ERROR_BODY_MAX_CHARS).collect();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    ConnectorError::api_error(status, message)
}
