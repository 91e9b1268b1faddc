use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use reqwest::{Client, header};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::BridgeError;
use crate::states::{StateSnapshot, StatesEnvelope};
use crate::traits::{Bridge, CommandPayload};

/// Body of `POST <bridge>/player`.
#[derive(Debug, Serialize)]
pub struct PlayerCommand<'a> {
    pub action: &'a str,
    #[serde(flatten)]
    pub payload: CommandPayload,
    pub timestamp: String,
}

impl<'a> PlayerCommand<'a> {
    pub fn new(action: &'a str, payload: Option<CommandPayload>) -> Self {
        PlayerCommand {
            action,
            payload: payload.unwrap_or_default(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Typed client for the local bridge process.
///
/// Does no caching of its own; the bridge already caches against the
/// remote service and owns its rate limiting.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base_url: String,
    client: Client,
}

impl BridgeClient {
    /// Builds the client with default headers and both timeouts. The request
    /// timeout bounds every command and snapshot read so a wedged bridge
    /// cannot hold a tick open forever.
    pub fn new(base_url: &str, request_timeout: Duration, connect_timeout: Duration) -> Result<Self, BridgeError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(VERSION));
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(BridgeClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Bridge for BridgeClient {
    async fn dispatch_command(&self, action: &str, payload: Option<CommandPayload>) -> Result<String, BridgeError> {
        let command = PlayerCommand::new(action, payload);
        let request_body = serde_json::to_string(&command)?;
        info!("bridge <- {}", request_body);

        let response = self.client
            .post(self.endpoint("player"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(request_body)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let response_text = response.text().await?;
        info!("bridge -> {} HTTP {}: {}", action, status.as_u16(), response_text);

        if !status.is_success() {
            if let Some(wait) = retry_after {
                warn!("bridge is rate limited, retry after {}s", wait);
            }
            return Err(BridgeError::Unavailable {
                status: status.as_u16(),
                body: response_text,
            });
        }

        // opaque, but an explicit error status deserves a louder log line
        if let Ok(v) = serde_json::from_str::<Value>(&response_text) {
            if v.get("status").and_then(Value::as_str) == Some("error") {
                warn!("bridge accepted '{}' but reported an error: {}", action, response_text);
            }
        }

        Ok(response_text)
    }

    async fn fetch_state_snapshot(&self) -> Result<StateSnapshot, BridgeError> {
        let response = self.client
            .get(self.endpoint("states"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Unavailable { status: status.as_u16(), body });
        }

        let response_text = response.text().await?;
        debug!("bridge states: {}", response_text);
        let envelope: StatesEnvelope = serde_json::from_str(&response_text)?;
        Ok(envelope.states)
    }
}
