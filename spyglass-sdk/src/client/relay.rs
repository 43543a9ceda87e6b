//! Relay HTTP client (instrumented resource → relay).

use reqwest::Client;
use url::Url;

use super::ClientError;
use crate::objects::{ForwardedEvent, SpyEnvelope};

/// Typed HTTP client for the relay's forwarding API.
///
/// Interceptors and resource hooks post raw events to the forwarding
/// endpoint they were assigned at instrumentation time; the relay resolves
/// the service key and fans the envelope out to every connected listener.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    base_url: Url,
}

impl RelayClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /forward/{endpoint}` – hand one event to a forwarding endpoint.
    ///
    /// Returns the envelope the relay published.
    pub async fn forward(
        &self,
        endpoint: &str,
        event: &ForwardedEvent,
    ) -> Result<SpyEnvelope, ClientError> {
        let url = self.base_url.join(&format!("/forward/{endpoint}"))?;

        let resp = self.http.post(url).json(event).send().await?;

        parse_response(resp).await
    }

    /// `GET /health` – liveness probe.
    pub async fn health(&self) -> Result<(), ClientError> {
        let url = self.base_url.join("/health")?;
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        Ok(())
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
