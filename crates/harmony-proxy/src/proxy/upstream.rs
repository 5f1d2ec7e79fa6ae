//! Upstream endpoint resolution and the pooled upstream HTTP client
//!
//! The base URL comes from configuration once at startup. Two calls are made
//! against it: `GET {base}/models` with a bounded timeout and
//! `POST {base}/chat/completions` with none.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;
use url::Url;

use crate::error::{HarmonyError, Result};

use super::error::ProxyError;

/// Validated upstream base URL with the two endpoint URLs derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEndpoint {
    /// The base URL, always ending in `/`
    pub base: Url,
    /// The extracted host (domain or IP)
    pub host: String,
    models: Url,
    chat_completions: Url,
}

impl UpstreamEndpoint {
    /// Parse and validate an upstream base URL such as `http://localhost:8080/v1`
    ///
    /// Only http and https are accepted. Fragments and queries are dropped and
    /// userinfo is stripped with a warning.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut base = Url::parse(raw.trim())
            .map_err(|e| HarmonyError::Upstream(format!("Invalid URL '{raw}': {e}")))?;

        let scheme = base.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HarmonyError::Upstream(format!(
                "Unsupported URL scheme '{scheme}': only http and https are allowed"
            )));
        }

        let host = base
            .host_str()
            .ok_or_else(|| HarmonyError::Upstream(format!("URL '{raw}' has no host")))?
            .to_string();

        base.set_fragment(None);
        base.set_query(None);

        if !base.username().is_empty() || base.password().is_some() {
            tracing::warn!("Upstream URL contains userinfo (credentials) which has been stripped");
            base.set_username("")
                .map_err(|_| HarmonyError::Upstream("Failed to strip username from URL".to_string()))?;
            base.set_password(None)
                .map_err(|_| HarmonyError::Upstream("Failed to strip password from URL".to_string()))?;
        }

        // Url::join replaces the last path segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let models = join(&base, "models")?;
        let chat_completions = join(&base, "chat/completions")?;

        Ok(Self {
            base,
            host,
            models,
            chat_completions,
        })
    }

    pub fn models_url(&self) -> &Url {
        &self.models
    }

    pub fn chat_completions_url(&self) -> &Url {
        &self.chat_completions
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| HarmonyError::Upstream(format!("Failed to build {path} URL: {e}")))
}

/// A JSON reply from the upstream chat completions endpoint
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Value,
}

/// Process-wide upstream client
///
/// Cloning is cheap and shares the underlying connection pool. Responses are
/// owned by the caller, so dropping one on any exit path releases its
/// connection.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: Arc<UpstreamEndpoint>,
    models_timeout: Duration,
}

impl UpstreamClient {
    /// Build a client with no overall timeout; the models call sets its own
    pub fn new(endpoint: UpstreamEndpoint, models_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HarmonyError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: Arc::new(endpoint),
            models_timeout,
        })
    }

    pub fn endpoint(&self) -> &UpstreamEndpoint {
        &self.endpoint
    }

    /// Fetch the upstream model list
    pub async fn list_models(&self) -> std::result::Result<Value, ProxyError> {
        let response = self
            .client
            .get(self.endpoint.models_url().clone())
            .timeout(self.models_timeout)
            .send()
            .await
            .map_err(|e| ProxyError::from_transport(&e))?;

        let status = convert_status(response.status());
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::from_transport(&e))?;

        if !status.is_success() {
            return Err(ProxyError::Upstream { status, body: text });
        }

        serde_json::from_str(&text)
            .map_err(|e| ProxyError::InvalidUpstream(format!("model list is not JSON: {e}")))
    }

    /// Send a non-streaming chat completion and parse the JSON reply
    ///
    /// Error statuses with a JSON body come back as a reply so the caller can
    /// relay them; error statuses with any other body become
    /// [`ProxyError::Upstream`].
    pub async fn chat_completion(
        &self,
        body: &Value,
    ) -> std::result::Result<UpstreamReply, ProxyError> {
        let response = self.post_chat(body).await?;

        let status = convert_status(response.status());
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::from_transport(&e))?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(UpstreamReply { status, body }),
            Err(e) if status.is_success() => Err(ProxyError::InvalidUpstream(format!(
                "chat completion is not JSON: {e}"
            ))),
            Err(_) => Err(ProxyError::Upstream { status, body: text }),
        }
    }

    /// Open a streaming chat completion
    ///
    /// Only a successful response is returned; error statuses are read in
    /// full and surfaced before any byte reaches the client.
    pub async fn open_stream(
        &self,
        body: &Value,
    ) -> std::result::Result<reqwest::Response, ProxyError> {
        let response = self.post_chat(body).await?;

        let status = convert_status(response.status());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream { status, body });
        }

        Ok(response)
    }

    async fn post_chat(&self, body: &Value) -> std::result::Result<reqwest::Response, ProxyError> {
        self.client
            .post(self.endpoint.chat_completions_url().clone())
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::from_transport(&e))
    }
}

fn convert_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
