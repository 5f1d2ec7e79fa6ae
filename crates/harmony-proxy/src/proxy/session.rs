//! Per-request proxy session
//!
//! A session owns the parsed and sanitized request body plus the identity
//! used to correlate log lines (request id, client address, model, stream
//! flag). It lives until the response completes or errors.

use std::net::SocketAddr;

use serde_json::Value;
use tracing::Span;
use uuid::Uuid;

use crate::rewrite::rewrite_all;
use crate::sanitize::sanitize_messages;

use super::error::ProxyError;

/// One inbound chat completion request
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: Uuid,
    client: String,
    model: String,
    stream: bool,
    body: Value,
}

impl ChatSession {
    /// Parse an inbound body and sanitize its conversation history
    ///
    /// The body must be a JSON object, and `messages`, when present, must be
    /// an array. Everything else is forwarded untouched.
    pub fn from_bytes(bytes: &[u8], client: Option<SocketAddr>) -> Result<Self, ProxyError> {
        let mut body: Value = serde_json::from_slice(bytes)
            .map_err(|e| ProxyError::Request(format!("Invalid JSON body: {e}")))?;

        if !body.is_object() {
            return Err(ProxyError::Request(
                "Request body must be a JSON object".to_string(),
            ));
        }

        if let Some(messages) = body.get("messages") {
            if !messages.is_array() {
                return Err(ProxyError::Request("`messages` must be an array".to_string()));
            }
        }

        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let client = client.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string());

        let sanitized = sanitize_messages(&mut body);
        if sanitized > 0 {
            tracing::debug!(client = %client, sanitized, "Stripped reasoning from history");
        }

        Ok(Self {
            id: Uuid::new_v4(),
            client,
            model,
            stream,
            body,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// The sanitized body, forwarded upstream as-is
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Tracing span carrying the correlation fields for this request
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "chat",
            id = %self.id,
            client = %self.client,
            model = %self.model,
            stream = self.stream,
        )
    }
}

/// Rewrite `choices[0].message.content` of a non-streaming completion in place
///
/// Returns whether the content was present and changed. Every other field of
/// the body is left exactly as the upstream sent it.
pub fn rewrite_completion(body: &mut Value) -> bool {
    let Some(Value::String(content)) = body
        .get_mut("choices")
        .and_then(|choices| choices.get_mut(0))
        .and_then(|choice| choice.get_mut("message"))
        .and_then(|message| message.get_mut("content"))
    else {
        return false;
    };

    let rewritten = rewrite_all(content);
    if rewritten == *content {
        return false;
    }
    *content = rewritten;
    true
}
