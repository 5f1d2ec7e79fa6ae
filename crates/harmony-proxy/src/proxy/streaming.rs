//! SSE streaming rewrite
//!
//! This module turns an upstream `text/event-stream` body into the client's
//! event stream:
//! - Splits the upstream bytes into lines regardless of chunk boundaries
//! - Classifies each line and runs delta content through a [`MarkerRewriter`]
//! - Suppresses events whose content is still held back
//! - Always terminates the client stream with exactly one `data: [DONE]`

use std::fmt::Display;
use std::pin::pin;

use axum::body::Body;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::rewrite::MarkerRewriter;

/// Terminal sentinel payload
pub const DONE_SENTINEL: &str = "[DONE]";

/// Terminal frame sent to the client
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Frames buffered between the pump task and the client connection
const CHANNEL_CAPACITY: usize = 32;

/// Envelope fields copied from upstream chunks onto synthetic events
const ENVELOPE_FIELDS: [&str; 4] = ["id", "object", "created", "model"];

/// Wrap a JSON payload in SSE `data:` framing
pub fn sse_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

/// One classified upstream SSE line
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine<'a> {
    /// Empty line (event separator)
    Blank,
    /// `data:` line carrying a payload
    Data(&'a str),
    /// Terminal `data: [DONE]` line
    Done,
    /// Comments, `event:`, `id:`, `retry:` and anything unrecognized
    Other,
}

impl<'a> SseLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return SseLine::Blank;
        }

        match line.strip_prefix("data:") {
            Some(data) => {
                let data = data.strip_prefix(' ').unwrap_or(data);
                if data.trim() == DONE_SENTINEL {
                    SseLine::Done
                } else {
                    SseLine::Data(data)
                }
            }
            None => SseLine::Other,
        }
    }
}

/// Why a line was dropped without affecting the stream
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Payload is not valid JSON
    InvalidJson(String),
    /// Payload is JSON but has no `choices` array
    UnexpectedShape,
    /// Line arrived after the stream already finished
    AfterFinish,
}

/// Result of handling one upstream line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Send this frame to the client
    Forward(Bytes),
    /// Content was absorbed into the rewrite buffer; nothing to send yet
    Suppressed,
    /// Malformed line, dropped
    Skipped(SkipReason),
    /// Blank or non-data line
    Ignored,
    /// Terminal sentinel: send these frames and stop reading
    Finished(Vec<Bytes>),
}

/// Lifecycle of one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Streaming,
    Done,
    Error,
}

/// Line-by-line rewriting state for one client stream
#[derive(Debug)]
pub struct StreamRewriter {
    rewriter: MarkerRewriter,
    phase: StreamPhase,
    envelope: Map<String, Value>,
}

impl StreamRewriter {
    pub fn new(rewriter: MarkerRewriter) -> Self {
        Self {
            rewriter,
            phase: StreamPhase::Idle,
            envelope: Map::new(),
        }
    }

    pub fn harmony() -> Self {
        Self::new(MarkerRewriter::harmony())
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, StreamPhase::Done | StreamPhase::Error)
    }

    /// Handle one upstream line
    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        if self.is_finished() {
            return LineOutcome::Skipped(SkipReason::AfterFinish);
        }

        match SseLine::parse(line) {
            SseLine::Blank | SseLine::Other => LineOutcome::Ignored,
            SseLine::Done => LineOutcome::Finished(self.finish()),
            SseLine::Data(data) => {
                self.phase = StreamPhase::Streaming;
                self.handle_payload(data)
            }
        }
    }

    /// End the stream normally: flush the residual and emit the sentinel
    ///
    /// Returns nothing if the stream already finished.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.is_finished() {
            return Vec::new();
        }
        self.phase = StreamPhase::Done;
        self.closing_frames()
    }

    /// End the stream after an upstream failure, best effort
    pub fn fail(&mut self) -> Vec<Bytes> {
        if self.is_finished() {
            return Vec::new();
        }
        self.phase = StreamPhase::Error;
        self.closing_frames()
    }

    fn closing_frames(&mut self) -> Vec<Bytes> {
        let residual = self.rewriter.flush();
        let mut frames = Vec::with_capacity(2);
        if !residual.is_empty() {
            frames.push(sse_frame(&self.residual_payload(residual).to_string()));
        }
        frames.push(Bytes::from_static(DONE_FRAME.as_bytes()));
        frames
    }

    fn handle_payload(&mut self, data: &str) -> LineOutcome {
        let mut payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => return LineOutcome::Skipped(SkipReason::InvalidJson(e.to_string())),
        };

        if !payload.get("choices").is_some_and(Value::is_array) {
            return LineOutcome::Skipped(SkipReason::UnexpectedShape);
        }
        self.remember_envelope(&payload);

        let choice = payload.get("choices").and_then(|choices| choices.get(0));
        let content = choice
            .and_then(|choice| choice.get("delta"))
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let finishing = choice
            .and_then(|choice| choice.get("finish_reason"))
            .is_some_and(|reason| !reason.is_null());

        let mut text = match &content {
            Some(content) => self.rewriter.feed(content),
            None => String::new(),
        };
        if finishing {
            // Nothing follows a finish_reason for this choice, so release held text
            text.push_str(&self.rewriter.flush());
        }

        if text.is_empty() && !finishing {
            return match content {
                Some(_) => LineOutcome::Suppressed,
                None => LineOutcome::Forward(sse_frame(&payload.to_string())),
            };
        }

        if content.is_some() || !text.is_empty() {
            set_delta_content(&mut payload, text);
        }
        LineOutcome::Forward(sse_frame(&payload.to_string()))
    }

    fn remember_envelope(&mut self, payload: &Value) {
        for field in ENVELOPE_FIELDS {
            if let Some(value) = payload.get(field) {
                self.envelope.insert(field.to_string(), value.clone());
            }
        }
    }

    /// Synthetic chunk carrying text released at end of stream
    fn residual_payload(&self, residual: String) -> Value {
        let mut payload = self.envelope.clone();
        payload
            .entry("object")
            .or_insert_with(|| json!("chat.completion.chunk"));
        payload
            .entry("created")
            .or_insert_with(|| json!(chrono::Utc::now().timestamp()));
        payload.insert(
            "choices".to_string(),
            json!([{
                "index": 0,
                "delta": {"content": residual},
                "finish_reason": null,
            }]),
        );
        Value::Object(payload)
    }
}

/// Overwrite (or create) `choices[0].delta.content`
fn set_delta_content(payload: &mut Value, text: String) {
    let Some(Value::Object(choice)) = payload
        .get_mut("choices")
        .and_then(|choices| choices.get_mut(0))
    else {
        return;
    };

    let delta = choice
        .entry("delta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(delta) = delta {
        delta.insert("content".to_string(), Value::String(text));
    } else {
        *delta = json!({ "content": text });
    }
}

/// Splits a byte stream into lines across arbitrary chunk boundaries
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Take an unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        let line = line.strip_suffix(b"\r").unwrap_or(&line);
        Some(String::from_utf8_lossy(line).into_owned())
    }
}

/// Stream the rewritten upstream response to the client
///
/// A spawned task pumps the upstream body into a bounded channel that backs
/// the response body. When the client goes away the channel closes, the task
/// returns and the upstream response is dropped.
pub fn spawn_rewrite_stream(upstream: reqwest::Response, span: tracing::Span) -> Body {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let session = StreamRewriter::harmony();

    tokio::spawn(pump(upstream.bytes_stream(), session, tx).instrument(span));

    Body::from_stream(ReceiverStream::new(rx))
}

/// Drive one stream to completion and return its final phase
pub async fn pump<S, E>(
    upstream: S,
    mut session: StreamRewriter,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> StreamPhase
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut upstream = pin!(upstream);
    let mut lines = LineBuffer::new();
    let mut frames_sent = 0usize;

    loop {
        match upstream.next().await {
            Some(Ok(chunk)) => {
                for line in lines.push(&chunk) {
                    let outcome = session.handle_line(&line);
                    if !deliver(&tx, outcome, &mut frames_sent).await {
                        tracing::debug!("Client disconnected, closing upstream stream");
                        return session.phase();
                    }
                    if session.is_finished() {
                        tracing::debug!(frames_sent, "Stream complete");
                        return session.phase();
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, frames_sent, "Upstream stream failed");
                let frames = session.fail();
                deliver(&tx, LineOutcome::Finished(frames), &mut frames_sent).await;
                return session.phase();
            }
            None => {
                if let Some(line) = lines.finish() {
                    let outcome = session.handle_line(&line);
                    if !deliver(&tx, outcome, &mut frames_sent).await {
                        return session.phase();
                    }
                }
                if !session.is_finished() {
                    tracing::warn!(frames_sent, "Upstream ended without [DONE]");
                    let frames = session.finish();
                    deliver(&tx, LineOutcome::Finished(frames), &mut frames_sent).await;
                }
                return session.phase();
            }
        }
    }
}

/// Send the frames for one outcome; false once the client has gone away
async fn deliver(
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    outcome: LineOutcome,
    frames_sent: &mut usize,
) -> bool {
    let frames = match outcome {
        LineOutcome::Forward(frame) => vec![frame],
        LineOutcome::Finished(frames) => frames,
        LineOutcome::Skipped(reason) => {
            tracing::debug!(?reason, "Skipping upstream line");
            return true;
        }
        LineOutcome::Suppressed | LineOutcome::Ignored => return true,
    };

    for frame in frames {
        if tx.send(Ok(frame)).await.is_err() {
            return false;
        }
        *frames_sent += 1;
    }
    true
}
