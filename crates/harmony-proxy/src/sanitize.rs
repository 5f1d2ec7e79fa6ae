//! Conversation history sanitizing
//!
//! Clients echo earlier assistant turns back to the proxy, reasoning
//! included. Prior reasoning is stripped before the conversation is sent
//! upstream again, whether it arrives in canonical `<think>…</think>` form or
//! as raw harmony markup from an unsanitized history.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::rewrite::{FINAL_START_MARKER, THINK_CLOSE, THINK_OPEN};

const ANALYSIS_CHANNEL: &str = "<|channel|>analysis";
const END_MARKER: &str = "<|end|>";

static THINK_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){}.*?{}",
        regex::escape(THINK_OPEN),
        regex::escape(THINK_CLOSE)
    ))
    .expect("think span pattern is valid")
});

static ANALYSIS_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){}.*?{}",
        regex::escape(ANALYSIS_CHANNEL),
        regex::escape(END_MARKER)
    ))
    .expect("analysis span pattern is valid")
});

/// Remove reasoning spans and leftover final-answer markers from one message
///
/// Canonical spans are removed first, then raw analysis spans, then any bare
/// start-of-final marker; surrounding whitespace is trimmed last.
pub fn sanitize_content(text: &str) -> String {
    let without_think = THINK_SPAN.replace_all(text, "");
    let without_analysis = ANALYSIS_SPAN.replace_all(&without_think, "");
    without_analysis
        .replace(FINAL_START_MARKER, "")
        .trim()
        .to_string()
}

/// Sanitize every message in a chat completion body in place
///
/// String content is sanitized directly; for content-part arrays the `text`
/// of each part is. Returns the number of messages that changed.
pub fn sanitize_messages(body: &mut Value) -> usize {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return 0;
    };

    messages
        .iter_mut()
        .filter_map(|message| message.get_mut("content"))
        .map(sanitize_message_content)
        .filter(|&changed| changed)
        .count()
}

fn sanitize_message_content(content: &mut Value) -> bool {
    match content {
        Value::String(text) => replace_if_changed(text),
        Value::Array(parts) => parts
            .iter_mut()
            .filter_map(|part| match part.get_mut("text") {
                Some(Value::String(text)) => Some(replace_if_changed(text)),
                _ => None,
            })
            .fold(false, |changed, part_changed| changed | part_changed),
        _ => false,
    }
}

fn replace_if_changed(text: &mut String) -> bool {
    let sanitized = sanitize_content(text);
    if sanitized == *text {
        return false;
    }
    *text = sanitized;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_think_span_and_trims() {
        assert_eq!(
            sanitize_content("<think>prior reasoning</think>\nfinal prior answer"),
            "final prior answer"
        );
    }

    #[test]
    fn test_strips_multiline_think_span() {
        assert_eq!(
            sanitize_content("<think>line one\nline two\n</think>\n\nanswer"),
            "answer"
        );
    }

    #[test]
    fn test_strips_raw_harmony_markup() {
        let raw = "<|channel|>analysis<|message|>hmm<|end|><|start|>assistant<|channel|>final<|message|>the answer";
        assert_eq!(sanitize_content(raw), "the answer");
    }

    #[test]
    fn test_strips_bare_final_start_marker() {
        assert_eq!(
            sanitize_content("<|start|>assistant<|channel|>final<|message|>hi"),
            "hi"
        );
    }

    #[test]
    fn test_think_spans_are_matched_lazily() {
        assert_eq!(
            sanitize_content("<think>a</think>keep<think>b</think> this"),
            "keep this"
        );
    }

    #[test]
    fn test_unclosed_think_is_left_alone() {
        assert_eq!(sanitize_content("<think>never closed"), "<think>never closed");
    }

    #[test]
    fn test_plain_text_is_only_trimmed() {
        assert_eq!(sanitize_content("  hello  "), "hello");
    }

    #[test]
    fn test_sanitize_messages_string_and_parts() {
        let mut body = json!({
            "model": "gpt-oss",
            "messages": [
                {"role": "user", "content": "question"},
                {"role": "assistant", "content": "<think>r</think>\nanswer"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "<think>r2</think> part"},
                    {"type": "image_url", "image_url": {"url": "x"}}
                ]},
                {"role": "tool", "content": null}
            ]
        });

        let changed = sanitize_messages(&mut body);

        assert_eq!(changed, 2);
        assert_eq!(body["messages"][0]["content"], "question");
        assert_eq!(body["messages"][1]["content"], "answer");
        assert_eq!(body["messages"][2]["content"][0]["text"], "part");
        assert_eq!(body["messages"][2]["content"][1]["image_url"]["url"], "x");
        assert!(body["messages"][3]["content"].is_null());
    }

    #[test]
    fn test_sanitize_messages_without_messages() {
        let mut body = json!({"model": "gpt-oss"});
        assert_eq!(sanitize_messages(&mut body), 0);
        assert_eq!(body, json!({"model": "gpt-oss"}));
    }
}
