//! Integration tests for the marker rewriter
//!
//! The central property: however the upstream text is fragmented, the
//! concatenated output equals the one-shot rewrite, and no fragment of a
//! marker ever leaks into emitted text.

use harmony_proxy::rewrite::{
    ANALYSIS_MARKER, FINAL_MARKER, MarkerAutomaton, MarkerRewriter, MarkerRule, THINK_OPEN,
    rewrite_all,
};

// =============================================================================
// Test Fixtures
// =============================================================================

const SAMPLES: &[&str] = &[
    "<|channel|>analysis<|message|>hello<|end|><|start|>assistant<|channel|>final<|message|>world",
    "plain text without markers",
    "a < b and c <| d",
    "<|channel|>analysis<|message|>思考中…<|end|><|start|>assistant<|channel|>final<|message|>答え",
    "<|end|> alone, then <|channel|>final<|message|> without analysis",
    "<<|channel|>analysis<|message|>x",
    "",
];

/// Every byte offset that lies on a char boundary, excluding the ends
fn boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).filter(|&i| i > 0).collect()
}

fn run(fragments: &[&str]) -> (Vec<String>, String) {
    let mut rewriter = MarkerRewriter::harmony();
    let emitted = fragments.iter().map(|f| rewriter.feed(f)).collect();
    (emitted, rewriter.flush())
}

fn concat(emitted: &[String], residual: &str) -> String {
    let mut out: String = emitted.concat();
    out.push_str(residual);
    out
}

/// Fragments of the markers that must never appear in emitted text
fn marker_prefixes() -> Vec<String> {
    [ANALYSIS_MARKER, FINAL_MARKER]
        .iter()
        .flat_map(|marker| {
            // Prefixes long enough not to occur naturally in the samples
            (3..=marker.len()).map(move |n| marker[..n].to_string())
        })
        .collect()
}

// =============================================================================
// Partition Property
// =============================================================================

mod partition_tests {
    use super::*;

    #[test]
    fn test_every_two_way_split_matches_one_shot() {
        for sample in SAMPLES {
            let expected = rewrite_all(sample);
            for i in boundaries(sample) {
                let (emitted, residual) = run(&[&sample[..i], &sample[i..]]);
                assert_eq!(
                    concat(&emitted, &residual),
                    expected,
                    "split at {i} of {sample:?}"
                );
            }
        }
    }

    #[test]
    fn test_every_three_way_split_matches_one_shot() {
        for sample in SAMPLES {
            let expected = rewrite_all(sample);
            let cuts = boundaries(sample);
            for (n, &i) in cuts.iter().enumerate() {
                for &j in &cuts[n + 1..] {
                    let (emitted, residual) = run(&[&sample[..i], &sample[i..j], &sample[j..]]);
                    assert_eq!(
                        concat(&emitted, &residual),
                        expected,
                        "split at {i},{j} of {sample:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_char_by_char_matches_one_shot() {
        for sample in SAMPLES {
            let chars: Vec<String> = sample.chars().map(String::from).collect();
            let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
            let (emitted, residual) = run(&fragments);
            assert_eq!(concat(&emitted, &residual), rewrite_all(sample));
        }
    }
}

// =============================================================================
// Leak and Suppression Tests
// =============================================================================

mod leak_tests {
    use super::*;

    #[test]
    fn test_no_partial_marker_is_ever_emitted() {
        let sample = SAMPLES[0];
        let prefixes = marker_prefixes();

        for i in boundaries(sample) {
            let (emitted, _) = run(&[&sample[..i], &sample[i..]]);
            for chunk in &emitted {
                for prefix in &prefixes {
                    assert!(
                        !chunk.contains(prefix.as_str()),
                        "chunk {chunk:?} leaks {prefix:?} (split at {i})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_streaming_scenario() {
        let (emitted, residual) = run(&[
            "<|channel|>analysis<|message|>hel",
            "lo<|end|><|start|>assistant<|chan",
            "nel|>final<|message|>world",
        ]);

        assert_eq!(emitted[0], "<think>hel");
        assert_eq!(emitted[1], "");
        assert_eq!(emitted[2], "lo</think>\n\nworld");
        assert_eq!(residual, "");
    }

    #[test]
    fn test_held_text_is_released_by_later_plain_text() {
        let mut rewriter = MarkerRewriter::harmony();
        assert_eq!(rewriter.feed("x <|chan"), "");
        assert!(rewriter.is_holding());
        assert_eq!(rewriter.pending(), "x <|chan");

        assert_eq!(rewriter.feed("ge|> y"), "x <|change|> y");
        assert!(!rewriter.is_holding());
    }

    #[test]
    fn test_flush_releases_ambiguous_tail_verbatim() {
        let mut rewriter = MarkerRewriter::harmony();
        assert_eq!(rewriter.feed("<|end|><|start|>assis"), "");
        assert_eq!(rewriter.flush(), "<|end|><|start|>assis");
        assert_eq!(rewriter.flush(), "");
    }
}

// =============================================================================
// One-shot Rewrite Tests
// =============================================================================

mod rewrite_all_tests {
    use super::*;

    #[test]
    fn test_rewrite_is_idempotent() {
        for sample in SAMPLES {
            let once = rewrite_all(sample);
            assert_eq!(rewrite_all(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn test_every_marker_occurrence_is_replaced() {
        let text = format!("{ANALYSIS_MARKER}a{FINAL_MARKER}b{ANALYSIS_MARKER}c");
        assert_eq!(rewrite_all(&text), "<think>a</think>\n\nb<think>c");
    }

    #[test]
    fn test_unknown_channels_pass_through() {
        let text = "<|channel|>commentary<|message|>tool call";
        assert_eq!(rewrite_all(text), text);
    }
}

// =============================================================================
// Custom Rule Sets
// =============================================================================

mod custom_rule_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_custom_rules_stream_correctly() {
        let automaton = MarkerAutomaton::new(vec![
            MarkerRule::new("[[begin]]", THINK_OPEN),
            MarkerRule::new("[[end]]", "</think>"),
        ])
        .unwrap();
        let mut rewriter = MarkerRewriter::new(Arc::new(automaton));

        let mut out = rewriter.feed("[[beg");
        out.push_str(&rewriter.feed("in]]why[[e"));
        out.push_str(&rewriter.feed("nd]]so"));
        out.push_str(&rewriter.flush());

        assert_eq!(out, "<think>why</think>so");
    }

    #[test]
    fn test_overlapping_rules_are_rejected() {
        let result = MarkerAutomaton::new(vec![
            MarkerRule::new("abc", "x"),
            MarkerRule::new("bcd", "y"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_replacement_containing_pattern_is_rejected() {
        let result = MarkerAutomaton::new(vec![MarkerRule::new("<a>", "<a><a>")]);
        assert!(result.is_err());
    }
}
