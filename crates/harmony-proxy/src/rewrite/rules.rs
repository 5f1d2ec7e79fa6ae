//! Literal marker rules and the invariants a rule set must satisfy
//!
//! A rule set is only accepted when substituting its rules one after another
//! over a whole buffer gives the same text as a single leftmost scan over all
//! patterns at once. That holds when no two patterns overlap and every
//! replacement is inert (it can never help form a pattern with the text
//! around it). The incremental rewriter relies on both properties.

use crate::error::{HarmonyError, Result};

/// Opening reasoning marker emitted by the upstream
pub const ANALYSIS_MARKER: &str = "<|channel|>analysis<|message|>";

/// Closing reasoning marker immediately followed by the start of the final answer
pub const FINAL_MARKER: &str = "<|end|><|start|>assistant<|channel|>final<|message|>";

/// Start-of-final-answer marker without the preceding `<|end|>`
pub const FINAL_START_MARKER: &str = "<|start|>assistant<|channel|>final<|message|>";

/// Canonical reasoning open delimiter
pub const THINK_OPEN: &str = "<think>";

/// Canonical reasoning close delimiter
pub const THINK_CLOSE: &str = "</think>";

/// A literal pattern and the text that replaces it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRule {
    pattern: String,
    replacement: String,
}

impl MarkerRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }
}

/// The two rules that translate harmony channel markup into `<think>` tags
pub fn harmony_rules() -> Vec<MarkerRule> {
    vec![
        MarkerRule::new(ANALYSIS_MARKER, THINK_OPEN),
        MarkerRule::new(FINAL_MARKER, format!("{THINK_CLOSE}\n\n")),
    ]
}

/// Check that a rule set can be applied incrementally without re-matching
pub fn validate_rules(rules: &[MarkerRule]) -> Result<()> {
    for (i, rule) in rules.iter().enumerate() {
        if rule.pattern.is_empty() {
            return Err(HarmonyError::Rewrite(format!("rule {i} has an empty pattern")));
        }
    }

    for (i, rule) in rules.iter().enumerate() {
        for (j, other) in rules.iter().enumerate() {
            if i != j && overlaps(&rule.pattern, &other.pattern) {
                return Err(HarmonyError::Rewrite(format!(
                    "patterns {:?} and {:?} overlap",
                    rule.pattern, other.pattern
                )));
            }

            if overlaps(&rule.replacement, &other.pattern) {
                return Err(HarmonyError::Rewrite(format!(
                    "replacement {:?} can form pattern {:?}",
                    rule.replacement, other.pattern
                )));
            }
        }
    }

    Ok(())
}

/// True when `a` and `b` can share text: one contains the other, or a suffix
/// of either is a prefix of the other.
fn overlaps(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a) || joins(a, b) || joins(b, a)
}

/// True when a non-empty proper suffix of `left` is a prefix of `right`
fn joins(left: &str, right: &str) -> bool {
    (1..left.len())
        .filter(|&start| left.is_char_boundary(start))
        .any(|start| right.starts_with(&left[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmony_rules_are_valid() {
        assert!(validate_rules(&harmony_rules()).is_ok());
    }

    #[test]
    fn test_harmony_rule_order() {
        let rules = harmony_rules();
        assert_eq!(rules[0].pattern(), ANALYSIS_MARKER);
        assert_eq!(rules[0].replacement(), "<think>");
        assert_eq!(rules[1].pattern(), FINAL_MARKER);
        assert_eq!(rules[1].replacement(), "</think>\n\n");
    }

    #[test]
    fn test_rejects_empty_pattern() {
        let rules = vec![MarkerRule::new("", "x")];
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn test_rejects_replacement_that_completes_a_pattern() {
        // "<a" followed by "b>" from the input would form "<ab>" again
        let rules = vec![MarkerRule::new("<ab>", "<a")];
        let err = validate_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("can form pattern"));
    }

    #[test]
    fn test_rejects_replacement_containing_a_pattern() {
        let rules = vec![
            MarkerRule::new("[x]", "y"),
            MarkerRule::new("[y]", "[x]"),
        ];
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn test_rejects_overlapping_patterns() {
        let rules = vec![MarkerRule::new("abc", "1"), MarkerRule::new("cde", "2")];
        let err = validate_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("overlap"));

        let nested = vec![MarkerRule::new("abcd", "1"), MarkerRule::new("bc", "2")];
        assert!(validate_rules(&nested).is_err());
    }

    #[test]
    fn test_self_overlapping_pattern_is_allowed() {
        let rules = vec![MarkerRule::new("aba", "X")];
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn test_joins() {
        assert!(joins("xx<|", "<|end|>"));
        assert!(!joins("<think>", ANALYSIS_MARKER));
        assert!(!joins(ANALYSIS_MARKER, FINAL_MARKER));
        assert!(!joins(FINAL_MARKER, ANALYSIS_MARKER));
    }
}
