//! Streaming marker rewriting
//!
//! Translates the upstream's harmony channel markup into canonical
//! `<think>`/`</think>` reasoning delimiters, either in one shot or across an
//! arbitrary fragmentation of the text. Concatenating every fragment returned
//! by [`MarkerRewriter::feed`] and the final [`MarkerRewriter::flush`] always
//! equals [`rewrite_all`] over the concatenated input.

mod automaton;
mod rewriter;
mod rules;

pub use automaton::{MarkerAutomaton, StateId};
pub use rewriter::{MarkerRewriter, rewrite_all};
pub use rules::{
    ANALYSIS_MARKER, FINAL_MARKER, FINAL_START_MARKER, MarkerRule, THINK_CLOSE, THINK_OPEN,
    harmony_rules, validate_rules,
};
