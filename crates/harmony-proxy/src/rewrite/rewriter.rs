//! Incremental marker rewriter
//!
//! Feeds arbitrary text fragments through a [`MarkerAutomaton`], substituting
//! markers as they complete and withholding output while the pending text
//! ends in something that could still grow into a marker.

use std::sync::Arc;

use super::automaton::{MarkerAutomaton, StateId};

/// Per-stream rewriting state: the pending buffer and the automaton state
/// reached after scanning it.
///
/// Output is all-or-nothing per fragment: when the buffer ends in an
/// ambiguous tail the whole buffer is held, otherwise the whole buffer is
/// emitted. A lone trailing `<` is a depth-1 state and is held like any other
/// partial marker until more input or [`flush`](Self::flush) arrives.
#[derive(Debug)]
pub struct MarkerRewriter {
    automaton: Arc<MarkerAutomaton>,
    buffer: String,
    state: StateId,
}

impl MarkerRewriter {
    pub fn new(automaton: Arc<MarkerAutomaton>) -> Self {
        Self {
            automaton,
            buffer: String::new(),
            state: MarkerAutomaton::ROOT,
        }
    }

    /// Rewriter for the harmony channel markers
    pub fn harmony() -> Self {
        Self::new(MarkerAutomaton::harmony())
    }

    /// Accept one fragment and return whatever is now safe to emit
    ///
    /// Returns an empty string while the buffer ends in a partial marker.
    pub fn feed(&mut self, fragment: &str) -> String {
        if fragment.is_empty() {
            return String::new();
        }

        self.scan(fragment);

        if self.automaton.depth(self.state) > 0 {
            return String::new();
        }
        std::mem::take(&mut self.buffer)
    }

    /// Emit everything still buffered, ambiguous or not
    pub fn flush(&mut self) -> String {
        self.state = MarkerAutomaton::ROOT;
        std::mem::take(&mut self.buffer)
    }

    /// Text received but not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn is_holding(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Append `fragment` to the buffer, splicing in replacements as patterns
    /// complete. A pattern may start inside the previously held text.
    fn scan(&mut self, fragment: &str) {
        let mut copied = 0;

        for (index, &byte) in fragment.as_bytes().iter().enumerate() {
            self.state = self.automaton.next_state(self.state, byte);

            let Some(rule) = self.automaton.matched_rule(self.state) else {
                continue;
            };

            let end = index + 1;
            self.buffer.push_str(&fragment[copied..end]);
            let start = self.buffer.len() - rule.pattern().len();
            self.buffer.truncate(start);
            self.buffer.push_str(rule.replacement());
            copied = end;

            // Replacements are inert, so scanning resumes from a clean state
            self.state = MarkerAutomaton::ROOT;
        }

        self.buffer.push_str(&fragment[copied..]);
    }
}

/// Rewrite a complete text in one `feed` + `flush` pass
pub fn rewrite_all(text: &str) -> String {
    let mut rewriter = MarkerRewriter::harmony();
    let mut output = rewriter.feed(text);
    output.push_str(&rewriter.flush());
    output
}
