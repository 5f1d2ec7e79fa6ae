//! Aho-Corasick automaton over a fixed marker set
//!
//! The automaton is compiled to a dense transition table so that stepping
//! never walks failure links at runtime. The depth of the state reached after
//! scanning some text is the length of the longest suffix of that text which
//! is a prefix of a pattern, which is exactly the ambiguous tail the rewriter
//! has to hold back.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, LazyLock};

use crate::error::Result;

use super::rules::{MarkerRule, harmony_rules, validate_rules};

/// Index of a state in the automaton
pub type StateId = usize;

const ALPHABET: usize = 256;

static HARMONY: LazyLock<Arc<MarkerAutomaton>> = LazyLock::new(|| {
    Arc::new(MarkerAutomaton::new(harmony_rules()).expect("built-in harmony rules are valid"))
});

/// Compiled matcher for a validated set of marker rules
#[derive(Debug)]
pub struct MarkerAutomaton {
    rules: Vec<MarkerRule>,
    /// Flattened `state * 256 + byte` transition table
    transitions: Vec<StateId>,
    depths: Vec<usize>,
    /// Rule completed on entering each state
    outputs: Vec<Option<usize>>,
}

impl MarkerAutomaton {
    /// The start state, reached after text with no pending partial marker
    pub const ROOT: StateId = 0;

    /// Build an automaton for the given rules
    ///
    /// Fails if the rules violate the rule set invariants (see
    /// [`validate_rules`]).
    pub fn new(rules: Vec<MarkerRule>) -> Result<Self> {
        validate_rules(&rules)?;

        let mut goto: Vec<BTreeMap<u8, StateId>> = vec![BTreeMap::new()];
        let mut depths = vec![0];
        let mut outputs = vec![None];

        for (index, rule) in rules.iter().enumerate() {
            let mut state = Self::ROOT;
            for &byte in rule.pattern().as_bytes() {
                state = match goto[state].get(&byte) {
                    Some(&next) => next,
                    None => {
                        let next = goto.len();
                        goto.push(BTreeMap::new());
                        depths.push(depths[state] + 1);
                        outputs.push(None);
                        goto[state].insert(byte, next);
                        next
                    }
                };
            }
            outputs[state] = Some(index);
        }

        let mut transitions = vec![Self::ROOT; goto.len() * ALPHABET];
        let mut fail = vec![Self::ROOT; goto.len()];
        let mut queue = VecDeque::new();

        for (&byte, &child) in &goto[Self::ROOT] {
            transitions[usize::from(byte)] = child;
            queue.push_back(child);
        }

        while let Some(state) = queue.pop_front() {
            for byte in 0..ALPHABET {
                let fallback = transitions[fail[state] * ALPHABET + byte];
                let target = match u8::try_from(byte).ok().and_then(|b| goto[state].get(&b)) {
                    Some(&child) => {
                        fail[child] = fallback;
                        queue.push_back(child);
                        child
                    }
                    None => fallback,
                };
                transitions[state * ALPHABET + byte] = target;
            }
        }

        Ok(Self {
            rules,
            transitions,
            depths,
            outputs,
        })
    }

    /// Shared automaton for the harmony marker rules, built once per process
    pub fn harmony() -> Arc<Self> {
        Arc::clone(&HARMONY)
    }

    #[inline]
    pub fn next_state(&self, state: StateId, byte: u8) -> StateId {
        self.transitions[state * ALPHABET + usize::from(byte)]
    }

    /// Length in bytes of the partial marker held by `state`
    #[inline]
    pub fn depth(&self, state: StateId) -> usize {
        self.depths[state]
    }

    /// The rule whose pattern is completed on entering `state`, if any
    #[inline]
    pub fn matched_rule(&self, state: StateId) -> Option<&MarkerRule> {
        self.outputs[state].map(|index| &self.rules[index])
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    pub fn state_count(&self) -> usize {
        self.depths.len()
    }

    /// Longest pattern length in bytes; a held partial marker is always shorter
    pub fn max_pattern_len(&self) -> usize {
        self.rules
            .iter()
            .map(|rule| rule.pattern().len())
            .max()
            .unwrap_or(0)
    }
}
