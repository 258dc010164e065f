//! Deterministic fuzzy matching from utterances to registered commands.
//!
//! Converts free-text or voice-transcribed shorthand ("open comms", "toggle
//! the comms thing") into typed actions by scoring the utterance against a
//! registry of known phrases. No ML — the scorer is a small pure function:
//!
//! - exact match scores 1.0
//! - containment either way scores 0.9
//! - otherwise a greedy left-to-right subsequence walk; the candidate only
//!   scores if every one of its characters is matched in order
//!
//! The best candidate is accepted at a score of 0.6 or higher; ties go to
//! the first-registered phrase. These constants are load-bearing for
//! compatibility with existing clients — do not tune them.
//!
//! Parsing never fails: unmatched input comes back as
//! [`MatchStatus::Unrecognized`] with zero confidence.

use serde::{Deserialize, Serialize};

/// Minimum score a candidate must reach to be accepted.
pub const MIN_CONFIDENCE: f64 = 0.6;

/// Score awarded when one normalized string contains the other.
pub const CONTAINMENT_SCORE: f64 = 0.9;

/// Whether a parse produced an actionable command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// A registered phrase cleared the acceptance threshold.
    Matched,
    /// Nothing cleared the threshold.
    Unrecognized,
}

/// Result of parsing one utterance. Ephemeral, produced per call.
#[derive(Debug, Clone)]
pub struct CommandMatch<A> {
    /// The raw utterance as given.
    pub input_text: String,
    /// The registered phrase that matched, if any.
    pub matched_phrase: Option<String>,
    /// The action bound to the matched phrase.
    pub action: Option<A>,
    /// Leftover utterance text when the phrase appears inside it
    /// (e.g. `"join net alpha"` with phrase `"join net"` yields `"alpha"`).
    pub target: Option<String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f64,
    /// Whether the parse produced a command.
    pub status: MatchStatus,
}

/// Ordered phrase registry. Registration order breaks score ties —
/// first-registered wins.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry<A> {
    entries: Vec<(String, A)>,
}

impl<A> CommandRegistry<A> {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a phrase. Earlier registrations win score ties.
    pub fn register(&mut self, phrase: impl Into<String>, action: A) -> &mut Self {
        self.entries.push((phrase.into(), action));
        self
    }

    /// Number of registered phrases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered phrases in registration order.
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(phrase, _)| phrase.as_str())
    }
}

/// Parse an utterance against the registry.
///
/// Deterministic and infallible: malformed or unmatched input yields an
/// [`MatchStatus::Unrecognized`] result, never an error.
pub fn parse<A: Clone>(utterance: &str, registry: &CommandRegistry<A>) -> CommandMatch<A> {
    let normalized_utterance = normalize(utterance);

    let mut best: Option<(f64, &String, &A)> = None;
    for (phrase, action) in &registry.entries {
        let normalized_phrase = normalize(phrase);
        let score = score_candidate(&normalized_utterance, &normalized_phrase);
        // Strictly-greater keeps the first-registered phrase on ties.
        if score > best.as_ref().map_or(0.0, |(s, _, _)| *s) {
            best = Some((score, phrase, action));
        }
    }

    match best {
        Some((score, phrase, action)) if score >= MIN_CONFIDENCE => {
            let target = extract_target(&normalized_utterance, &normalize(phrase));
            CommandMatch {
                input_text: utterance.to_owned(),
                matched_phrase: Some(phrase.clone()),
                action: Some(action.clone()),
                target,
                confidence: score,
                status: MatchStatus::Matched,
            }
        }
        _ => CommandMatch {
            input_text: utterance.to_owned(),
            matched_phrase: None,
            action: None,
            target: None,
            confidence: 0.0,
            status: MatchStatus::Unrecognized,
        },
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Score one candidate phrase against the normalized utterance.
fn score_candidate(utterance: &str, candidate: &str) -> f64 {
    if candidate.is_empty() || utterance.is_empty() {
        return 0.0;
    }
    if utterance == candidate {
        return 1.0;
    }
    if utterance.contains(candidate) || candidate.contains(utterance) {
        return CONTAINMENT_SCORE;
    }

    // Greedy subsequence walk over the utterance, consuming candidate
    // characters in order. Only a fully consumed candidate scores.
    let candidate_chars: Vec<char> = candidate.chars().collect();
    let mut matched = 0usize;
    for ch in utterance.chars() {
        if matched < candidate_chars.len() && ch == candidate_chars[matched] {
            matched += 1;
        }
    }
    if matched == candidate_chars.len() {
        matched as f64 / candidate_chars.len() as f64
    } else {
        0.0
    }
}

/// Leftover text when the utterance strictly contains the phrase.
fn extract_target(utterance: &str, phrase: &str) -> Option<String> {
    if utterance == phrase || !utterance.contains(phrase) {
        return None;
    }
    let leftover = utterance.replacen(phrase, "", 1);
    let leftover = leftover.trim();
    if leftover.is_empty() {
        None
    } else {
        Some(leftover.to_owned())
    }
}
