use crate::types::Feedback;

/// Words that accept a pending suggestion.
const ACCEPT_KEYWORDS: &[&str] = &["yes", "yeah", "yep", "sure", "ok", "okay", "accept", "go", "please"];
/// Words that override it.
const OVERRIDE_KEYWORDS: &[&str] = &["no", "nope", "don't", "dont", "stop", "cancel", "override", "wrong"];
/// Words allowed around a keyword without making the line conversation.
const FILLER: &[&str] = &["thanks", "thank", "you", "do", "it", "that", "ahead"];
/// Longer lines are conversation, whatever words they contain.
const MAX_REPLY_WORDS: usize = 4;

/// Detect a bare accept/override reply. The whole line must be a short
/// yes/no answer: every word a keyword or filler. Override wins when both
/// appear ("no, don't go ahead").
pub fn detect_keyword_feedback(text: &str) -> Option<Feedback> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() || words.len() > MAX_REPLY_WORDS {
        return None;
    }
    let is_override = |w: &&str| OVERRIDE_KEYWORDS.contains(w);
    let is_accept = |w: &&str| ACCEPT_KEYWORDS.contains(w);
    if !words.iter().all(|w| is_override(w) || is_accept(w) || FILLER.contains(w)) {
        return None;
    }
    if words.iter().any(is_override) {
        Some(Feedback::Override)
    } else if words.iter().any(is_accept) {
        Some(Feedback::Accept)
    } else {
        None
    }
}
