//! Keyword matcher standing in for a real language-understanding model.
//! Good enough to drive the engine from a terminal; nothing more.

use companion_core::types::{
    IntentCandidate, InteractionKind, InteractionSignal, SignalContext, TraitName, UserInput,
};

struct Rule {
    signal_ref: &'static str,
    category: &'static str,
    /// Whole phrases: strong match.
    phrases: &'static [&'static str],
    /// Single words: weak match.
    keywords: &'static [&'static str],
}

const PHRASE_CONFIDENCE: f64 = 0.9;
const KEYWORD_CONFIDENCE: f64 = 0.65;

const RULES: &[Rule] = &[
    Rule {
        signal_ref: "lights",
        category: "home",
        phrases: &["turn off the lights", "turn on the lights", "lights off", "lights on"],
        keywords: &["lights", "lamp", "dim"],
    },
    Rule {
        signal_ref: "reminder",
        category: "schedule",
        phrases: &["remind me", "set a reminder"],
        keywords: &["remind", "reminder", "appointment", "meeting"],
    },
    Rule {
        signal_ref: "music",
        category: "media",
        phrases: &["play music", "play some music", "play a song"],
        keywords: &["music", "song", "playlist"],
    },
    Rule {
        signal_ref: "weather",
        category: "info",
        phrases: &["what's the weather", "weather today", "will it rain"],
        keywords: &["weather", "forecast", "rain"],
    },
    Rule {
        signal_ref: "message",
        category: "communication",
        phrases: &["send a message", "text my", "call my"],
        keywords: &["message", "email", "call"],
    },
];

const POSITIVE: &[&str] = &["love", "thanks", "thank", "great", "happy", "awesome", "good", "fun", "haha"];
const NEGATIVE: &[&str] = &["sad", "bad", "angry", "tired", "hate", "awful", "lonely", "upset"];
const THREAT: &[&str] = &["scared", "afraid", "danger", "hurt", "worried", "unsafe", "panic"];
const WONDER: &[&str] = &["why", "how", "wonder", "curious", "imagine", "what"];

/// Interpret one line of text.
pub fn interpret(text: &str) -> UserInput {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    let count = |list: &[&str]| hits(&words, list);

    let mut input = UserInput::new(text, InteractionSignal::from_kind(InteractionKind::Casual, 0.0));
    for rule in RULES {
        let confidence = if rule.phrases.iter().any(|p| lower.contains(p)) {
            PHRASE_CONFIDENCE
        } else if words.iter().any(|w| rule.keywords.contains(w)) {
            KEYWORD_CONFIDENCE
        } else {
            continue;
        };
        input = input
            .with_candidate(IntentCandidate::new(rule.signal_ref, rule.category, confidence))
            .with_topic(rule.category);
    }

    let sentiment = ((count(POSITIVE) - count(NEGATIVE)) / 2.0).clamp(-1.0, 1.0);
    let kind = if !input.candidates.is_empty() {
        InteractionKind::Task
    } else if words.len() > 12 || words.iter().any(|w| w.starts_with("feel")) {
        InteractionKind::DeepConversation
    } else {
        InteractionKind::Casual
    };
    let question = if lower.contains('?') { 0.6 } else { 0.0 };
    let novelty = question + (count(WONDER) * 0.2).min(0.4);
    let mut signal = InteractionSignal::from_kind(kind, sentiment);
    signal.context = Some(SignalContext {
        sentiment,
        threat: (count(THREAT) / 2.0).min(1.0),
        novelty,
        task_focus: if input.candidates.is_empty() { 0.0 } else { 0.8 },
    });
    if count(THREAT) > 0.0 {
        signal = signal.with_trait(TraitName::Protectiveness, 1.0);
    }
    input.signal = signal;
    input
}

fn hits(words: &[&str], list: &[&str]) -> f64 {
    words.iter().filter(|w| list.contains(*w)).count() as f64
}
