use std::collections::VecDeque;

use crate::types::{Mood, SignalContext, TraitName, Traits};

/// Score the neutral mood always gets. Other moods must beat it.
pub const NEUTRAL_BASELINE: f64 = 0.2;

/// Mean of the recent interaction contexts. Empty window is a zero context.
pub fn recent_context(window: &VecDeque<SignalContext>) -> SignalContext {
    if window.is_empty() {
        return SignalContext::default();
    }
    let n = window.len() as f64;
    let sum = window.iter().fold(SignalContext::default(), |acc, c| SignalContext {
        sentiment: acc.sentiment + c.sentiment,
        threat: acc.threat + c.threat,
        novelty: acc.novelty + c.novelty,
        task_focus: acc.task_focus + c.task_focus,
    });
    SignalContext {
        sentiment: sum.sentiment / n,
        threat: sum.threat / n,
        novelty: sum.novelty / n,
        task_focus: sum.task_focus / n,
    }
}

pub fn score(mood: Mood, traits: &Traits, ctx: &SignalContext) -> f64 {
    match mood {
        Mood::Protective => ctx.threat * traits.get(TraitName::Protectiveness),
        Mood::Curious => ctx.novelty * traits.get(TraitName::Curiosity),
        Mood::Playful => ctx.positivity() * traits.get(TraitName::Playfulness),
        Mood::Focused => ctx.task_focus * traits.get(TraitName::Assertiveness),
        Mood::Reflective => ctx.negativity() * traits.get(TraitName::Independence),
        Mood::Neutral => NEUTRAL_BASELINE,
    }
}

/// Highest-scoring mood. Candidates are visited in priority order and only a
/// strictly higher score displaces the current pick, so ties go to priority.
pub fn select(traits: &Traits, ctx: &SignalContext) -> Mood {
    let mut best = Mood::PRIORITY[0];
    let mut best_score = score(best, traits, ctx);
    for mood in Mood::PRIORITY.into_iter().skip(1) {
        let s = score(mood, traits, ctx);
        if s > best_score {
            best = mood;
            best_score = s;
        }
    }
    best
}

/// Most frequent mood tag, ties broken by priority. None for an empty input.
pub fn dominant(moods: impl IntoIterator<Item = Mood>) -> Option<Mood> {
    let mut counts = [0usize; Mood::PRIORITY.len()];
    let mut any = false;
    for mood in moods {
        counts[mood.rank()] += 1;
        any = true;
    }
    if !any {
        return None;
    }
    let mut best = 0;
    for (i, &count) in counts.iter().enumerate().skip(1) {
        if count > counts[best] {
            best = i;
        }
    }
    Some(Mood::PRIORITY[best])
}
