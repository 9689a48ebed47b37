use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exponential smoothing step toward `target`, clamped to [0.0, 1.0].
pub fn smooth(old: f64, target: f64, rate: f64) -> f64 {
    (old + rate * (target - old)).clamp(0.0, 1.0)
}

fn unit(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

// ── Persona types ───────────────────────────────────────────────

/// Interaction stance, recomputed after every persona update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Protective,
    Curious,
    Playful,
    Focused,
    Reflective,
    #[default]
    Neutral,
}

impl Mood {
    /// Tie-break order, highest priority first.
    pub const PRIORITY: [Mood; 6] = [
        Mood::Protective,
        Mood::Curious,
        Mood::Playful,
        Mood::Focused,
        Mood::Reflective,
        Mood::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protective => "protective",
            Self::Curious => "curious",
            Self::Playful => "playful",
            Self::Focused => "focused",
            Self::Reflective => "reflective",
            Self::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|m| m.as_str() == s)
    }

    /// Trait reinforced when this mood dominates recent memory.
    pub fn affinity(&self) -> Option<TraitName> {
        match self {
            Self::Protective => Some(TraitName::Protectiveness),
            Self::Curious => Some(TraitName::Curiosity),
            Self::Playful => Some(TraitName::Playfulness),
            Self::Focused => Some(TraitName::Assertiveness),
            Self::Reflective => Some(TraitName::Independence),
            Self::Neutral => None,
        }
    }

    /// Position in the tie-break list (0 = highest priority).
    pub fn rank(&self) -> usize {
        // variants are declared in priority order
        *self as usize
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of personality traits. Unknown names are rejected at load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitName {
    Playfulness,
    Protectiveness,
    Curiosity,
    Assertiveness,
    Sensuality,
    Loyalty,
    Independence,
}

impl TraitName {
    pub const COUNT: usize = 7;
    pub const ALL: [TraitName; Self::COUNT] = [
        TraitName::Playfulness,
        TraitName::Protectiveness,
        TraitName::Curiosity,
        TraitName::Assertiveness,
        TraitName::Sensuality,
        TraitName::Loyalty,
        TraitName::Independence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playfulness => "playfulness",
            Self::Protectiveness => "protectiveness",
            Self::Curiosity => "curiosity",
            Self::Assertiveness => "assertiveness",
            Self::Sensuality => "sensuality",
            Self::Loyalty => "loyalty",
            Self::Independence => "independence",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Trait vector. Every value stays in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Traits {
    pub playfulness: f64,
    pub protectiveness: f64,
    pub curiosity: f64,
    pub assertiveness: f64,
    pub sensuality: f64,
    pub loyalty: f64,
    pub independence: f64,
}

impl Default for Traits {
    fn default() -> Self {
        Self {
            playfulness: 0.7,
            protectiveness: 0.9,
            curiosity: 0.8,
            assertiveness: 0.6,
            sensuality: 0.5,
            loyalty: 1.0,
            independence: 0.4,
        }
    }
}

impl Traits {
    pub fn get(&self, name: TraitName) -> f64 {
        match name {
            TraitName::Playfulness => self.playfulness,
            TraitName::Protectiveness => self.protectiveness,
            TraitName::Curiosity => self.curiosity,
            TraitName::Assertiveness => self.assertiveness,
            TraitName::Sensuality => self.sensuality,
            TraitName::Loyalty => self.loyalty,
            TraitName::Independence => self.independence,
        }
    }

    pub fn set(&mut self, name: TraitName, value: f64) {
        let slot = match name {
            TraitName::Playfulness => &mut self.playfulness,
            TraitName::Protectiveness => &mut self.protectiveness,
            TraitName::Curiosity => &mut self.curiosity,
            TraitName::Assertiveness => &mut self.assertiveness,
            TraitName::Sensuality => &mut self.sensuality,
            TraitName::Loyalty => &mut self.loyalty,
            TraitName::Independence => &mut self.independence,
        };
        *slot = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (TraitName, f64)> + '_ {
        TraitName::ALL.into_iter().map(|n| (n, self.get(n)))
    }
}

/// Per-trait smoothing targets. Traits without a target are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TraitSignal {
    targets: [Option<f64>; TraitName::COUNT],
}

impl TraitSignal {
    pub fn with(mut self, name: TraitName, target: f64) -> Self {
        self.targets[name.index()] = Some(target);
        self
    }

    pub fn get(&self, name: TraitName) -> Option<f64> {
        self.targets[name.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.targets.iter().all(Option::is_none)
    }
}

/// Context extracted from one interaction, used for mood scoring.
/// `sentiment` is in [-1, 1]; the rest are in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalContext {
    pub sentiment: f64,
    pub threat: f64,
    pub novelty: f64,
    pub task_focus: f64,
}

impl SignalContext {
    pub fn from_sentiment(sentiment: f64) -> Self {
        Self {
            sentiment: sentiment.clamp(-1.0, 1.0),
            ..Self::default()
        }
    }

    pub fn positivity(&self) -> f64 {
        self.sentiment.clamp(0.0, 1.0)
    }

    pub fn negativity(&self) -> f64 {
        (-self.sentiment).clamp(0.0, 1.0)
    }
}

/// Explicit user response to a suggestion or an automatic action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Accept,
    Override,
}

impl Feedback {
    /// Trust target applied when this feedback arrives.
    pub fn trust_target(&self) -> f64 {
        match self {
            Self::Accept => 1.0,
            Self::Override => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Override => "override",
        }
    }
}

/// Coarse interaction type. Deeper conversations build more bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    DeepConversation,
    Casual,
    Task,
}

impl InteractionKind {
    pub fn bond_target(&self) -> f64 {
        match self {
            Self::DeepConversation => 1.0,
            Self::Casual => 0.8,
            Self::Task => 0.6,
        }
    }
}

/// Foreground update request for the persona.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSignal {
    pub traits: TraitSignal,
    pub bond: Option<f64>,
    /// The only source of trust movement.
    pub feedback: Option<Feedback>,
    /// None leaves the recent-context window as is.
    pub context: Option<SignalContext>,
    pub at: DateTime<Utc>,
}

impl InteractionSignal {
    pub fn new(context: SignalContext) -> Self {
        Self {
            traits: TraitSignal::default(),
            bond: None,
            feedback: None,
            context: Some(context),
            at: Utc::now(),
        }
    }

    /// Signal for an interaction of `kind` with the given sentiment in [-1, 1].
    pub fn from_kind(kind: InteractionKind, sentiment: f64) -> Self {
        let sentiment = sentiment.clamp(-1.0, 1.0);
        let bond = if sentiment >= 0.0 {
            kind.bond_target()
        } else {
            kind.bond_target() * (1.0 + sentiment)
        };
        let mut traits = TraitSignal::default();
        if sentiment > 0.3 {
            traits = traits.with(TraitName::Playfulness, 1.0);
        } else if sentiment < -0.3 {
            traits = traits.with(TraitName::Protectiveness, 1.0);
        }
        Self {
            traits,
            bond: Some(bond),
            feedback: None,
            context: Some(SignalContext::from_sentiment(sentiment)),
            at: Utc::now(),
        }
    }

    pub fn feedback(feedback: Feedback) -> Self {
        Self {
            traits: TraitSignal::default(),
            bond: None,
            feedback: Some(feedback),
            context: None,
            at: Utc::now(),
        }
    }

    pub fn with_trait(mut self, name: TraitName, target: f64) -> Self {
        self.traits = self.traits.with(name, target);
        self
    }

    pub fn with_bond(mut self, target: f64) -> Self {
        self.bond = Some(target);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Background update request. Carries no trust or bond target by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NudgeSignal {
    pub traits: TraitSignal,
    pub now: DateTime<Utc>,
}

impl NudgeSignal {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            traits: TraitSignal::default(),
            now,
        }
    }
}

/// The evolving persona. Owned exclusively by the persona worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaProfile {
    pub traits: Traits,
    pub bond: f64,
    pub trust: f64,
    pub mood: Mood,
    pub evolution_rate: f64,
    pub last_interaction_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by exactly one per committed update.
    pub revision: u64,
}

impl PersonaProfile {
    pub fn new(traits: Traits, bond: f64, trust: f64, evolution_rate: f64) -> Self {
        let now = Utc::now();
        Self {
            traits,
            bond,
            trust,
            mood: Mood::Neutral,
            evolution_rate,
            last_interaction_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Check every scalar invariant. Returns a description of the first violation.
    pub fn check(&self) -> Result<(), String> {
        for (name, value) in self.traits.iter() {
            if !unit(value) {
                return Err(format!("trait {} = {value}", name.as_str()));
            }
        }
        if !unit(self.bond) {
            return Err(format!("bond = {}", self.bond));
        }
        if !unit(self.trust) {
            return Err(format!("trust = {}", self.trust));
        }
        if !(self.evolution_rate > 0.0 && self.evolution_rate <= 1.0) {
            return Err(format!("evolution_rate = {}", self.evolution_rate));
        }
        Ok(())
    }

    pub fn in_bounds(&self) -> bool {
        self.check().is_ok()
    }
}

// ── Memory types ───────────────────────────────────────────────

/// One remembered interaction. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mood: Mood,
    pub topic: String,
    pub content: String,
    pub pinned: bool,
}

impl MemoryRecord {
    pub fn new(mood: Mood, topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            mood,
            topic: topic.into(),
            content: content.into(),
            pinned: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Whether compaction with this cutoff keeps the record.
    pub fn survives(&self, cutoff: DateTime<Utc>) -> bool {
        self.pinned || self.timestamp >= cutoff
    }
}

// ── Intent types ───────────────────────────────────────────────

/// Scored intent produced by the external NLU collaborator. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentCandidate {
    /// Reference to the input pattern that produced this candidate.
    pub signal_ref: String,
    pub category: String,
    pub confidence: f64,
}

impl IntentCandidate {
    pub fn new(signal_ref: impl Into<String>, category: impl Into<String>, confidence: f64) -> Self {
        Self {
            signal_ref: signal_ref.into(),
            category: category.into(),
            confidence,
        }
    }
}

/// One foreground input, already interpreted by the NLU collaborator.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub text: String,
    pub topic: Option<String>,
    pub candidates: Vec<IntentCandidate>,
    pub signal: InteractionSignal,
}

impl UserInput {
    pub fn new(text: impl Into<String>, signal: InteractionSignal) -> Self {
        Self {
            text: text.into(),
            topic: None,
            candidates: Vec::new(),
            signal,
        }
    }

    pub fn with_candidate(mut self, candidate: IntentCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

// ── Task types ─────────────────────────────────────────────────

/// Task lifecycle state.
/// pending ↔ scheduled → executing → completed | failed; cancel from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Waiting to run: eligible for snapshots and due-trigger scans.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }
}

/// When a task becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Trigger {
    Immediate,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub category: String,
    /// Input pattern the task was recognized from; keys reinforcement.
    pub pattern: String,
    pub confidence: f64,
    pub trigger: Trigger,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        category: impl Into<String>,
        pattern: impl Into<String>,
        confidence: f64,
        trigger: Trigger,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            category: category.into(),
            pattern: pattern.into(),
            confidence,
            trigger,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_waiting()
            && match self.trigger {
                Trigger::Immediate => true,
                Trigger::At(at) => at <= now,
            }
    }
}

/// Template that materializes a task every `interval_hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecurringTask {
    pub id: Uuid,
    pub description: String,
    pub category: String,
    pub interval_hours: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub active: bool,
}

impl RecurringTask {
    pub fn new(description: impl Into<String>, category: impl Into<String>, interval_hours: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            category: category.into(),
            interval_hours: interval_hours.max(1),
            last_run: None,
            active: true,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self
                .last_run
                .is_none_or(|last| now - last >= Duration::hours(i64::from(self.interval_hours)))
    }
}

// ── Runtime status ─────────────────────────────────────────────

/// Scheduler diagnostics, broadcast after every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    pub started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_error: Option<String>,
    pub running: bool,
}

impl SchedulerStatus {
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|t| now - t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smooth_matches_reference_value() {
        // 0.7 + 0.05 * (1.0 - 0.7)
        assert!((smooth(0.7, 1.0, 0.05) - 0.715).abs() < 1e-12);
    }

    #[test]
    fn smooth_clamps() {
        assert_eq!(smooth(0.9, 5.0, 1.0), 1.0);
        assert_eq!(smooth(0.1, -5.0, 1.0), 0.0);
    }

    #[test]
    fn mood_priority_and_parse() {
        assert_eq!(Mood::PRIORITY[0], Mood::Protective);
        assert_eq!(Mood::Neutral.rank(), 5);
        for mood in Mood::PRIORITY {
            assert_eq!(Mood::parse(mood.as_str()), Some(mood));
        }
        assert_eq!(Mood::parse("intimate"), None);
    }

    #[test]
    fn trait_get_set() {
        let mut traits = Traits::default();
        traits.set(TraitName::Curiosity, 0.25);
        assert_eq!(traits.get(TraitName::Curiosity), 0.25);
        assert_eq!(traits.iter().count(), TraitName::COUNT);
    }

    #[test]
    fn unknown_trait_rejected() {
        let json = r#"{"playfulness":0.7,"protectiveness":0.9,"curiosity":0.8,"assertiveness":0.6,
            "sensuality":0.5,"loyalty":1.0,"independence":0.4,"humor":0.3}"#;
        assert!(serde_json::from_str::<Traits>(json).is_err());
    }

    #[test]
    fn profile_check_flags_out_of_range() {
        let mut p = PersonaProfile::new(Traits::default(), 0.1, 0.5, 0.05);
        assert!(p.in_bounds());
        p.trust = 1.2;
        assert_eq!(p.check().unwrap_err(), "trust = 1.2");
    }

    #[test]
    fn negative_sentiment_lowers_bond_target() {
        let s = InteractionSignal::from_kind(InteractionKind::Casual, -0.5);
        assert!((s.bond.unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(s.traits.get(TraitName::Protectiveness), Some(1.0));
        assert!(s.feedback.is_none());
    }

    #[test]
    fn record_survives_when_pinned() {
        let now = Utc::now();
        let old = MemoryRecord::new(Mood::Curious, "t", "c").at(now - Duration::days(31));
        assert!(!old.survives(now - Duration::days(30)));
        assert!(old.clone().pinned().survives(now - Duration::days(30)));
    }

    #[test]
    fn recurring_task_due() {
        let now = Utc::now();
        let mut r = RecurringTask::new("water plants", "reminder", 24);
        assert!(r.is_due(now));
        r.last_run = Some(now - Duration::hours(2));
        assert!(!r.is_due(now));
        r.last_run = Some(now - Duration::hours(25));
        assert!(r.is_due(now));
    }

    #[test]
    fn task_due_by_trigger() {
        let now = Utc::now();
        let t = Task::new("d", "c", "p", 0.9, Trigger::At(now + Duration::minutes(5)));
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::minutes(6)));
    }
}
