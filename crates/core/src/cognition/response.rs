use uuid::Uuid;

use crate::error::CoreError;
use crate::memory::MemoryStore;
use crate::types::{MemoryRecord, Mood, PersonaProfile, TaskStatus, TraitName};

/// Scale applied to every mood-driven voice adjustment.
const EMOTION_INTENSITY: f64 = 0.7;
const BASE_WARMTH: f64 = 0.6;

/// Topic recorded when neither the intent nor the input names one.
pub const GENERAL_TOPIC: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Neutral,
    Warm,
    Intimate,
}

impl Style {
    pub fn of_bond(bond: f64) -> Self {
        if bond > 0.8 {
            Self::Intimate
        } else if bond > 0.5 {
            Self::Warm
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Warm => "warm",
            Self::Intimate => "intimate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directness {
    Medium,
    High,
}

/// Persona-derived rendering and voice parameters handed to the output layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationParams {
    pub style: Style,
    pub use_name: bool,
    /// Present only when playfulness is high.
    pub humor_level: Option<f64>,
    pub protective_tone: bool,
    pub directness: Directness,
    pub mood: Mood,
    pub pitch: f64,
    pub speed: f64,
    pub warmth: f64,
}

impl ModulationParams {
    pub fn from_persona(persona: &PersonaProfile) -> Self {
        let traits = &persona.traits;
        let style = Style::of_bond(persona.bond);
        let playfulness = traits.get(TraitName::Playfulness);
        let (pitch, speed, warmth) = voice(persona.mood, style);
        Self {
            style,
            use_name: match style {
                Style::Intimate => true,
                Style::Warm => persona.trust >= 0.5,
                Style::Neutral => false,
            },
            humor_level: (playfulness > 0.7).then_some(playfulness),
            protective_tone: traits.get(TraitName::Protectiveness) > 0.8,
            directness: if traits.get(TraitName::Assertiveness) > 0.7 {
                Directness::High
            } else {
                Directness::Medium
            },
            mood: persona.mood,
            pitch,
            speed,
            warmth,
        }
    }
}

fn voice(mood: Mood, style: Style) -> (f64, f64, f64) {
    let i = EMOTION_INTENSITY;
    let (mut pitch, mut speed, mut warmth) = (1.0, 1.0, BASE_WARMTH);
    match mood {
        Mood::Playful => {
            pitch *= 1.0 + 0.1 * i;
            speed *= 1.0 + 0.1 * i;
            warmth += 0.1 * i;
        }
        Mood::Reflective => {
            pitch *= 1.0 - 0.1 * i;
            speed *= 1.0 - 0.1 * i;
            warmth -= 0.1 * i;
        }
        Mood::Protective => {
            pitch *= 1.0 - 0.05 * i;
            speed *= 1.0 + 0.05 * i;
        }
        Mood::Curious => pitch *= 1.0 + 0.05 * i,
        Mood::Focused | Mood::Neutral => {}
    }
    if style == Style::Intimate {
        pitch *= 1.0 + 0.05 * i;
        speed *= 1.0 - 0.15 * i;
        warmth += 0.15 * i;
    }
    (pitch, speed, warmth.clamp(0.0, 1.0))
}

/// What the engine did with the input being answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseAction {
    Executed { description: String, status: TaskStatus },
    /// Awaiting the user's answer; no task exists yet.
    Suggested { description: String },
    Conversation,
}

impl ResponseAction {
    fn label(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::Suggested { .. } => "suggested",
            Self::Conversation => "conversation",
        }
    }
}

/// Intent-side input to composition.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub input: String,
    pub topic: String,
    pub action: ResponseAction,
}

/// Pure rendering: same inputs, same output.
pub fn render(
    intent: &IntentResult,
    persona: &PersonaProfile,
    memory_context: &[MemoryRecord],
    user_id: &str,
) -> (String, ModulationParams) {
    let params = ModulationParams::from_persona(persona);
    let mut parts: Vec<String> = Vec::new();

    let body = match &intent.action {
        ResponseAction::Executed { description, status } => outcome(description, *status),
        ResponseAction::Suggested { description, .. } => {
            if params.directness == Directness::High {
                format!("I can {description} now. Say yes or no.")
            } else {
                format!("Would you like me to {description}?")
            }
        }
        ResponseAction::Conversation => "I understand your message.".to_owned(),
    };
    parts.push(if params.use_name {
        format!("{user_id}, {}", lowercase_first(&body))
    } else {
        body
    });

    if intent.topic != GENERAL_TOPIC
        && let Some(earlier) = memory_context.iter().find(|r| r.topic == intent.topic)
    {
        parts.push(format!(
            "We talked about {} on {}.",
            earlier.topic,
            earlier.timestamp.format("%b %-d")
        ));
    }

    match params.mood {
        Mood::Protective if params.protective_tone => parts.push("I'm here, and I'm watching out for you.".to_owned()),
        Mood::Playful if params.humor_level.is_some() => parts.push("This is fun.".to_owned()),
        Mood::Curious => parts.push("Tell me more?".to_owned()),
        _ => {}
    }
    (parts.join(" "), params)
}

/// One-line report of a finished task.
pub fn outcome(description: &str, status: TaskStatus) -> String {
    match status {
        TaskStatus::Completed => format!("Done: {description}."),
        TaskStatus::Cancelled => format!("I stopped before finishing: {description}."),
        _ => format!("I tried to {description}, but it didn't work."),
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        // keep "I" capitalized
        Some('I') if chars.clone().next().is_none_or(|c| !c.is_alphabetic()) => s.to_owned(),
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Composer output.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub content: String,
    pub modulation: ModulationParams,
    /// Memory record written for this interaction.
    pub record_id: Uuid,
}

/// Renders responses and records each interaction in emotional memory.
#[derive(Debug, Clone)]
pub struct ResponseComposer {
    memory: MemoryStore,
    user_id: String,
}

impl ResponseComposer {
    pub fn new(memory: MemoryStore, user_id: impl Into<String>) -> Self {
        Self {
            memory,
            user_id: user_id.into(),
        }
    }

    /// Render with the persona snapshot the caller read before composing, then
    /// append exactly one memory record tagged with that snapshot's mood.
    pub async fn compose(
        &self,
        intent: &IntentResult,
        persona: &PersonaProfile,
        memory_context: &[MemoryRecord],
    ) -> Result<Response, CoreError> {
        let (content, modulation) = render(intent, persona, memory_context, &self.user_id);
        let summary = format!("[{}] {}", intent.action.label(), intent.input);
        let record_id = self
            .memory
            .append(MemoryRecord::new(persona.mood, intent.topic.clone(), summary))
            .await?;
        tracing::debug!(record = %record_id, mood = persona.mood.as_str(), topic = %intent.topic, "interaction recorded");
        Ok(Response {
            content,
            modulation,
            record_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFilter;
    use crate::types::Traits;

    fn persona(bond: f64, trust: f64, mood: Mood) -> PersonaProfile {
        let mut p = PersonaProfile::new(Traits::default(), bond, trust, 0.05);
        p.mood = mood;
        p
    }

    fn chat(topic: &str) -> IntentResult {
        IntentResult {
            input: "hello there".into(),
            topic: topic.into(),
            action: ResponseAction::Conversation,
        }
    }

    #[test]
    fn style_follows_bond() {
        assert_eq!(Style::of_bond(0.9), Style::Intimate);
        assert_eq!(Style::of_bond(0.6), Style::Warm);
        assert_eq!(Style::of_bond(0.5), Style::Neutral);
    }

    #[test]
    fn trait_modulation() {
        let params = ModulationParams::from_persona(&persona(0.1, 0.5, Mood::Neutral));
        // defaults: playfulness 0.7, protectiveness 0.9, assertiveness 0.6
        assert_eq!(params.humor_level, None);
        assert!(params.protective_tone);
        assert_eq!(params.directness, Directness::Medium);
        assert!(!params.use_name);
        assert_eq!((params.pitch, params.speed), (1.0, 1.0));
    }

    #[test]
    fn name_usage_is_deterministic() {
        assert!(ModulationParams::from_persona(&persona(0.6, 0.5, Mood::Neutral)).use_name);
        assert!(!ModulationParams::from_persona(&persona(0.6, 0.4, Mood::Neutral)).use_name);
        assert!(ModulationParams::from_persona(&persona(0.9, 0.0, Mood::Neutral)).use_name);
    }

    #[test]
    fn intimate_voice_is_slower_and_warmer() {
        let neutral = ModulationParams::from_persona(&persona(0.1, 0.5, Mood::Neutral));
        let intimate = ModulationParams::from_persona(&persona(0.9, 0.5, Mood::Neutral));
        assert!(intimate.speed < neutral.speed);
        assert!(intimate.warmth > neutral.warmth);
    }

    #[test]
    fn render_is_pure() {
        let p = persona(0.9, 0.8, Mood::Protective);
        let a = render(&chat("work"), &p, &[], "ana");
        let b = render(&chat("work"), &p, &[], "ana");
        assert_eq!(a, b);
        assert!(a.0.starts_with("ana, I understand"));
        assert!(a.0.contains("watching out"));
    }

    #[test]
    fn render_recalls_matching_topic() {
        let p = persona(0.1, 0.5, Mood::Neutral);
        let earlier = MemoryRecord::new(Mood::Neutral, "garden", "[conversation] tomatoes");
        let (content, _) = render(&chat("garden"), &p, &[earlier], "ana");
        assert!(content.contains("We talked about garden"));
        let (content, _) = render(&chat("music"), &p, &[], "ana");
        assert_eq!(content, "I understand your message.");
    }

    #[test]
    fn render_task_outcomes() {
        let p = persona(0.1, 0.5, Mood::Neutral);
        let done = IntentResult {
            input: "lights off".into(),
            topic: "lights".into(),
            action: ResponseAction::Executed {
                description: "turn off the lights".into(),
                status: TaskStatus::Completed,
            },
        };
        assert_eq!(render(&done, &p, &[], "ana").0, "Done: turn off the lights.");
        let ask = IntentResult {
            action: ResponseAction::Suggested {
                description: "turn off the lights".into(),
            },
            ..done
        };
        assert_eq!(render(&ask, &p, &[], "ana").0, "Would you like me to turn off the lights?");
    }

    #[test]
    fn keeps_pronoun_capitalized() {
        assert_eq!(lowercase_first("I tried"), "I tried");
        assert_eq!(lowercase_first("Done: x"), "done: x");
        assert_eq!(lowercase_first("It works"), "it works");
    }

    #[tokio::test]
    async fn compose_appends_one_record() {
        let memory = MemoryStore::spawn();
        let composer = ResponseComposer::new(memory.clone(), "ana");
        let p = persona(0.1, 0.5, Mood::Curious);
        let response = composer.compose(&chat("stars"), &p, &[]).await.unwrap();

        let records: Vec<_> = memory.query(MemoryFilter::default()).iter().cloned().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, response.record_id);
        assert_eq!(records[0].mood, Mood::Curious);
        assert_eq!(records[0].topic, "stars");
        assert_eq!(response.modulation.mood, Mood::Curious);
    }
}
