use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;
use crate::types::{PersonaProfile, Traits};

/// All engine parameters. Loaded from a JSON file at startup.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompanionCfg {
    pub persona: PersonaCfg,
    pub intent: IntentCfg,
    pub memory: MemoryCfg,
    pub system: SystemCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersonaCfg {
    pub personality_traits: TraitsCfg,
    pub evolution_rate: f64,
    pub bond_starting_level: f64,
    pub trust_starting_level: f64,
    /// Bond never decays below this.
    pub bond_floor: f64,
    pub inactivity_threshold_hours: u64,
    /// Number of recent interaction contexts used for mood scoring.
    pub mood_window: usize,
}

impl Default for PersonaCfg {
    fn default() -> Self {
        Self {
            personality_traits: TraitsCfg::default(),
            evolution_rate: 0.05,
            bond_starting_level: 0.1,
            trust_starting_level: 0.5,
            bond_floor: 0.1,
            inactivity_threshold_hours: 72,
            mood_window: 5,
        }
    }
}

/// Trait mapping as written in the config file. Missing keys take defaults,
/// unknown keys fail the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraitsCfg {
    pub playfulness: Option<f64>,
    pub protectiveness: Option<f64>,
    pub curiosity: Option<f64>,
    pub assertiveness: Option<f64>,
    pub sensuality: Option<f64>,
    pub loyalty: Option<f64>,
    pub independence: Option<f64>,
}

impl Default for TraitsCfg {
    fn default() -> Self {
        let d = Traits::default();
        Self {
            playfulness: Some(d.playfulness),
            protectiveness: Some(d.protectiveness),
            curiosity: Some(d.curiosity),
            assertiveness: Some(d.assertiveness),
            sensuality: Some(d.sensuality),
            loyalty: Some(d.loyalty),
            independence: Some(d.independence),
        }
    }
}

impl TraitsCfg {
    pub fn resolve(&self) -> Traits {
        let d = Traits::default();
        Traits {
            playfulness: self.playfulness.unwrap_or(d.playfulness),
            protectiveness: self.protectiveness.unwrap_or(d.protectiveness),
            curiosity: self.curiosity.unwrap_or(d.curiosity),
            assertiveness: self.assertiveness.unwrap_or(d.assertiveness),
            sensuality: self.sensuality.unwrap_or(d.sensuality),
            loyalty: self.loyalty.unwrap_or(d.loyalty),
            independence: self.independence.unwrap_or(d.independence),
        }
    }
}

/// Raw confidence thresholds. Only `TierLadder` turns these into tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub auto_complete: f64,
    pub suggestion: f64,
    pub prediction: f64,
    pub routine: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_complete: 0.8,
            suggestion: 0.6,
            prediction: 0.7,
            routine: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntentCfg {
    pub thresholds: Thresholds,
    pub enable_auto_tasks: bool,
    pub learn_from_behavior: bool,
    pub reinforcement_step: f64,
    /// Below this trust level automatic execution degrades to a suggestion.
    pub min_auto_trust: f64,
    pub prediction_min_samples: usize,
}

impl Default for IntentCfg {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            enable_auto_tasks: true,
            learn_from_behavior: true,
            reinforcement_step: 0.05,
            min_auto_trust: 0.3,
            prediction_min_samples: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryCfg {
    pub retention_days: u32,
    /// Records recalled as context for one response.
    pub context_limit: usize,
}

impl Default for MemoryCfg {
    fn default() -> Self {
        Self {
            retention_days: 30,
            context_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemCfg {
    pub auto_backup: bool,
    pub backup_interval_hours: u64,
    pub monitor_interval_seconds: u64,
    pub max_backups: usize,
    pub shutdown_grace_secs: u64,
    pub collaborator_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub briefing_start_hour: u32,
    pub briefing_end_hour: u32,
}

impl Default for SystemCfg {
    fn default() -> Self {
        Self {
            auto_backup: true,
            backup_interval_hours: 24,
            monitor_interval_seconds: 60,
            max_backups: 5,
            shutdown_grace_secs: 5,
            collaborator_timeout_ms: 500,
            data_dir: PathBuf::from("data"),
            briefing_start_hour: 6,
            briefing_end_hour: 9,
        }
    }
}

impl CompanionCfg {
    /// Load config from `path`. If the file does not exist, seed it with defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigValidationError> {
        if !path.exists() {
            let cfg = Self::default();
            cfg.seed(path)?;
            tracing::info!(path = %path.display(), "configuration seeded with defaults");
            return Ok(cfg);
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| ConfigValidationError::Malformed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn seed(&self, path: &Path) -> Result<(), ConfigValidationError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigValidationError::Malformed(e.to_string()))?;
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Check every range and ordering rule. Never clamps.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let p = &self.persona;
        for (name, value) in p.personality_traits.resolve().iter() {
            unit_range(&format!("persona.personality_traits.{}", name.as_str()), value)?;
        }
        if !(p.evolution_rate > 0.0 && p.evolution_rate <= 1.0) {
            return Err(out_of_range("persona.evolution_rate", p.evolution_rate, "(0, 1]"));
        }
        if !(0.0..=0.5).contains(&p.bond_starting_level) {
            return Err(out_of_range(
                "persona.bond_starting_level",
                p.bond_starting_level,
                "[0, 0.5]",
            ));
        }
        unit_range("persona.trust_starting_level", p.trust_starting_level)?;
        unit_range("persona.bond_floor", p.bond_floor)?;
        at_least("persona.inactivity_threshold_hours", p.inactivity_threshold_hours, 1)?;
        at_least("persona.mood_window", p.mood_window as u64, 1)?;

        let i = &self.intent;
        crate::intent::tiers::TierLadder::new(i.thresholds)?;
        if !(i.reinforcement_step > 0.0 && i.reinforcement_step <= 1.0) {
            return Err(out_of_range(
                "intent.reinforcement_step",
                i.reinforcement_step,
                "(0, 1]",
            ));
        }
        unit_range("intent.min_auto_trust", i.min_auto_trust)?;
        at_least("intent.prediction_min_samples", i.prediction_min_samples as u64, 1)?;

        at_least("memory.retention_days", u64::from(self.memory.retention_days), 1)?;

        let s = &self.system;
        at_least("system.backup_interval_hours", s.backup_interval_hours, 1)?;
        at_least("system.monitor_interval_seconds", s.monitor_interval_seconds, 1)?;
        at_least("system.max_backups", s.max_backups as u64, 1)?;
        if s.briefing_end_hour > 24 || s.briefing_start_hour >= s.briefing_end_hour {
            return Err(ConfigValidationError::Malformed(format!(
                "system.briefing window {}..{} must satisfy start < end <= 24",
                s.briefing_start_hour, s.briefing_end_hour
            )));
        }
        Ok(())
    }

    /// Fresh persona built from configured defaults. Also the target of a reset.
    pub fn default_profile(&self) -> PersonaProfile {
        PersonaProfile::new(
            self.persona.personality_traits.resolve(),
            self.persona.bond_starting_level,
            self.persona.trust_starting_level,
            self.persona.evolution_rate,
        )
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.memory.retention_days))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.system.monitor_interval_seconds)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.system.collaborator_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.system.shutdown_grace_secs)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.system.backup_interval_hours * 3600)
    }
}

fn out_of_range(field: &str, value: f64, range: &'static str) -> ConfigValidationError {
    ConfigValidationError::OutOfRange {
        field: field.to_owned(),
        value,
        range,
    }
}

fn unit_range(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(field, value, "[0, 1]"))
    }
}

fn at_least(field: &str, value: u64, min: u64) -> Result<(), ConfigValidationError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigValidationError::OutOfRange {
            field: field.to_owned(),
            value: value as f64,
            range: ">= 1",
        })
    }
}
