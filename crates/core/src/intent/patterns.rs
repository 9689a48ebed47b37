use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Weight of a pattern–category pair before any feedback.
pub const NEUTRAL_WEIGHT: f64 = 0.5;
/// Behavior observations kept for prediction.
const BEHAVIOR_CAP: usize = 200;

/// Learned weight of one pattern–category pairing (persisted form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternWeight {
    pub pattern: String,
    pub category: String,
    pub weight: f64,
}

/// Reinforcement weights adjusted by explicit accept/override feedback.
#[derive(Debug, Clone, Default)]
pub struct ReinforcementTable {
    weights: HashMap<(String, String), f64>,
}

impl ReinforcementTable {
    pub fn weight(&self, pattern: &str, category: &str) -> f64 {
        self.weights
            .get(&(pattern.to_owned(), category.to_owned()))
            .copied()
            .unwrap_or(NEUTRAL_WEIGHT)
    }

    /// Scale a raw confidence by the learned weight. Neutral weight is identity.
    pub fn effective(&self, pattern: &str, category: &str, confidence: f64) -> f64 {
        (confidence * (0.5 + self.weight(pattern, category))).clamp(0.0, 1.0)
    }

    /// Move the weight by `delta` and clamp to [0, 1]. Returns the new weight.
    pub fn reinforce(&mut self, pattern: &str, category: &str, delta: f64) -> f64 {
        let w = self
            .weights
            .entry((pattern.to_owned(), category.to_owned()))
            .or_insert(NEUTRAL_WEIGHT);
        *w = (*w + delta).clamp(0.0, 1.0);
        *w
    }

    /// Sorted for stable snapshots.
    pub fn export(&self) -> Vec<PatternWeight> {
        let sorted: BTreeMap<_, _> = self.weights.iter().collect();
        sorted
            .into_iter()
            .map(|((pattern, category), weight)| PatternWeight {
                pattern: pattern.clone(),
                category: category.clone(),
                weight: *weight,
            })
            .collect()
    }

    pub fn import(&mut self, weights: Vec<PatternWeight>) {
        self.weights = weights
            .into_iter()
            .map(|w| ((w.pattern, w.category), w.weight.clamp(0.0, 1.0)))
            .collect();
    }
}

/// Coarse part of the local day used for routine detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayPeriod {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl DayPeriod {
    pub fn of_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn of(at: DateTime<Utc>) -> Self {
        Self::of_hour(at.with_timezone(&Local).hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Night => "night",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

/// Bounded log of recognized intents, used to predict routines.
#[derive(Debug, Clone, Default)]
pub struct BehaviorLog {
    entries: VecDeque<(String, DayPeriod)>,
}

impl BehaviorLog {
    pub fn record(&mut self, category: impl Into<String>, period: DayPeriod) {
        if self.entries.len() >= BEHAVIOR_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back((category.into(), period));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most frequent category in `period` and its share of that period's
    /// observations. Ties resolve to the lexicographically smallest category.
    pub fn dominant(&self, period: DayPeriod, min_samples: usize) -> Option<(String, f64)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut total = 0usize;
        for (category, p) in &self.entries {
            if *p == period {
                *counts.entry(category.as_str()).or_default() += 1;
                total += 1;
            }
        }
        if total == 0 || total < min_samples {
            return None;
        }
        let mut best: Option<(&str, usize)> = None;
        for (category, count) in counts {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((category, count));
            }
        }
        best.map(|(category, count)| (category.to_owned(), count as f64 / total as f64))
    }

    /// Sequence pattern: the category that most often followed the latest
    /// one, as `(latest, next, share)` over every time `latest` was followed.
    /// Ties resolve to the lexicographically smallest category.
    pub fn successor(&self, min_samples: usize) -> Option<(String, String, f64)> {
        let (last, _) = self.entries.back()?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut total = 0usize;
        for ((before, _), (after, _)) in self.entries.iter().zip(self.entries.iter().skip(1)) {
            if before == last {
                *counts.entry(after.as_str()).or_default() += 1;
                total += 1;
            }
        }
        if total == 0 || total < min_samples {
            return None;
        }
        let mut best: Option<(&str, usize)> = None;
        for (category, count) in counts {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((category, count));
            }
        }
        best.map(|(next, count)| (last.clone(), next.to_owned(), count as f64 / total as f64))
    }
}
