use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::error::ConfigValidationError;

/// Confidence tier, ordered from no action up to automatic completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    None,
    Suggestion,
    Prediction,
    Routine,
    AutoComplete,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Suggestion => "suggestion",
            Self::Prediction => "prediction",
            Self::Routine => "routine",
            Self::AutoComplete => "auto_complete",
        }
    }
}

/// Validated thresholds. Construction enforces
/// `auto_complete >= routine >= prediction >= suggestion`, so tier selection
/// never re-checks the ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierLadder {
    thresholds: Thresholds,
}

impl TierLadder {
    pub fn new(thresholds: Thresholds) -> Result<Self, ConfigValidationError> {
        let t = thresholds;
        for (field, value) in [
            ("intent.thresholds.auto_complete", t.auto_complete),
            ("intent.thresholds.routine", t.routine),
            ("intent.thresholds.prediction", t.prediction),
            ("intent.thresholds.suggestion", t.suggestion),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::OutOfRange {
                    field: field.to_owned(),
                    value,
                    range: "[0, 1]",
                });
            }
        }
        let ordered = t.auto_complete >= t.routine
            && t.routine >= t.prediction
            && t.prediction >= t.suggestion;
        if !ordered {
            return Err(ConfigValidationError::ThresholdOrder {
                auto_complete: t.auto_complete,
                routine: t.routine,
                prediction: t.prediction,
                suggestion: t.suggestion,
            });
        }
        Ok(Self { thresholds })
    }

    /// Highest tier whose threshold `confidence` reaches.
    pub fn select(&self, confidence: f64) -> ConfidenceTier {
        let t = &self.thresholds;
        if confidence >= t.auto_complete {
            ConfidenceTier::AutoComplete
        } else if confidence >= t.routine {
            ConfidenceTier::Routine
        } else if confidence >= t.prediction {
            ConfidenceTier::Prediction
        } else if confidence >= t.suggestion {
            ConfidenceTier::Suggestion
        } else {
            ConfidenceTier::None
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> TierLadder {
        TierLadder::new(Thresholds::default()).unwrap()
    }

    #[test]
    fn selects_highest_qualifying_tier() {
        let l = ladder();
        assert_eq!(l.select(0.95), ConfidenceTier::AutoComplete);
        assert_eq!(l.select(0.8), ConfidenceTier::AutoComplete);
        assert_eq!(l.select(0.77), ConfidenceTier::Routine);
        assert_eq!(l.select(0.72), ConfidenceTier::Prediction);
        assert_eq!(l.select(0.6), ConfidenceTier::Suggestion);
        assert_eq!(l.select(0.59), ConfidenceTier::None);
    }

    #[test]
    fn equal_thresholds_allowed() {
        let t = Thresholds {
            auto_complete: 0.7,
            routine: 0.7,
            prediction: 0.7,
            suggestion: 0.7,
        };
        let l = TierLadder::new(t).unwrap();
        assert_eq!(l.select(0.7), ConfidenceTier::AutoComplete);
        assert_eq!(l.select(0.69), ConfidenceTier::None);
    }

    #[test]
    fn broken_order_rejected() {
        let t = Thresholds {
            auto_complete: 0.6,
            suggestion: 0.8,
            ..Thresholds::default()
        };
        assert!(matches!(
            TierLadder::new(t),
            Err(ConfigValidationError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn out_of_range_rejected() {
        let t = Thresholds {
            auto_complete: 1.5,
            ..Thresholds::default()
        };
        assert!(matches!(
            TierLadder::new(t),
            Err(ConfigValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(ConfidenceTier::AutoComplete > ConfidenceTier::Routine);
        assert!(ConfidenceTier::Suggestion > ConfidenceTier::None);
    }
}
