use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::patterns::{BehaviorLog, DayPeriod, PatternWeight, ReinforcementTable};
use super::task::TaskBoard;
use super::tiers::{ConfidenceTier, TierLadder};
use crate::config::IntentCfg;
use crate::error::{ConfigValidationError, TaskError};
use crate::types::{
    Feedback, IntentCandidate, PersonaProfile, RecurringTask, Task, TaskStatus, Trigger,
};

/// Intent engine shared between the foreground path and the scheduler.
pub type SharedIntentEngine = Arc<Mutex<IntentEngine>>;

/// What the engine decided to do with a classified input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    /// Run the task now, without asking.
    Execute,
    /// Surface a suggestion; nothing changes until the user responds.
    Suggest,
    Nothing,
}

/// Result of classifying one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub pattern: String,
    pub category: String,
    /// Confidence after learned weights were applied.
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub action: PlannedAction,
}

impl Classification {
    pub fn none() -> Self {
        Self {
            pattern: String::new(),
            category: String::new(),
            confidence: 0.0,
            tier: ConfidenceTier::None,
            action: PlannedAction::Nothing,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != PlannedAction::Nothing
    }
}

#[derive(Debug, Clone, Copy)]
struct EngineSettings {
    enable_auto_tasks: bool,
    learn_from_behavior: bool,
    reinforcement_step: f64,
    min_auto_trust: f64,
    prediction_min_samples: usize,
}

/// Turns scored intent candidates into tiered actions and owns task lifecycles.
#[derive(Debug)]
pub struct IntentEngine {
    ladder: TierLadder,
    settings: EngineSettings,
    weights: ReinforcementTable,
    behavior: BehaviorLog,
    board: TaskBoard,
}

impl IntentEngine {
    pub fn new(cfg: &IntentCfg) -> Result<Self, ConfigValidationError> {
        Ok(Self {
            ladder: TierLadder::new(cfg.thresholds)?,
            settings: EngineSettings {
                enable_auto_tasks: cfg.enable_auto_tasks,
                learn_from_behavior: cfg.learn_from_behavior,
                reinforcement_step: cfg.reinforcement_step,
                min_auto_trust: cfg.min_auto_trust,
                prediction_min_samples: cfg.prediction_min_samples,
            },
            weights: ReinforcementTable::default(),
            behavior: BehaviorLog::default(),
            board: TaskBoard::new(),
        })
    }

    pub fn shared(self) -> SharedIntentEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn ladder(&self) -> &TierLadder {
        &self.ladder
    }

    /// Pick the strongest candidate and tier it. Depends only on the
    /// candidates, the thresholds, the learned weights, and `persona`.
    pub fn classify(&self, candidates: &[IntentCandidate], persona: &PersonaProfile) -> Classification {
        let best = candidates
            .iter()
            .filter(|c| c.confidence.is_finite())
            .map(|c| {
                let raw = c.confidence.clamp(0.0, 1.0);
                (c, self.weights.effective(&c.signal_ref, &c.category, raw))
            })
            .min_by(|(a, ea), (b, eb)| {
                eb.partial_cmp(ea)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.category.cmp(&b.category))
                    .then_with(|| a.signal_ref.cmp(&b.signal_ref))
            });

        let Some((candidate, confidence)) = best else {
            return Classification::none();
        };
        let tier = self.ladder.select(confidence);
        Classification {
            pattern: candidate.signal_ref.clone(),
            category: candidate.category.clone(),
            confidence,
            tier,
            action: self.plan(tier, persona),
        }
    }

    fn plan(&self, tier: ConfidenceTier, persona: &PersonaProfile) -> PlannedAction {
        match tier {
            ConfidenceTier::AutoComplete
                if self.settings.enable_auto_tasks && persona.trust >= self.settings.min_auto_trust =>
            {
                PlannedAction::Execute
            }
            ConfidenceTier::None => PlannedAction::Nothing,
            _ => PlannedAction::Suggest,
        }
    }

    /// Create a pending task for an actionable classification.
    pub fn open_task(&mut self, classification: &Classification, description: impl Into<String>) -> Uuid {
        let task = Task::new(
            description,
            classification.category.clone(),
            classification.pattern.clone(),
            classification.confidence,
            Trigger::Immediate,
        );
        tracing::info!(task = %task.id, category = %task.category, "task opened");
        self.board.insert(task)
    }

    pub fn add_task(&mut self, task: Task) -> Uuid {
        self.board.insert(task)
    }

    pub fn add_recurring(&mut self, recurring: RecurringTask) -> Uuid {
        tracing::info!(description = %recurring.description, interval_hours = recurring.interval_hours, "recurring task added");
        self.board.add_recurring(recurring)
    }

    pub fn schedule(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), TaskError> {
        self.board.schedule(id, at).map(|_| ())
    }

    pub fn unschedule(&mut self, id: Uuid) -> Result<(), TaskError> {
        self.board.transition(id, TaskStatus::Pending).map(|_| ())
    }

    /// Move a waiting task to executing. Returns a copy for the executor.
    pub fn begin_execution(&mut self, id: Uuid) -> Result<Task, TaskError> {
        self.board.transition(id, TaskStatus::Executing).cloned()
    }

    /// Commit an execution result. A task cancelled while executing stays cancelled.
    pub fn finish_execution(&mut self, id: Uuid, result: Result<(), String>) -> Result<TaskStatus, TaskError> {
        let current = self.board.get(id).ok_or(TaskError::NotFound(id))?.status;
        if current == TaskStatus::Cancelled {
            tracing::info!(task = %id, "result discarded for cancelled task");
            return Ok(TaskStatus::Cancelled);
        }
        let to = match result {
            Ok(()) => TaskStatus::Completed,
            Err(reason) => {
                tracing::warn!(task = %id, %reason, "task failed");
                TaskStatus::Failed
            }
        };
        self.board.transition(id, to).map(|t| t.status)
    }

    /// Fail every task still `Executing` and queue a fresh pending copy of
    /// each. Returns the ids of the copies.
    pub fn requeue_interrupted(&mut self, reason: &str) -> Vec<Uuid> {
        let interrupted: Vec<Task> = self
            .board
            .all()
            .iter()
            .filter(|t| t.status == TaskStatus::Executing)
            .cloned()
            .collect();
        let mut requeued = Vec::with_capacity(interrupted.len());
        for task in interrupted {
            if let Err(e) = self.finish_execution(task.id, Err(reason.to_owned())) {
                tracing::warn!(task = %task.id, error = %e, "interrupted task left as is");
                continue;
            }
            let retry = Task::new(task.description, task.category, task.pattern, task.confidence, task.trigger);
            tracing::info!(task = %task.id, retry = %retry.id, "interrupted task requeued");
            requeued.push(self.board.insert(retry));
        }
        requeued
    }

    pub fn cancel(&mut self, id: Uuid) -> Result<(), TaskError> {
        self.board.transition(id, TaskStatus::Cancelled)?;
        tracing::info!(task = %id, "task cancelled");
        Ok(())
    }

    /// Bounded reinforcement step for a pattern–category pair.
    /// Returns the new weight, or None when learning is disabled.
    pub fn reinforce(&mut self, pattern: &str, category: &str, feedback: Feedback) -> Option<f64> {
        if !self.settings.learn_from_behavior {
            return None;
        }
        let delta = match feedback {
            Feedback::Accept => self.settings.reinforcement_step,
            Feedback::Override => -self.settings.reinforcement_step,
        };
        let weight = self.weights.reinforce(pattern, category, delta);
        tracing::debug!(pattern, category, feedback = feedback.as_str(), weight, "pattern reinforced");
        Some(weight)
    }

    /// Record a recognized intent for routine detection.
    pub fn observe(&mut self, category: &str, at: DateTime<Utc>) {
        if !category.is_empty() {
            self.behavior.record(category, DayPeriod::of(at));
        }
    }

    /// Predict the user's likely next intent from the routine of the current
    /// day period or from what usually follows the latest observed category.
    /// The stronger share wins, the routine on a tie. Only reported at or
    /// above the prediction tier, and only ever suggested.
    pub fn predict(&self, now: DateTime<Utc>) -> Option<Classification> {
        let min_samples = self.settings.prediction_min_samples;
        let period = DayPeriod::of(now);
        let routine = self
            .behavior
            .dominant(period, min_samples)
            .map(|(category, share)| (format!("routine:{}", period.as_str()), category, share));
        let sequence = self
            .behavior
            .successor(min_samples)
            .map(|(after, next, share)| (format!("sequence:{after}"), next, share));
        let (pattern, category, share) = match (routine, sequence) {
            (Some(r), Some(s)) => {
                if s.2 > r.2 {
                    s
                } else {
                    r
                }
            }
            (r, s) => r.or(s)?,
        };
        let tier = self.ladder.select(share);
        (tier >= ConfidenceTier::Prediction).then(|| Classification {
            pattern,
            category,
            confidence: share,
            tier,
            action: PlannedAction::Suggest,
        })
    }

    /// Materialize due recurring tasks and list every waiting task whose trigger fired.
    pub fn due_tasks(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let created = self.board.materialize_recurring(now);
        if !created.is_empty() {
            tracing::debug!(count = created.len(), "recurring tasks materialized");
        }
        self.board.due(now)
    }

    /// Re-tier a stored task with the current weights and persona.
    pub fn reevaluate(&self, id: Uuid, persona: &PersonaProfile) -> Result<Classification, TaskError> {
        let task = self.board.get(id).ok_or(TaskError::NotFound(id))?;
        let candidate = IntentCandidate::new(task.pattern.clone(), task.category.clone(), task.confidence);
        Ok(self.classify(std::slice::from_ref(&candidate), persona))
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.board.get(id)
    }

    pub fn waiting_tasks(&self) -> Vec<Task> {
        self.board.waiting()
    }

    pub fn recurring_tasks(&self) -> Vec<RecurringTask> {
        self.board.recurring().to_vec()
    }

    pub fn weights(&self) -> Vec<PatternWeight> {
        self.weights.export()
    }

    pub fn prune_finished(&mut self) -> usize {
        self.board.prune_terminal()
    }

    /// Replace tasks and learned weights from persisted state.
    pub fn restore(&mut self, tasks: Vec<Task>, recurring: Vec<RecurringTask>, weights: Vec<PatternWeight>) {
        self.board.restore(tasks, recurring);
        self.weights.import(weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Traits;

    fn engine() -> IntentEngine {
        IntentEngine::new(&IntentCfg::default()).unwrap()
    }

    fn persona(trust: f64) -> PersonaProfile {
        PersonaProfile::new(Traits::default(), 0.1, trust, 0.05)
    }

    #[test]
    fn high_confidence_executes() {
        let e = engine();
        let c = e.classify(&[IntentCandidate::new("weather?", "weather", 0.9)], &persona(0.5));
        assert_eq!(c.tier, ConfidenceTier::AutoComplete);
        assert_eq!(c.action, PlannedAction::Execute);
        assert_eq!(c.category, "weather");
    }

    #[test]
    fn mid_confidence_suggests() {
        let e = engine();
        let c = e.classify(&[IntentCandidate::new("p", "calendar", 0.65)], &persona(0.5));
        assert_eq!(c.tier, ConfidenceTier::Suggestion);
        assert_eq!(c.action, PlannedAction::Suggest);
    }

    #[test]
    fn low_confidence_does_nothing() {
        let e = engine();
        let c = e.classify(&[IntentCandidate::new("p", "calendar", 0.2)], &persona(0.5));
        assert_eq!(c.action, PlannedAction::Nothing);
        assert_eq!(e.classify(&[], &persona(0.5)), Classification::none());
    }

    #[test]
    fn low_trust_downgrades_automation() {
        let e = engine();
        let c = e.classify(&[IntentCandidate::new("p", "weather", 0.95)], &persona(0.1));
        assert_eq!(c.tier, ConfidenceTier::AutoComplete);
        assert_eq!(c.action, PlannedAction::Suggest);
    }

    #[test]
    fn disabled_auto_tasks_downgrade() {
        let cfg = IntentCfg {
            enable_auto_tasks: false,
            ..IntentCfg::default()
        };
        let e = IntentEngine::new(&cfg).unwrap();
        let c = e.classify(&[IntentCandidate::new("p", "weather", 0.95)], &persona(0.9));
        assert_eq!(c.action, PlannedAction::Suggest);
    }

    #[test]
    fn classification_is_deterministic() {
        let e = engine();
        let p = persona(0.5);
        let candidates = vec![
            IntentCandidate::new("p", "music", 0.7),
            IntentCandidate::new("p", "lights", 0.7),
            IntentCandidate::new("q", "news", 0.4),
        ];
        let first = e.classify(&candidates, &p);
        for _ in 0..10 {
            assert_eq!(e.classify(&candidates, &p), first);
        }
        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(e.classify(&reversed, &p), first);
        // tie broken by category name
        assert_eq!(first.category, "lights");
    }

    #[test]
    fn non_finite_confidence_ignored() {
        let e = engine();
        let c = e.classify(
            &[IntentCandidate::new("p", "bad", f64::NAN), IntentCandidate::new("p", "ok", 0.65)],
            &persona(0.5),
        );
        assert_eq!(c.category, "ok");
    }

    #[test]
    fn reinforcement_shifts_tier() {
        let mut e = engine();
        let p = persona(0.5);
        let cands = [IntentCandidate::new("lights off", "lights", 0.72)];
        assert_eq!(e.classify(&cands, &p).tier, ConfidenceTier::Prediction);
        for _ in 0..3 {
            e.reinforce("lights off", "lights", Feedback::Accept);
        }
        // 0.72 * (0.5 + 0.65) = 0.828
        assert_eq!(e.classify(&cands, &p).tier, ConfidenceTier::AutoComplete);
        for _ in 0..10 {
            e.reinforce("lights off", "lights", Feedback::Override);
        }
        assert_eq!(e.classify(&cands, &p).action, PlannedAction::Nothing);
    }

    #[test]
    fn learning_can_be_disabled() {
        let cfg = IntentCfg {
            learn_from_behavior: false,
            ..IntentCfg::default()
        };
        let mut e = IntentEngine::new(&cfg).unwrap();
        assert_eq!(e.reinforce("p", "c", Feedback::Accept), None);
        assert!(e.weights().is_empty());
    }

    #[test]
    fn execution_lifecycle() {
        let mut e = engine();
        let c = e.classify(&[IntentCandidate::new("p", "weather", 0.9)], &persona(0.5));
        let id = e.open_task(&c, "check weather");
        let task = e.begin_execution(id).unwrap();
        assert_eq!(task.status, TaskStatus::Executing);
        assert_eq!(e.finish_execution(id, Ok(())).unwrap(), TaskStatus::Completed);
        assert!(e.cancel(id).is_err());
    }

    #[test]
    fn failed_execution_recorded() {
        let mut e = engine();
        let id = e.add_task(Task::new("d", "c", "p", 0.9, Trigger::Immediate));
        e.begin_execution(id).unwrap();
        assert_eq!(e.finish_execution(id, Err("offline".into())).unwrap(), TaskStatus::Failed);
    }

    #[test]
    fn cancel_during_execution_wins() {
        let mut e = engine();
        let id = e.add_task(Task::new("d", "c", "p", 0.9, Trigger::Immediate));
        e.begin_execution(id).unwrap();
        e.cancel(id).unwrap();
        assert_eq!(e.finish_execution(id, Ok(())).unwrap(), TaskStatus::Cancelled);
        assert_eq!(e.task(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn reevaluate_uses_current_weights() {
        let mut e = engine();
        let id = e.add_task(Task::new("d", "lights", "p", 0.78, Trigger::Immediate));
        let p = persona(0.5);
        assert_eq!(e.reevaluate(id, &p).unwrap().tier, ConfidenceTier::Routine);
        e.reinforce("p", "lights", Feedback::Accept);
        assert_eq!(e.reevaluate(id, &p).unwrap().action, PlannedAction::Execute);
    }

    #[test]
    fn prediction_from_routine() {
        let mut e = engine();
        let now = Utc::now();
        assert!(e.predict(now).is_none());
        for _ in 0..4 {
            e.observe("briefing", now);
        }
        let p = e.predict(now).unwrap();
        assert_eq!(p.category, "briefing");
        assert_eq!(p.tier, ConfidenceTier::AutoComplete);
        // predictions are never executed automatically
        assert_eq!(p.action, PlannedAction::Suggest);
    }

    #[test]
    fn prediction_from_sequence() {
        let mut e = engine();
        let now = Utc::now();
        for _ in 0..3 {
            e.observe("coffee", now);
            e.observe("news", now);
        }
        e.observe("coffee", now);
        // the period routine is only 4 of 7, below the prediction tier
        let p = e.predict(now).unwrap();
        assert_eq!(p.pattern, "sequence:coffee");
        assert_eq!(p.category, "news");
        assert_eq!(p.action, PlannedAction::Suggest);

        e.observe("news", now);
        let p = e.predict(now).unwrap();
        assert_eq!(p.pattern, "sequence:news");
        assert_eq!(p.category, "coffee");
    }

    #[test]
    fn interrupted_execution_is_requeued() {
        let mut e = engine();
        let running = e.add_task(Task::new("water plants", "home", "plants", 0.9, Trigger::Immediate));
        let idle = e.add_task(Task::new("lock door", "home", "door", 0.9, Trigger::Immediate));
        e.begin_execution(running).unwrap();

        let requeued = e.requeue_interrupted("aborted at shutdown");
        assert_eq!(requeued.len(), 1);
        assert_eq!(e.task(running).unwrap().status, TaskStatus::Failed);
        assert_eq!(e.task(idle).unwrap().status, TaskStatus::Pending);
        let retry = e.task(requeued[0]).unwrap();
        assert_eq!(retry.description, "water plants");
        assert_eq!(retry.pattern, "plants");
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(e.waiting_tasks().len(), 2);
        assert!(e.requeue_interrupted("again").is_empty());
    }

    #[test]
    fn due_tasks_include_recurring() {
        let mut e = engine();
        e.add_recurring(RecurringTask::new("stretch", "health", 2));
        let due = e.due_tasks(Utc::now());
        assert_eq!(due.len(), 1);
        let c = e.reevaluate(due[0], &persona(0.5)).unwrap();
        assert_eq!(c.action, PlannedAction::Execute);
    }
}
