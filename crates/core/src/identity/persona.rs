use std::collections::VecDeque;

use chrono::{Duration, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use super::mood;
use crate::config::PersonaCfg;
use crate::error::{CoreError, DataIntegrityError};
use crate::types::{
    InteractionSignal, NudgeSignal, PersonaProfile, SignalContext, TraitName, TraitSignal, smooth,
};

/// Pending requests the persona worker buffers before senders wait.
const COMMAND_BUFFER: usize = 64;

/// Persona parameters that are not part of the persisted profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonaSettings {
    pub bond_floor: f64,
    pub inactivity_threshold: Duration,
    pub mood_window: usize,
}

impl PersonaSettings {
    pub fn from_cfg(cfg: &PersonaCfg) -> Self {
        Self {
            bond_floor: cfg.bond_floor,
            inactivity_threshold: Duration::hours(cfg.inactivity_threshold_hours as i64),
            mood_window: cfg.mood_window.max(1),
        }
    }
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self::from_cfg(&PersonaCfg::default())
    }
}

/// Persona state machine. Every mutation is computed on a copy and committed
/// whole, so a reader never sees a half-applied update.
#[derive(Debug, Clone)]
pub struct PersonaState {
    profile: PersonaProfile,
    recent: VecDeque<SignalContext>,
    settings: PersonaSettings,
}

impl PersonaState {
    pub fn new(profile: PersonaProfile, settings: PersonaSettings) -> Self {
        Self {
            profile,
            recent: VecDeque::with_capacity(settings.mood_window),
            settings,
        }
    }

    pub fn profile(&self) -> PersonaProfile {
        self.profile
    }

    /// Foreground update from one interaction. The only path that moves trust.
    pub fn apply_interaction(&mut self, signal: &InteractionSignal) -> Result<PersonaProfile, CoreError> {
        let base = self.profile.revision;
        let mut next = self.profile;
        let rate = next.evolution_rate;

        apply_traits(&mut next, &signal.traits);
        if let Some(target) = checked_target(signal.bond, "bond") {
            let smoothed = smooth(next.bond, target, rate);
            let non_negative = signal.context.is_none_or(|c| c.sentiment >= 0.0);
            // non-negative interactions never lower the bond
            next.bond = if non_negative { smoothed.max(next.bond) } else { smoothed };
        }
        if let Some(feedback) = signal.feedback {
            next.trust = smooth(next.trust, feedback.trust_target(), rate);
        }
        next.last_interaction_at = next.last_interaction_at.max(signal.at);

        let mut recent = self.recent.clone();
        if let Some(ctx) = signal.context {
            if context_is_finite(&ctx) {
                recent.push_back(ctx);
                while recent.len() > self.settings.mood_window {
                    recent.pop_front();
                }
            } else {
                tracing::warn!(?ctx, "ignoring non-finite signal context");
            }
        }
        next.mood = mood::select(&next.traits, &mood::recent_context(&recent));
        self.commit(base, next, recent)
    }

    /// Background update. Carries no trust target; also runs inactivity decay of the bond.
    pub fn apply_nudge(&mut self, signal: &NudgeSignal) -> Result<PersonaProfile, CoreError> {
        let base = self.profile.revision;
        let mut next = self.profile;
        apply_traits(&mut next, &signal.traits);

        let floor = self.settings.bond_floor;
        let idle = signal.now - next.last_interaction_at;
        if idle > self.settings.inactivity_threshold && next.bond > floor {
            next.bond = smooth(next.bond, floor, next.evolution_rate).max(floor);
            tracing::debug!(bond = next.bond, idle_hours = idle.num_hours(), "bond decayed");
        }
        next.mood = mood::select(&next.traits, &mood::recent_context(&self.recent));
        self.commit(base, next, self.recent.clone())
    }

    /// Swap in a whole profile (restore, reset). The recent context window is cleared.
    pub fn replace(&mut self, profile: PersonaProfile) -> Result<PersonaProfile, CoreError> {
        profile
            .check()
            .map_err(|e| CoreError::DataIntegrity(DataIntegrityError::InvalidState(e)))?;
        self.profile = profile;
        self.recent.clear();
        Ok(profile)
    }

    fn commit(
        &mut self,
        base: u64,
        mut next: PersonaProfile,
        recent: VecDeque<SignalContext>,
    ) -> Result<PersonaProfile, CoreError> {
        if self.profile.revision != base {
            tracing::error!(base, current = self.profile.revision, "persona revision moved during update");
            return Err(CoreError::ConcurrencyConflict(format!(
                "persona revision {} changed to {} during update",
                base, self.profile.revision
            )));
        }
        next.revision = base + 1;
        next.updated_at = Utc::now();
        if let Err(violation) = next.check() {
            tracing::error!(%violation, "persona update discarded");
            return Err(CoreError::ConcurrencyConflict(format!(
                "update would leave {violation}"
            )));
        }
        self.profile = next;
        self.recent = recent;
        Ok(next)
    }
}

fn apply_traits(profile: &mut PersonaProfile, signal: &TraitSignal) {
    for name in TraitName::ALL {
        if let Some(target) = checked_target(signal.get(name), name.as_str()) {
            let old = profile.traits.get(name);
            profile.traits.set(name, smooth(old, target, profile.evolution_rate));
        }
    }
}

/// Finite targets clamped into [0, 1]; non-finite ones dropped.
fn checked_target(target: Option<f64>, field: &str) -> Option<f64> {
    let t = target?;
    if t.is_finite() {
        Some(t.clamp(0.0, 1.0))
    } else {
        tracing::warn!(field, target = t, "ignoring non-finite target");
        None
    }
}

fn context_is_finite(ctx: &SignalContext) -> bool {
    [ctx.sentiment, ctx.threat, ctx.novelty, ctx.task_focus]
        .iter()
        .all(|v| v.is_finite())
}

// ── Worker ─────────────────────────────────────────────────────

type Reply = oneshot::Sender<Result<PersonaProfile, CoreError>>;

enum Command {
    Interaction(InteractionSignal, Reply),
    Nudge(NudgeSignal, Reply),
    Replace(PersonaProfile, Reply),
}

/// Handle to the persona worker. Cheap to clone; every clone feeds the same
/// single writer. Reads never wait on the writer.
#[derive(Debug, Clone)]
pub struct PersonaHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<PersonaProfile>,
}

impl PersonaHandle {
    /// Spawn the worker on the current runtime.
    pub fn spawn(profile: PersonaProfile, settings: PersonaSettings) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (publish, state) = watch::channel(profile);
        tokio::spawn(run(PersonaState::new(profile, settings), rx, publish));
        Self { tx, state }
    }

    /// Latest committed profile.
    pub fn read(&self) -> PersonaProfile {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PersonaProfile> {
        self.state.clone()
    }

    pub async fn apply_interaction_signal(&self, signal: InteractionSignal) -> Result<PersonaProfile, CoreError> {
        self.request(|reply| Command::Interaction(signal, reply)).await
    }

    pub async fn apply_background_nudge(&self, signal: NudgeSignal) -> Result<PersonaProfile, CoreError> {
        self.request(|reply| Command::Nudge(signal, reply)).await
    }

    pub async fn replace(&self, profile: PersonaProfile) -> Result<PersonaProfile, CoreError> {
        self.request(|reply| Command::Replace(profile, reply)).await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<PersonaProfile, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CoreError::WorkerStopped("persona"))?;
        rx.await.map_err(|_| CoreError::WorkerStopped("persona"))?
    }
}

async fn run(mut state: PersonaState, mut rx: mpsc::Receiver<Command>, publish: watch::Sender<PersonaProfile>) {
    while let Some(cmd) = rx.recv().await {
        let (result, reply) = match cmd {
            Command::Interaction(signal, reply) => (state.apply_interaction(&signal), reply),
            Command::Nudge(signal, reply) => (state.apply_nudge(&signal), reply),
            Command::Replace(profile, reply) => (state.replace(profile), reply),
        };
        if let Ok(profile) = &result {
            // publish before replying so the caller reads its own write
            publish.send_replace(*profile);
        }
        let _ = reply.send(result);
    }
    tracing::debug!("persona worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Feedback, InteractionKind, Mood, Traits};

    fn state() -> PersonaState {
        PersonaState::new(
            PersonaProfile::new(Traits::default(), 0.1, 0.5, 0.05),
            PersonaSettings::default(),
        )
    }

    #[test]
    fn playfulness_single_step() {
        let mut s = state();
        let signal = InteractionSignal::new(SignalContext::default()).with_trait(TraitName::Playfulness, 1.0);
        let p = s.apply_interaction(&signal).unwrap();
        assert!((p.traits.playfulness - 0.715).abs() < 1e-12);
        assert_eq!(p.revision, 1);
    }

    #[test]
    fn scalars_stay_in_unit_range() {
        let mut s = state();
        let mut seed = 0x2545_f491_u64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 4001) as f64 / 1000.0 - 2.0
        };
        for i in 0..500 {
            let mut signal = InteractionSignal::new(SignalContext {
                sentiment: next(),
                threat: next(),
                novelty: next(),
                task_focus: next(),
            })
            .with_bond(next());
            for name in TraitName::ALL {
                signal = signal.with_trait(name, next());
            }
            if i % 3 == 0 {
                signal.feedback = Some(if i % 2 == 0 { Feedback::Accept } else { Feedback::Override });
            }
            let p = s.apply_interaction(&signal).unwrap();
            assert!(p.in_bounds(), "out of bounds after step {i}: {p:?}");
        }
    }

    #[test]
    fn positive_interactions_never_lower_bond() {
        let mut s = state();
        let mut last = s.profile().bond;
        for kind in [
            InteractionKind::DeepConversation,
            InteractionKind::Casual,
            InteractionKind::Task,
        ]
        .into_iter()
        .cycle()
        .take(120)
        {
            let p = s.apply_interaction(&InteractionSignal::from_kind(kind, 0.5)).unwrap();
            assert!(p.bond >= last);
            last = p.bond;
        }
        assert!(last > 0.6);
    }

    #[test]
    fn trust_only_moves_on_feedback() {
        let mut s = state();
        let p = s.apply_interaction(&InteractionSignal::from_kind(InteractionKind::Casual, 0.9)).unwrap();
        assert_eq!(p.trust, 0.5);
        let p = s.apply_nudge(&NudgeSignal::idle(Utc::now() + Duration::days(30))).unwrap();
        assert_eq!(p.trust, 0.5);
        let p = s.apply_interaction(&InteractionSignal::feedback(Feedback::Accept)).unwrap();
        assert!((p.trust - 0.525).abs() < 1e-12);
        let p = s.apply_interaction(&InteractionSignal::feedback(Feedback::Override)).unwrap();
        assert!(p.trust < 0.525);
    }

    #[test]
    fn bond_decays_only_after_inactivity() {
        let mut profile = PersonaProfile::new(Traits::default(), 0.6, 0.5, 0.5);
        let start = profile.last_interaction_at;
        profile.bond = 0.6;
        let mut s = PersonaState::new(profile, PersonaSettings::default());

        let p = s.apply_nudge(&NudgeSignal::idle(start + Duration::hours(71))).unwrap();
        assert_eq!(p.bond, 0.6);

        let mut bond = p.bond;
        for h in 73..200 {
            let p = s.apply_nudge(&NudgeSignal::idle(start + Duration::hours(h))).unwrap();
            assert!(p.bond <= bond);
            assert!(p.bond >= 0.1);
            bond = p.bond;
        }
        assert!((bond - 0.1).abs() < 1e-9);
    }

    #[test]
    fn bond_below_floor_does_not_rise_from_decay() {
        let profile = PersonaProfile::new(Traits::default(), 0.05, 0.5, 0.05);
        let start = profile.last_interaction_at;
        let mut s = PersonaState::new(profile, PersonaSettings::default());
        let p = s.apply_nudge(&NudgeSignal::idle(start + Duration::days(10))).unwrap();
        assert_eq!(p.bond, 0.05);
    }

    #[test]
    fn non_finite_targets_ignored() {
        let mut s = state();
        let signal = InteractionSignal::new(SignalContext::default())
            .with_trait(TraitName::Curiosity, f64::NAN)
            .with_bond(f64::INFINITY);
        let p = s.apply_interaction(&signal).unwrap();
        assert_eq!(p.traits.curiosity, 0.8);
        assert_eq!(p.bond, 0.1);
    }

    #[test]
    fn mood_follows_recent_context() {
        let mut s = state();
        let p = s.apply_interaction(&InteractionSignal::from_kind(InteractionKind::Casual, 0.9)).unwrap();
        assert_eq!(p.mood, Mood::Playful);
        let threat = SignalContext {
            threat: 1.0,
            ..SignalContext::default()
        };
        for _ in 0..5 {
            s.apply_interaction(&InteractionSignal::new(threat)).unwrap();
        }
        assert_eq!(s.profile().mood, Mood::Protective);
    }

    #[test]
    fn replace_rejects_invalid_profile() {
        let mut s = state();
        let mut bad = s.profile();
        bad.bond = 2.0;
        assert!(s.replace(bad).is_err());
        assert_eq!(s.profile().bond, 0.1);
    }

    #[tokio::test]
    async fn worker_serializes_updates() {
        let handle = PersonaHandle::spawn(
            PersonaProfile::new(Traits::default(), 0.1, 0.5, 0.05),
            PersonaSettings::default(),
        );
        let mut joins = Vec::new();
        for _ in 0..20 {
            let h = handle.clone();
            joins.push(tokio::spawn(async move {
                h.apply_interaction_signal(InteractionSignal::from_kind(InteractionKind::Casual, 0.4))
                    .await
            }));
        }
        for j in joins {
            j.await.unwrap().unwrap();
        }
        let p = handle.read();
        assert_eq!(p.revision, 20);
        assert!(p.in_bounds());
    }

    #[tokio::test]
    async fn read_sees_own_write() {
        let handle = PersonaHandle::spawn(
            PersonaProfile::new(Traits::default(), 0.1, 0.5, 0.05),
            PersonaSettings::default(),
        );
        let written = handle
            .apply_interaction_signal(InteractionSignal::feedback(Feedback::Accept))
            .await
            .unwrap();
        assert_eq!(handle.read(), written);
    }
}
