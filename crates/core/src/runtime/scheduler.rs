use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::CompanionCfg;
use crate::context::CoreContext;
use crate::error::{CoreError, CycleStep, SchedulerCycleError};
use crate::identity::PersonaHandle;
use crate::identity::mood;
use crate::intent::patterns::DayPeriod;
use crate::intent::{PlannedAction, SharedIntentEngine, run_task};
use crate::io::output::{self, EventSender, ProactiveEvent};
use crate::memory::{MemoryFilter, MemoryStore};
use crate::types::{NudgeSignal, SchedulerStatus, TraitSignal};

/// Timing and window parameters of the background cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub retention: chrono::Duration,
    /// Bound on every collaborator call and event send.
    pub collaborator_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Local hours [start, end) in which the daily briefing may fire.
    pub briefing_hours: (u32, u32),
}

impl SchedulerSettings {
    pub fn from_cfg(cfg: &CompanionCfg) -> Self {
        Self {
            interval: cfg.monitor_interval(),
            retention: cfg.retention(),
            collaborator_timeout: cfg.collaborator_timeout(),
            shutdown_grace: cfg.shutdown_grace(),
            briefing_hours: (cfg.system.briefing_start_hour, cfg.system.briefing_end_hour),
        }
    }
}

/// What one cycle did. Mostly for logs and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub compacted: usize,
    pub executed: Vec<Uuid>,
    pub suggested: Vec<Uuid>,
    pub cancelled: Vec<Uuid>,
    /// Due tasks left for a later cycle (gate timed out or busy).
    pub deferred: Vec<Uuid>,
    pub events: usize,
}

enum CycleEnd {
    Finished(Result<CycleReport, SchedulerCycleError>),
    /// Shutdown arrived mid-cycle; the cycle may or may not have finished in the grace period.
    Interrupted(Option<Result<CycleReport, SchedulerCycleError>>),
}

/// Background cognition: compaction, persona nudges, due tasks, proactive events.
pub struct ThoughtScheduler {
    ctx: CoreContext,
    persona: PersonaHandle,
    memory: MemoryStore,
    intent: SharedIntentEngine,
    events: EventSender,
    settings: SchedulerSettings,
    status_tx: watch::Sender<SchedulerStatus>,
    cycle_count: u64,
    last_cycle_at: DateTime<Utc>,
    last_briefing: Option<NaiveDate>,
    announced: HashSet<(NaiveDate, &'static str, String)>,
    suggested: HashSet<Uuid>,
}

impl ThoughtScheduler {
    /// Returns the scheduler and a status receiver for diagnostics.
    pub fn new(
        ctx: CoreContext,
        persona: PersonaHandle,
        memory: MemoryStore,
        intent: SharedIntentEngine,
        events: EventSender,
        settings: SchedulerSettings,
    ) -> (Self, watch::Receiver<SchedulerStatus>) {
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
        let scheduler = Self {
            ctx,
            persona,
            memory,
            intent,
            events,
            settings,
            status_tx,
            cycle_count: 0,
            last_cycle_at: Utc::now(),
            last_briefing: None,
            announced: HashSet::new(),
            suggested: HashSet::new(),
        };
        (scheduler, status_rx)
    }

    /// Tick until `token` is cancelled. No cycle starts after cancellation;
    /// an in-flight cycle gets the grace period and is then dropped.
    pub async fn run(mut self, token: CancellationToken) {
        let started = Utc::now();
        self.status_tx.send_modify(|s| {
            s.started_at = Some(started);
            s.running = true;
        });
        tracing::info!(interval_secs = self.settings.interval.as_secs_f64(), "thought scheduler started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
            if token.is_cancelled() {
                break;
            }

            let grace = self.settings.shutdown_grace;
            let end = {
                let cycle = self.run_cycle(Utc::now());
                tokio::pin!(cycle);
                tokio::select! {
                    biased;
                    result = &mut cycle => CycleEnd::Finished(result),
                    _ = token.cancelled() => {
                        CycleEnd::Interrupted(tokio::time::timeout(grace, &mut cycle).await.ok())
                    }
                }
            };
            match end {
                CycleEnd::Finished(result) => self.record(result),
                CycleEnd::Interrupted(Some(result)) => {
                    self.record(result);
                    break;
                }
                CycleEnd::Interrupted(None) => {
                    tracing::warn!(grace_ms = grace.as_millis() as u64, "in-flight cycle aborted at shutdown");
                    let requeued = self
                        .intent
                        .lock()
                        .await
                        .requeue_interrupted("scheduler cycle aborted at shutdown");
                    if !requeued.is_empty() {
                        tracing::info!(count = requeued.len(), "interrupted tasks requeued");
                    }
                    break;
                }
            }
        }

        self.status_tx.send_modify(|s| s.running = false);
        tracing::info!(cycles = self.cycle_count, "thought scheduler stopped");
    }

    fn record(&mut self, result: Result<CycleReport, SchedulerCycleError>) {
        match result {
            Ok(report) => {
                tracing::debug!(?report, "cycle complete");
                self.status_tx.send_modify(|s| {
                    s.cycles_completed += 1;
                    s.last_success_at = Some(Utc::now());
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, step = ?e.step, "scheduler cycle skipped");
                self.status_tx.send_modify(|s| {
                    s.cycles_failed += 1;
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    /// One full cycle with a single `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, SchedulerCycleError> {
        self.cycle_count += 1;
        let span = tracing::info_span!("cycle", n = self.cycle_count);
        self.cycle(now).instrument(span).await
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, SchedulerCycleError> {
        let mut report = CycleReport::default();
        self.forget_stale(now).await;

        report.compacted = self
            .memory
            .compact_at(self.settings.retention, now)
            .await
            .map_err(SchedulerCycleError::at(CycleStep::Compaction))?;

        self.nudge(now).await.map_err(SchedulerCycleError::at(CycleStep::Nudge))?;

        self.scan_tasks(now, &mut report)
            .await
            .map_err(SchedulerCycleError::at(CycleStep::TaskScan))?;

        report.events += self.proactive(now).await;

        self.last_cycle_at = now;
        Ok(report)
    }

    /// Drop announcements from other local days and suggestions for tasks
    /// that are no longer waiting.
    async fn forget_stale(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&Local).date_naive();
        self.announced.retain(|(day, _, _)| *day == today);
        let engine = self.intent.lock().await;
        self.suggested
            .retain(|id| engine.task(*id).is_some_and(|t| t.status.is_waiting()));
    }

    /// The dominant mood among records written since the last cycle
    /// reinforces its trait. Always applied so bond decay runs.
    async fn nudge(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let since = self.memory.query(MemoryFilter::default().since(self.last_cycle_at));
        let mut traits = TraitSignal::default();
        if let Some(trait_name) = mood::dominant(since.iter().map(|r| r.mood)).and_then(|m| m.affinity()) {
            traits = traits.with(trait_name, 1.0);
        }
        let profile = self
            .persona
            .apply_background_nudge(NudgeSignal { traits, now })
            .await?;
        tracing::debug!(mood = profile.mood.as_str(), bond = profile.bond, "persona nudged");
        Ok(())
    }

    async fn scan_tasks(&mut self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), CoreError> {
        let persona = self.persona.read();
        let due = self.intent.lock().await.due_tasks(now);
        let timeout = self.settings.collaborator_timeout;

        for id in due {
            let classification = {
                let engine = self.intent.lock().await;
                // cancelled by the user since the scan
                if !engine.task(id).is_some_and(|t| t.status.is_waiting()) {
                    continue;
                }
                engine.reevaluate(id, &persona)?
            };
            let action = match classification.action {
                PlannedAction::Execute => match self.ctx.auto_execution_permitted(timeout).await {
                    Some(true) => PlannedAction::Execute,
                    Some(false) => PlannedAction::Suggest,
                    None => {
                        report.deferred.push(id);
                        continue;
                    }
                },
                other => other,
            };

            match action {
                PlannedAction::Execute => {
                    match run_task(&self.intent, self.ctx.executor.as_ref(), id, timeout).await {
                        Ok(status) => {
                            self.suggested.remove(&id);
                            report.executed.push(id);
                            let description = self.description(id).await;
                            if self
                                .emit(ProactiveEvent::TaskFinished { task_id: id, description, status })
                                .await
                            {
                                report.events += 1;
                            }
                        }
                        // lost a race with a user cancel
                        Err(CoreError::Task(e)) => tracing::debug!(task = %id, error = %e, "task skipped"),
                        Err(e) => return Err(e),
                    }
                }
                PlannedAction::Suggest => {
                    if self.suggested.insert(id) {
                        let description = self.description(id).await;
                        if self.emit(ProactiveEvent::Suggestion { task_id: id, description }).await {
                            report.events += 1;
                        }
                        report.suggested.push(id);
                    }
                }
                PlannedAction::Nothing => {
                    self.intent.lock().await.cancel(id)?;
                    self.suggested.remove(&id);
                    report.cancelled.push(id);
                }
            }
        }
        self.intent.lock().await.prune_finished();
        Ok(())
    }

    async fn description(&self, id: Uuid) -> String {
        self.intent
            .lock()
            .await
            .task(id)
            .map(|t| t.description.clone())
            .unwrap_or_default()
    }

    /// Morning briefing once per local day, then at most one prediction per
    /// (day, period, category). Returns the number of events delivered.
    async fn proactive(&mut self, now: DateTime<Utc>) -> usize {
        let local = now.with_timezone(&Local);
        let today = local.date_naive();
        let mut sent = 0;

        let (start, end) = self.settings.briefing_hours;
        if (start..end).contains(&local.hour()) && self.last_briefing != Some(today) {
            self.last_briefing = Some(today);
            let content = self.briefing().await;
            if self.emit(ProactiveEvent::Briefing { content }).await {
                sent += 1;
            }
        }

        let prediction = self.intent.lock().await.predict(now);
        if let Some(p) = prediction {
            let key = (today, DayPeriod::of(now).as_str(), p.category.clone());
            if self.announced.insert(key) {
                let event = ProactiveEvent::Prediction {
                    category: p.category,
                    confidence: p.confidence,
                };
                if self.emit(event).await {
                    sent += 1;
                }
            }
        }
        sent
    }

    async fn briefing(&self) -> String {
        let persona = self.persona.read();
        let waiting = self.intent.lock().await.waiting_tasks();
        let mut lines = vec!["Good morning.".to_owned()];
        match waiting.len() {
            0 => lines.push("Nothing is waiting on you today.".to_owned()),
            1 => lines.push(format!("One thing is waiting: {}.", waiting[0].description)),
            n => lines.push(format!("{n} things are waiting, starting with {}.", waiting[0].description)),
        }
        lines.push(format!("I'm feeling {} this morning.", persona.mood.as_str()));
        lines.join(" ")
    }

    async fn emit(&self, event: ProactiveEvent) -> bool {
        output::emit(&self.events, event, self.settings.collaborator_timeout).await
    }
}
