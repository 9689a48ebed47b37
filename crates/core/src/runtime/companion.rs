use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use super::scheduler::{SchedulerSettings, ThoughtScheduler};
use super::shutdown::ShutdownGuard;
use crate::cognition::response::{self, GENERAL_TOPIC};
use crate::cognition::{IntentResult, ModulationParams, ResponseAction, ResponseComposer};
use crate::config::CompanionCfg;
use crate::context::CoreContext;
use crate::dialogue::commands::{RECOVERY_WARNING, RESET_WARNING};
use crate::dialogue::{CommandSurface, Step, SystemCommand, detect_keyword_feedback};
use crate::error::{CoreError, TaskError};
use crate::identity::{PersonaHandle, PersonaSettings};
use crate::intent::{Classification, IntentEngine, PlannedAction, SharedIntentEngine, run_task};
use crate::io::output::{self, EventReceiver};
use crate::memory::{MemoryFilter, MemoryStore};
use crate::persistence::{PersistenceGateway, RestoreOutcome, spawn_auto_backup};
use crate::types::{Feedback, InteractionSignal, MemoryRecord, SchedulerStatus, UserInput};

const EVENT_BUFFER: usize = 32;

/// How startup found its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootState {
    Restored(PathBuf),
    Fresh,
    /// No backup was usable and the user had already agreed to reset in that case.
    ResetAfterFailure,
    /// No backup was usable; waiting for the user to confirm a reset.
    AwaitingConfirmation,
}

/// What the interface layer shows for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    /// Present for composed responses; plain system replies carry none.
    pub modulation: Option<ModulationParams>,
}

impl Reply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            modulation: None,
        }
    }
}

/// A suggestion waiting for accept or override.
#[derive(Debug, Clone)]
enum Pending {
    /// Raised in conversation. The task is only created on accept.
    New {
        classification: Classification,
        description: String,
    },
    /// A stored task the scheduler surfaced.
    Existing { task_id: Uuid },
}

/// The engine as one handle: persona, memory, intent, composer, persistence
/// and the command surface, wired from one context.
pub struct Companion {
    cfg: CompanionCfg,
    ctx: CoreContext,
    persona: PersonaHandle,
    memory: MemoryStore,
    intent: SharedIntentEngine,
    composer: ResponseComposer,
    gateway: PersistenceGateway,
    commands: CommandSurface,
    pending: Option<Pending>,
    /// Pattern and category of the last automatic execution, for feedback.
    last_auto: Option<(String, String)>,
    scheduler_status: Option<watch::Receiver<SchedulerStatus>>,
    recovery_pending: bool,
}

impl Companion {
    /// Validate `cfg` and spawn the state workers. Must run inside a tokio runtime.
    pub fn new(cfg: CompanionCfg, ctx: CoreContext) -> Result<Self, CoreError> {
        cfg.validate()?;
        let persona = PersonaHandle::spawn(cfg.default_profile(), PersonaSettings::from_cfg(&cfg.persona));
        let memory = MemoryStore::spawn();
        let intent = IntentEngine::new(&cfg.intent)?.shared();
        let composer = ResponseComposer::new(memory.clone(), ctx.user_id.clone());
        let gateway = PersistenceGateway::new(
            &ctx,
            persona.clone(),
            memory.clone(),
            intent.clone(),
            cfg.retention(),
            cfg.system.max_backups,
        );
        Ok(Self {
            cfg,
            ctx,
            persona,
            memory,
            intent,
            composer,
            gateway,
            commands: CommandSurface::new(),
            pending: None,
            last_auto: None,
            scheduler_status: None,
            recovery_pending: false,
        })
    }

    pub fn persona(&self) -> &PersonaHandle {
        &self.persona
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn intent(&self) -> &SharedIntentEngine {
        &self.intent
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// False while startup recovery waits for confirmation.
    pub fn is_ready(&self) -> bool {
        !self.recovery_pending
    }

    /// Scheduler diagnostics, once `start_background` has run.
    pub fn scheduler_status(&self) -> Option<watch::Receiver<SchedulerStatus>> {
        self.scheduler_status.clone()
    }

    pub fn has_pending_suggestion(&self) -> bool {
        self.pending.is_some()
    }

    /// Restore the newest usable backup.
    pub async fn boot(&mut self) -> Result<BootState, CoreError> {
        let state = match self.gateway.restore_latest().await? {
            RestoreOutcome::Restored(path) => BootState::Restored(path),
            RestoreOutcome::Fresh => BootState::Fresh,
            RestoreOutcome::Unrecoverable(_) if self.gateway.reset_acknowledged() => {
                self.reset().await?;
                self.gateway.backup().await?;
                BootState::ResetAfterFailure
            }
            RestoreOutcome::Unrecoverable(_) => {
                self.recovery_pending = true;
                self.commands.await_confirmation();
                BootState::AwaitingConfirmation
            }
        };
        tracing::info!(state = ?state, user = %self.ctx.user_id, "companion booted");
        Ok(state)
    }

    /// Message to show right after `boot`, if any.
    pub fn boot_notice(&self) -> Option<&'static str> {
        self.recovery_pending.then_some(RECOVERY_WARNING)
    }

    /// Spawn the thought scheduler and, when enabled, the auto backup task.
    /// Both are tracked by `guard`. Returns the proactive event stream.
    pub fn start_background(&mut self, guard: &mut ShutdownGuard) -> EventReceiver {
        let (tx, rx) = output::channel(EVENT_BUFFER);
        let (scheduler, status) = ThoughtScheduler::new(
            self.ctx.clone(),
            self.persona.clone(),
            self.memory.clone(),
            self.intent.clone(),
            tx,
            SchedulerSettings::from_cfg(&self.cfg),
        );
        self.scheduler_status = Some(status);
        guard.track("scheduler", tokio::spawn(scheduler.run(guard.token())));
        if self.cfg.system.auto_backup {
            guard.track(
                "auto_backup",
                spawn_auto_backup(self.gateway.clone(), self.cfg.backup_interval(), guard.token()),
            );
        }
        rx
    }

    /// Make a scheduler-surfaced task the one `/accept` and `/override` answer.
    pub fn note_suggestion(&mut self, task_id: Uuid) {
        self.pending = Some(Pending::Existing { task_id });
    }

    /// Handle one input line. Failures become a plain message; detail goes to the log.
    pub async fn handle(&mut self, input: UserInput) -> Reply {
        match self.dispatch(input).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                Reply::text(e.user_message())
            }
        }
    }

    async fn dispatch(&mut self, input: UserInput) -> Result<Reply, CoreError> {
        let step = self.commands.handle(&input.text);

        if self.recovery_pending {
            if step != Step::ResetConfirmed {
                self.commands.await_confirmation();
                return Ok(Reply::text(RECOVERY_WARNING));
            }
            self.gateway.acknowledge_reset().await?;
            self.reset().await?;
            self.gateway.backup().await?;
            self.recovery_pending = false;
            return Ok(Reply::text("Starting fresh. Nice to meet you."));
        }

        match step {
            Step::PassThrough => {
                if self.pending.is_some()
                    && input.candidates.is_empty()
                    && let Some(feedback) = detect_keyword_feedback(&input.text)
                {
                    return self.feedback(feedback).await;
                }
                self.interact(input).await
            }
            Step::ConfirmReset => Ok(Reply::text(RESET_WARNING)),
            Step::ResetConfirmed => {
                self.reset().await?;
                Ok(Reply::text(
                    "Reset complete. My personality is back to its defaults and my memories are gone.",
                ))
            }
            Step::ResetAborted => Ok(Reply::text("Reset cancelled. Nothing changed.")),
            Step::Run(cmd) => self.run_command(cmd).await,
            Step::Invalid(e) => Ok(Reply::text(e.to_string())),
        }
    }

    /// Foreground path: classify, act, compose, record, update persona.
    async fn interact(&mut self, input: UserInput) -> Result<Reply, CoreError> {
        let persona = self.persona.read();
        let classification = self.intent.lock().await.classify(&input.candidates, &persona);
        let description = describe(&input.text);

        let action = match classification.action {
            PlannedAction::Execute => self.execute_now(&classification, description).await?,
            PlannedAction::Suggest => self.suggest(classification.clone(), description),
            PlannedAction::Nothing => ResponseAction::Conversation,
        };

        let topic = input
            .topic
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| (!classification.category.is_empty()).then(|| classification.category.clone()))
            .unwrap_or_else(|| GENERAL_TOPIC.to_owned());
        let context: Vec<MemoryRecord> = self
            .memory
            .query(MemoryFilter::default().topic(topic.clone()))
            .iter()
            .take(self.cfg.memory.context_limit)
            .cloned()
            .collect();

        let result = IntentResult {
            input: input.text,
            topic,
            action,
        };
        let response = self.composer.compose(&result, &persona, &context).await?;
        self.persona.apply_interaction_signal(input.signal).await?;
        self.intent.lock().await.observe(&classification.category, Utc::now());

        Ok(Reply {
            content: response.content,
            modulation: Some(response.modulation),
        })
    }

    async fn execute_now(
        &mut self,
        classification: &Classification,
        description: String,
    ) -> Result<ResponseAction, CoreError> {
        let timeout = self.cfg.collaborator_timeout();
        if self.ctx.auto_execution_permitted(timeout).await != Some(true) {
            tracing::info!(category = %classification.category, "automatic execution not permitted, suggesting");
            return Ok(self.suggest(classification.clone(), description));
        }
        let id = self.intent.lock().await.open_task(classification, description.clone());
        let status = run_task(&self.intent, self.ctx.executor.as_ref(), id, timeout).await?;
        self.pending = None;
        self.last_auto = Some((classification.pattern.clone(), classification.category.clone()));
        Ok(ResponseAction::Executed { description, status })
    }

    fn suggest(&mut self, classification: Classification, description: String) -> ResponseAction {
        self.pending = Some(Pending::New {
            classification,
            description: description.clone(),
        });
        ResponseAction::Suggested { description }
    }

    /// Answer the pending suggestion, or the last automatic action.
    async fn feedback(&mut self, feedback: Feedback) -> Result<Reply, CoreError> {
        let timeout = self.cfg.collaborator_timeout();
        let (pattern, category, text) = match self.pending.take() {
            Some(Pending::New {
                classification,
                description,
            }) => {
                let text = match feedback {
                    Feedback::Accept => {
                        let id = self.intent.lock().await.open_task(&classification, description.clone());
                        let status = run_task(&self.intent, self.ctx.executor.as_ref(), id, timeout).await?;
                        response::outcome(&description, status)
                    }
                    Feedback::Override => "Okay, I won't.".to_owned(),
                };
                (classification.pattern, classification.category, text)
            }
            Some(Pending::Existing { task_id }) => {
                let task = self
                    .intent
                    .lock()
                    .await
                    .task(task_id)
                    .cloned()
                    .ok_or(TaskError::NotFound(task_id))?;
                let text = match feedback {
                    Feedback::Accept => {
                        let status = run_task(&self.intent, self.ctx.executor.as_ref(), task_id, timeout).await?;
                        response::outcome(&task.description, status)
                    }
                    Feedback::Override => {
                        self.intent.lock().await.cancel(task_id)?;
                        format!("Okay, I've dropped it: {}.", task.description)
                    }
                };
                (task.pattern, task.category, text)
            }
            None => match self.last_auto.take() {
                Some((pattern, category)) => {
                    let text = match feedback {
                        Feedback::Accept => "Glad that helped.",
                        Feedback::Override => "Understood. I'll keep that in mind.",
                    };
                    (pattern, category, text.to_owned())
                }
                None => return Ok(Reply::text("There's nothing waiting for an answer.")),
            },
        };

        self.intent.lock().await.reinforce(&pattern, &category, feedback);
        self.persona
            .apply_interaction_signal(InteractionSignal::feedback(feedback))
            .await?;
        Ok(Reply::text(text))
    }

    async fn run_command(&mut self, cmd: SystemCommand) -> Result<Reply, CoreError> {
        match cmd {
            SystemCommand::ResetPersona => unreachable!("reset persona is answered by Step::ConfirmReset"),
            SystemCommand::Backup => {
                let path = self.gateway.backup().await?;
                Ok(Reply::text(format!("Backup saved to {}", path.display())))
            }
            SystemCommand::Status => Ok(Reply::text(self.status_report().await)),
            SystemCommand::Accept => self.feedback(Feedback::Accept).await,
            SystemCommand::Override => self.feedback(Feedback::Override).await,
            SystemCommand::Cancel(id) => {
                self.intent.lock().await.cancel(id)?;
                if matches!(self.pending, Some(Pending::Existing { task_id }) if task_id == id) {
                    self.pending = None;
                }
                Ok(Reply::text("Cancelled."))
            }
            SystemCommand::Tasks => {
                let waiting = self.intent.lock().await.waiting_tasks();
                if waiting.is_empty() {
                    return Ok(Reply::text("No tasks are waiting."));
                }
                let lines: Vec<String> = waiting
                    .iter()
                    .map(|t| format!("{}  {:<9}  {}", t.id, t.status.as_str(), t.description))
                    .collect();
                Ok(Reply::text(lines.join("\n")))
            }
        }
    }

    /// Diagnostic report for `/system status`.
    pub async fn status_report(&self) -> String {
        let now = Utc::now();
        let persona = self.persona.read();
        let waiting = self.intent.lock().await.waiting_tasks().len();
        let mut lines = Vec::new();

        match &self.scheduler_status {
            Some(rx) => {
                let s = rx.borrow().clone();
                let uptime = s.uptime(now).map_or_else(|| "-".to_owned(), |d| {
                    let secs = d.num_seconds().max(0);
                    format!("{}h {}m {}s", secs / 3600, secs % 3600 / 60, secs % 60)
                });
                let last = s
                    .last_success_at
                    .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
                lines.push(format!(
                    "scheduler: {} | uptime {uptime} | last cycle {last} | {} ok, {} failed",
                    if s.running { "running" } else { "stopped" },
                    s.cycles_completed,
                    s.cycles_failed
                ));
            }
            None => lines.push("scheduler: not started".to_owned()),
        }
        lines.push(format!(
            "mood: {} | bond {:.2} | trust {:.2}",
            persona.mood.as_str(),
            persona.bond,
            persona.trust
        ));
        lines.push(format!("memories: {} | waiting tasks: {waiting}", self.memory.len()));
        lines.join("\n")
    }

    /// Back to configured defaults with an empty memory. Tasks are kept.
    async fn reset(&mut self) -> Result<(), CoreError> {
        self.persona.replace(self.cfg.default_profile()).await?;
        self.memory.clear().await?;
        self.pending = None;
        self.last_auto = None;
        tracing::warn!("persona reset to defaults, memory cleared");
        Ok(())
    }

    /// Stop background tasks within the grace period, then write a final
    /// backup. Skips the backup while recovery is unconfirmed.
    pub async fn shutdown(&self, guard: ShutdownGuard) -> Result<Option<PathBuf>, CoreError> {
        let aborted = guard.drain(self.cfg.shutdown_grace()).await;
        if aborted > 0 {
            tracing::warn!(aborted, "background tasks aborted at shutdown");
        }
        if self.recovery_pending {
            return Ok(None);
        }
        let path = self.gateway.backup().await?;
        tracing::info!(path = %path.display(), "final backup written");
        Ok(Some(path))
    }
}

/// Task description from the raw utterance: trimmed, trailing punctuation dropped.
fn describe(text: &str) -> String {
    text.trim().trim_end_matches(['.', '!', '?']).trim_end().to_owned()
}
