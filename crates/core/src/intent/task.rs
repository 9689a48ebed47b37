use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TaskError;
use crate::types::{RecurringTask, Task, TaskStatus, Trigger};

/// Validate a task state transition.
///
/// Valid transitions:
///   pending ↔ scheduled
///   pending | scheduled → executing
///   executing → completed | failed
///   pending | scheduled | executing → cancelled (user cancel before commit)
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TaskError> {
    use TaskStatus::*;
    let valid = matches!(
        (from, to),
        (Pending, Scheduled)
            | (Scheduled, Pending)
            | (Pending, Executing)
            | (Scheduled, Executing)
            | (Executing, Completed)
            | (Executing, Failed)
            | (Pending, Cancelled)
            | (Scheduled, Cancelled)
            | (Executing, Cancelled)
    );
    if valid {
        Ok(())
    } else {
        Err(TaskError::InvalidTransition { from, to })
    }
}

/// Task store owned by the intent engine. Insertion order is creation order.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Vec<Task>,
    recurring: Vec<RecurringTask>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.push(task);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Move a task to `to`, enforcing the lifecycle.
    pub fn transition(&mut self, id: Uuid, to: TaskStatus) -> Result<&Task, TaskError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))?;
        validate_transition(task.status, to)?;
        tracing::debug!(task = %id, from = task.status.as_str(), to = to.as_str(), "task transition");
        task.status = to;
        task.updated_at = Utc::now();
        Ok(task)
    }

    /// Set a pending task's trigger time and mark it scheduled.
    pub fn schedule(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<&Task, TaskError> {
        self.transition(id, TaskStatus::Scheduled)?;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))?;
        task.trigger = Trigger::At(at);
        Ok(task)
    }

    /// Tasks still waiting to run, in creation order.
    pub fn waiting(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_waiting())
            .cloned()
            .collect()
    }

    pub fn due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.id)
            .collect()
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    /// Drop terminal tasks. Returns the number removed.
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.status.is_terminal());
        before - self.tasks.len()
    }

    pub fn add_recurring(&mut self, recurring: RecurringTask) -> Uuid {
        let id = recurring.id;
        self.recurring.push(recurring);
        id
    }

    pub fn recurring(&self) -> &[RecurringTask] {
        &self.recurring
    }

    /// Create an `At(now)` task for every recurring template that is due.
    /// A template whose previous instance is still waiting is skipped.
    pub fn materialize_recurring(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut created = Vec::new();
        for template in self.recurring.iter_mut().filter(|r| r.is_due(now)) {
            let pattern = format!("recurring:{}", template.id);
            if self.tasks.iter().any(|t| t.pattern == pattern && t.status.is_waiting()) {
                tracing::debug!(template = %template.id, "previous instance still waiting");
                continue;
            }
            let task = Task::new(
                template.description.clone(),
                template.category.clone(),
                pattern,
                1.0,
                Trigger::At(now),
            );
            template.last_run = Some(now);
            created.push(task.id);
            self.tasks.push(task);
        }
        created
    }

    /// Replace contents from persisted state.
    pub fn restore(&mut self, tasks: Vec<Task>, recurring: Vec<RecurringTask>) {
        self.tasks = tasks;
        self.recurring = recurring;
    }
}
