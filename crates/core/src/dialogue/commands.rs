use uuid::Uuid;

/// Token that confirms a destructive reset. Must match exactly.
pub const RESET_CONFIRMATION: &str = "CONFIRM RESET";

pub const RESET_WARNING: &str = "This will reset my personality to its defaults and erase every memory. \
     Type CONFIRM RESET to continue; anything else cancels.";

pub const RECOVERY_WARNING: &str = "I couldn't restore any saved state. Starting over resets my personality \
     and memories. Type CONFIRM RESET to start fresh; anything else keeps me paused.";

/// Commands the core exposes to the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemCommand {
    ResetPersona,
    Backup,
    Status,
    Accept,
    Override,
    Cancel(Uuid),
    Tasks,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("not a task id: {0}")]
    BadTaskId(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse a slash command. `None` when the line is not a command at all.
pub fn parse(line: &str) -> Option<Result<SystemCommand, CommandError>> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let parsed = match words.as_slice() {
        ["/system", "reset", "persona"] => Ok(SystemCommand::ResetPersona),
        ["/system", "backup"] => Ok(SystemCommand::Backup),
        ["/system", "status"] => Ok(SystemCommand::Status),
        ["/system", ..] => Err(CommandError::Usage("/system reset persona | backup | status")),
        ["/accept"] => Ok(SystemCommand::Accept),
        ["/override"] => Ok(SystemCommand::Override),
        ["/tasks"] => Ok(SystemCommand::Tasks),
        ["/cancel", id] => Uuid::parse_str(id)
            .map(SystemCommand::Cancel)
            .map_err(|_| CommandError::BadTaskId((*id).to_owned())),
        ["/cancel", ..] => Err(CommandError::Usage("/cancel <task-id>")),
        _ => Err(CommandError::Unknown(line.to_owned())),
    };
    Some(parsed)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SurfaceState {
    #[default]
    Idle,
    AwaitingResetConfirmation,
}

/// What the caller should do with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Not a command; route to the conversation path.
    PassThrough,
    Run(SystemCommand),
    /// Phase one of a reset: show the warning and wait.
    ConfirmReset,
    ResetConfirmed,
    /// Anything but the exact token. Nothing changes.
    ResetAborted,
    Invalid(CommandError),
}

/// Two-phase command state machine.
#[derive(Debug, Default)]
pub struct CommandSurface {
    state: SurfaceState,
}

impl CommandSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    /// Require confirmation before the next input is processed. Used when
    /// startup finds no usable state.
    pub fn await_confirmation(&mut self) {
        self.state = SurfaceState::AwaitingResetConfirmation;
    }

    pub fn handle(&mut self, line: &str) -> Step {
        if self.state == SurfaceState::AwaitingResetConfirmation {
            self.state = SurfaceState::Idle;
            let answer = line.trim_end_matches(['\r', '\n']);
            return if answer == RESET_CONFIRMATION {
                Step::ResetConfirmed
            } else {
                Step::ResetAborted
            };
        }
        match parse(line) {
            None => Step::PassThrough,
            Some(Ok(SystemCommand::ResetPersona)) => {
                self.state = SurfaceState::AwaitingResetConfirmation;
                Step::ConfirmReset
            }
            Some(Ok(cmd)) => Step::Run(cmd),
            Some(Err(e)) => Step::Invalid(e),
        }
    }
}
