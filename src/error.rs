use std::path::PathBuf;

use thiserror::Error;

/// Everything that stops the bot before or while it boots.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("TOKEN not found (looked in {} and the process environment)", path.display())]
    MissingToken { path: PathBuf },

    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: &'static str, value: String },

    #[error("failed to read env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("another instance is already running (pid {pid})")]
    DuplicateInstance { pid: u32 },

    #[error("failed to start the bot: {0:#}")]
    Startup(#[from] anyhow::Error),
}

impl BotError {
    pub fn exit_code(&self) -> u8 {
        match self {
            BotError::MissingToken { .. }
            | BotError::InvalidSetting { .. }
            | BotError::EnvFile(_)
            | BotError::DuplicateInstance { .. }
            | BotError::Startup(_) => 1,
        }
    }
}

/// How a polling session ended when nothing went wrong on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Interrupted by a signal.
    Stopped,
    /// Telegram reported another poller using the same token.
    Conflicted,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        0
    }
}
