use std::path::PathBuf;

use thiserror::Error;

pub type KtResult<T> = Result<T, KtError>;

#[derive(Debug, Error)]
pub enum KtError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("audio processing failure: {0}")]
    Audio(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("missing expected artifact at `{0}`")]
    MissingArtifact(PathBuf),
}

impl KtError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandFailed {
            command,
            status,
            stderr_suffix,
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix,
        }
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "KT-IO",
            Self::Json(_) => "KT-JSON",
            Self::CommandMissing { .. } => "KT-CMD-MISSING",
            Self::CommandFailed { .. } => "KT-CMD-FAILED",
            Self::CommandTimedOut { .. } => "KT-CMD-TIMEOUT",
            Self::InvalidInput(_) => "KT-INVALID-INPUT",
            Self::Audio(_) => "KT-AUDIO",
            Self::Transcription(_) => "KT-TRANSCRIPTION",
            Self::Unavailable(_) => "KT-UNAVAILABLE",
            Self::MissingArtifact(_) => "KT-MISSING-ARTIFACT",
        }
    }

    /// Whether this error means the input audio itself could not be used.
    ///
    /// Fatal-input errors abort the request before any transcription is
    /// attempted; the same variants raised inside an enhancement stage are
    /// instead absorbed by the orchestrator as a degraded (skipped) stage.
    #[must_use]
    pub const fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::CommandMissing { .. }
                | Self::CommandFailed { .. }
                | Self::CommandTimedOut { .. }
        )
    }
}
