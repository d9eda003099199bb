use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::event::PipeId;

/// Bounded stdout/stderr captured up to the point an error was raised.
/// Kept independent of whatever the protocol itself chooses to retain.
#[derive(Debug, Clone, Default)]
pub struct PartialOutput {
    pub stdout_tail: Vec<u8>,
    pub stderr_tail: Vec<u8>,
}

/// Error kinds a run can fail with (spec §7). `Io`, `Timeout`, `Cancelled`,
/// and `Protocol` all carry a bounded [`PartialOutput`] so callers can report
/// something useful even when the child never produced a final result.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to start `{argv:?}`: {source}")]
    StartFailure {
        argv: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("I/O failure on {id}: {source}")]
    Io {
        id: PipeId,
        #[source]
        source: io::Error,
        partial: PartialOutput,
    },

    #[error("inactivity timeout elapsed for `{argv:?}`")]
    Timeout {
        argv: Vec<String>,
        exit_status: Option<ExitStatus>,
        partial: PartialOutput,
    },

    #[error("run for `{argv:?}` was cancelled")]
    Cancelled {
        argv: Vec<String>,
        exit_status: Option<ExitStatus>,
        partial: PartialOutput,
    },

    #[error("protocol callback failed: {message}")]
    Protocol { message: String, partial: PartialOutput },

    #[error("child `{argv:?}` exited with status {exit_status}")]
    ChildFailure {
        argv: Vec<String>,
        exit_status: ExitStatus,
        partial: PartialOutput,
    },
}

impl RunnerError {
    /// The bounded stdout/stderr capture attached to this error, if any.
    pub fn partial_output(&self) -> Option<&PartialOutput> {
        match self {
            RunnerError::StartFailure { .. } => None,
            RunnerError::Io { partial, .. }
            | RunnerError::Timeout { partial, .. }
            | RunnerError::Cancelled { partial, .. }
            | RunnerError::Protocol { partial, .. }
            | RunnerError::ChildFailure { partial, .. } => Some(partial),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
