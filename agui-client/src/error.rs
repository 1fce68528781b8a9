//! Fatal run error types.
//!
//! Only errors that abort a run live here. Patch failures, unknown-id
//! references, and subscriber panics are recovered locally by the apply
//! engine (logged, event dropped, run continues).

use thiserror::Error;

/// Error that terminates the current run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Verifier-detected structural error: unexpected start/end, duplicate
    /// run start, reference to an id that never opened.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Normalizer-detected error, e.g. a first chunk without its required ids.
    #[error("malformed stream: {0}")]
    MalformedStream(String),

    /// The agent reported failure via a RUN_ERROR event.
    #[error("run failed: {message}")]
    RunFailed {
        message: String,
        code: Option<String>,
    },

    /// The transport failed outside of the event protocol.
    #[error("transport error: {0}")]
    Transport(String),

    /// The agent does not implement the persistent subscribe channel.
    #[error("connect is not implemented for this agent")]
    NotImplemented,
}

impl RunnerError {
    /// Error code when the failure carried one (RUN_ERROR events only).
    pub fn code(&self) -> Option<&str> {
        match self {
            RunnerError::RunFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
