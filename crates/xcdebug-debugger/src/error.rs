use std::time::Duration;

use crate::state::SessionState;

/// Error type of this crate.
///
/// Transport-level failures of the debugger subprocess never escape as
/// [std::io::Error]: they are reported as [Error::ToolFailure].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The caller did not provide a resolvable target, or gave malformed
    /// input.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// No session handles the given identifier or process ID.
    #[error("not found: {0}")]
    NotFound(String),

    /// The debugger did not answer within the configured bound.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Command which was in flight.
        command: String,

        /// Bound which elapsed.
        timeout: Duration,

        /// Output received before the bound elapsed.
        partial: String,
    },

    /// The target has crashed, so the operation was refused.
    #[error("process {pid} has crashed ({reason})")]
    Crashed {
        /// Process ID of the crashed target.
        pid: u64,

        /// Stop reason reported by the debugger.
        reason: String,
    },

    /// The operation requires the target to be stopped.
    #[error("process is {state}, not stopped")]
    NotStopped {
        /// State the target was in.
        state: SessionState,
    },

    /// The target application could not be built, resolved, or launched.
    #[error("launch failed: {0}")]
    LaunchFailure(String),

    /// An external utility (or the debugger subprocess itself) failed.
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailure {
        /// Name of the utility.
        tool: String,

        /// Exit status, or a short description of the failure.
        status: String,

        /// Diagnostics emitted by the utility.
        stderr: String,
    },

    /// The debugger rejected a typed operation.
    #[error("`{command}` failed: {output}")]
    CommandFailed {
        /// Command which was rejected.
        command: String,

        /// Output of the debugger.
        output: String,
    },
}

impl Error {
    /// Wraps an I/O failure of the debugger subprocess.
    pub(crate) fn debugger_io(e: std::io::Error) -> Self {
        Self::ToolFailure {
            tool: "lldb".to_owned(),
            status: "i/o error".to_owned(),
            stderr: e.to_string(),
        }
    }

    /// Returns whether this error is a [Timeout](Self::Timeout).
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns whether this error is a [Crashed](Self::Crashed) refusal.
    pub const fn is_crashed(&self) -> bool {
        matches!(self, Self::Crashed { .. })
    }
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
