use std::fmt;

use crate::detector::ProcessEvent;

/// State of the target process, as last observed through the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The debugger is attaching to (or launching) the target.
    Attaching,

    /// The target is executing.
    Running,

    /// The target is suspended (breakpoint, step, interrupt).
    Stopped,

    /// The target received a fatal signal or exception.
    ///
    /// Unlike other stops, the target cannot be resumed or evaluated
    /// against, but it remains inspectable.
    Crashed,

    /// The debugger detached from the target.
    Detached,

    /// The target (or the debugger subprocess) is gone.
    Exited,
}

impl SessionState {
    /// Returns whether no further transition can happen.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Detached | Self::Exited)
    }

    /// Returns whether post-mortem inspection (stack, memory, symbols) is
    /// possible.
    pub const fn is_inspectable(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// Computes the state following the given event.
    pub(crate) fn apply(self, event: &ProcessEvent) -> Self {
        if self.is_terminal() {
            return self;
        }

        match (self, event) {
            (_, ProcessEvent::Exited { .. }) => Self::Exited,
            (_, ProcessEvent::Detached { .. }) => Self::Detached,
            (_, ProcessEvent::Crashed { .. }) => Self::Crashed,
            // a crashed target cannot meaningfully run or stop again
            (Self::Crashed, _) => Self::Crashed,
            (_, ProcessEvent::Launched { .. } | ProcessEvent::Resumed { .. }) => Self::Running,
            (_, ProcessEvent::Stopped { .. }) => Self::Stopped,
            (state, ProcessEvent::AttachFailed { .. }) => state,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Attaching => "attaching",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
            Self::Detached => "detached",
            Self::Exited => "exited",
        };

        f.write_str(label)
    }
}
