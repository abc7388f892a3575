use crate::detector::{CrashReport, ProcessEvent, StopInfo};
use crate::state::SessionState;

/// Target state as last observed in the debugger output.
///
/// Kept up to date by the output reader task, independently of any
/// command in flight.
#[derive(Debug, Clone)]
pub(crate) struct Observed {
    pub state: SessionState,
    pub pid: Option<u64>,
    pub last_stop: Option<StopInfo>,
    pub crash: Option<CrashReport>,
    pub exit_code: Option<i32>,
}

impl Observed {
    pub fn new(pid: Option<u64>) -> Self {
        Self {
            state: SessionState::Attaching,
            pid,
            last_stop: None,
            crash: None,
            exit_code: None,
        }
    }

    pub fn apply(&mut self, event: &ProcessEvent) {
        let previous = self.state;
        if previous.is_terminal() {
            return;
        }

        self.state = previous.apply(event);

        if self.pid.is_none() {
            self.pid = event.pid();
        }

        match event {
            ProcessEvent::Stopped { stop, .. } => self.last_stop = Some(stop.clone()),
            ProcessEvent::Crashed { pid, crash } => {
                tracing::warn!(pid, reason = %crash.reason, "target crashed");
                self.crash.get_or_insert_with(|| crash.clone());
            }
            ProcessEvent::Exited { code, .. } => self.exit_code = Some(*code),
            ProcessEvent::AttachFailed { message } => {
                tracing::warn!(error = %message, "attach failed");
            }
            ProcessEvent::Launched { .. }
            | ProcessEvent::Resumed { .. }
            | ProcessEvent::Detached { .. } => (),
        }

        if previous != self.state {
            tracing::info!(pid = ?self.pid, from = %previous, to = %self.state, "state change");
        }
    }

    /// Marks the target as gone, unless it already is.
    pub fn close(&mut self, terminal: SessionState) {
        if !self.state.is_terminal() {
            tracing::info!(pid = ?self.pid, from = %self.state, to = %terminal, "state change");
            self.state = terminal;
        }
    }

    fn pid_label(&self) -> String {
        self.pid
            .map_or_else(|| "target".to_owned(), |pid| format!("process {pid}"))
    }

    fn gone(&self) -> crate::Error {
        crate::Error::NotFound(format!("{} is {}", self.pid_label(), self.state))
    }

    fn crashed(&self) -> crate::Error {
        crate::Error::Crashed {
            pid: self.pid.unwrap_or_default(),
            reason: self
                .crash
                .as_ref()
                .map_or_else(|| "unknown".to_owned(), |crash| crash.reason.clone()),
        }
    }

    /// Fails if the target is detached or exited.
    pub fn require_alive(&self) -> crate::Result<()> {
        if self.state.is_terminal() {
            Err(self.gone())
        } else {
            Ok(())
        }
    }

    /// Fails if the target is gone or crashed.
    pub fn require_not_crashed(&self) -> crate::Result<()> {
        self.require_alive()?;

        if self.state == SessionState::Crashed {
            Err(self.crashed())
        } else {
            Ok(())
        }
    }

    /// Fails unless the target is stopped (and not crashed).
    pub fn require_stopped(&self) -> crate::Result<()> {
        self.require_not_crashed()?;

        if self.state == SessionState::Stopped {
            Ok(())
        } else {
            Err(crate::Error::NotStopped { state: self.state })
        }
    }

    /// Fails unless the target is stopped or crashed.
    pub fn require_inspectable(&self) -> crate::Result<()> {
        self.require_alive()?;

        if self.state.is_inspectable() {
            Ok(())
        } else {
            Err(crate::Error::NotStopped { state: self.state })
        }
    }

    /// Fails unless the target is running.
    pub fn require_running(&self) -> crate::Result<()> {
        self.require_alive()?;

        if self.state == SessionState::Running {
            Ok(())
        } else {
            Err(crate::Error::InvalidParams(format!(
                "{} is {}, not running",
                self.pid_label(),
                self.state
            )))
        }
    }
}
