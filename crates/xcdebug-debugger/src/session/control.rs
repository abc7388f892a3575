use super::observed::Observed;
use super::transport::Until;
use super::{DebuggerSession, quote};
use crate::breakpoint::{Breakpoint, BreakpointKind, BreakpointLocation};
use crate::parse;
use crate::protocol::CommandResult;

/// Granularity of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Step into calls.
    Into,

    /// Step over calls.
    Over,

    /// Step out of the current frame.
    Out,

    /// Step a single instruction.
    Instruction,
}

impl StepMode {
    const fn command(self) -> &'static str {
        match self {
            Self::Into => "thread step-in",
            Self::Over => "thread step-over",
            Self::Out => "thread step-out",
            Self::Instruction => "thread step-inst",
        }
    }
}

/// Accesses triggering a watchpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchKind {
    /// Writes only.
    #[default]
    Write,

    /// Reads only.
    Read,

    /// Reads and writes.
    ReadWrite,
}

impl WatchKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::ReadWrite => "read_write",
        }
    }
}

/// What a watchpoint watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Variable of the selected frame (e.g., `count`, `self.items`).
    Variable(String),

    /// Memory address.
    Address(u64),
}

/// Watchpoint operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchpointAction {
    /// Sets a watchpoint.
    Add {
        /// What to watch.
        target: WatchTarget,

        /// Accesses to watch.
        kind: WatchKind,

        /// Condition under which the watchpoint triggers.
        condition: Option<String>,
    },

    /// Deletes a watchpoint.
    Remove {
        /// ID of the watchpoint.
        id: u32,
    },

    /// Lists the watchpoints.
    List,
}

/// Result of a [WatchpointAction].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchpointResult {
    /// ID of the added or removed watchpoint.
    pub id: Option<u32>,

    /// Output of the debugger.
    pub result: CommandResult,
}

impl DebuggerSession {
    /// Resumes the target.
    ///
    /// A crashed target cannot be resumed.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn continue_execution(&self) -> crate::Result<CommandResult> {
        let mut inner = self.lock(Observed::require_not_crashed).await?;

        let command = "process continue";
        inner
            .transport
            .exchange(command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(command)
    }

    /// Suspends the running target.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn interrupt(&self) -> crate::Result<CommandResult> {
        let mut inner = self.lock(Observed::require_running).await?;

        let command = "process interrupt";
        inner
            .transport
            .exchange(command, Until::Stop, self.config.command_timeout)
            .await?
            .into_checked(command)
    }

    /// Steps the selected thread, returning once the target stopped again.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn step(&self, mode: StepMode) -> crate::Result<CommandResult> {
        let mut inner = self.lock(Observed::require_stopped).await?;

        let command = mode.command();
        inner
            .transport
            .exchange(command, Until::Stop, self.config.step_timeout)
            .await?
            .into_checked(command)
    }

    /// Sets a breakpoint, returning its ID.
    ///
    /// A location which cannot be resolved yet (e.g., in a library not
    /// loaded yet) still yields a pending breakpoint.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn set_breakpoint(&self, location: BreakpointLocation) -> crate::Result<u32> {
        let command = match &location {
            BreakpointLocation::Symbol(symbol) if !symbol.trim().is_empty() => {
                format!("breakpoint set --name {}", quote(symbol))
            }
            BreakpointLocation::FileLine { file, line } if !file.is_empty() && *line > 0 => {
                format!("breakpoint set --file {} --line {line}", quote(file))
            }
            BreakpointLocation::Watch { .. } => {
                return Err(crate::Error::InvalidParams(
                    "watchpoints are set with `manage_watchpoint`".to_owned(),
                ));
            }
            location => {
                return Err(crate::Error::InvalidParams(format!(
                    "invalid breakpoint location `{location}`"
                )));
            }
        };

        let mut inner = self.lock(Observed::require_alive).await?;

        let result = inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)?;

        let id = parse::parse_breakpoint_id(&result.output).ok_or_else(|| {
            crate::Error::CommandFailed {
                command,
                output: result.output.clone(),
            }
        })?;

        tracing::info!(id, %location, "breakpoint set");
        inner
            .breakpoints
            .insert(BreakpointKind::Breakpoint, id, location);

        Ok(id)
    }

    /// Deletes a breakpoint.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn delete_breakpoint(&self, id: u32) -> crate::Result<()> {
        let mut inner = self.lock(Observed::require_alive).await?;

        let command = format!("breakpoint delete {id}");
        inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)?;

        if inner
            .breakpoints
            .remove(BreakpointKind::Breakpoint, id)
            .is_none()
        {
            tracing::debug!(id, "breakpoint was not set through this session");
        }

        Ok(())
    }

    /// Returns the breakpoints and watchpoints set through this session,
    /// along with the debugger's own listing.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn list_breakpoints(&self) -> crate::Result<(Vec<Breakpoint>, CommandResult)> {
        let mut inner = self.lock(Observed::require_alive).await?;

        let command = "breakpoint list";
        let result = inner
            .transport
            .exchange(command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(command)?;

        Ok((inner.breakpoints.iter().cloned().collect(), result))
    }

    /// Adds, removes or lists watchpoints.
    ///
    /// Adding and removing require the target to be stopped.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn manage_watchpoint(
        &self,
        action: WatchpointAction,
    ) -> crate::Result<WatchpointResult> {
        match action {
            WatchpointAction::Add {
                target,
                kind,
                condition,
            } => self.add_watchpoint(target, kind, condition).await,

            WatchpointAction::Remove { id } => {
                let mut inner = self.lock(Observed::require_stopped).await?;

                let command = format!("watchpoint delete {id}");
                let result = inner
                    .transport
                    .exchange(&command, Until::Sentinel, self.config.command_timeout)
                    .await?
                    .into_checked(&command)?;

                inner.breakpoints.remove(BreakpointKind::Watchpoint, id);

                Ok(WatchpointResult {
                    id: Some(id),
                    result,
                })
            }

            WatchpointAction::List => {
                let mut inner = self.lock(Observed::require_alive).await?;

                let command = "watchpoint list";
                let result = inner
                    .transport
                    .exchange(command, Until::Sentinel, self.config.command_timeout)
                    .await?
                    .into_checked(command)?;

                Ok(WatchpointResult { id: None, result })
            }
        }
    }

    async fn add_watchpoint(
        &self,
        target: WatchTarget,
        kind: WatchKind,
        condition: Option<String>,
    ) -> crate::Result<WatchpointResult> {
        let (command, watched) = match &target {
            WatchTarget::Variable(name) => {
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(crate::Error::InvalidParams(format!(
                        "invalid variable name `{name}`"
                    )));
                }

                (
                    format!("watchpoint set variable -w {} {name}", kind.as_str()),
                    name.clone(),
                )
            }
            WatchTarget::Address(address) => (
                format!(
                    "watchpoint set expression -w {} -- {address:#x}",
                    kind.as_str()
                ),
                format!("{address:#x}"),
            ),
        };

        let mut inner = self.lock(Observed::require_stopped).await?;
        let timeout = self.config.command_timeout;

        let result = inner
            .transport
            .exchange(&command, Until::Sentinel, timeout)
            .await?
            .into_checked(&command)?;

        let id = parse::parse_watchpoint_id(&result.output).ok_or_else(|| {
            crate::Error::CommandFailed {
                command,
                output: result.output.clone(),
            }
        })?;

        inner.breakpoints.insert(
            BreakpointKind::Watchpoint,
            id,
            BreakpointLocation::Watch {
                target: watched,
                condition: None,
            },
        );

        if let Some(condition) = condition {
            let command = format!("watchpoint modify -c {} {id}", quote(&condition));
            inner
                .transport
                .exchange(&command, Until::Sentinel, timeout)
                .await?
                .into_checked(&command)?;

            inner.breakpoints.set_condition(id, condition);
        }

        tracing::info!(id, "watchpoint set");

        Ok(WatchpointResult {
            id: Some(id),
            result,
        })
    }
}
