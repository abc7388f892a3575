mod control;
mod inspect;
mod observed;
mod transport;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, watch};

pub use self::control::{StepMode, WatchKind, WatchTarget, WatchpointAction, WatchpointResult};
pub use self::inspect::{
    Backtrace, MemoryFormat, Platform, ProcessStatus, SymbolQuery, ViewHierarchy,
};
use self::observed::Observed;
use self::transport::{Transport, Until};
use crate::breakpoint::BreakpointTable;
use crate::detector::{CrashReport, StopInfo};
use crate::protocol::CommandResult;
use crate::state::SessionState;
use crate::{Command, SessionConfig};

/// Debugging session of a single target process, driven through its own
/// debugger subprocess.
///
/// Operations may be called concurrently from many tasks: they are
/// serialized on the session, while the target state (see
/// [state](Self::state)) can be queried at any time without waiting for
/// the operation in flight.
#[derive(Debug)]
pub struct DebuggerSession {
    pid: u64,
    config: SessionConfig,
    inner: Mutex<Inner>,
    observed: Arc<watch::Sender<Observed>>,
}

#[derive(Debug)]
struct Inner {
    transport: Transport,
    breakpoints: BreakpointTable,
}

impl DebuggerSession {
    /// Attaches to a running process.
    ///
    /// The target is stopped once attached.
    #[tracing::instrument(name = "Attach", skip(config))]
    pub async fn attach(config: SessionConfig, pid: u64) -> crate::Result<Self> {
        let (mut transport, observed) = start(&config, Some(pid)).await?;

        let command = format!("process attach --pid {pid}");
        let failure = match transport
            .exchange(&command, Until::Stop, config.attach_timeout)
            .await
        {
            Ok(result) if result.succeeded && is_attached(&observed) => None,
            Ok(result) => Some(crate::Error::NotFound(format!(
                "cannot attach to process {pid}: {}",
                result.output
            ))),
            Err(e @ crate::Error::Timeout { .. }) => Some(e),
            Err(e) => Some(crate::Error::NotFound(format!(
                "cannot attach to process {pid}: {e}"
            ))),
        };

        if let Some(e) = failure {
            transport.shutdown().await;
            return Err(e);
        }

        tracing::info!("attached");

        Ok(Self::new(pid, config, transport, observed))
    }

    /// Waits for a process named `process_name` to appear while `launch`
    /// runs, and attaches to it.
    ///
    /// The target is stopped once attached. If no such process appears
    /// within the launch timeout,
    /// [LaunchFailure](crate::Error::LaunchFailure) is returned.
    #[tracing::instrument(name = "Attach", skip(config, launch))]
    pub async fn attach_waiting_for<F, T>(
        config: SessionConfig,
        process_name: &str,
        launch: F,
    ) -> crate::Result<(Self, T)>
    where
        F: Future<Output = crate::Result<T>>,
    {
        let (mut transport, observed) = start(&config, None).await?;

        let command = format!("process attach --name {} --waitfor", quote(process_name));
        let waited = tokio::try_join!(
            transport.exchange(&command, Until::Stop, config.launch_timeout),
            launch
        );

        let (result, launched) = match waited {
            Ok(waited) => waited,
            Err(e) => {
                transport.shutdown().await;

                return Err(match e {
                    crate::Error::Timeout { timeout, .. } => {
                        crate::Error::LaunchFailure(format!(
                            "no process named `{process_name}` appeared within {timeout:?}"
                        ))
                    }
                    e => e,
                });
            }
        };

        let pid = observed.borrow().pid;
        match pid {
            Some(pid) if result.succeeded && is_attached(&observed) => {
                tracing::info!(pid, "attached");
                Ok((Self::new(pid, config, transport, observed), launched))
            }
            _ => {
                transport.shutdown().await;
                Err(crate::Error::LaunchFailure(format!(
                    "cannot attach to `{process_name}`: {}",
                    result.output
                )))
            }
        }
    }

    /// Launches `command` under the debugger.
    ///
    /// If `stop_at_entry` is set, the target is stopped before executing
    /// its first instruction. Otherwise it is running.
    #[tracing::instrument(
        name = "Launch",
        skip(config, command),
        fields(program = %command.program.display())
    )]
    pub async fn launch_and_attach(
        config: SessionConfig,
        command: &Command,
        stop_at_entry: bool,
    ) -> crate::Result<(Self, CommandResult)> {
        let (mut transport, observed) = start(&config, None).await?;

        let launched = launch(&mut transport, &config, command, stop_at_entry).await;
        let pid = observed.borrow().pid;

        match (launched, pid) {
            (Ok(result), Some(pid)) => {
                tracing::info!(pid, "launched");
                Ok((Self::new(pid, config, transport, observed), result))
            }
            (Ok(result), None) => {
                transport.shutdown().await;
                Err(crate::Error::LaunchFailure(format!(
                    "no process was launched: {}",
                    result.output
                )))
            }
            (Err(e), _) => {
                transport.shutdown().await;
                Err(e)
            }
        }
    }

    fn new(
        pid: u64,
        config: SessionConfig,
        transport: Transport,
        observed: Arc<watch::Sender<Observed>>,
    ) -> Self {
        Self {
            pid,
            config,
            inner: Mutex::new(Inner {
                transport,
                breakpoints: BreakpointTable::new(),
            }),
            observed,
        }
    }

    /// Process ID of the target.
    pub const fn pid(&self) -> u64 {
        self.pid
    }

    /// Configuration of this session.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the last observed state of the target.
    pub fn state(&self) -> SessionState {
        self.observed.borrow().state
    }

    /// Returns the last non-fatal stop of the target, if any.
    pub fn last_stop(&self) -> Option<StopInfo> {
        self.observed.borrow().last_stop.clone()
    }

    /// Returns the exit status of the target, if it exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.observed.borrow().exit_code
    }

    /// Returns the crash of the target, if it crashed.
    ///
    /// The report is kept after the target is detached from or exits.
    pub fn crash_warning(&self) -> Option<CrashReport> {
        self.observed.borrow().crash.clone()
    }

    /// Fails unless the target is stopped.
    ///
    /// This only inspects the last observed state, so it never waits on an
    /// operation in flight.
    pub fn require_stopped(&self) -> crate::Result<()> {
        self.observed.borrow().require_stopped()
    }

    /// Waits for the target to leave the running state (e.g., after
    /// [continue_execution](Self::continue_execution) until a breakpoint
    /// is hit), returning the new state.
    pub async fn wait_until_stopped(&self, timeout: Duration) -> crate::Result<SessionState> {
        let mut rx = self.observed.subscribe();

        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|observed| {
                !matches!(
                    observed.state,
                    SessionState::Running | SessionState::Attaching
                )
            }),
        )
        .await;

        match waited {
            Ok(Ok(observed)) => Ok(observed.state),
            // the sender lives as long as the session
            Ok(Err(_)) => Ok(self.state()),
            Err(_) => Err(crate::Error::Timeout {
                command: "<wait for stop>".to_owned(),
                timeout,
                partial: String::new(),
            }),
        }
    }

    /// Detaches from the target, leaving it running, and ends the debugger
    /// subprocess.
    ///
    /// This is a no-op if the session already ended.
    #[tracing::instrument(name = "Detach", skip(self), fields(pid = self.pid))]
    pub async fn detach(&self) -> crate::Result<()> {
        self.end("process detach", SessionState::Detached).await
    }

    /// Kills the target and ends the debugger subprocess.
    ///
    /// This is a no-op if the session already ended.
    #[tracing::instrument(name = "Terminate", skip(self), fields(pid = self.pid))]
    pub async fn terminate(&self) -> crate::Result<()> {
        self.end("process kill", SessionState::Exited).await
    }

    async fn end(&self, command: &str, terminal: SessionState) -> crate::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.breakpoints.clear();

        if inner.transport.is_closed() {
            return Ok(());
        }

        if !self.state().is_terminal() {
            match inner
                .transport
                .exchange(command, Until::Sentinel, self.config.command_timeout)
                .await
            {
                Ok(result) if !result.succeeded => {
                    tracing::warn!(command, output = %result.output, "command failed");
                }
                Ok(_) => (),
                Err(e) => tracing::warn!(command, error = %e, "command failed"),
            }
        }

        inner.transport.shutdown().await;
        self.observed
            .send_modify(|observed| observed.close(terminal));

        tracing::info!(state = %self.state(), "session ended");
        Ok(())
    }

    /// Runs a raw debugger command.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn execute(&self, raw: &str) -> crate::Result<CommandResult> {
        let mut inner = self.lock(Observed::require_alive).await?;

        inner
            .transport
            .exchange(raw, Until::Sentinel, self.config.command_timeout)
            .await
    }

    /// Acquires the session, checking its state both before (so refusals
    /// are immediate) and after waiting for the operation in flight.
    async fn lock(
        &self,
        check: fn(&Observed) -> crate::Result<()>,
    ) -> crate::Result<MutexGuard<'_, Inner>> {
        check(&self.observed.borrow())?;
        let inner = self.inner.lock().await;
        check(&self.observed.borrow())?;

        Ok(inner)
    }
}

/// Spawns and configures a debugger subprocess.
async fn start(
    config: &SessionConfig,
    pid: Option<u64>,
) -> crate::Result<(Transport, Arc<watch::Sender<Observed>>)> {
    let observed = Arc::new(watch::Sender::new(Observed::new(pid)));
    let mut transport = Transport::spawn(&config.debugger, Arc::clone(&observed)).await?;

    if let Err(e) = transport.initialize(config.command_timeout).await {
        transport.shutdown().await;
        return Err(e);
    }

    Ok((transport, observed))
}

/// Creates the target and launches it.
async fn launch(
    transport: &mut Transport,
    config: &SessionConfig,
    command: &Command,
    stop_at_entry: bool,
) -> crate::Result<CommandResult> {
    let mut setup = vec![format!("target create {}", quote_path(&command.program))];

    let vars: Vec<_> = command
        .env
        .explicit_vars()
        .map(|(key, val)| quote(&format!("{key}={val}")))
        .collect();
    if !vars.is_empty() {
        setup.push(format!("settings set target.env-vars {}", vars.join(" ")));
    }

    let removed: Vec<_> = command.env.removed_vars().map(quote).collect();
    if !removed.is_empty() {
        setup.push(format!(
            "settings set target.unset-env-vars {}",
            removed.join(" ")
        ));
    }

    if !command.env.inherits() {
        setup.push("settings set target.inherit-env false".to_owned());
    }

    for line in &setup {
        transport
            .exchange(line, Until::Sentinel, config.command_timeout)
            .await?
            .into_checked(line)
            .map_err(into_launch_failure)?;
    }

    let mut line = "process launch".to_owned();
    if stop_at_entry {
        line.push_str(" --stop-at-entry");
    }
    if let Some(dir) = &command.current_dir {
        line.push_str(" --working-dir ");
        line.push_str(&quote_path(dir));
    }
    if !command.args.is_empty() {
        line.push_str(" --");
        for arg in &command.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
    }

    let until = if stop_at_entry {
        Until::Stop
    } else {
        Until::Launch
    };

    transport
        .exchange(&line, until, config.launch_timeout)
        .await?
        .into_checked(&line)
        .map_err(into_launch_failure)
}

fn into_launch_failure(e: crate::Error) -> crate::Error {
    match e {
        crate::Error::CommandFailed { command, output } => {
            crate::Error::LaunchFailure(format!("`{command}`: {output}"))
        }
        e => e,
    }
}

fn is_attached(observed: &watch::Sender<Observed>) -> bool {
    let state = observed.borrow().state;
    state != SessionState::Attaching && !state.is_terminal()
}

/// Quotes a command argument.
fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');

    for c in arg.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }

    quoted.push('"');
    quoted
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::quote;

    #[test]
    fn arguments_are_quoted() {
        assert_eq!(quote("main.swift"), r#""main.swift""#);
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote(r"C:\dir"), r#""C:\\dir""#);
    }
}
