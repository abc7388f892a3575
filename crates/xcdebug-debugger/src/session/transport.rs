use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use nix::fcntl::{FcntlArg, FdFlag};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;

use super::observed::Observed;
use crate::Command;
use crate::detector::{ProcessEvent, StateScanner};
use crate::protocol::{self, CommandProtocol, CommandResult, LineDecoder, ReadProgress};
use crate::state::SessionState;

/// Commands configuring the debugger for machine consumption.
const INIT_COMMANDS: &[&str] = &[
    "settings set auto-confirm true",
    "settings set use-color false",
    "script lldb.debugger.SetAsync(True)",
];

/// Bound on the debugger subprocess to exit after `quit`.
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// Line of debugger output, with the process events it carries.
#[derive(Debug)]
struct Incoming {
    line: String,
    events: Vec<ProcessEvent>,
}

/// How far to read the response of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Until {
    /// Up to the sentinel.
    Sentinel,

    /// Past the sentinel, until the target stops, crashes, or goes away.
    Stop,

    /// Past the sentinel, until the target process is known.
    Launch,
}

impl Until {
    fn is_reached_by(self, event: &ProcessEvent) -> bool {
        match self {
            Self::Sentinel => true,
            Self::Stop => event.ends_stop_wait(),
            Self::Launch => event.pid().is_some(),
        }
    }
}

/// Pipes to a debugger subprocess.
#[derive(Debug)]
pub(crate) struct Transport {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::UnboundedReceiver<Incoming>,
    protocol: CommandProtocol,

    /// Whether a command was abandoned before its sentinel was read.
    needs_resync: bool,

    closed: bool,
}

impl Transport {
    /// Spawns the debugger subprocess, with its standard output and error
    /// merged, and starts reading its output.
    pub async fn spawn(
        debugger: &Command,
        observed: Arc<watch::Sender<Observed>>,
    ) -> crate::Result<Self> {
        let (read_end, write_end) =
            nix::unistd::pipe().map_err(|e| crate::Error::debugger_io(e.into()))?;
        set_cloexec(&read_end)?;
        set_cloexec(&write_end)?;

        let mut process = debugger.to_process();
        process
            .stdin(Stdio::piped())
            .stdout(Stdio::from(
                write_end.try_clone().map_err(crate::Error::debugger_io)?,
            ))
            .stderr(Stdio::from(write_end))
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(|e| crate::Error::ToolFailure {
            tool: debugger.program.display().to_string(),
            status: "failed to spawn".to_owned(),
            stderr: e.to_string(),
        })?;

        // closes our copies of the write end, for EOF to be seen
        drop(process);

        let stdin = child.stdin.take().ok_or_else(|| crate::Error::ToolFailure {
            tool: debugger.program.display().to_string(),
            status: "no standard input".to_owned(),
            stderr: String::new(),
        })?;

        let receiver =
            pipe::Receiver::from_owned_fd(read_end).map_err(crate::Error::debugger_io)?;
        let (lines_tx, lines) = mpsc::unbounded_channel();

        tokio::spawn(read_output(receiver, observed, lines_tx));

        tracing::debug!(pid = ?child.id(), "debugger spawned");

        Ok(Self {
            child,
            stdin,
            lines,
            protocol: CommandProtocol::new(),
            needs_resync: false,
            closed: false,
        })
    }

    /// Configures the freshly spawned debugger.
    pub async fn initialize(&mut self, timeout: Duration) -> crate::Result<()> {
        for command in INIT_COMMANDS {
            self.exchange(command, Until::Sentinel, timeout)
                .await?
                .into_checked(command)?;
        }

        Ok(())
    }

    /// Writes a command and reads its response.
    ///
    /// The whole exchange is bounded by `timeout`. If it elapses (or if the
    /// returned future is dropped), the next exchange first re-synchronizes
    /// with the debugger output.
    pub async fn exchange(
        &mut self,
        command: &str,
        until: Until,
        timeout: Duration,
    ) -> crate::Result<CommandResult> {
        if self.closed {
            return Err(self.gone());
        }

        // output of the target (and state changes) since the last command
        // was already scanned by the reader task
        while self.lines.try_recv().is_ok() {}

        if self.needs_resync {
            self.resync(timeout).await?;
        }

        let encoded = self.protocol.encode(command)?;
        let mut reader = self.protocol.reader(&encoded);

        self.needs_resync = true;

        tracing::debug!(seq = encoded.seq, command, "write command");
        self.write(&encoded.text).await?;

        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        let mut reached = false;

        loop {
            let Some(incoming) = self.next_line(deadline).await? else {
                return Err(timed_out(command, timeout, reader.lines()));
            };

            reached |= incoming.events.iter().any(|e| until.is_reached_by(e));
            events.extend(incoming.events);

            match reader.push(incoming.line) {
                ReadProgress::Pending => (),
                ReadProgress::Resynced { stale_seq } => {
                    tracing::debug!(stale_seq, "discarded output of an abandoned command");
                }
                ReadProgress::Complete => break,
            }
        }

        self.needs_resync = false;

        let mut lines = reader.into_lines();
        tracing::debug!(seq = encoded.seq, lines = lines.len(), "read response");

        let failed = lines
            .iter()
            .any(|line| line.trim_start().starts_with("error:"));

        if until != Until::Sentinel && !reached && !failed {
            loop {
                let Some(incoming) = self.next_line(deadline).await? else {
                    return Err(timed_out(command, timeout, &lines));
                };

                let line = protocol::strip_prompt(&incoming.line).to_owned();
                if !line.trim().is_empty() {
                    lines.push(line);
                }

                reached = incoming.events.iter().any(|e| until.is_reached_by(e));
                events.extend(incoming.events);

                if reached {
                    break;
                }
            }
        }

        Ok(protocol::decode(lines, &events))
    }

    /// Reads up to a bare sentinel, discarding everything before it.
    async fn resync(&mut self, timeout: Duration) -> crate::Result<()> {
        let encoded = self.protocol.sync();
        let mut reader = self.protocol.reader(&encoded);

        tracing::warn!(seq = encoded.seq, "resynchronizing with debugger output");
        self.write(&encoded.text).await?;

        let deadline = Instant::now() + timeout;

        loop {
            let Some(incoming) = self.next_line(deadline).await? else {
                return Err(timed_out("<resync>", timeout, reader.lines()));
            };

            if reader.push(incoming.line) == ReadProgress::Complete {
                break;
            }
        }

        self.needs_resync = false;
        Ok(())
    }

    /// Returns the next output line, or `None` once the deadline elapsed.
    async fn next_line(&mut self, deadline: Instant) -> crate::Result<Option<Incoming>> {
        match tokio::time::timeout_at(deadline, self.lines.recv()).await {
            Ok(Some(incoming)) => Ok(Some(incoming)),
            Ok(None) => {
                self.closed = true;
                Err(self.gone())
            }
            Err(_) => Ok(None),
        }
    }

    async fn write(&mut self, text: &str) -> crate::Result<()> {
        self.stdin
            .write_all(text.as_bytes())
            .await
            .map_err(crate::Error::debugger_io)?;
        self.stdin.flush().await.map_err(crate::Error::debugger_io)
    }

    /// Asks the debugger to quit, killing it if it does not.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.write("quit\n").await {
            tracing::debug!(error = %e, "debugger already gone");
        }

        match tokio::time::timeout(QUIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "debugger exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for debugger"),
            Err(_) => {
                tracing::warn!("debugger did not quit, killing it");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(error = %e, "failed to kill debugger");
                }
            }
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn gone(&self) -> crate::Error {
        crate::Error::ToolFailure {
            tool: "lldb".to_owned(),
            status: "exited".to_owned(),
            stderr: "debugger subprocess is gone".to_owned(),
        }
    }
}

fn timed_out(command: &str, timeout: Duration, partial: &[String]) -> crate::Error {
    tracing::warn!(command, ?timeout, "command timed out");

    crate::Error::Timeout {
        command: command.to_owned(),
        timeout,
        partial: partial.join("\n"),
    }
}

fn set_cloexec(fd: &OwnedFd) -> crate::Result<()> {
    nix::fcntl::fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(|_| ())
        .map_err(|e| crate::Error::debugger_io(e.into()))
}

/// Scans every output line of the debugger, keeping the observed state up
/// to date, and forwards the lines to the command in flight (if any).
async fn read_output(
    receiver: pipe::Receiver,
    observed: Arc<watch::Sender<Observed>>,
    lines_tx: mpsc::UnboundedSender<Incoming>,
) {
    let mut framed = FramedRead::new(receiver, LineDecoder);
    let mut scanner = StateScanner::new();

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read debugger output");
                break;
            }
        };

        let mut events = Vec::new();
        scanner.scan(&line, &mut events);

        if !events.is_empty() {
            observed.send_modify(|observed| events.iter().for_each(|e| observed.apply(e)));
        }

        // the session may be gone, state tracking goes on regardless
        let _ = lines_tx.send(Incoming { line, events });
    }

    tracing::debug!("debugger output closed");
    observed.send_modify(|observed| observed.close(SessionState::Exited));
}
