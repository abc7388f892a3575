//! Incremental detection of process state changes in debugger output.
//!
//! The debugger reports state changes of its target with a handful of
//! fixed-form lines:
//!
//! ```text
//! Process 4242 launched: '/path/to/App' (arm64)
//! Process 4242 resuming
//! Process 4242 stopped
//! * thread #1, queue = 'com.apple.main-thread', stop reason = breakpoint 1.1
//! Process 4242 exited with status = 0 (0x00000000)
//! Process 4242 detached
//! ```
//!
//! A stop is reported over two lines, the second one carrying the stop
//! reason which tells an ordinary stop apart from a crash.

/// Exception types reported by the debugger which denote a crash.
const CRASH_EXCEPTIONS: &[&str] = &[
    "EXC_BAD_ACCESS",
    "EXC_BAD_INSTRUCTION",
    "EXC_ARITHMETIC",
    "EXC_CRASH",
    "EXC_GUARD",
    "EXC_RESOURCE",
    // Swift runtime traps (e.g., force-unwrapping nil) are `brk` instructions
    "EXC_BREAKPOINT",
    "Fatal error",
];

/// Signals which denote a crash when they stop the target.
const FATAL_SIGNALS: &[&str] = &[
    "SIGABRT", "SIGSEGV", "SIGBUS", "SIGILL", "SIGFPE", "SIGKILL", "SIGTRAP", "SIGSYS",
];

/// State change of the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The target was launched by the debugger.
    Launched {
        /// Process ID of the target.
        pid: u64,
    },

    /// The target is resumed.
    Resumed {
        /// Process ID of the target.
        pid: u64,
    },

    /// The target stopped for a non-fatal reason.
    Stopped {
        /// Process ID of the target.
        pid: u64,

        /// Why the target stopped.
        stop: StopInfo,
    },

    /// The target stopped because of a fatal signal or exception.
    Crashed {
        /// Process ID of the target.
        pid: u64,

        /// What crashed the target.
        crash: CrashReport,
    },

    /// The target exited.
    Exited {
        /// Process ID of the target.
        pid: u64,

        /// Exit status of the target.
        code: i32,
    },

    /// The debugger detached from the target.
    Detached {
        /// Process ID of the target.
        pid: u64,
    },

    /// The debugger could not attach to the target.
    AttachFailed {
        /// Message reported by the debugger.
        message: String,
    },
}

impl ProcessEvent {
    /// Returns the process ID carried by this event, if any.
    pub const fn pid(&self) -> Option<u64> {
        match self {
            Self::Launched { pid }
            | Self::Resumed { pid }
            | Self::Stopped { pid, .. }
            | Self::Crashed { pid, .. }
            | Self::Exited { pid, .. }
            | Self::Detached { pid } => Some(*pid),
            Self::AttachFailed { .. } => None,
        }
    }

    /// Returns whether the event ends a wait for the target to stop.
    pub(crate) const fn ends_stop_wait(&self) -> bool {
        !matches!(self, Self::Launched { .. } | Self::Resumed { .. })
    }
}

/// Non-fatal stop of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopInfo {
    /// Index of the thread which stopped the target, if reported.
    pub thread_index: Option<u32>,

    /// Stop reason as reported by the debugger.
    pub reason: String,
}

/// Crash of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    /// Index of the crashing thread, if reported.
    pub thread_index: Option<u32>,

    /// Signal or exception as reported by the debugger
    /// (e.g., `EXC_BAD_ACCESS (code=1, address=0x0)`).
    pub reason: String,
}

/// Line scanner turning debugger output into [ProcessEvent]s.
#[derive(Debug, Default)]
pub struct StateScanner {
    /// Process ID of a `Process <pid> stopped` line, awaiting its stop reason.
    pending_stop: Option<u64>,
}

impl StateScanner {
    /// Creates a new scanner.
    pub const fn new() -> Self {
        Self { pending_stop: None }
    }

    /// Scans the next line of debugger output, pushing the detected events
    /// (if any) into `events`.
    pub fn scan(&mut self, line: &str, events: &mut Vec<ProcessEvent>) {
        let line = line.trim();

        if let Some(pid) = self.pending_stop.take() {
            if let Some((thread_index, reason)) = parse_thread_stop(line) {
                events.push(classify_stop(pid, thread_index, reason));
                return;
            }

            // no stop reason follows
            events.push(ProcessEvent::Stopped {
                pid,
                stop: StopInfo {
                    thread_index: None,
                    reason: "unknown".to_owned(),
                },
            });
        }

        if let Some(rest) = line.strip_prefix("Process ") {
            let Some((pid, status)) = rest.split_once(' ') else {
                return;
            };
            let Ok(pid) = pid.parse::<u64>() else {
                return;
            };

            if status.starts_with("stopped") {
                self.pending_stop = Some(pid);
            } else if status.starts_with("launched") {
                events.push(ProcessEvent::Launched { pid });
            } else if status.starts_with("resuming") {
                events.push(ProcessEvent::Resumed { pid });
            } else if status.starts_with("detached") {
                events.push(ProcessEvent::Detached { pid });
            } else if let Some(code) = status.strip_prefix("exited with status = ") {
                let code = code
                    .split_whitespace()
                    .next()
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(-1);
                events.push(ProcessEvent::Exited { pid, code });
            }
        } else if let Some(message) = line.strip_prefix("error: attach failed") {
            let message = message.trim_start_matches(':').trim().to_owned();
            events.push(ProcessEvent::AttachFailed { message });
        }
    }

    /// Returns whether a stop was announced but its reason is yet to come.
    pub const fn has_pending_stop(&self) -> bool {
        self.pending_stop.is_some()
    }
}

/// Parses `* thread #<index>, ..., stop reason = <reason>`.
///
/// `thread list` reports `* thread #<index>: ...` instead.
fn parse_thread_stop(line: &str) -> Option<(Option<u32>, &str)> {
    let rest = line.strip_prefix("* thread #")?;

    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let thread_index = rest[..digits].parse().ok();

    let reason = rest
        .split_once("stop reason = ")
        .map_or("unknown", |(_, reason)| reason.trim());

    Some((thread_index, reason))
}

fn classify_stop(pid: u64, thread_index: Option<u32>, reason: &str) -> ProcessEvent {
    if is_crash_reason(reason) {
        ProcessEvent::Crashed {
            pid,
            crash: CrashReport {
                thread_index,
                reason: reason.to_owned(),
            },
        }
    } else {
        ProcessEvent::Stopped {
            pid,
            stop: StopInfo {
                thread_index,
                reason: reason.to_owned(),
            },
        }
    }
}

/// Returns whether the stop reason denotes a crash.
pub fn is_crash_reason(reason: &str) -> bool {
    if CRASH_EXCEPTIONS.iter().any(|exc| reason.starts_with(exc)) {
        return true;
    }

    reason
        .strip_prefix("signal ")
        .and_then(|signal| signal.split_whitespace().next())
        .is_some_and(|signal| FATAL_SIGNALS.contains(&signal))
}
