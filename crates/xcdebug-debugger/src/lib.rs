//! This crate drives `lldb` subprocesses on behalf of many independent
//! callers.
//!
//! A [DebuggerSession] owns exactly one debugger subprocess attached to (or
//! launching) exactly one target process. Every operation is written to the
//! debugger's standard input as a line of text, immediately followed by a
//! sentinel command whose output marks the end of the response (see
//! [protocol]). Operations against a single session are strictly
//! serialized, while distinct sessions run concurrently.
//!
//! The debugger output is scanned line by line (see [detector]) so that the
//! session always knows whether its target is running, stopped, crashed or
//! gone. Operations that cannot be satisfied by the target in its current
//! state are refused without ever reaching the debugger.
//!
//! ```no_run
//! use xcdebug_debugger::{BreakpointLocation, DebuggerSession, SessionConfig, StepMode};
//!
//! # async fn example() -> xcdebug_debugger::Result<()> {
//! let session = DebuggerSession::attach(SessionConfig::default(), 4242).await?;
//!
//! let id = session
//!     .set_breakpoint(BreakpointLocation::file_line("main.swift", 12))
//!     .await?;
//! session.continue_execution().await?;
//!
//! // ... once the breakpoint is hit
//! let backtrace = session.get_stack(None).await?;
//! session.step(StepMode::Over).await?;
//!
//! session.delete_breakpoint(id).await?;
//! session.detach().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Supported Platforms
//!
//! The session is written against the textual interface of the `lldb`
//! driver shipped with Xcode (`xcrun lldb`) on macOS. Any program speaking
//! the same line protocol can be configured instead (see [SessionConfig]).

mod breakpoint;
mod command;
mod config;
mod error;
mod parse;
mod session;
mod state;

pub mod detector;
pub mod protocol;

pub use self::breakpoint::{Breakpoint, BreakpointKind, BreakpointLocation};
pub use self::command::{Command, CommandEnv};
pub use self::config::SessionConfig;
pub use self::detector::{CrashReport, ProcessEvent, StopInfo};
pub use self::error::{Error, Result};
pub use self::parse::{Frame, ThreadBacktrace, ThreadInfo, Variable};
pub use self::protocol::{CommandResult, Outcome};
pub use self::session::{
    Backtrace, DebuggerSession, MemoryFormat, Platform, ProcessStatus, StepMode, SymbolQuery,
    ViewHierarchy, WatchKind, WatchTarget, WatchpointAction, WatchpointResult,
};
pub use self::state::SessionState;
