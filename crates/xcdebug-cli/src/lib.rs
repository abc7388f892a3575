//! Crate implementing the CLI commands.

mod cli;
mod config;
mod repl;

pub use self::cli::{CliAction, CliOpts, CliProject};
pub use self::config::{DebugConfig, DebuggerCommand};
pub use self::repl::{OnQuit, ReplCommand, ReplError, run as run_repl};
