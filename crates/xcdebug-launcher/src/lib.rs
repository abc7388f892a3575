//! This crate keeps track of live debugger sessions, and launches Xcode
//! applications under the debugger.
//!
//! The [SessionRegistry] maps application identifiers and process IDs to
//! their [DebuggerSession](xcdebug_debugger::DebuggerSession). It is
//! constructed once and shared (behind an [Arc](std::sync::Arc)) by every
//! caller, so that at most one live session exists per process.
//!
//! The [LaunchCoordinator] builds an application, prepares its bundle for
//! debugging, and starts it under a waiting debugger session:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xcdebug_launcher::{
//!     BuildRequest, LaunchCoordinator, LaunchRequest, SessionRegistry, SystemTools, XcodeBuild,
//! };
//!
//! # async fn example() -> xcdebug_launcher::Result<()> {
//! let registry = Arc::new(SessionRegistry::new());
//!
//! let coordinator = LaunchCoordinator::builder()
//!     .with_build_runner(XcodeBuild::default())
//!     .with_tool_runner(SystemTools)
//!     .build();
//!
//! let request = LaunchRequest::new(BuildRequest::project("App.xcodeproj", "App"));
//! let (session, outcome) = coordinator.launch(&registry, &request).await?;
//!
//! println!("{} is running as {}", outcome.application_id, outcome.pid);
//! session.interrupt().await?;
//! # Ok(())
//! # }
//! ```

mod build;
mod bundle;
mod config;
mod coordinator;
mod registry;
mod settings;
mod tools;

pub use self::build::{BuildOutput, BuildRequest, BuildRunner, ProjectRef, XcodeBuild};
pub use self::config::LaunchConfig;
pub use self::coordinator::{Builder, LaunchCoordinator, LaunchOutcome, LaunchRequest};
pub use self::registry::{ManagedSession, SessionRegistry};
pub use self::settings::{AppTarget, BuildSettings};
pub use self::tools::{SystemTools, ToolOutput, ToolRunner};

pub use xcdebug_debugger::{Error, Result};
