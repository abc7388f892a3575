use std::path::PathBuf;
use std::sync::Arc;

use xcdebug_debugger::{CrashReport, DebuggerSession, Outcome, SessionState};

use crate::build::{BuildRequest, BuildRunner};
use crate::bundle;
use crate::config::LaunchConfig;
use crate::registry::SessionRegistry;
use crate::settings::AppTarget;
use crate::tools::ToolRunner;

/// Launch of an application under the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Build of the application.
    pub build: BuildRequest,

    /// Arguments passed to the application.
    pub args: Vec<String>,

    /// Keep the application stopped once the debugger attached.
    pub stop_at_entry: bool,
}

impl LaunchRequest {
    /// Creates a launch request for the given build.
    pub const fn new(build: BuildRequest) -> Self {
        Self {
            build,
            args: Vec::new(),
            stop_at_entry: false,
        }
    }

    /// Passes the given arguments to the application.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keeps the application stopped once the debugger attached.
    pub const fn stop_at_entry(mut self, stop_at_entry: bool) -> Self {
        self.stop_at_entry = stop_at_entry;
        self
    }
}

/// Outcome of a successful launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Bundle identifier of the application.
    pub application_id: String,

    /// Process ID of the application.
    pub pid: u64,

    /// Path to the launched bundle.
    pub bundle_path: PathBuf,

    /// Whether the bundle was patched before launching.
    pub patched: bool,

    /// State of the application once launched.
    pub state: SessionState,

    /// Whether the application crashed right after being launched.
    pub crashed: bool,

    /// Crash of the application, if any.
    pub crash: Option<CrashReport>,
}

/// Launcher of Xcode applications under the debugger.
///
/// A launch builds the application, prepares its bundle, and starts it
/// under a debugger session waiting for its process to appear. The session
/// is then registered under the application's bundle identifier.
pub struct LaunchCoordinator<B, T> {
    build_runner: B,
    tool_runner: T,
    config: LaunchConfig,
}

impl LaunchCoordinator<(), ()> {
    /// Creates a launch coordinator builder.
    pub const fn builder() -> Builder<NeedsBuildRunner> {
        Builder {
            state: NeedsBuildRunner,
        }
    }
}

impl<B: BuildRunner, T: ToolRunner> LaunchCoordinator<B, T> {
    /// Returns the configuration of this coordinator.
    pub const fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Returns the runner of external utilities.
    pub const fn tool_runner(&self) -> &T {
        &self.tool_runner
    }

    /// Builds and launches an application, then registers its session.
    ///
    /// Any session previously registered for the application is terminated
    /// before the new process is started.
    ///
    /// # Note
    ///
    /// An application crashing right after being launched is not an error:
    /// the returned session stays available for inspection.
    #[tracing::instrument(name = "Launch", skip_all, fields(scheme = %request.build.scheme))]
    pub async fn launch(
        &self,
        registry: &SessionRegistry<DebuggerSession>,
        request: &LaunchRequest,
    ) -> crate::Result<(Arc<DebuggerSession>, LaunchOutcome)> {
        let build = self.build_runner.build(&request.build).await?;
        if !build.succeeded {
            return Err(crate::Error::LaunchFailure(format!(
                "build failed:\n{}",
                build.log
            )));
        }

        let target = AppTarget::from_settings(&build.settings)?;
        tracing::info!(application_id = %target.bundle_id, "application built");

        registry.remove_session(&target.bundle_id).await;

        let patched = target.restricted || self.config.patch_bundle;
        if patched {
            bundle::patch(
                &self.tool_runner,
                &target,
                self.config.resign_identity.as_deref(),
            )
            .await?;
        }

        let (session, ()) = DebuggerSession::attach_waiting_for(
            self.config.session.clone(),
            &target.executable_name,
            self.open(&target, &request.args),
        )
        .await?;

        let session = Arc::new(session);
        registry
            .register_application(&target.bundle_id, Arc::clone(&session))
            .await;

        let mut crashed = false;

        if !request.stop_at_entry {
            match session.continue_execution().await {
                Ok(result) if matches!(result.outcome, Outcome::Crashed(_)) => crashed = true,
                Ok(_) => self.settle(&session).await?,
                Err(e) if e.is_crashed() => crashed = true,
                Err(e) => return Err(e),
            }
        }

        let crash = session.crash_warning();
        if crash.is_some() || session.state() == SessionState::Crashed {
            tracing::warn!(pid = session.pid(), "application crashed after launch");
            crashed = true;
        }

        let outcome = LaunchOutcome {
            application_id: target.bundle_id,
            pid: session.pid(),
            bundle_path: target.bundle_path,
            patched,
            state: session.state(),
            crashed,
            crash,
        };

        tracing::info!(pid = outcome.pid, state = %outcome.state, "application launched");

        Ok((session, outcome))
    }

    /// Gives a resumed application `crash_window` to fault (or stop)
    /// before it is reported as running.
    async fn settle(&self, session: &DebuggerSession) -> crate::Result<()> {
        match session.wait_until_stopped(self.config.crash_window).await {
            Ok(state) => {
                tracing::debug!(%state, "application left the running state");
                Ok(())
            }
            Err(e) if e.is_timeout() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, target: &AppTarget, args: &[String]) -> crate::Result<()> {
        let mut open_args = vec!["-n".to_owned(), target.bundle_path.display().to_string()];

        if !args.is_empty() {
            open_args.push("--args".to_owned());
            open_args.extend_from_slice(args);
        }

        self.tool_runner
            .run("open", &open_args)
            .await?
            .checked("open")?;

        Ok(())
    }
}

/// Builder for [LaunchCoordinator].
///
/// It is usually created by calling [LaunchCoordinator::builder], and
/// allows to specify how applications are built and how external utilities
/// are invoked.
pub struct Builder<S> {
    state: S,
}

impl Builder<NeedsBuildRunner> {
    /// Specifies the runner building applications.
    pub fn with_build_runner<B: BuildRunner>(
        self,
        build_runner: B,
    ) -> Builder<NeedsToolRunner<B>> {
        Builder {
            state: NeedsToolRunner { build_runner },
        }
    }
}

impl<B: BuildRunner> Builder<NeedsToolRunner<B>> {
    /// Specifies the runner of external utilities.
    pub fn with_tool_runner<T: ToolRunner>(self, tool_runner: T) -> Builder<Ready<B, T>> {
        Builder {
            state: Ready {
                build_runner: self.state.build_runner,
                tool_runner,
                config: LaunchConfig::default(),
            },
        }
    }
}

impl<B, T> Builder<Ready<B, T>> {
    /// Specifies the launch configuration.
    pub fn with_config(mut self, config: LaunchConfig) -> Self {
        self.state.config = config;
        self
    }

    /// Builds the launch coordinator.
    pub fn build(self) -> LaunchCoordinator<B, T> {
        LaunchCoordinator {
            build_runner: self.state.build_runner,
            tool_runner: self.state.tool_runner,
            config: self.state.config,
        }
    }
}

/// Builder state awaiting a [BuildRunner].
pub struct NeedsBuildRunner;

/// Builder state awaiting a [ToolRunner].
pub struct NeedsToolRunner<B> {
    build_runner: B,
}

/// Builder state ready to build the coordinator.
pub struct Ready<B, T> {
    build_runner: B,
    tool_runner: T,
    config: LaunchConfig,
}
