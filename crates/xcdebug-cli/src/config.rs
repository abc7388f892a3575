use std::time::Duration;

use xcdebug_debugger::{Command, SessionConfig};
use xcdebug_launcher::LaunchConfig;

/// Configuration of debugging sessions and launches.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct DebugConfig {
    /// Debugger subprocess (program, then arguments).
    #[knus(child)]
    pub debugger: Option<DebuggerCommand>,

    /// Bound on the response of an ordinary command, in milliseconds.
    #[knus(child, default = 30_000, unwrap(argument))]
    pub command_timeout_ms: u64,

    /// Bound on a step to complete, in milliseconds.
    #[knus(child, default = 30_000, unwrap(argument))]
    pub step_timeout_ms: u64,

    /// Bound on an attach to complete, in milliseconds.
    #[knus(child, default = 30_000, unwrap(argument))]
    pub attach_timeout_ms: u64,

    /// Bound on a launched process to appear, in milliseconds.
    #[knus(child, default = 60_000, unwrap(argument))]
    pub launch_timeout_ms: u64,

    /// How long a launched application is watched for an immediate crash,
    /// in milliseconds.
    #[knus(child, default = 500, unwrap(argument))]
    pub crash_window_ms: u64,

    /// Signing identity used to re-sign patched bundles.
    #[knus(child, unwrap(argument))]
    pub resign_identity: Option<String>,

    /// Patch every bundle before launching it.
    #[knus(child, default, unwrap(argument))]
    pub patch_bundle: bool,
}

/// Debugger subprocess command line.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct DebuggerCommand {
    /// Program, then arguments.
    #[knus(arguments)]
    pub command: Vec<String>,
}

impl DebugConfig {
    /// Returns the configuration of debugger sessions.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            attach_timeout: Duration::from_millis(self.attach_timeout_ms),
            launch_timeout: Duration::from_millis(self.launch_timeout_ms),
            ..SessionConfig::default()
        };

        if let Some((program, args)) = self
            .debugger
            .as_ref()
            .and_then(|debugger| debugger.command.split_first())
        {
            config.debugger = Command::new(program).args(args);
        }

        config
    }

    /// Returns the configuration of application launches.
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            session: self.session_config(),
            resign_identity: self.resign_identity.clone(),
            patch_bundle: self.patch_bundle,
            crash_window: Duration::from_millis(self.crash_window_ms),
        }
    }
}
