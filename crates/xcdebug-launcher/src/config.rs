use std::time::Duration;

use xcdebug_debugger::SessionConfig;

/// Configuration of a [LaunchCoordinator](crate::LaunchCoordinator).
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Configuration of the debugger sessions started by launches.
    pub session: SessionConfig,

    /// Signing identity used when re-signing a patched bundle, instead of
    /// the bundle's original one.
    pub resign_identity: Option<String>,

    /// Patch every bundle, whether or not it is sandboxed or hardened.
    pub patch_bundle: bool,

    /// How long a resumed application is watched for an immediate crash
    /// before the launch completes.
    pub crash_window: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            resign_identity: None,
            patch_bundle: false,
            crash_window: Duration::from_millis(500),
        }
    }
}
