use std::time::Duration;

use crate::Command;

/// Configuration of a [DebuggerSession](crate::DebuggerSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Debugger subprocess to spawn.
    pub debugger: Command,

    /// Bound on the response of an ordinary command.
    pub command_timeout: Duration,

    /// Bound on a step to complete.
    pub step_timeout: Duration,

    /// Bound on an attach to complete.
    pub attach_timeout: Duration,

    /// Bound on a launched process to appear.
    pub launch_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debugger: Command::new("xcrun").args(["lldb", "--no-lldbinit"]),
            command_timeout: Duration::from_secs(30),
            step_timeout: Duration::from_secs(30),
            attach_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Uses the given debugger subprocess.
    pub fn with_debugger(mut self, debugger: Command) -> Self {
        self.debugger = debugger;
        self
    }

    /// Uses the given bound for every kind of operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self.step_timeout = timeout;
        self.attach_timeout = timeout;
        self.launch_timeout = timeout;
        self
    }
}
