use std::future::Future;

/// Output of a one-shot utility invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, if the utility exited normally.
    pub code: Option<i32>,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Creates the output of a successful invocation.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns whether the utility exited with status 0.
    pub const fn succeeded(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Turns a non-zero exit into a [ToolFailure](crate::Error::ToolFailure).
    pub fn checked(self, tool: &str) -> crate::Result<Self> {
        if self.succeeded() {
            return Ok(self);
        }

        let status = match self.code {
            Some(code) => format!("exit status: {code}"),
            None => "terminated by signal".to_owned(),
        };

        tracing::warn!(tool, %status, "utility failed");

        Err(crate::Error::ToolFailure {
            tool: tool.to_owned(),
            status,
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Trait implementing the invocation of external utilities
/// (`codesign`, `install_name_tool`, `open`).
pub trait ToolRunner: Send + Sync {
    /// Runs `tool` with the given arguments until it exits.
    fn run(
        &self,
        tool: &str,
        args: &[String],
    ) -> impl Future<Output = crate::Result<ToolOutput>> + Send;
}

/// [ToolRunner] spawning the utilities with [tokio::process].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    async fn run(&self, tool: &str, args: &[String]) -> crate::Result<ToolOutput> {
        tracing::debug!(tool, ?args, "running utility");

        let output = tokio::process::Command::new(tool)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| crate::Error::ToolFailure {
                tool: tool.to_owned(),
                status: "cannot spawn".to_owned(),
                stderr: e.to_string(),
            })?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
