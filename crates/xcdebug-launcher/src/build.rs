use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

/// Project or workspace to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    /// An `.xcodeproj`.
    Project(PathBuf),

    /// An `.xcworkspace`.
    Workspace(PathBuf),
}

/// Build of a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Project or workspace containing the scheme.
    pub project: ProjectRef,

    /// Scheme to build.
    pub scheme: String,

    /// Build configuration (`Debug` if unset).
    pub configuration: Option<String>,

    /// Destination specifier (none is passed if unset).
    pub destination: Option<String>,
}

impl BuildRequest {
    /// Builds `scheme` of an `.xcodeproj`.
    pub fn project(path: impl Into<PathBuf>, scheme: impl Into<String>) -> Self {
        Self::new(ProjectRef::Project(path.into()), scheme)
    }

    /// Builds `scheme` of an `.xcworkspace`.
    pub fn workspace(path: impl Into<PathBuf>, scheme: impl Into<String>) -> Self {
        Self::new(ProjectRef::Workspace(path.into()), scheme)
    }

    fn new(project: ProjectRef, scheme: impl Into<String>) -> Self {
        Self {
            project,
            scheme: scheme.into(),
            configuration: None,
            destination: None,
        }
    }

    /// Uses the given build configuration.
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// Uses the given destination specifier.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Arguments of `xcodebuild` selecting what to build.
    pub fn xcodebuild_args(&self) -> Vec<String> {
        let (flag, path) = match &self.project {
            ProjectRef::Project(path) => ("-project", path),
            ProjectRef::Workspace(path) => ("-workspace", path),
        };

        let mut args = vec![
            flag.to_owned(),
            path.display().to_string(),
            "-scheme".to_owned(),
            self.scheme.clone(),
            "-configuration".to_owned(),
            self.configuration.as_deref().unwrap_or("Debug").to_owned(),
        ];

        if let Some(destination) = &self.destination {
            args.push("-destination".to_owned());
            args.push(destination.clone());
        }

        args
    }
}

/// Result of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Whether the build succeeded.
    pub succeeded: bool,

    /// Output of `xcodebuild -showBuildSettings` (empty if the build failed).
    pub settings: String,

    /// Build log.
    pub log: String,
}

/// Trait implementing the build of an Xcode scheme.
pub trait BuildRunner: Send + Sync {
    /// Builds the requested scheme, then reports its build settings.
    ///
    /// A failed build is not an error: it is reported through
    /// [BuildOutput::succeeded], along with its log.
    fn build(
        &self,
        request: &BuildRequest,
    ) -> impl Future<Output = crate::Result<BuildOutput>> + Send;
}

/// [BuildRunner] invoking `xcodebuild`.
#[derive(Debug, Clone)]
pub struct XcodeBuild {
    program: PathBuf,
}

impl Default for XcodeBuild {
    fn default() -> Self {
        Self::new("xcodebuild")
    }
}

impl XcodeBuild {
    /// Invokes the given `xcodebuild` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> crate::Result<(bool, String)> {
        tracing::debug!(?args, "running xcodebuild");

        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| crate::Error::ToolFailure {
                tool: self.program.display().to_string(),
                status: "cannot spawn".to_owned(),
                stderr: e.to_string(),
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok((output.status.success(), log))
    }
}

impl BuildRunner for XcodeBuild {
    #[tracing::instrument(name = "Build", skip_all, fields(scheme = %request.scheme))]
    async fn build(&self, request: &BuildRequest) -> crate::Result<BuildOutput> {
        let mut args = request.xcodebuild_args();

        args.push("build".to_owned());
        let (succeeded, log) = self.run(&args).await?;

        if !succeeded {
            tracing::warn!("build failed");

            return Ok(BuildOutput {
                succeeded,
                settings: String::new(),
                log,
            });
        }

        args.pop();
        args.push("-showBuildSettings".to_owned());
        let (listed, settings) = self.run(&args).await?;

        if !listed {
            return Err(crate::Error::ToolFailure {
                tool: "xcodebuild -showBuildSettings".to_owned(),
                status: "non-zero exit".to_owned(),
                stderr: settings,
            });
        }

        tracing::info!("build succeeded");

        Ok(BuildOutput {
            succeeded,
            settings,
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::BuildRequest;

    #[test]
    fn xcodebuild_arguments() {
        let request = BuildRequest::project("App.xcodeproj", "App");
        assert_eq!(
            request.xcodebuild_args(),
            [
                "-project",
                "App.xcodeproj",
                "-scheme",
                "App",
                "-configuration",
                "Debug"
            ]
        );

        let request = BuildRequest::workspace("/src/App.xcworkspace", "App macOS")
            .with_configuration("Release")
            .with_destination("platform=macOS,arch=arm64");
        assert_eq!(
            request.xcodebuild_args(),
            [
                "-workspace",
                "/src/App.xcworkspace",
                "-scheme",
                "App macOS",
                "-configuration",
                "Release",
                "-destination",
                "platform=macOS,arch=arm64"
            ]
        );
    }
}
