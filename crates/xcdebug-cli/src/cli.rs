use std::path::PathBuf;

/// Interactive lldb sessions for macOS applications.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to attach to a running process and debug it.
    Attach {
        /// Session configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file. Otherwise it is directly parsed as inline KDL-formatted
        /// configuration.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// ID of the process to attach to.
        #[clap(short, long)]
        pid: u64,
    },

    /// Command to launch a program under the debugger.
    Launch {
        /// Session configuration (KDL format).
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// Keep the program stopped at its entry point.
        #[clap(long)]
        stop_at_entry: bool,

        /// Name of program to run.
        program: PathBuf,

        /// Program's arguments.
        args: Vec<String>,
    },

    /// Command to build an Xcode scheme, then launch the application under
    /// the debugger.
    RunApp {
        /// Launch configuration (KDL format).
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// What to build.
        #[clap(flatten)]
        project: CliProject,

        /// Scheme to build.
        #[clap(short, long)]
        scheme: String,

        /// Build configuration.
        #[clap(long)]
        configuration: Option<String>,

        /// Destination specifier.
        #[clap(long)]
        destination: Option<String>,

        /// Keep the application stopped once attached.
        #[clap(long)]
        stop_at_entry: bool,

        /// Application's arguments.
        #[clap(last = true)]
        args: Vec<String>,
    },
}

/// Project or workspace to build.
#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct CliProject {
    /// Path to an `.xcodeproj`.
    #[clap(long, value_name = "PATH")]
    pub project: Option<PathBuf>,

    /// Path to an `.xcworkspace`.
    #[clap(long, value_name = "PATH")]
    pub workspace: Option<PathBuf>,
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}
