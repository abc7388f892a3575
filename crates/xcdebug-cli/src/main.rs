#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::IntoDiagnostic;

use xcdebug_cli::{CliAction, CliOpts, CliProject, DebugConfig, OnQuit};

use xcdebug_debugger::{Command, DebuggerSession};

use xcdebug_launcher::{
    BuildRequest, LaunchCoordinator, LaunchRequest, SessionRegistry, SystemTools, XcodeBuild,
};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("XCDEBUG_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Attach { config, pid } => evaluate_attach(config, pid),
        CliAction::Launch {
            config,
            stop_at_entry,
            program,
            args,
        } => evaluate_launch(config, stop_at_entry, program, args),
        CliAction::RunApp {
            config,
            project,
            scheme,
            configuration,
            destination,
            stop_at_entry,
            args,
        } => {
            let build = build_request(project, scheme, configuration, destination);
            evaluate_run_app(config, build, stop_at_entry, args)
        }
    };

    if let Err(e) = res {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

fn evaluate_attach(config: Option<String>, pid: u64) -> miette::Result<()> {
    let config = parse_debug_config(config)?;

    block_on(async move {
        let session = DebuggerSession::attach(config.session_config(), pid)
            .await
            .into_diagnostic()?;

        eprintln!("attached to process {pid} ({})", session.state());

        xcdebug_cli::run_repl(&session, OnQuit::Detach).await
    })
}

fn evaluate_launch(
    config: Option<String>,
    stop_at_entry: bool,
    program: PathBuf,
    args: Vec<String>,
) -> miette::Result<()> {
    let config = parse_debug_config(config)?;

    block_on(async move {
        let command = Command::new(program).args(args);

        let (session, _) =
            DebuggerSession::launch_and_attach(config.session_config(), &command, stop_at_entry)
                .await
                .into_diagnostic()?;

        eprintln!("launched process {} ({})", session.pid(), session.state());

        xcdebug_cli::run_repl(&session, OnQuit::Terminate).await
    })
}

fn evaluate_run_app(
    config: Option<String>,
    build: BuildRequest,
    stop_at_entry: bool,
    args: Vec<String>,
) -> miette::Result<()> {
    let config = parse_debug_config(config)?;

    block_on(async move {
        let registry = Arc::new(SessionRegistry::new());

        let coordinator = LaunchCoordinator::builder()
            .with_build_runner(XcodeBuild::default())
            .with_tool_runner(SystemTools)
            .with_config(config.launch_config())
            .build();

        let request = LaunchRequest::new(build)
            .with_args(args)
            .stop_at_entry(stop_at_entry);

        let (session, outcome) = coordinator
            .launch(&registry, &request)
            .await
            .into_diagnostic()?;

        eprintln!(
            "launched {} (pid {}, {}) from {}",
            outcome.application_id,
            outcome.pid,
            outcome.state,
            outcome.bundle_path.display()
        );
        if outcome.patched {
            eprintln!("bundle was patched and re-signed");
        }
        if let Some(crash) = &outcome.crash {
            eprintln!("application crashed: {}", crash.reason);
        } else if outcome.crashed {
            eprintln!("application crashed");
        }

        let res = xcdebug_cli::run_repl(&session, OnQuit::Terminate).await;

        registry.remove_session(&outcome.application_id).await;

        res
    })
}

fn build_request(
    project: CliProject,
    scheme: String,
    configuration: Option<String>,
    destination: Option<String>,
) -> BuildRequest {
    // clap requires one of them
    let request = match project.workspace {
        Some(workspace) => BuildRequest::workspace(workspace, scheme),
        None => BuildRequest::project(project.project.unwrap_or_default(), scheme),
    };

    let request = match configuration {
        Some(configuration) => request.with_configuration(configuration),
        None => request,
    };

    match destination {
        Some(destination) => request.with_destination(destination),
        None => request,
    }
}

fn block_on<F>(fut: F) -> miette::Result<()>
where
    F: Future<Output = miette::Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?
        .block_on(fut)
}

fn parse_debug_config(config: Option<String>) -> miette::Result<DebugConfig> {
    let Some(config) = config else {
        return Ok(knus::parse("<content>", "")?);
    };

    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}
