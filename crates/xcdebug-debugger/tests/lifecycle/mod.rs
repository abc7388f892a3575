use std::time::{Duration, Instant};

use test_log::test;
use xcdebug_debugger::{Command, DebuggerSession, Error, Outcome, SessionState, StepMode};

use crate::common;

#[test(tokio::test)]
async fn attach_stops_the_target() {
    let session = common::attach(4242).await;

    assert_eq!(session.pid(), 4242);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.require_stopped().is_ok());

    let stop = session.last_stop().expect("last stop");
    assert_eq!(stop.reason, "signal SIGSTOP");
    assert_eq!(stop.thread_index, Some(1));

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn attach_to_missing_process() {
    let err = DebuggerSession::attach(common::fake_config(), 999)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test(tokio::test)]
async fn launch_stopped_at_entry_then_continue() {
    let command = Command::new("/tmp/App.app/Contents/MacOS/App")
        .args(["--mode", "debug"])
        .env("APP_LOG", "verbose")
        .current_dir("/tmp");

    let (session, result) =
        DebuggerSession::launch_and_attach(common::fake_config(), &command, true)
            .await
            .expect("launch");

    assert_eq!(session.pid(), 6161);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(result.outcome, Outcome::Stopped(_)));

    let result = session.continue_execution().await.expect("continue");
    assert_eq!(result.outcome, Outcome::Running);
    assert_eq!(session.state(), SessionState::Running);

    session.terminate().await.expect("terminate");
}

#[test(tokio::test)]
async fn launch_runs_the_target() {
    let session = common::launch(false).await;

    assert_eq!(session.pid(), 6161);
    assert_eq!(session.state(), SessionState::Running);

    session.terminate().await.expect("terminate");
}

#[test(tokio::test)]
async fn launch_of_missing_program() {
    let command = Command::new("/tmp/missing/App");

    let err = DebuggerSession::launch_and_attach(common::fake_config(), &command, false)
        .await
        .unwrap_err();

    match err {
        Error::LaunchFailure(message) => assert!(message.contains("does not exist"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test(tokio::test)]
async fn attach_waiting_for_launched_process() {
    let (session, launched) =
        DebuggerSession::attach_waiting_for(common::fake_config(), "App", async {
            Ok("launched through open(1)")
        })
        .await
        .expect("attach");

    assert_eq!(launched, "launched through open(1)");
    assert_eq!(session.last_stop().expect("last stop").reason, "signal SIGSTOP");
    assert_eq!(session.state(), SessionState::Stopped);

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn attach_waiting_for_process_which_never_appears() {
    let mut config = common::fake_config();
    config.launch_timeout = Duration::from_millis(500);

    let err = DebuggerSession::attach_waiting_for(config, "NeverLaunched", async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LaunchFailure(_)), "{err}");
}

#[test(tokio::test)]
async fn failed_launch_aborts_the_wait() {
    let err = DebuggerSession::attach_waiting_for(common::fake_config(), "App", async {
        Err::<(), _>(Error::ToolFailure {
            tool: "open".to_owned(),
            status: "exit status: 1".to_owned(),
            stderr: "Unable to find application".to_owned(),
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ToolFailure { ref tool, .. } if tool == "open"));
}

#[test(tokio::test)]
async fn detach_is_idempotent() {
    let session = common::attach(4242).await;

    session.detach().await.expect("detach");
    assert_eq!(session.state(), SessionState::Detached);

    session.detach().await.expect("detach again");
    session.terminate().await.expect("terminate after detach");
    assert_eq!(session.state(), SessionState::Detached);

    let err = session.get_stack(None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");

    let err = session.execute("thread list").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test(tokio::test)]
async fn terminate_kills_the_target() {
    let session = common::attach(4242).await;

    session.terminate().await.expect("terminate");

    assert_eq!(session.state(), SessionState::Exited);
    assert_eq!(session.exit_code(), Some(9));

    let status = session.process_status().await.expect("status");
    assert_eq!(status.state, SessionState::Exited);
    assert_eq!(status.output, None);
}

#[test(tokio::test)]
async fn crashed_target_refuses_to_resume() {
    let session = common::attach(4242).await;

    let result = session
        .execute("process signal SIGSEGV")
        .await
        .expect("signal");
    assert!(matches!(result.outcome, Outcome::Crashed(_)));
    assert_eq!(session.state(), SessionState::Crashed);

    let crash = session.crash_warning().expect("crash warning");
    assert_eq!(crash.reason, "signal SIGSEGV");

    let started = Instant::now();

    let err = session.continue_execution().await.unwrap_err();
    assert!(matches!(err, Error::Crashed { pid: 4242, .. }), "{err}");

    let err = session.step(StepMode::Over).await.unwrap_err();
    assert!(err.is_crashed(), "{err}");

    let err = session.evaluate("counter", None, false).await.unwrap_err();
    assert!(err.is_crashed() && !err.is_timeout(), "{err}");

    assert!(started.elapsed() < session.config().command_timeout);

    // post-mortem inspection is still possible
    let backtrace = session.get_stack(None).await.expect("stack");
    assert!(!backtrace.threads.is_empty());

    let err = session.require_stopped().unwrap_err();
    assert!(err.is_crashed(), "{err}");

    session.terminate().await.expect("terminate");
    assert!(session.crash_warning().is_some());
}
