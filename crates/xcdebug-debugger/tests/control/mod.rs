use std::sync::Arc;
use std::time::{Duration, Instant};

use test_log::test;
use xcdebug_debugger::{
    BreakpointKind, BreakpointLocation, DebuggerSession, Error, Outcome, SessionState, StepMode,
    SymbolQuery, WatchKind, WatchTarget, WatchpointAction,
};

use crate::common;

#[test(tokio::test)]
async fn set_and_delete_breakpoints() {
    let session = common::attach(4242).await;

    let line_id = session
        .set_breakpoint(BreakpointLocation::file_line("main.swift", 12))
        .await
        .expect("set file:line breakpoint");
    let symbol_id = session
        .set_breakpoint(BreakpointLocation::symbol("viewDidLoad"))
        .await
        .expect("set symbol breakpoint");
    assert_ne!(line_id, symbol_id);

    let (breakpoints, listing) = session.list_breakpoints().await.expect("list");
    assert_eq!(breakpoints.len(), 2);
    assert_eq!(breakpoints[0].id, line_id);
    assert_eq!(breakpoints[0].kind, BreakpointKind::Breakpoint);
    assert_eq!(breakpoints[0].location.to_string(), "main.swift:12");
    assert!(listing.output.starts_with("Current breakpoints:"));

    session
        .delete_breakpoint(line_id)
        .await
        .expect("delete breakpoint");

    let err = session.delete_breakpoint(line_id).await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }), "{err}");

    let (breakpoints, _) = session.list_breakpoints().await.expect("list");
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].id, symbol_id);

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn malformed_breakpoint_locations() {
    let session = common::attach(4242).await;

    for location in [
        BreakpointLocation::file_line("main.swift", 0),
        BreakpointLocation::symbol("  "),
        BreakpointLocation::Watch {
            target: "count".to_owned(),
            condition: None,
        },
    ] {
        let err = session.set_breakpoint(location).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)), "{err}");
    }

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn step_reports_the_new_stop() {
    let session = common::attach(4242).await;

    let result = session.step(StepMode::Over).await.expect("step over");
    assert!(matches!(result.outcome, Outcome::Stopped(ref stop) if stop.reason == "step over"));
    assert_eq!(session.state(), SessionState::Stopped);

    // the stop is reported after the sentinel
    let result = session.step(StepMode::Out).await.expect("step out");
    assert!(matches!(result.outcome, Outcome::Stopped(ref stop) if stop.reason == "step out"));
    assert_eq!(session.last_stop().expect("last stop").reason, "step out");

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn running_target_is_not_stopped() {
    let session = common::launch(false).await;
    assert_eq!(session.state(), SessionState::Running);

    let started = Instant::now();

    let err = session.require_stopped().unwrap_err();
    assert!(
        matches!(
            err,
            Error::NotStopped {
                state: SessionState::Running
            }
        ),
        "{err}"
    );

    let err = session.list_threads(None).await.unwrap_err();
    assert!(matches!(err, Error::NotStopped { .. }), "{err}");

    let err = session.get_variables(0).await.unwrap_err();
    assert!(matches!(err, Error::NotStopped { .. }), "{err}");

    assert!(started.elapsed() < Duration::from_secs(1));

    let result = session.interrupt().await.expect("interrupt");
    assert!(matches!(result.outcome, Outcome::Stopped(_)));
    assert_eq!(session.state(), SessionState::Stopped);

    let err = session.interrupt().await.unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    session.terminate().await.expect("terminate");
}

#[test(tokio::test)]
async fn watchpoints() {
    let session = common::attach(4242).await;

    let added = session
        .manage_watchpoint(WatchpointAction::Add {
            target: WatchTarget::Variable("count".to_owned()),
            kind: WatchKind::Write,
            condition: Some("count > 10".to_owned()),
        })
        .await
        .expect("add watchpoint");
    let id = added.id.expect("watchpoint id");

    let (breakpoints, _) = session.list_breakpoints().await.expect("list");
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].kind, BreakpointKind::Watchpoint);
    assert_eq!(breakpoints[0].location.to_string(), "count if count > 10");

    let added = session
        .manage_watchpoint(WatchpointAction::Add {
            target: WatchTarget::Address(0x16fdff1ac),
            kind: WatchKind::ReadWrite,
            condition: None,
        })
        .await
        .expect("add watchpoint");
    assert_ne!(added.id, Some(id));

    let listed = session
        .manage_watchpoint(WatchpointAction::List)
        .await
        .expect("list watchpoints");
    assert_eq!(listed.id, None);
    assert!(listed.result.output.contains("Watchpoint 1:"));

    let removed = session
        .manage_watchpoint(WatchpointAction::Remove { id })
        .await
        .expect("remove watchpoint");
    assert_eq!(removed.id, Some(id));

    let err = session
        .manage_watchpoint(WatchpointAction::Add {
            target: WatchTarget::Variable("missing".to_owned()),
            kind: WatchKind::Read,
            condition: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }), "{err}");

    session.detach().await.expect("detach");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_commands_do_not_interleave() {
    let session = Arc::new(common::attach(4242).await);

    let mut tasks = Vec::new();

    for i in 0..8 {
        let session = Arc::clone(&session);

        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let backtrace = session.get_stack(None).await.expect("stack");
                assert_eq!(backtrace.threads.len(), 2);
                assert!(!backtrace.output.contains("Summary:"));
            } else {
                let result = session
                    .symbol_lookup(SymbolQuery::Name("main".to_owned()))
                    .await
                    .expect("lookup");
                assert!(result.output.starts_with("1 match found"));
                assert!(!result.output.contains("frame #"));
            }
        }));
    }

    for task in tasks {
        task.await.expect("task");
    }

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn timed_out_command_does_not_leak_into_the_next_one() {
    let mut config = common::fake_config();
    config.command_timeout = Duration::from_millis(700);

    let session = DebuggerSession::attach(config, 4242)
        .await
        .expect("attach");

    let err = session
        .evaluate("sleep(1)", None, false)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");

    let result = session
        .evaluate("1 + 1", Some("swift"), false)
        .await
        .expect("evaluate");
    assert_eq!(result.output, "(Int) $R0 = 42");

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn cancelled_command_does_not_leak_into_the_next_one() {
    let session = common::attach(4242).await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(200),
        session.evaluate("sleep(1)", None, false),
    )
    .await;
    assert!(cancelled.is_err());

    let result = session.execute("thread backtrace 2").await.expect("execute");
    assert!(
        result.output.trim_start().starts_with("thread #2"),
        "{}",
        result.output
    );

    session.detach().await.expect("detach");
}
