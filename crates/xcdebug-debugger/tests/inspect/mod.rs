use test_log::test;
use xcdebug_debugger::{Error, MemoryFormat, Platform, SessionState, SymbolQuery};

use crate::common;

#[test(tokio::test)]
async fn stack_of_attached_process() {
    let session = common::attach(4242).await;

    let backtrace = session.get_stack(None).await.expect("stack");
    assert!(!backtrace.threads.is_empty());
    assert!(backtrace.threads.iter().all(|t| !t.frames.is_empty()));

    let main = &backtrace.threads[0];
    assert!(main.thread.selected);
    assert_eq!(main.frames[1].symbol, "main");
    assert_eq!(main.frames[1].location.as_deref(), Some("main.swift:3:5"));

    let backtrace = session.get_stack(Some(2)).await.expect("stack");
    assert_eq!(backtrace.threads.len(), 1);
    assert_eq!(backtrace.threads[0].thread.index, 2);
    assert_eq!(backtrace.threads[0].frames.len(), 1);
    assert!(!backtrace.output.contains("thread #1"));

    let err = session.get_stack(Some(7)).await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }), "{err}");

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn threads_and_variables() {
    let session = common::attach(4242).await;

    let threads = session.list_threads(Some(2)).await.expect("threads");
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].tid, Some(0x1a2b));
    assert_eq!(
        threads[0].queue.as_deref(),
        Some("com.apple.main-thread")
    );

    let err = session.list_threads(Some(9)).await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }), "{err}");

    let variables = session.get_variables(0).await.expect("variables");
    let names: Vec<_> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["count", "title", "settings"]);
    assert_eq!(variables[0].ty, "Int");
    assert_eq!(variables[2].value, "{\n  verbose = true\n}");
    assert_eq!(session.state(), SessionState::Stopped);

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn expressions() {
    let session = common::attach(4242).await;

    let result = session
        .evaluate("counter + 1", Some("swift"), false)
        .await
        .expect("evaluate");
    assert!(result.succeeded);
    assert_eq!(result.output, "(Int) $R0 = 42");

    let result = session
        .evaluate("model", None, true)
        .await
        .expect("evaluate");
    assert_eq!(result.output, "<App.Model: 0x600000c04000>");

    let err = session.evaluate("undefined", None, false).await.unwrap_err();
    match err {
        Error::CommandFailed { output, .. } => assert!(output.contains("cannot find")),
        other => panic!("unexpected error: {other}"),
    }

    let err = session.evaluate("  ", None, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    let err = session
        .evaluate("1", Some("swift; process kill"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    let err = session
        .evaluate("1\nprocess kill", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn memory() {
    let session = common::attach(4242).await;

    let result = session
        .read_memory(0x16fdff1a0, 4, MemoryFormat::Hex, 4)
        .await
        .expect("read memory");
    assert!(result.output.starts_with("0x16fdff1a0: 0x00000001"));

    let err = session
        .read_memory(0x16fdff1a0, 4, MemoryFormat::Hex, 3)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    let err = session
        .read_memory(0x16fdff1a0, 0, MemoryFormat::Bytes, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn symbols() {
    let session = common::attach(4242).await;

    let result = session
        .symbol_lookup(SymbolQuery::Address(0x100003f54))
        .await
        .expect("lookup");
    assert!(result.output.contains("Summary: App`main + 20"));

    let query = SymbolQuery::from_options(None, Some("main".to_owned()), None).expect("query");
    let result = session.symbol_lookup(query).await.expect("lookup");
    assert!(result.output.starts_with("1 match found"));

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn view_hierarchy() {
    let session = common::attach(4242).await;

    let hierarchy = session
        .view_hierarchy(Platform::Ios, None, false)
        .await
        .expect("view hierarchy");
    assert!(hierarchy.description.starts_with("<UIWindow: 0x104b0c1e0"));
    assert_eq!(hierarchy.constraints, None);

    let err = session
        .view_hierarchy(Platform::Ios, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams(_)), "{err}");

    let hierarchy = session
        .view_hierarchy(Platform::Ios, Some(0x104b0d2f0), true)
        .await
        .expect("view hierarchy");
    let constraints = hierarchy.constraints.expect("constraints");
    assert!(constraints.starts_with("horizontal:\n"));
    assert!(constraints.contains("H:|-(16)-[UILabel]"));
    assert!(constraints.contains("V:|-(8)-[UILabel]"));

    session.detach().await.expect("detach");
}

#[test(tokio::test)]
async fn status_is_cached_once_detached() {
    let session = common::attach(4242).await;

    let status = session.process_status().await.expect("status");
    assert_eq!(status.pid, 4242);
    assert_eq!(status.state, SessionState::Stopped);
    assert!(
        status
            .output
            .as_deref()
            .is_some_and(|output| output.starts_with("Process 4242 stopped"))
    );

    session.detach().await.expect("detach");

    let status = session.process_status().await.expect("status");
    assert_eq!(status.state, SessionState::Detached);
    assert_eq!(status.output, None);
    assert_eq!(
        status.last_stop.map(|stop| stop.reason).as_deref(),
        Some("signal SIGSTOP")
    );
}
