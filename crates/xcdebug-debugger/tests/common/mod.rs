use std::time::Duration;

use xcdebug_debugger::{Command, DebuggerSession, SessionConfig};

/// Session configuration driving the fake debugger of `tests/fake`.
pub fn fake_config() -> SessionConfig {
    let script = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fake/lldb.sh");

    SessionConfig::default()
        .with_debugger(Command::new("sh").arg(script))
        .with_timeout(Duration::from_secs(5))
}

pub async fn attach(pid: u64) -> DebuggerSession {
    DebuggerSession::attach(fake_config(), pid)
        .await
        .expect("attach")
}

pub async fn launch(stop_at_entry: bool) -> DebuggerSession {
    let command = Command::new("/tmp/App.app/Contents/MacOS/App").arg("--verbose");

    let (session, _) = DebuggerSession::launch_and_attach(fake_config(), &command, stop_at_entry)
        .await
        .expect("launch");

    session
}
