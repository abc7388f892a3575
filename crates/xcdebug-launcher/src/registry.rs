use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Mutex;
use xcdebug_debugger::DebuggerSession;

/// Trait implementing what the [SessionRegistry] needs from a session.
pub trait ManagedSession: Send + Sync + 'static {
    /// Process ID of the session's target.
    fn process_id(&self) -> u64;

    /// Returns whether the session has ended.
    fn is_terminal(&self) -> bool;

    /// Kills the target and ends the session.
    fn terminate(&self) -> impl Future<Output = crate::Result<()>> + Send;

    /// Ends the session, leaving the target running.
    fn detach(&self) -> impl Future<Output = crate::Result<()>> + Send;
}

impl ManagedSession for DebuggerSession {
    fn process_id(&self) -> u64 {
        self.pid()
    }

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn terminate(&self) -> impl Future<Output = crate::Result<()>> + Send {
        DebuggerSession::terminate(self)
    }

    fn detach(&self) -> impl Future<Output = crate::Result<()>> + Send {
        DebuggerSession::detach(self)
    }
}

/// Registry of the live debugger sessions.
///
/// Sessions are registered either under an application identifier (for
/// launched applications), or by process ID only (for attached processes).
/// There is at most one live session per process ID, and at most one
/// process ID per application identifier.
///
/// Sessions which ended on their own (the target exited, or was detached)
/// are pruned whenever the registry is queried.
pub struct SessionRegistry<S = DebuggerSession> {
    tables: Mutex<Tables<S>>,

    /// Held for a whole registration, superseded sessions included.
    registering: Mutex<()>,
}

struct Tables<S> {
    applications: IndexMap<String, u64>,
    sessions: IndexMap<u64, Arc<S>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables {
                applications: IndexMap::new(),
                sessions: IndexMap::new(),
            }),
            registering: Mutex::new(()),
        }
    }
}

impl<S: ManagedSession> SessionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` as the current session of an application.
    ///
    /// A session previously registered under the same identifier (or for the
    /// same process) is terminated and removed before the new one becomes
    /// visible. Concurrent registrations are applied one after the other,
    /// the last one winning.
    #[tracing::instrument(skip(self, session), fields(pid = session.process_id()))]
    pub async fn register_application(&self, application_id: &str, session: Arc<S>) {
        let pid = session.process_id();
        let _registering = self.registering.lock().await;

        let superseded = {
            let mut tables = self.tables.lock().await;

            let mut superseded = Vec::new();
            if let Some(old) = tables.remove_application(application_id) {
                superseded.push(old);
            }
            if let Some(old) = tables.remove_pid(pid) {
                superseded.push(old);
            }
            superseded
        };

        for old in superseded {
            if !Arc::ptr_eq(&old, &session) {
                terminate(&old).await;
            }
        }

        let mut tables = self.tables.lock().await;
        tables.sessions.insert(pid, session);
        tables.applications.insert(application_id.to_owned(), pid);

        tracing::info!("application registered");
    }

    /// Registers a session by process ID only.
    ///
    /// A different session previously registered for the same process is
    /// detached.
    #[tracing::instrument(skip_all, fields(pid = session.process_id()))]
    pub async fn insert_pid(&self, session: Arc<S>) {
        let pid = session.process_id();

        let old = self
            .tables
            .lock()
            .await
            .sessions
            .insert(pid, Arc::clone(&session));

        if let Some(old) = old.filter(|old| !Arc::ptr_eq(old, &session)) {
            detach(&old).await;
        }

        tracing::info!("session registered");
    }

    /// Returns the current process ID of an application.
    pub async fn lookup_pid(&self, application_id: &str) -> Option<u64> {
        let mut tables = self.tables.lock().await;
        tables.prune();
        tables.applications.get(application_id).copied()
    }

    /// Returns the current session of an application.
    pub async fn lookup_session(&self, application_id: &str) -> Option<Arc<S>> {
        let mut tables = self.tables.lock().await;
        tables.prune();

        let pid = tables.applications.get(application_id)?;
        tables.sessions.get(pid).cloned()
    }

    /// Returns the session of a process.
    pub async fn session_for_pid(&self, pid: u64) -> Option<Arc<S>> {
        let mut tables = self.tables.lock().await;
        tables.prune();
        tables.sessions.get(&pid).cloned()
    }

    /// Resolves the session targeted by a caller, by process ID first, then
    /// by application identifier.
    pub async fn resolve(
        &self,
        pid: Option<u64>,
        application_id: Option<&str>,
    ) -> crate::Result<Arc<S>> {
        let application_id = application_id.filter(|id| !id.is_empty());

        match (pid, application_id) {
            (Some(pid), _) => self
                .session_for_pid(pid)
                .await
                .ok_or_else(|| crate::Error::NotFound(format!("no session for process {pid}"))),
            (None, Some(id)) => self
                .lookup_session(id)
                .await
                .ok_or_else(|| crate::Error::NotFound(format!("no session for `{id}`"))),
            (None, None) => Err(crate::Error::InvalidParams(
                "either a process ID or an application identifier is required".to_owned(),
            )),
        }
    }

    /// Removes the session of an application, and terminates it.
    ///
    /// Removing an unknown application is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn remove_session(&self, application_id: &str) {
        let removed = self.tables.lock().await.remove_application(application_id);

        if let Some(session) = removed {
            terminate(&session).await;
            tracing::info!(pid = session.process_id(), "application removed");
        }
    }

    /// Removes the session of a process, and detaches from it.
    ///
    /// Removing an unknown process is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn remove_pid(&self, pid: u64) {
        let removed = self.tables.lock().await.remove_pid(pid);

        if let Some(session) = removed {
            detach(&session).await;
            tracing::info!("session removed");
        }
    }

    /// Returns the identifiers of the applications with a live session, in
    /// registration order.
    pub async fn application_ids(&self) -> Vec<String> {
        let mut tables = self.tables.lock().await;
        tables.prune();
        tables.applications.keys().cloned().collect()
    }
}

impl<S: ManagedSession> Tables<S> {
    fn remove_application(&mut self, application_id: &str) -> Option<Arc<S>> {
        let pid = self.applications.shift_remove(application_id)?;
        self.remove_pid(pid)
    }

    fn remove_pid(&mut self, pid: u64) -> Option<Arc<S>> {
        self.applications.retain(|_, known| *known != pid);
        self.sessions.shift_remove(&pid)
    }

    fn prune(&mut self) {
        let ended: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_terminal())
            .map(|(pid, _)| *pid)
            .collect();

        for pid in ended {
            tracing::debug!(pid, "pruning ended session");
            self.remove_pid(pid);
        }

        let sessions = &self.sessions;
        self.applications.retain(|_, pid| sessions.contains_key(pid));
    }
}

async fn terminate<S: ManagedSession>(session: &Arc<S>) {
    if let Err(e) = session.terminate().await {
        tracing::warn!(pid = session.process_id(), error = %e, "cannot terminate session");
    }
}

async fn detach<S: ManagedSession>(session: &Arc<S>) {
    if let Err(e) = session.detach().await {
        tracing::warn!(pid = session.process_id(), error = %e, "cannot detach session");
    }
}
