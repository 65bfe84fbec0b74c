use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use cls_types::{Endpoint, ProcessId};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteError, Result};
use crate::transport::{DebugConnection, RemoteValue, ThreadId, TrapId, TypeRef};

/// Slice of a single safepoint poll; cancellation is observed between slices
const POLL_SLICE: Duration = Duration::from_millis(100);

const DIRECTORY_TYPE: TypeRef<'static> = TypeRef::new("System.IO.Directory");

type SharedConnection = Arc<Mutex<Box<dyn DebugConnection>>>;

/// A connection to one target process plus what was learnt while connecting
pub struct RemoteSession {
    pid: Option<ProcessId>,
    endpoint: Endpoint,
    project_root: String,
    connection: Option<SharedConnection>,
}

impl RemoteSession {
    pub(crate) fn new(pid: Option<ProcessId>, endpoint: Endpoint, connection: Box<dyn DebugConnection>) -> Self {
        Self {
            pid,
            endpoint,
            project_root: String::new(),
            connection: Some(Arc::new(Mutex::new(connection))),
        }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Working directory of the target, read during connect
    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    pub fn is_disposed(&self) -> bool {
        self.connection.is_none()
    }

    fn connection(&self) -> Result<SharedConnection> {
        self.connection.clone().ok_or(RemoteError::Disposed)
    }

    /// Pause once to read the target's working directory
    pub(crate) async fn load_project_root(&mut self, cancel: &CancellationToken) -> Result<()> {
        let scope = self.wait_and_enter_paused_scope(cancel).await?;
        let root = scope
            .call_static_method(DIRECTORY_TYPE, "GetCurrentDirectory", &[], &[])
            .await
            .and_then(RemoteValue::into_string);
        let released = scope.release().await;
        let root = root?;
        released?;
        self.project_root = root;
        Ok(())
    }

    /// Arm the main-loop safepoint, wait for a thread to hit it, and return
    /// a scope bound to that thread. The trap is disarmed on every path.
    pub async fn wait_and_enter_paused_scope(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<PausedScope<'_>> {
        let connection = self.connection()?;
        let thread = {
            let mut conn = connection.lock().await;
            let trap = conn.arm_safepoint().await?;
            tracing::debug!(endpoint = %self.endpoint, ?trap, "Armed safepoint");

            let outcome = wait_for_hit(&mut **conn, trap, cancel).await;
            let disarmed = conn.disarm(trap).await;

            match (outcome, disarmed) {
                (Ok(thread), Ok(())) => thread,
                (Ok(_), Err(e)) => {
                    if let Err(resume_err) = conn.resume().await {
                        tracing::warn!(error = %resume_err, "Failed to resume after disarm failure");
                    }
                    return Err(e);
                }
                (Err(e), disarmed) => {
                    if let Err(disarm_err) = disarmed {
                        tracing::warn!(error = %disarm_err, "Failed to disarm safepoint");
                    } else if let Ok(Some(_)) = conn.poll_safepoint(trap, Duration::ZERO).await {
                        // Hit landed between the last poll and the disarm
                        if let Err(resume_err) = conn.resume().await {
                            tracing::warn!(error = %resume_err, "Failed to resume late safepoint hit");
                        }
                    }
                    return Err(e);
                }
            }
        };

        tracing::info!(endpoint = %self.endpoint, ?thread, "Target paused");
        Ok(PausedScope {
            connection,
            thread,
            released: false,
            _session: PhantomData,
        })
    }

    /// Enter a paused scope, run `body` in it, and always release it.
    ///
    /// The body's error wins over a release error.
    pub async fn with_paused_scope<T, E, F>(&mut self, cancel: &CancellationToken, body: F) -> std::result::Result<T, E>
    where
        E: From<RemoteError>,
        F: for<'a> FnOnce(&'a PausedScope<'a>) -> BoxFuture<'a, std::result::Result<T, E>>,
    {
        let scope = self.wait_and_enter_paused_scope(cancel).await?;
        let result = body(&scope).await;
        let released = scope.release().await;
        let value = result?;
        released?;
        Ok(value)
    }

    /// Detach from the target. Safe to call more than once.
    pub async fn dispose(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let mut conn = connection.lock().await;
        match conn.detach().await {
            Ok(()) => tracing::debug!(endpoint = %self.endpoint, "Detached"),
            Err(RemoteError::RemoteDisconnected) => {}
            Err(e) => tracing::warn!(endpoint = %self.endpoint, error = %e, "Detach failed"),
        }
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("pid", &self.pid)
            .field("endpoint", &self.endpoint)
            .field("project_root", &self.project_root)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let endpoint = self.endpoint;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = connection.lock().await.detach().await {
                    tracing::debug!(%endpoint, error = %e, "Best-effort detach failed");
                }
            });
        } else {
            tracing::warn!(%endpoint, "Session dropped outside a runtime; target left attached");
        }
    }
}

async fn wait_for_hit(
    conn: &mut (dyn DebugConnection + '_),
    trap: TrapId,
    cancel: &CancellationToken,
) -> Result<ThreadId> {
    loop {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        if let Some(thread) = conn.poll_safepoint(trap, POLL_SLICE).await? {
            return Ok(thread);
        }
    }
}

/// Interval during which the target is suspended at the safepoint.
///
/// Mutably borrows its session, so only one scope can be live at a time.
pub struct PausedScope<'s> {
    connection: SharedConnection,
    thread: ThreadId,
    released: bool,
    _session: PhantomData<&'s mut RemoteSession>,
}

impl PausedScope<'_> {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub async fn get_static_property(&self, ty: TypeRef<'_>, property: &str) -> Result<RemoteValue> {
        let mut conn = self.connection.lock().await;
        conn.get_static_property(self.thread, ty, property).await
    }

    pub async fn call_static_method(
        &self,
        ty: TypeRef<'_>,
        method: &str,
        arg_types: &[&str],
        args: &[RemoteValue],
    ) -> Result<RemoteValue> {
        let mut conn = self.connection.lock().await;
        conn.call_static_method(self.thread, ty, method, arg_types, args)
            .await
    }

    pub async fn get_instance_field(&self, object: &RemoteValue, field: &str) -> Result<RemoteValue> {
        let mut conn = self.connection.lock().await;
        conn.get_instance_field(self.thread, object, field).await
    }

    pub async fn construct_instance(&self, ty: TypeRef<'_>) -> Result<RemoteValue> {
        let mut conn = self.connection.lock().await;
        conn.construct_instance(self.thread, ty).await
    }

    /// Resume the target. A target that already went away counts as resumed.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let mut conn = self.connection.lock().await;
        match conn.resume().await {
            Ok(()) => {
                tracing::info!(thread = ?self.thread, "Target resumed");
                Ok(())
            }
            Err(RemoteError::RemoteDisconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PausedScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let connection = Arc::clone(&self.connection);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = connection.lock().await.resume().await {
                    tracing::warn!(error = %e, "Best-effort resume failed");
                }
            });
        } else {
            tracing::warn!("Paused scope dropped outside a runtime; target left suspended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockConnection, MockScript};

    fn session(script: MockScript) -> (RemoteSession, Arc<parking_lot::Mutex<Vec<Call>>>) {
        let conn = MockConnection::new(script);
        let calls = conn.calls();
        (
            RemoteSession::new(Some(42), Endpoint::localhost(56042), Box::new(conn)),
            calls,
        )
    }

    #[tokio::test]
    async fn test_scope_resumes_exactly_once_when_body_fails() {
        let (mut session, calls) = session(MockScript::default());
        let cancel = CancellationToken::new();

        let result: std::result::Result<(), RemoteError> = session
            .with_paused_scope(&cancel, |_scope| {
                Box::pin(async { Err(RemoteError::call_failed("boom")) })
            })
            .await;

        assert!(matches!(result, Err(RemoteError::RemoteCallFailed(ref m)) if m == "boom"));
        let calls = calls.lock().clone();
        assert_eq!(
            calls,
            vec![Call::Arm, Call::Poll, Call::Disarm, Call::Resume]
        );
    }

    #[tokio::test]
    async fn test_scope_reads_values() {
        let (mut session, _calls) = session(MockScript {
            project_root: "/work/Project".into(),
            ..MockScript::default()
        });
        let cancel = CancellationToken::new();
        session.load_project_root(&cancel).await.unwrap();
        assert_eq!(session.project_root(), "/work/Project");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_disarms() {
        let (mut session, calls) = session(MockScript {
            polls_before_hit: usize::MAX,
            ..MockScript::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = session.wait_and_enter_paused_scope(&cancel).await;
        assert!(matches!(result, Err(RemoteError::Cancelled)));

        let calls = calls.lock().clone();
        assert_eq!(calls.first(), Some(&Call::Arm));
        assert!(calls.contains(&Call::Disarm));
        assert!(!calls.contains(&Call::Resume));
    }

    #[tokio::test]
    async fn test_late_hit_after_cancel_is_resumed() {
        let (mut session, calls) = session(MockScript {
            hit_only_after_disarm: true,
            ..MockScript::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = session.wait_and_enter_paused_scope(&cancel).await;
        assert!(matches!(result, Err(RemoteError::Cancelled)));
        assert_eq!(
            calls.lock().clone(),
            vec![Call::Arm, Call::Disarm, Call::Poll, Call::Resume]
        );
    }

    #[tokio::test]
    async fn test_operations_after_dispose_fail() {
        let (mut session, calls) = session(MockScript::default());
        session.dispose().await;
        session.dispose().await;
        assert!(session.is_disposed());

        let cancel = CancellationToken::new();
        assert!(matches!(
            session.wait_and_enter_paused_scope(&cancel).await,
            Err(RemoteError::Disposed)
        ));
        assert_eq!(calls.lock().clone(), vec![Call::Detach]);
    }

    #[tokio::test]
    async fn test_dropped_scope_schedules_resume() {
        let (mut session, calls) = session(MockScript::default());
        let cancel = CancellationToken::new();
        {
            let _scope = session.wait_and_enter_paused_scope(&cancel).await.unwrap();
        }
        for _ in 0..50 {
            if calls.lock().contains(&Call::Resume) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            calls.lock().iter().filter(|c| **c == Call::Resume).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_release_swallows_disconnect() {
        let (mut session, _calls) = session(MockScript {
            resume_error: true,
            ..MockScript::default()
        });
        let cancel = CancellationToken::new();
        let scope = session.wait_and_enter_paused_scope(&cancel).await.unwrap();
        assert!(scope.release().await.is_ok());
    }
}
