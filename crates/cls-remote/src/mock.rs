//! Scripted in-memory connections for session and race tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cls_types::Endpoint;
use parking_lot::Mutex;

use crate::error::{RemoteError, Result};
use crate::transport::{
    Connector, DebugConnection, Introspector, RemoteValue, ThreadId, TrapId, TypeRef,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Arm,
    Poll,
    Disarm,
    Resume,
    Detach,
    Invoke(String),
}

#[derive(Clone, Debug, Default)]
pub struct MockScript {
    pub project_root: String,
    /// Polls answered with "no hit" before the trap fires
    pub polls_before_hit: usize,
    /// The trap only reports a hit once it has been disarmed
    pub hit_only_after_disarm: bool,
    pub resume_error: bool,
    pub connect_error: bool,
    pub connect_delay: Duration,
}

pub struct MockConnection {
    script: MockScript,
    polls: usize,
    disarmed: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockConnection {
    pub fn new(script: MockScript) -> Self {
        Self::with_log(script, Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_log(script: MockScript, calls: Arc<Mutex<Vec<Call>>>) -> Self {
        Self {
            script,
            polls: 0,
            disarmed: false,
            calls,
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Introspector for MockConnection {
    async fn get_static_property(
        &mut self,
        _thread: ThreadId,
        ty: TypeRef<'_>,
        property: &str,
    ) -> Result<RemoteValue> {
        self.record(Call::Invoke(format!("{}.{property}", ty.name)));
        Err(RemoteError::call_failed("no such property"))
    }

    async fn call_static_method(
        &mut self,
        _thread: ThreadId,
        ty: TypeRef<'_>,
        method: &str,
        _arg_types: &[&str],
        _args: &[RemoteValue],
    ) -> Result<RemoteValue> {
        self.record(Call::Invoke(format!("{}.{method}", ty.name)));
        match (ty.name, method) {
            ("System.IO.Directory", "GetCurrentDirectory") => {
                Ok(RemoteValue::Str(self.script.project_root.clone()))
            }
            _ => Err(RemoteError::call_failed("no such method")),
        }
    }

    async fn get_instance_field(
        &mut self,
        _thread: ThreadId,
        _object: &RemoteValue,
        field: &str,
    ) -> Result<RemoteValue> {
        self.record(Call::Invoke(field.to_string()));
        Err(RemoteError::call_failed("no such field"))
    }

    async fn construct_instance(&mut self, _thread: ThreadId, ty: TypeRef<'_>) -> Result<RemoteValue> {
        self.record(Call::Invoke(format!("new {}", ty.name)));
        Err(RemoteError::call_failed("no such type"))
    }
}

#[async_trait]
impl DebugConnection for MockConnection {
    async fn arm_safepoint(&mut self) -> Result<TrapId> {
        self.record(Call::Arm);
        self.disarmed = false;
        Ok(TrapId(1))
    }

    async fn poll_safepoint(&mut self, _trap: TrapId, timeout: Duration) -> Result<Option<ThreadId>> {
        self.record(Call::Poll);
        let hit = if self.script.hit_only_after_disarm {
            self.disarmed
        } else {
            self.polls >= self.script.polls_before_hit
        };
        self.polls += 1;
        if hit {
            Ok(Some(ThreadId(7)))
        } else {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
    }

    async fn disarm(&mut self, _trap: TrapId) -> Result<()> {
        self.record(Call::Disarm);
        self.disarmed = true;
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.record(Call::Resume);
        if self.script.resume_error {
            Err(RemoteError::RemoteDisconnected)
        } else {
            Ok(())
        }
    }

    async fn detach(&mut self) -> Result<()> {
        self.record(Call::Detach);
        Ok(())
    }
}

/// Connector serving one script per endpoint and logging calls per endpoint
#[derive(Default)]
pub struct MockConnector {
    scripts: Vec<(Endpoint, MockScript)>,
    logs: Mutex<Vec<(Endpoint, Arc<Mutex<Vec<Call>>>)>>,
}

impl MockConnector {
    pub fn new(scripts: Vec<(Endpoint, MockScript)>) -> Self {
        Self {
            scripts,
            logs: Mutex::new(Vec::new()),
        }
    }

    /// Calls made on every connection opened to `endpoint`
    pub fn calls_for(&self, endpoint: Endpoint) -> Vec<Call> {
        self.logs
            .lock()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .flat_map(|(_, log)| log.lock().clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DebugConnection>> {
        let script = self
            .scripts
            .iter()
            .find(|(e, _)| e == endpoint)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| {
                RemoteError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "nothing listening",
                ))
            })?;

        tokio::time::sleep(script.connect_delay).await;
        if script.connect_error {
            return Err(RemoteError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        self.logs.lock().push((*endpoint, Arc::clone(&log)));
        Ok(Box::new(MockConnection::with_log(script, log)))
    }
}
