//! Attaching to a running editor through its soft debugger agent.
//!
//! A [`RemoteSession`] owns one connection. Everything that touches the
//! target happens inside a [`PausedScope`], entered when the editor main
//! thread reaches a safepoint and left by resuming it.

mod discovery;
mod error;
#[cfg(test)]
mod mock;
mod race;
mod sdwp;
mod session;
mod transport;

pub use discovery::{CandidateProcess, ProcessInfo, discover_candidates, match_candidate};
pub use error::{RemoteError, Result};
pub use race::{candidate_endpoints, connect, connect_endpoint, connect_process, discover_and_connect_all};
pub use sdwp::{MonoConnection, MonoConnector};
pub use session::{PausedScope, RemoteSession};
pub use transport::{
    Connector, DebugConnection, Introspector, ObjectId, RemoteValue, ThreadId, TrapId, TypeId, TypeRef,
};
