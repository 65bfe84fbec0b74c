use std::fmt;

use cls_types::Endpoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not connect to the debugger agent: {}", FailureList(.failures))]
    ConnectionFailed { failures: Vec<(Endpoint, RemoteError)> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("remote process disconnected")]
    RemoteDisconnected,

    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),

    #[error("session already disposed")]
    Disposed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub(crate) fn call_failed(message: impl Into<String>) -> Self {
        Self::RemoteCallFailed(message.into())
    }

    pub(crate) fn timed_out() -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connection attempt timed out",
        ))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

struct FailureList<'a>(&'a [(Endpoint, RemoteError)]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no endpoint to try");
        }
        for (i, (endpoint, error)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{endpoint}: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_lists_endpoints() {
        let err = RemoteError::ConnectionFailed {
            failures: vec![
                (Endpoint::localhost(56001), RemoteError::RemoteDisconnected),
                (Endpoint::localhost(55001), RemoteError::timed_out()),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("127.0.0.1:56001: remote process disconnected"));
        assert!(message.contains("127.0.0.1:55001: I/O error: connection attempt timed out"));
    }

    #[test]
    fn test_connection_failed_without_endpoints() {
        let err = RemoteError::ConnectionFailed { failures: vec![] };
        assert!(err.to_string().ends_with("no endpoint to try"));
    }
}
