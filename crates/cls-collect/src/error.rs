use cls_format::FormatError;
use cls_remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("could not build the log document: {0}")]
    Format(#[from] FormatError),
}

impl CollectError {
    /// The target went away while we were reading from it
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::RemoteDisconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_detection() {
        assert!(CollectError::from(RemoteError::RemoteDisconnected).is_disconnect());
        assert!(!CollectError::from(RemoteError::Cancelled).is_disconnect());
        assert!(!CollectError::from(FormatError::InvalidContentType("".into())).is_disconnect());
    }
}
