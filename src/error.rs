//! Error taxonomy for the link.
//!
//! Every fallible operation in the crate returns [`LinkError`]. The variants
//! separate conditions the caller is expected to handle differently: a
//! timeout is recoverable on the same handle, a transport failure closes the
//! handle, and a rejected command is an ordinary answer from the peer.

use std::time::Duration;

use thiserror::Error;

use crate::ipc::client::LinkState;

/// Errors surfaced by the registry, the transport, the client handle and the
/// codec.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Every peer name in the pool is held by a live handle.
    #[error("All {pool_size} peer names are in use; close a link first")]
    Capacity {
        /// Number of names in the pool
        pool_size: usize,
    },

    /// The peer could not be reached or refused the conversation.
    #[error("Connection to {peer} failed: {reason}")]
    Connection {
        /// Peer name (or socket path) the connect targeted
        peer: String,
        /// Human-readable cause
        reason: String,
        /// Underlying I/O error, when there is one
        #[source]
        source: Option<std::io::Error>,
    },

    /// No reply arrived within the handle's timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The channel failed underneath a request (peer died, stream corrupted).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer answered with the failure sentinel.
    #[error("Peer rejected command: {command}")]
    RemoteRejected {
        /// Name of the rejected operation
        command: String,
    },

    /// The handle was never opened or has been closed.
    #[error("Link is not connected")]
    NotConnected,

    /// `open()` was called on a handle that already left `Unconnected`.
    #[error("Link was already opened (state: {0:?})")]
    AlreadyOpened(LinkState),

    /// An argument cannot be represented on the wire.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The reply did not match the operation's reply shape.
    #[error("Could not decode reply to {command} ({reply:?}): {reason}")]
    Decode {
        /// Operation whose reply failed to decode
        command: String,
        /// Raw reply text (trimmed)
        reply: String,
        /// What went wrong
        reason: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LinkError {
    /// Shorthand for a [`LinkError::Connection`] without an I/O source.
    pub fn connection(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        LinkError::Connection {
            peer: peer.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Whether repeating the same call on the same handle can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Timeout(_))
    }

    /// Whether the error closed the handle it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Transport(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                LinkError::Connection {
                    peer: "unknown".to_string(),
                    reason: "peer is not running".to_string(),
                    source: Some(err),
                }
            }
            _ => LinkError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let timeout_err = LinkError::Timeout(Duration::from_secs(3));
        assert_eq!(timeout_err.to_string(), "Request timed out after 3s");

        let capacity_err = LinkError::Capacity { pool_size: 2 };
        assert_eq!(
            capacity_err.to_string(),
            "All 2 peer names are in use; close a link first"
        );

        let rejected = LinkError::RemoteRejected {
            command: "GetTrace".to_string(),
        };
        assert_eq!(rejected.to_string(), "Peer rejected command: GetTrace");

        let conn = LinkError::connection("ZEMAX1", "handshake refused");
        assert_eq!(
            conn.to_string(),
            "Connection to ZEMAX1 failed: handshake refused"
        );
    }

    #[test]
    fn test_link_error_from_io() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: LinkError = not_found.into();
        assert!(matches!(err, LinkError::Connection { source: Some(_), .. }));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: LinkError = refused.into();
        assert!(matches!(err, LinkError::Connection { .. }));

        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: LinkError = broken.into();
        assert!(matches!(err, LinkError::Transport(_)));
    }

    #[test]
    fn test_retry_and_fatal_classification() {
        assert!(LinkError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!LinkError::NotConnected.is_retryable());
        assert!(LinkError::Transport("eof".into()).is_fatal());
        assert!(!LinkError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!LinkError::RemoteRejected {
            command: "GetSystem".into()
        }
        .is_fatal());
    }
}
