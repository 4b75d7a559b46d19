//! Error taxonomy shared across the session layer.

/// Everything that can go wrong inside a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Read or write failure on an otherwise-open socket.
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),
    /// The peer closed the connection, detected via a zero-length read.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// Malformed payload or an unrecognized message shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Frame length prefix above the allowed maximum.
    #[error("frame too large")]
    FrameTooLarge,
    /// Local file read failed while preparing or streaming a transfer.
    #[error("file error: {0}")]
    File(#[source] std::io::Error),
    /// Digest mismatch when a file transfer completed.
    #[error("integrity check failed for {name}")]
    Integrity { name: String },
    /// Retry budget exhausted while joining a session.
    #[error("connect failed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },
}

impl SessionError {
    /// Classify a socket error: EOF means the peer closed the connection,
    /// anything else is a failure on a live socket.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            SessionError::ConnectionClosed
        } else {
            SessionError::Connection(err)
        }
    }
}

impl From<bincode::Error> for SessionError {
    fn from(err: bincode::Error) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
