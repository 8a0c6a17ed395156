use thiserror::Error;

/// Errors returned by the codec, the connection and the scopes layered on it.
#[derive(Error, Debug)]
pub enum StompError {
    /// I/O-level error on the underlying stream
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame framing was violated (missing NUL, lying content-length,
    /// unterminated body, unknown command)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// A header line without a `:` separator, or header text that is not UTF-8
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// Unknown or dangling escape sequence in a header (1.1 and later)
    #[error("invalid escape sequence in header: {0}")]
    InvalidHeaderEscape(String),
    /// The broker negotiated a version the client never offered
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),
    /// The negotiated protocol has no such command (NACK on 1.0)
    #[error("command {command} is not supported by STOMP {version}")]
    UnsupportedCommand { command: String, version: String },
    /// A required value could not be determined from the arguments
    #[error("invalid argument: {0}")]
    Argument(String),
    /// `begin` called on a transaction that is already running
    #[error("transaction '{0}' has already been started")]
    TransactionStarted(String),
    /// A transactional frame was issued after commit or abort
    #[error("transaction '{0}' has already been finalized")]
    TransactionFinalized(String),
    /// The broker answered CONNECT with an ERROR frame
    #[error("broker rejected connection: {message}")]
    ServerRejected {
        message: String,
        body: Option<String>,
    },
    /// Protocol-level error (unexpected frame during the handshake)
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No open stream
    #[error("not connected")]
    NotConnected,
    /// `connect` called while a stream is already open
    #[error("already connected")]
    AlreadyConnected,
    /// The reconnect budget ran out
    #[error("reconnect retries exceeded after {0} attempts")]
    RetriesExceeded(u32),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// The broker URI could not be parsed
    #[error("invalid broker uri: {0}")]
    InvalidUri(String),
}

impl StompError {
    /// True for stream failures, the class of errors a reconnect can fix.
    pub fn is_io(&self) -> bool {
        matches!(self, StompError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, StompError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_errors_are_recoverable() {
        let err: StompError = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_io());
        assert!(err.to_string().contains("io error"));
        assert!(!StompError::NotConnected.is_io());
    }

    #[test]
    fn unsupported_command_display_names_version() {
        let err = StompError::UnsupportedCommand {
            command: "NACK".into(),
            version: "1.0".into(),
        };
        let display = err.to_string();
        assert!(display.contains("NACK"));
        assert!(display.contains("1.0"));
    }
}
