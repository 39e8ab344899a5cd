//! Error types for the RAPI client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Encoding, frame-level, exchange-level and
//! transport-level failures are all captured here, along with the few
//! application-level conditions reported by the `openevse` convenience layer.

/// The error type for all RAPI client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An outgoing command could not be encoded (bad code or a parameter
    /// containing a reserved character). Caller bug, never retried.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A received line is not a well-formed RAPI frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A received line carried a checksum that does not match its content.
    #[error("checksum mismatch: expected {expected:02X}, received {received:02X}")]
    ChecksumMismatch {
        /// Checksum recomputed over the received bytes.
        expected: u8,
        /// Checksum digits the device sent.
        received: u8,
    },

    /// No reply arrived within the deadline.
    ///
    /// The transport is presumed alive; the next command can be sent.
    #[error("timeout waiting for reply")]
    Timeout,

    /// Another command is already in flight and the dispatcher is configured
    /// to fail fast instead of waiting for send rights.
    #[error("another command is in flight")]
    Busy,

    /// The controller answered `$NK`. Some firmware versions attach
    /// diagnostic codes, which are carried in `params`.
    #[error("command rejected by controller{}", fmt_params(.params))]
    Rejected {
        /// Parameters returned alongside `NK`.
        params: Vec<String>,
    },

    /// The underlying connection was lost. All pending and future commands on
    /// this connection fail with this error.
    #[error("transport closed")]
    TransportClosed,

    /// No connection has been established.
    #[error("not connected")]
    NotConnected,

    /// A transport-level error (e.g. the serial port could not be opened).
    #[error("transport error: {0}")]
    Transport(String),

    /// A reply was well-formed but its content was not what the command
    /// should return.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An invalid argument was passed to a convenience operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The controller has no real-time clock fitted.
    #[error("controller has no real-time clock")]
    NoClock,

    /// A charging-session value was requested while not charging.
    #[error("controller is not charging")]
    NotCharging,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_params(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!(": {}", params.join(" "))
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_encoding() {
        let e = Error::Encoding("parameter contains '^'".into());
        assert_eq!(e.to_string(), "encoding error: parameter contains '^'");
    }

    #[test]
    fn error_display_checksum_mismatch() {
        let e = Error::ChecksumMismatch {
            expected: 0x20,
            received: 0x2F,
        };
        assert_eq!(e.to_string(), "checksum mismatch: expected 20, received 2F");
    }

    #[test]
    fn error_display_rejected_without_params() {
        let e = Error::Rejected { params: vec![] };
        assert_eq!(e.to_string(), "command rejected by controller");
    }

    #[test]
    fn error_display_rejected_with_params() {
        let e = Error::Rejected {
            params: vec!["3".into(), "1".into()],
        };
        assert_eq!(e.to_string(), "command rejected by controller: 3 1");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for reply");
    }

    #[test]
    fn error_display_transport_closed() {
        assert_eq!(Error::TransportClosed.to_string(), "transport closed");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
