//! Error types for sbc-relay.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`RelayError`]): end the relay session
//! - **Recoverable events**: runtime issues surfaced via [`EventCallback`](crate::EventCallback)
//!
//! The component errors ([`CodecError`], [`ServerError`], [`DestinationError`])
//! are produced at the trait seams and either folded into a [`RelayError`] or
//! reported as a [`RelayEvent`](crate::RelayEvent).

use crate::server::ModuleId;

/// Fatal errors that end a relay session.
///
/// Returned from [`RelayBuilder::start()`] when the session cannot be
/// created, and from [`RelayHandle::stop()`] / [`RelayHandle::wait()`] when
/// the controller gave up. Connection loss is *not* fatal; it is retried.
///
/// [`RelayBuilder::start()`]: crate::RelayBuilder::start
/// [`RelayHandle::stop()`]: crate::RelayHandle::stop
/// [`RelayHandle::wait()`]: crate::RelayHandle::wait
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The encoder could not be initialized.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server refused to create the virtual sink.
    #[error("sink provisioning failed: {reason}")]
    Provisioning {
        /// Why provisioning failed.
        reason: String,
    },

    /// Sink enumeration ended without an entry owned by our module.
    #[error("no sink owned by module {module} in the server's sink list")]
    SinkNotFound {
        /// Module that was supposed to own the sink.
        module: ModuleId,
    },

    /// The record stream on the monitor endpoint failed.
    #[error("record stream on '{endpoint}' failed: {reason}")]
    Stream {
        /// Monitor endpoint the stream was bound to.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// A server request could not be issued.
    #[error("audio server error: {0}")]
    Server(#[from] ServerError),

    /// The controller task is no longer running.
    #[error("relay controller is not running")]
    ControllerGone,
}

/// Errors raised by the SBC codec service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Encode was attempted before `configure`.
    #[error("codec used before configuration")]
    NotConfigured,

    /// `configure` was called on an already initialized codec.
    #[error("codec is already configured")]
    AlreadyConfigured,

    /// The requested parameters are not a valid SBC configuration.
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    /// Fewer bytes than one input block were supplied.
    #[error("short input: need {needed} bytes, have {available}")]
    ShortInput {
        /// Bytes required for one block.
        needed: usize,
        /// Bytes supplied.
        available: usize,
    },

    /// Format change requested after encoding started.
    #[error("codec format is locked once encoding has started")]
    FormatLocked,

    /// The encoder reported a failure for a block.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// No encoder implementation is available in this build.
    #[error("no SBC encoder available (enable the `libsbc` feature or supply one)")]
    Unavailable,

    /// Bytes did not start with a valid SBC frame header.
    #[error("invalid SBC header: {0}")]
    InvalidHeader(String),
}

/// Errors raised while issuing requests to the audio server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A request was issued with no live connection.
    #[error("not connected to the audio server")]
    NotConnected,

    /// No async runtime is available to drive the request.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// A helper program could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A helper program exited unsuccessfully.
    #[error("'{command}' failed: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The server answered with something we could not interpret.
    #[error("unexpected server reply: {0}")]
    Protocol(String),
}

/// Errors that can occur within a [`Destination`](crate::Destination) write.
///
/// Destination errors never abort a broadcast: the fanout emits a
/// [`RelayEvent::DestinationError`] and moves on to the next destination.
///
/// [`RelayEvent::DestinationError`]: crate::RelayEvent::DestinationError
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// I/O error from the underlying writer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The receiving channel had no room; the frame was dropped.
    #[error("channel full, frame dropped")]
    Full,

    /// The write did not complete within the fanout's write timeout.
    #[error("write timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Custom error for user-implemented destinations.
    #[error("{0}")]
    Custom(String),
}

impl DestinationError {
    /// Creates a custom destination error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_not_found_display() {
        let err = RelayError::SinkNotFound { module: 27 };
        assert_eq!(
            err.to_string(),
            "no sink owned by module 27 in the server's sink list"
        );
    }

    #[test]
    fn test_codec_error_converts_into_relay_error() {
        let err: RelayError = CodecError::Unavailable.into();
        assert!(matches!(err, RelayError::Codec(CodecError::Unavailable)));
        assert!(err.to_string().starts_with("codec error"));
    }

    #[test]
    fn test_short_input_display() {
        let err = CodecError::ShortInput {
            needed: 512,
            available: 100,
        };
        assert_eq!(err.to_string(), "short input: need 512 bytes, have 100");
    }

    #[test]
    fn test_destination_error_custom() {
        let err = DestinationError::custom("speaker unplugged");
        assert_eq!(err.to_string(), "speaker unplugged");
    }

    #[test]
    fn test_destination_timeout_display() {
        let err = DestinationError::TimedOut(std::time::Duration::from_millis(50));
        assert_eq!(err.to_string(), "write timed out after 50ms");
    }

    #[test]
    fn test_destination_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: DestinationError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }
}
