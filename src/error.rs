//! Error types for canopy-rpc.

use thiserror::Error;

/// Generic fallback message for failures that carry no message of their own.
pub const GENERIC_FAILURE: &str = "Something went wrong.";

/// Main error type for all canopy operations.
///
/// The protocol-level taxonomy maps onto HTTP statuses via [`CanopyError::status`]:
/// body-parsing failures and handler failures answer 400, unresolvable paths
/// answer 404. Everything else surfaces as 400 with the error's message.
#[derive(Debug, Error)]
pub enum CanopyError {
    /// I/O error during transport operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed request envelope, detected before any handler runs.
    #[error("{0}")]
    BodyParsing(String),

    /// Path could not be resolved to a callable node, or a channel was
    /// reached over the unary call path.
    #[error("{0}")]
    Path(String),

    /// A handler (or a guard factory) failed during execution.
    #[error("{0}")]
    Handler(String),

    /// Connection closed unexpectedly. Constructed by transport
    /// implementations; the in-process transport never fails this way.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl CanopyError {
    /// HTTP status this error answers with at the dispatcher boundary.
    pub fn status(&self) -> u16 {
        match self {
            CanopyError::Path(_) => 404,
            _ => 400,
        }
    }

    /// Error name reported in subscription `error` messages.
    pub fn name(&self) -> &'static str {
        match self {
            CanopyError::BodyParsing(_) => "BodyParsingError",
            CanopyError::Path(_) => "PathError",
            _ => "Error",
        }
    }

    /// Shorthand for a handler failure with the given message.
    pub fn handler(message: impl Into<String>) -> Self {
        CanopyError::Handler(message.into())
    }

    /// Access denied from a guarded node. Surfaced as an ordinary handler
    /// failure, not a distinct protocol error.
    pub fn access_denied(message: impl Into<String>) -> Self {
        CanopyError::Handler(message.into())
    }
}

/// Result type alias using CanopyError.
pub type Result<T> = std::result::Result<T, CanopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CanopyError::BodyParsing("bad".into()).status(), 400);
        assert_eq!(CanopyError::Path("missing".into()).status(), 404);
        assert_eq!(CanopyError::Handler("boom".into()).status(), 400);
        assert_eq!(CanopyError::ConnectionClosed.status(), 400);
    }

    #[test]
    fn test_error_names() {
        assert_eq!(
            CanopyError::BodyParsing("x".into()).name(),
            "BodyParsingError"
        );
        assert_eq!(CanopyError::Path("x".into()).name(), "PathError");
        assert_eq!(CanopyError::Handler("x".into()).name(), "Error");
    }

    #[test]
    fn test_message_is_verbatim() {
        let err = CanopyError::handler("id must be a non-empty string");
        assert_eq!(err.to_string(), "id must be a non-empty string");
    }
}
