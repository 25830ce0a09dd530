//! Error types for the wirechat engine

use thiserror::Error;

/// Main error type for wirechat engine operations
///
/// Nothing in this taxonomy is fatal to the process: transport failures
/// degrade to reconnection, protocol failures skip the offending frame,
/// and application errors are surfaced for display while the connection
/// stays active.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Transport-level failure (connect, read, or write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or undecodable inbound frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server-reported application error (an `error` frame)
    #[error("Server error: {0}")]
    Application(String),

    /// Operation requires an active, authenticated connection
    #[error("Not connected")]
    NotConnected,

    /// A connect attempt was issued while the session is already active
    #[error("Already connected")]
    AlreadyConnected,

    /// Authentication handshake did not complete
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A send was issued while another send is still awaiting confirmation
    #[error("A send is already in flight for this dispatcher")]
    SendInFlight,

    /// Sending failed after the optimistic entry was inserted.
    ///
    /// Carries the original content so the caller can offer a retry
    /// without the user retyping.
    #[error("Send failed: {reason}")]
    SendFailed {
        /// The content that failed to send
        content: String,
        /// Why the send failed
        reason: String,
    },

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl ChatError {
    /// The original message content preserved for retry, if this error
    /// carries one.
    pub fn retry_content(&self) -> Option<&str> {
        match self {
            ChatError::SendFailed { content, .. } => Some(content),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::Transport("connection refused".to_string());
        assert_eq!(format!("{}", err), "Transport error: connection refused");
    }

    #[test]
    fn test_send_failed_preserves_content() {
        let err = ChatError::SendFailed {
            content: "hello there".to_string(),
            reason: "socket closed".to_string(),
        };
        assert_eq!(err.retry_content(), Some("hello there"));
        assert_eq!(format!("{}", err), "Send failed: socket closed");
    }

    #[test]
    fn test_retry_content_absent_for_other_errors() {
        assert!(ChatError::NotConnected.retry_content().is_none());
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ChatError = json_err.into();
        assert!(matches!(err, ChatError::Serialization(_)));
    }
}
