//! Crate-level error type.

use thiserror::Error;

/// Errors surfaced by the chat client.
///
/// Malformed socket frames are deliberately absent: the frame parser turns
/// them into raw-text frames instead of failing.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Socket connect/IO failure or a channel error event.
    #[error("transport failure on {url}: {detail}")]
    Transport { url: String, detail: String },

    /// The REST service replied with a non-2xx status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A REST response body could not be decoded.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The request lacks a field its category requires.
    #[error("incomplete request: {0}")]
    ProtocolMismatch(String),

    /// Configuration file or environment could not be used.
    #[error("configuration error: {0}")]
    Config(String),

    /// A transport was asked to spawn work outside a tokio runtime.
    #[error("no async runtime available: {0}")]
    Runtime(String),
}

impl ChatError {
    /// Build a [`ChatError::Transport`] from anything displayable.
    pub fn transport(url: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        ChatError::Transport {
            url: url.into(),
            detail: detail.to_string(),
        }
    }

    /// True for failures a retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Transport { .. } => true,
            ChatError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_url() {
        let err = ChatError::transport("ws://localhost:8000/wss/battle", "connection refused");
        let text = err.to_string();
        assert!(text.contains("ws://localhost:8000/wss/battle"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_http_display() {
        let err = ChatError::Http { status: 502, url: "http://x/analysis".into() };
        assert_eq!(err.to_string(), "HTTP 502 from http://x/analysis");
    }

    #[test]
    fn test_is_transient() {
        assert!(ChatError::transport("u", "reset").is_transient());
        assert!(ChatError::Http { status: 503, url: "u".into() }.is_transient());
        assert!(ChatError::Http { status: 429, url: "u".into() }.is_transient());
        assert!(!ChatError::Http { status: 400, url: "u".into() }.is_transient());
        assert!(!ChatError::ProtocolMismatch("poet2".into()).is_transient());
        assert!(!ChatError::Decode("eof".into()).is_transient());
    }
}
