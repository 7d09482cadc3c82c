/// Error type shared by the transport, decoder and client layers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used to pick a log level and decide on fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Cancelled,
    ClientError,
    ServerError,
    Network,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400..=499 => ErrorCategory::ClientError,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl ChatError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::Cancelled => ErrorCategory::Cancelled,
            ChatError::Transport(_) => ErrorCategory::Network,
            ChatError::Upstream { status, .. } => category_from_upstream_status(*status),
            ChatError::Config(_) | ChatError::Decode(_) | ChatError::Internal(_) => {
                ErrorCategory::Unknown
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ChatError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        ChatError::Transport(err.to_string())
    }
}

impl From<crate::config::ConfigError> for ChatError {
    fn from(err: crate::config::ConfigError) -> Self {
        ChatError::Config(err.to_string())
    }
}

/// Rejection returned by the placeholder reconciler.
///
/// These are contract violations that callers absorb (log and move on); they
/// never reach the conversation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("no placeholder registered for request {0}")]
    UnknownRequest(u64),
    #[error("request {0} has no open placeholder")]
    NotOpen(u64),
    #[error("request {0} is already resolved")]
    AlreadyResolved(u64),
    #[error("request {0} was cancelled")]
    Cancelled(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_categories() {
        assert_eq!(category_from_upstream_status(404), ErrorCategory::ClientError);
        assert_eq!(category_from_upstream_status(503), ErrorCategory::ServerError);
        assert_eq!(category_from_upstream_status(302), ErrorCategory::Unknown);
    }

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(ChatError::Cancelled.is_cancelled());
        assert!(!ChatError::Transport("reset".to_string()).is_cancelled());
        assert_eq!(ChatError::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_display_formats() {
        let err = ChatError::Upstream {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream error: status=502, message=bad gateway"
        );
        assert_eq!(
            ReconcileError::AlreadyResolved(7).to_string(),
            "request 7 is already resolved"
        );
    }
}
