use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Application { code: i64, message: String },

    #[error("RPC '{operation}' failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: Box<RpcError>,
    },

    #[error("Invalid response to '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("RPC request cancelled")]
    Cancelled,
}

impl RpcError {
    /// Check if this error is likely transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            // Network failures and explicit rate limits
            RpcError::Transport(_) | RpcError::RateLimited(_) => true,
            // Gateway and overload statuses
            RpcError::Http { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            RpcError::InvalidUrl(_)
            | RpcError::Application { .. }
            | RpcError::Exhausted { .. }
            | RpcError::InvalidResponse { .. }
            | RpcError::Cancelled => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RpcError::RateLimited(_))
    }

    /// JSON-RPC error code of an application error.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Application { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn is_rate_limit_message(msg: &str) -> bool {
        let msg_lower = msg.to_lowercase();
        msg_lower.contains("rate limit")
            || msg_lower.contains("rate-limit")
            || msg_lower.contains("too many requests")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(RpcError::Transport("connection reset".into()).is_retryable());
        assert!(RpcError::RateLimited("429".into()).is_retryable());
        for status in [500, 502, 503, 504] {
            assert!(RpcError::Http { status, body: String::new() }.is_retryable());
        }
        assert!(!RpcError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!RpcError::Application { code: -32602, message: "invalid params".into() }
            .is_retryable());
        assert!(!RpcError::Cancelled.is_retryable());
    }

    #[test]
    fn test_rate_limit_messages() {
        assert!(RpcError::is_rate_limit_message("Rate limit exceeded"));
        assert!(RpcError::is_rate_limit_message("Too Many Requests"));
        assert!(!RpcError::is_rate_limit_message("execution reverted"));
    }
}
