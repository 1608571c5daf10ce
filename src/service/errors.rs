//! File Service Error Types
//!
//! Structured error handling for the remote listing API.
//! Maps HTTP status codes and transport failures to specific variants.

/// File service error types
///
/// `Clone` so that one failed fetch can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Unauthorized: session missing or expired")]
    Unauthorized,

    #[error("Rate limited by file service")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl ServiceError {
    /// Whether a later explicit call could reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited
                | ServiceError::Timeout
                | ServiceError::Network(_)
                | ServiceError::Server(_, _)
        )
    }

    /// Create a ServiceError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ServiceError::Unauthorized,
            404 => ServiceError::NotFound(body.to_string()),
            408 => ServiceError::Timeout,
            429 => ServiceError::RateLimited,
            500..=599 => ServiceError::Server(status, body.to_string()),
            _ => ServiceError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else if err.is_connect() {
            ServiceError::Network(err.to_string())
        } else if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::from_status(status.as_u16(), &err.to_string())
        } else {
            ServiceError::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(ServiceError::from_status(401, ""), ServiceError::Unauthorized);
        assert_eq!(
            ServiceError::from_status(404, "no folder"),
            ServiceError::NotFound("no folder".to_string())
        );
        assert_eq!(ServiceError::from_status(429, ""), ServiceError::RateLimited);
        assert_eq!(
            ServiceError::from_status(503, "down"),
            ServiceError::Server(503, "down".to_string())
        );
        assert!(matches!(
            ServiceError::from_status(418, "teapot"),
            ServiceError::Request(_)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::Timeout.is_transient());
        assert!(ServiceError::Server(500, String::new()).is_transient());
        assert!(!ServiceError::Unauthorized.is_transient());
        assert!(!ServiceError::Decode("bad json".to_string()).is_transient());
    }
}
