use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider signalled rate limiting (HTTP 429). Retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Rate-limit retries exhausted by the caller.
    #[error("rate limit retries exhausted after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
