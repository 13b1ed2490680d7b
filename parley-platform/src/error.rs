use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Every configured credential path failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("listen failed: {0}")]
    Listen(String),

    #[error("send failed: {0}")]
    Send(String),

    /// The session is gone; outstanding calls against it fail with this.
    #[error("session closed")]
    Closed,
}
