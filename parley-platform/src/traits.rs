use crate::error::Result;
use crate::types::{ConversationId, PlatformEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Credential material for one login attempt. The lifecycle manager tries
/// stored-session cookies before falling back to username/password.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Serialized session cookies, opaque to the core.
    StoredSession { cookies: String },
    Password { email: String, password: String },
}

impl Credentials {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoredSession { .. } => "stored_session",
            Self::Password { .. } => "password",
        }
    }
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Establish a session with one credential. Fails with
    /// [`crate::PlatformError::Auth`] when the platform rejects it.
    async fn login(&self, credentials: &Credentials) -> Result<Arc<dyn PlatformSession>>;
}

#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Whether the underlying connection still reports itself alive.
    fn is_active(&self) -> bool;

    /// Attach a listener. Events arrive on the returned receiver until the
    /// session closes or `stop_listening` is called.
    async fn listen(&self) -> Result<mpsc::Receiver<PlatformEvent>>;

    fn stop_listening(&self);

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<()>;

    async fn send(&self, conversation_id: &ConversationId, body: &str) -> Result<()>;
}
