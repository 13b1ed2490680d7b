use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Opaque identifier of a chat thread on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for ConversationId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quoted/replied-to message carried alongside an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedMessage {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub body: String,
    #[serde(default)]
    pub source_message: Option<QuotedMessage>,
}

/// Events emitted by an attached listener.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Message(InboundMessage),
    Presence(serde_json::Value),
    Close(String),
    Error(String),
}
