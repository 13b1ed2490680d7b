//! In-process platform implementation for tests and `--dev` runs.
//!
//! Behaves like a scriptable messenger: tests inject inbound events and
//! inspect what the bot sent or marked read; the connector can be told to
//! reject logins to exercise the recovery path.

use crate::error::{PlatformError, Result};
use crate::traits::{Credentials, PlatformConnector, PlatformSession};
use crate::types::{ConversationId, PlatformEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const DEV_EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub conversation_id: ConversationId,
    pub body: String,
}

#[derive(Default)]
pub struct DevConnector {
    /// Number of upcoming login attempts to reject, regardless of credential.
    reject_next: AtomicU32,
    /// Reject stored-session credentials so the password fallback is taken.
    reject_stored_session: AtomicBool,
    attempted_credentials: Mutex<Vec<&'static str>>,
    last_session: Mutex<Option<Arc<DevSession>>>,
}

impl DevConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_next_logins(&self, count: u32) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    pub fn reject_stored_session(&self, reject: bool) {
        self.reject_stored_session.store(reject, Ordering::SeqCst);
    }

    /// Credential kinds seen so far, in login order.
    pub fn attempted_credentials(&self) -> Vec<&'static str> {
        self.attempted_credentials
            .lock()
            .expect("attempted_credentials lock")
            .clone()
    }

    pub fn last_session(&self) -> Option<Arc<DevSession>> {
        self.last_session.lock().expect("last_session lock").clone()
    }
}

#[async_trait]
impl PlatformConnector for DevConnector {
    async fn login(&self, credentials: &Credentials) -> Result<Arc<dyn PlatformSession>> {
        self.attempted_credentials
            .lock()
            .expect("attempted_credentials lock")
            .push(credentials.kind());

        let remaining = self.reject_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reject_next.store(remaining - 1, Ordering::SeqCst);
            return Err(PlatformError::Auth("dev connector: login rejected".into()));
        }
        if self.reject_stored_session.load(Ordering::SeqCst)
            && matches!(credentials, Credentials::StoredSession { .. })
        {
            return Err(PlatformError::Auth(
                "dev connector: stored session expired".into(),
            ));
        }

        let session = Arc::new(DevSession::new());
        *self.last_session.lock().expect("last_session lock") = Some(session.clone());
        tracing::debug!(kind = credentials.kind(), "dev login accepted");
        Ok(session)
    }
}

pub struct DevSession {
    active: AtomicBool,
    event_tx: Mutex<Option<mpsc::Sender<PlatformEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    read_marks: Mutex<Vec<ConversationId>>,
}

impl DevSession {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            event_tx: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            read_marks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Deliver an event to the attached listener, if any.
    pub async fn inject(&self, event: PlatformEvent) -> Result<()> {
        let tx = {
            let guard = self.event_tx.lock().expect("event_tx lock");
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(PlatformError::Closed);
        };
        tx.send(event).await.map_err(|_| PlatformError::Closed)
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn read_marks(&self) -> Vec<ConversationId> {
        self.read_marks.lock().expect("read_marks lock").clone()
    }
}

impl Default for DevSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformSession for DevSession {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn listen(&self) -> Result<mpsc::Receiver<PlatformEvent>> {
        if !self.is_active() {
            return Err(PlatformError::Listen("dev session inactive".into()));
        }
        let (tx, rx) = mpsc::channel(DEV_EVENT_QUEUE_DEPTH);
        *self.event_tx.lock().expect("event_tx lock") = Some(tx);
        tracing::debug!("dev listener attached");
        Ok(rx)
    }

    fn stop_listening(&self) {
        if self.event_tx.lock().expect("event_tx lock").take().is_some() {
            tracing::debug!("dev listener detached");
        }
    }

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<()> {
        if !self.is_active() {
            return Err(PlatformError::Closed);
        }
        self.read_marks
            .lock()
            .expect("read_marks lock")
            .push(conversation_id.clone());
        Ok(())
    }

    async fn send(&self, conversation_id: &ConversationId, body: &str) -> Result<()> {
        if !self.is_active() {
            return Err(PlatformError::Closed);
        }
        self.sent.lock().expect("sent lock").push(SentMessage {
            conversation_id: conversation_id.clone(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InboundMessage;

    #[tokio::test]
    async fn injected_events_reach_the_listener() {
        let session = DevSession::new();
        let mut rx = session.listen().await.expect("listen");
        session
            .inject(PlatformEvent::Message(InboundMessage {
                conversation_id: "t1".into(),
                body: "hello".to_string(),
                source_message: None,
            }))
            .await
            .expect("inject");

        match rx.recv().await {
            Some(PlatformEvent::Message(m)) => assert_eq!(m.body, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn inject_without_listener_reports_closed() {
        let session = DevSession::new();
        let err = session
            .inject(PlatformEvent::Close("bye".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Closed));
    }

    #[tokio::test]
    async fn connector_rejects_stored_session_when_told_to() {
        let connector = DevConnector::new();
        connector.reject_stored_session(true);

        let stored = Credentials::StoredSession {
            cookies: "{}".to_string(),
        };
        assert!(connector.login(&stored).await.is_err());

        let password = Credentials::Password {
            email: "bot@example.com".to_string(),
            password: "secret".to_string(),
        };
        assert!(connector.login(&password).await.is_ok());
        assert_eq!(
            connector.attempted_credentials(),
            vec!["stored_session", "password"]
        );
    }

    #[tokio::test]
    async fn send_against_inactive_session_fails() {
        let session = DevSession::new();
        session.set_active(false);
        let err = session.send(&"t1".into(), "hi").await.unwrap_err();
        assert!(matches!(err, PlatformError::Closed));
    }
}
