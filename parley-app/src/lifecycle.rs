//! Session lifecycle: recurring activity checks, login fallback chain, and
//! the three-strike recovery halt.

use crate::config::ParleyConfig;
use crate::handler::ConversationHandler;
use chrono::Timelike;
use parley_platform::{Credentials, PlatformConnector, PlatformEvent, PlatformSession};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const MAX_LOGIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// `[start, end]` local hours; `start > end` wraps past midnight.
    pub online_hours: [u8; 2],
    pub check_interval: Duration,
    pub max_login_attempts: u32,
}

impl LifecycleSettings {
    pub fn from_config(cfg: &ParleyConfig) -> Self {
        Self {
            online_hours: cfg.platform.online_hours,
            check_interval: Duration::from_secs(cfg.platform.activity_check_interval_secs),
            max_login_attempts: MAX_LOGIN_ATTEMPTS,
        }
    }
}

/// Keeps exactly one platform session alive during online hours.
///
/// Every check either confirms the current session, re-establishes a dead
/// one, or tears down outside the online window. Repeated login failures
/// count as strikes; at the limit the manager halts permanently and stops
/// touching the platform, but the process stays up.
pub struct SessionLifecycleManager {
    connector: Arc<dyn PlatformConnector>,
    credentials: Vec<Credentials>,
    handler: Arc<ConversationHandler>,
    settings: LifecycleSettings,
    session: Arc<Mutex<Option<Arc<dyn PlatformSession>>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    failed_logins: AtomicU32,
    halted: AtomicBool,
    /// Local hour of day, injectable for deterministic tests.
    now_hour: fn() -> u8,
}

fn local_hour() -> u8 {
    chrono::Local::now().hour() as u8
}

/// Inclusive start, and `start > end` wraps past midnight: `[22, 6]` means
/// 22:00 through 05:59.
pub fn is_within_online_hours(hour: u8, online_hours: [u8; 2]) -> bool {
    let [start, end] = online_hours;
    if start > end {
        hour >= start || hour < end
    } else {
        start <= hour && hour <= end
    }
}

impl SessionLifecycleManager {
    pub fn new(
        connector: Arc<dyn PlatformConnector>,
        credentials: Vec<Credentials>,
        handler: Arc<ConversationHandler>,
        settings: LifecycleSettings,
    ) -> Self {
        Self::with_clock(connector, credentials, handler, settings, local_hour)
    }

    pub fn with_clock(
        connector: Arc<dyn PlatformConnector>,
        credentials: Vec<Credentials>,
        handler: Arc<ConversationHandler>,
        settings: LifecycleSettings,
        now_hour: fn() -> u8,
    ) -> Self {
        Self {
            connector,
            credentials,
            handler,
            settings,
            session: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
            failed_logins: AtomicU32::new(0),
            halted: AtomicBool::new(false),
            now_hour,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Run checks forever, spaced by `check_interval`, until halted.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.check().await;
                if self.is_halted() {
                    tracing::error!(
                        max_attempts = self.settings.max_login_attempts,
                        "login retries exhausted; session recovery halted"
                    );
                    return;
                }
                tokio::time::sleep(self.settings.check_interval).await;
            }
        })
    }

    /// One activity check. Idempotent: a healthy session with a live pump is
    /// left alone.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn check(&self) {
        if self.is_halted() {
            return;
        }

        let hour = (self.now_hour)();
        if !is_within_online_hours(hour, self.settings.online_hours) {
            self.go_offline(hour);
            return;
        }

        if self.session_is_healthy() {
            return;
        }
        self.teardown();

        // A strike only clears once the session is fully usable: login AND
        // listener attach must both succeed.
        match self.login().await {
            Some(session) => match self.attach_listener(session).await {
                Ok(()) => {
                    self.failed_logins.store(0, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(%e, "listener attach failed; will retry next check");
                    self.strike();
                }
            },
            None => self.strike(),
        }
    }

    fn session_is_healthy(&self) -> bool {
        let alive = self
            .session
            .lock()
            .expect("session lock")
            .as_ref()
            .is_some_and(|s| s.is_active());
        let pumping = self
            .pump
            .lock()
            .expect("pump lock")
            .as_ref()
            .is_some_and(|p| !p.is_finished());
        alive && pumping
    }

    fn go_offline(&self, hour: u8) {
        if self.session.lock().expect("session lock").is_some() {
            tracing::info!(hour, "outside online hours; closing session");
        }
        self.teardown();
    }

    /// Detach whatever is left of the previous session. The pump goes first
    /// so its exit cleanup cannot race a replacement session into the slot.
    fn teardown(&self) {
        if let Some(pump) = self.pump.lock().expect("pump lock").take() {
            pump.abort();
        }
        if let Some(session) = self.session.lock().expect("session lock").take() {
            session.stop_listening();
        }
    }

    /// Try each credential in order; first success wins.
    async fn login(&self) -> Option<Arc<dyn PlatformSession>> {
        for credentials in &self.credentials {
            match self.connector.login(credentials).await {
                Ok(session) => {
                    tracing::info!(kind = credentials.kind(), "login succeeded");
                    return Some(session);
                }
                Err(e) => {
                    tracing::warn!(kind = credentials.kind(), %e, "login failed");
                }
            }
        }
        None
    }

    fn strike(&self) {
        let failures = self.failed_logins.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            failures,
            max_attempts = self.settings.max_login_attempts,
            "session recovery failed"
        );
        if failures >= self.settings.max_login_attempts {
            self.halted.store(true, Ordering::SeqCst);
        }
    }

    /// Attach the event pump to a fresh session, replacing any previous one.
    async fn attach_listener(&self, session: Arc<dyn PlatformSession>) -> parley_platform::Result<()> {
        let mut rx = session.listen().await?;
        *self.session.lock().expect("session lock") = Some(session.clone());

        if let Some(previous) = self.pump.lock().expect("pump lock").take() {
            previous.abort();
        }

        let handler = self.handler.clone();
        let slot = self.session.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PlatformEvent::Message(message) => {
                        handler.handle(session.clone(), message).await;
                    }
                    PlatformEvent::Presence(payload) => {
                        tracing::debug!(%payload, "presence event");
                    }
                    PlatformEvent::Close(reason) => {
                        tracing::warn!(%reason, "session closed by platform");
                        break;
                    }
                    PlatformEvent::Error(reason) => {
                        tracing::warn!(%reason, "session stream error");
                        break;
                    }
                }
            }
            // Clearing the slot makes the next check re-login.
            slot.lock().expect("session lock").take();
        });
        *self.pump.lock().expect("pump lock") = Some(pump);
        Ok(())
    }
}
