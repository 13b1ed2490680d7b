//! Per-inbound-event orchestration: ack, gate, pace, validate, reply.

use crate::buffers::BufferRegistry;
use crate::completion::CompletionClient;
use crate::config::ParleyConfig;
use crate::strategy::ReplyStrategy;
use parley_llm::ChatMessage;
use parley_platform::{ConversationId, InboundMessage, PlatformSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const MARK_AS_READ_DELAY: Duration = Duration::from_secs(3);
const WORD_COUNT_BASE: f64 = 10.0;

#[derive(Clone)]
pub struct HandlerSettings {
    /// Trigger keywords in priority order.
    pub keywords: Vec<String>,
    /// Keyword → system prompt.
    pub role_prompts: HashMap<String, String>,
    pub auto_reply_role: String,
    pub auto_reply_chance: f64,
    pub min_reply_interval: Duration,
    pub max_question_len: usize,
    pub web_search_roles: Vec<String>,
    pub empty_question_reply: String,
    pub too_long_reply: String,
    pub mark_read_delay: Duration,
}

impl HandlerSettings {
    pub fn from_config(cfg: &ParleyConfig) -> Self {
        Self {
            keywords: cfg.keywords().iter().map(|k| k.to_string()).collect(),
            role_prompts: cfg
                .roles
                .iter()
                .map(|r| (r.keyword.clone(), r.prompt.clone()))
                .collect(),
            auto_reply_role: cfg.reply.auto_reply_role.clone(),
            auto_reply_chance: cfg.reply.auto_reply_chance,
            min_reply_interval: Duration::from_millis(cfg.reply.min_reply_interval_ms),
            max_question_len: cfg.reply.max_question_len,
            web_search_roles: cfg.reply.web_search_roles.clone(),
            empty_question_reply: cfg.reply.empty_question_reply.clone(),
            too_long_reply: cfg.reply.too_long_reply.clone(),
            mark_read_delay: MARK_AS_READ_DELAY,
        }
    }
}

pub struct ConversationHandler {
    settings: HandlerSettings,
    strategy: ReplyStrategy,
    completion: Arc<CompletionClient>,
    message_history: Arc<BufferRegistry>,
    answer_history: Arc<BufferRegistry>,
    /// Process-wide pacing clock shared by every conversation. Read and
    /// written around an awaited delay, so two near-simultaneous events can
    /// both observe a stale value and proceed; the accepted cost is a
    /// slightly shorter effective spacing, never lost correctness.
    last_answered: Mutex<Instant>,
    /// Uniform draw in `[0, 1)`, injectable for deterministic tests.
    draw: fn() -> f64,
}

fn random_draw() -> f64 {
    rand::random::<f64>()
}

impl ConversationHandler {
    pub fn new(
        settings: HandlerSettings,
        completion: Arc<CompletionClient>,
        message_history: Arc<BufferRegistry>,
        answer_history: Arc<BufferRegistry>,
    ) -> Self {
        Self::with_draw(
            settings,
            completion,
            message_history,
            answer_history,
            random_draw,
        )
    }

    pub fn with_draw(
        settings: HandlerSettings,
        completion: Arc<CompletionClient>,
        message_history: Arc<BufferRegistry>,
        answer_history: Arc<BufferRegistry>,
        draw: fn() -> f64,
    ) -> Self {
        let strategy = ReplyStrategy::new(
            message_history.clone(),
            answer_history.clone(),
            settings.auto_reply_role.clone(),
        );
        Self {
            settings,
            strategy,
            completion,
            message_history,
            answer_history,
            last_answered: Mutex::new(Instant::now()),
            draw,
        }
    }

    /// Process one inbound message to completion. Never fails: reply-path
    /// errors are logged and absorbed so one bad event cannot affect the
    /// next.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(conversation_id = %message.conversation_id)
    )]
    pub async fn handle(&self, session: Arc<dyn PlatformSession>, message: InboundMessage) {
        tracing::debug!(body_len = message.body.len(), "inbound message");

        self.mark_read_twice(&session, &message.conversation_id);

        // Raw history is recorded whether or not we end up replying.
        self.message_history
            .enqueue(&message.conversation_id, ChatMessage::user(&message.body));

        let matched_keyword = self.find_keyword(&message.body);
        if matched_keyword.is_none() && !self.should_auto_reply(&message.body) {
            return;
        }

        let question = extract_question(&message.body, matched_keyword.as_deref());
        tracing::info!(
            keyword = matched_keyword.as_deref().unwrap_or("<none>"),
            question = %question,
            "processing question"
        );

        self.pace_replies().await;

        if question.is_empty() {
            let reply = self.settings.empty_question_reply.clone();
            self.send_reply(&session, &message.conversation_id, &reply)
                .await;
            return;
        }
        if question.chars().count() > self.settings.max_question_len {
            let reply = self.settings.too_long_reply.clone();
            self.send_reply(&session, &message.conversation_id, &reply)
                .await;
            return;
        }

        let plan = self
            .strategy
            .plan(&message, matched_keyword.as_deref(), &question);
        let Some(role_prompt) = self.settings.role_prompts.get(&plan.role) else {
            tracing::error!(role = %plan.role, "no system prompt configured for role");
            return;
        };
        let search_enabled = self.settings.web_search_roles.contains(&plan.role);

        match self
            .completion
            .get_reply(
                role_prompt,
                plan.question.as_deref(),
                &plan.context,
                search_enabled,
            )
            .await
        {
            Ok(reply) => {
                tracing::info!(reply_len = reply.len(), role = %plan.role, "sending reply");
                self.answer_history
                    .enqueue(&message.conversation_id, ChatMessage::assistant(&reply));
                self.send_reply(&session, &message.conversation_id, &reply)
                    .await;
            }
            Err(e) => {
                // One failed completion never blocks later events.
                tracing::warn!(%e, role = %plan.role, "completion failed; dropping reply");
            }
        }
    }

    /// The platform acks read receipts asynchronously; marking twice with a
    /// delay masks receipts that land after the first mark.
    fn mark_read_twice(&self, session: &Arc<dyn PlatformSession>, conversation_id: &ConversationId) {
        let session = session.clone();
        let conversation_id = conversation_id.clone();
        let delay = self.settings.mark_read_delay;
        tokio::spawn(async move {
            if let Err(e) = session.mark_read(&conversation_id).await {
                tracing::debug!(%e, "mark_read failed");
            }
            tokio::time::sleep(delay).await;
            if let Err(e) = session.mark_read(&conversation_id).await {
                tracing::debug!(%e, "delayed mark_read failed");
            }
        });
    }

    fn find_keyword(&self, body: &str) -> Option<String> {
        let lowered = body.to_lowercase();
        self.settings
            .keywords
            .iter()
            .find(|k| lowered.starts_with(&k.to_lowercase()))
            .cloned()
    }

    /// Longer messages are likelier to draw an ambient reply, floored so
    /// one-word messages still occasionally do.
    fn should_auto_reply(&self, body: &str) -> bool {
        let word_count = body.split_whitespace().count() as f64;
        let word_chance = (word_count / WORD_COUNT_BASE).clamp(0.1, 1.0);
        (self.draw)() < word_chance * self.settings.auto_reply_chance
    }

    /// Enforce the minimum spacing between any two replies, then advance the
    /// shared clock. The lock is released across the sleep on purpose; see
    /// the field comment on `last_answered`.
    async fn pace_replies(&self) {
        let last = *self.last_answered.lock().expect("last_answered lock");
        let elapsed = last.elapsed();
        if elapsed < self.settings.min_reply_interval {
            tokio::time::sleep(self.settings.min_reply_interval - elapsed).await;
        }
        *self.last_answered.lock().expect("last_answered lock") = Instant::now();
    }

    async fn send_reply(
        &self,
        session: &Arc<dyn PlatformSession>,
        conversation_id: &ConversationId,
        body: &str,
    ) {
        // A send can legitimately race a session teardown; it is logged and
        // swallowed either way.
        if let Err(e) = session.send(conversation_id, body).await {
            tracing::warn!(%e, "send failed");
            return;
        }
        self.mark_read_twice(session, conversation_id);
    }

    #[cfg(test)]
    pub(crate) fn last_answered_instant(&self) -> Instant {
        *self.last_answered.lock().expect("last_answered lock")
    }
}

/// Strip the matched keyword and any following punctuation/space run.
fn extract_question(body: &str, keyword: Option<&str>) -> String {
    let Some(keyword) = keyword else {
        return body.to_string();
    };
    let rest: String = body.chars().skip(keyword.chars().count()).collect();
    rest.trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}
