//! Reply strategy: which role answers, with which question and context.

use crate::buffers::BufferRegistry;
use parley_llm::ChatMessage;
use parley_platform::InboundMessage;
use std::sync::Arc;

/// Where the completion context comes from. A quoted message is a one-shot
/// sub-thread and overrides history; a bare keyword reuses prior answers
/// only; an ambient reply synthesizes its prompt from recent raw chatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSource {
    SourceQuoted { body: String },
    KeywordFollowup,
    Ambient,
}

#[derive(Debug, Clone)]
pub struct ReplyPlan {
    /// Keyword of the role whose system prompt will be used.
    pub role: String,
    /// Literal question, absent on the ambient path.
    pub question: Option<String>,
    pub context: Vec<ChatMessage>,
    pub source: ContextSource,
}

pub struct ReplyStrategy {
    message_history: Arc<BufferRegistry>,
    answer_history: Arc<BufferRegistry>,
    auto_reply_role: String,
}

impl ReplyStrategy {
    pub fn new(
        message_history: Arc<BufferRegistry>,
        answer_history: Arc<BufferRegistry>,
        auto_reply_role: impl Into<String>,
    ) -> Self {
        Self {
            message_history,
            answer_history,
            auto_reply_role: auto_reply_role.into(),
        }
    }

    /// First matching rule wins: quoted keyword, bare keyword, ambient.
    pub fn plan(
        &self,
        message: &InboundMessage,
        matched_keyword: Option<&str>,
        question: &str,
    ) -> ReplyPlan {
        match (matched_keyword, message.source_message.as_ref()) {
            (Some(keyword), Some(source)) => ReplyPlan {
                role: keyword.to_string(),
                question: Some(question.to_string()),
                context: vec![ChatMessage::user(&source.body)],
                source: ContextSource::SourceQuoted {
                    body: source.body.clone(),
                },
            },
            (Some(keyword), None) => ReplyPlan {
                role: keyword.to_string(),
                question: Some(question.to_string()),
                context: self.answer_history.get_all(&message.conversation_id),
                source: ContextSource::KeywordFollowup,
            },
            (None, _) => ReplyPlan {
                role: self.auto_reply_role.clone(),
                question: None,
                context: self.message_history.get_all(&message.conversation_id),
                source: ContextSource::Ambient,
            },
        }
    }
}
