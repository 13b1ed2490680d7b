//! Per-conversation bounded message buffers.
//!
//! Two registries exist process-wide: one holds raw inbound text (ambient
//! reply context), one holds only the answers the bot sent (keyword follow-up
//! context). Buffers are created lazily and never removed; everything is
//! in-memory and lost on restart.

use dashmap::DashMap;
use parley_llm::ChatMessage;
use parley_platform::ConversationId;

/// Fixed-capacity FIFO of chat messages. At capacity the oldest entry is
/// evicted; entries longer than `max_entry_len` are silently discarded; a
/// zero-capacity buffer ignores every enqueue.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    entries: Vec<ChatMessage>,
    capacity: usize,
    max_entry_len: Option<usize>,
}

impl MessageBuffer {
    pub fn new(capacity: usize, max_entry_len: Option<usize>) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity,
            max_entry_len,
        }
    }

    pub fn enqueue(&mut self, entry: ChatMessage) {
        if self.capacity == 0 {
            return;
        }
        if let Some(max) = self.max_entry_len {
            if entry.content.chars().count() > max {
                return;
            }
        }
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }
}

/// Conversation id → [`MessageBuffer`], created on first enqueue.
pub struct BufferRegistry {
    buffers: DashMap<ConversationId, MessageBuffer>,
    capacity: usize,
    max_entry_len: Option<usize>,
}

impl BufferRegistry {
    pub fn new(capacity: usize, max_entry_len: Option<usize>) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity,
            max_entry_len,
        }
    }

    pub fn enqueue(&self, conversation_id: &ConversationId, entry: ChatMessage) {
        self.buffers
            .entry(conversation_id.clone())
            .or_insert_with(|| MessageBuffer::new(self.capacity, self.max_entry_len))
            .enqueue(entry);
    }

    /// Snapshot of a conversation's entries, oldest first. An unknown
    /// conversation is indistinguishable from an empty buffer.
    pub fn get_all(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.buffers
            .get(conversation_id)
            .map(|b| b.entries().to_vec())
            .unwrap_or_default()
    }

    pub fn count(&self, conversation_id: &ConversationId) -> usize {
        self.buffers.get(conversation_id).map_or(0, |b| b.len())
    }

    pub fn is_empty(&self, conversation_id: &ConversationId) -> bool {
        self.count(conversation_id) == 0
    }
}
