//! In-memory conversation store with bounded retention.
//!
//! Conversations are capped globally (LRU by last activity) and per
//! conversation (FIFO message drop). All reads return snapshots so callers
//! never observe a torn history.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Mutex;

use opsmith_core::{Conversation, ConversationSummary, MemoryStats, Message};

/// Bounded conversation memory.
pub struct ConversationMemory {
    conversations: DashMap<String, Conversation>,
    max_conversations: usize,
    max_messages_per_conversation: usize,
    /// Serializes LRU eviction so two concurrent appends cannot both
    /// over-evict.
    eviction_lock: Mutex<()>,
}

impl ConversationMemory {
    pub fn new(max_conversations: usize, max_messages_per_conversation: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            max_conversations: max_conversations.max(1),
            max_messages_per_conversation: max_messages_per_conversation.max(1),
            eviction_lock: Mutex::new(()),
        }
    }

    /// Append a message, creating the conversation on first use.
    ///
    /// Evicts the oldest message when the per-conversation cap is exceeded
    /// and the least-recently-active conversation when the global cap is.
    pub fn append(&self, conversation_id: &str, message: Message) {
        let created = {
            let mut entry = self
                .conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    tracing::debug!(id = %conversation_id, "Created conversation");
                    Conversation::new(conversation_id)
                });
            let conversation = entry.value_mut();
            if conversation.messages.len() >= self.max_messages_per_conversation {
                conversation.messages.remove(0);
            }
            conversation.messages.push(message);
            conversation.last_activity_at = Utc::now();
            conversation.messages.len() == 1
        };

        if created {
            self.evict_lru_if_needed(conversation_id);
        }
    }

    fn evict_lru_if_needed(&self, just_touched: &str) {
        let _guard = self.eviction_lock.lock().expect("eviction lock poisoned");
        while self.conversations.len() > self.max_conversations {
            let oldest = self
                .conversations
                .iter()
                .filter(|entry| entry.key() != just_touched)
                .min_by_key(|entry| entry.value().last_activity_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    tracing::debug!(%id, "Evicting least-recently-active conversation");
                    self.conversations.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Snapshot of a full conversation.
    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    /// The last `n` messages, in order.
    pub fn recent(&self, conversation_id: &str, n: usize) -> Vec<Message> {
        match self.conversations.get(conversation_id) {
            Some(entry) => {
                let messages = &entry.value().messages;
                let start = messages.len().saturating_sub(n);
                messages[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Messages for prompt context, trimmed from the front until both the
    /// message and character bounds hold. Never splits a message.
    pub fn context_for(
        &self,
        conversation_id: &str,
        max_messages: usize,
        max_chars: usize,
    ) -> Vec<Message> {
        let mut messages = self.recent(conversation_id, max_messages);
        let mut total: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        while messages.len() > 1 && total > max_chars {
            let dropped = messages.remove(0);
            total -= dropped.content.chars().count();
        }
        if messages.len() == 1 && total > max_chars {
            // even the newest message alone exceeds the budget; context
            // assembly still gets it whole rather than split
            return messages;
        }
        messages
    }

    pub fn delete(&self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn clear(&self) {
        self.conversations.clear();
    }

    pub fn summarize(&self, conversation_id: &str) -> Option<ConversationSummary> {
        self.conversations.get(conversation_id).map(|entry| {
            let conversation = entry.value();
            ConversationSummary {
                id: conversation.id.clone(),
                message_count: conversation.messages.len(),
                created_at: conversation.created_at,
                last_activity_at: conversation.last_activity_at,
                last_message: conversation.messages.last().map(|m| m.content.clone()),
            }
        })
    }

    /// Counts and timestamps only, for telemetry.
    pub fn summary(&self) -> MemoryStats {
        let message_count = self
            .conversations
            .iter()
            .map(|entry| entry.value().messages.len())
            .sum();
        MemoryStats {
            conversation_count: self.conversations.len(),
            message_count,
            max_conversations: self.max_conversations,
            max_messages_per_conversation: self.max_messages_per_conversation,
        }
    }
}
