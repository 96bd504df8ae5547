//! Chat threads and their messages.
//!
//! [`ChatStore`] is the persistence interface a turn writes to. It assumes a
//! single writer per session, so methods take `&mut self` and no locking is
//! involved. [`InMemoryChatStore`] is the bundled implementation; it announces
//! chat-list changes to explicit subscribers over a broadcast channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use context_gating::{HistoryRole, HistoryTurn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::confidence::ConfidenceInfo;
use crate::error_handler::StoreError;
use crate::types::EvidenceChunk;

/// Title of a chat until its first user message names it.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";
const PREVIEW_CHARS: usize = 100;
const TITLE_CHARS: usize = 50;
const EVENT_CAPACITY: usize = 64;

/// A chat thread as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    /// First characters of the latest user message.
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: HistoryRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gating_mode: Option<String>,
    /// The content is an error text, not an answer.
    #[serde(default)]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// History entry for the backend; `None` for error messages.
    pub fn as_history_turn(&self) -> Option<HistoryTurn> {
        (!self.is_error).then(|| HistoryTurn {
            role: self.role,
            content: self.content.clone(),
        })
    }
}

/// Content of a message about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: HistoryRole,
    pub content: String,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
        }
    }

    /// Empty assistant message, filled while the answer streams.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: String::new(),
        }
    }
}

/// Partial update of the last message of a chat; `None` keeps a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub evidence: Option<Vec<EvidenceChunk>>,
    pub confidence: Option<ConfidenceInfo>,
    pub gating_mode: Option<String>,
    pub is_error: Option<bool>,
}

impl MessageUpdate {
    fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(evidence) = self.evidence {
            message.evidence = evidence;
        }
        if let Some(confidence) = self.confidence {
            message.confidence = Some(confidence);
        }
        if let Some(gating_mode) = self.gating_mode {
            message.gating_mode = Some(gating_mode);
        }
        if let Some(is_error) = self.is_error {
            message.is_error = is_error;
        }
    }
}

/// Chat-list change announced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Created(String),
    Updated(String),
    Deleted(String),
}

/// Persistence of chats and messages.
pub trait ChatStore {
    /// Creates a chat; `None` uses [`DEFAULT_CHAT_TITLE`].
    fn create_chat(&mut self, title: Option<&str>) -> Chat;

    fn chat(&self, chat_id: &str) -> Option<Chat>;

    /// All chats, newest first.
    fn chats(&self) -> Vec<Chat>;

    /// Messages of a chat in insertion order; empty for unknown chats.
    fn messages(&self, chat_id: &str) -> Vec<Message>;

    /// Appends a message and refreshes the chat's preview, count and title.
    fn append_message(&mut self, chat_id: &str, message: NewMessage) -> Result<Message, StoreError>;

    /// Applies `update` to the newest message of the chat.
    fn update_last_message(
        &mut self,
        chat_id: &str,
        update: MessageUpdate,
    ) -> Result<Message, StoreError>;

    /// Removes a chat and its messages. Returns `false` if it did not exist.
    fn delete_chat(&mut self, chat_id: &str) -> bool;
}

/// Process-local [`ChatStore`].
#[derive(Debug)]
pub struct InMemoryChatStore {
    chats: Vec<Chat>,
    messages: HashMap<String, Vec<Message>>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chats: Vec::new(),
            messages: HashMap::new(),
            events,
        }
    }

    /// Registers a subscriber for chat-list changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn chat_mut(&mut self, chat_id: &str) -> Option<&mut Chat> {
        self.chats.iter_mut().find(|c| c.id == chat_id)
    }
}

impl ChatStore for InMemoryChatStore {
    fn create_chat(&mut self, title: Option<&str>) -> Chat {
        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(DEFAULT_CHAT_TITLE)
                .to_string(),
            preview: String::new(),
            created_at: now,
            updated_at: now,
            message_count: 0,
        };
        debug!(chat_id = %chat.id, "chat created");
        self.chats.insert(0, chat.clone());
        self.publish(ChatEvent::Created(chat.id.clone()));
        chat
    }

    fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats.iter().find(|c| c.id == chat_id).cloned()
    }

    fn chats(&self) -> Vec<Chat> {
        self.chats.clone()
    }

    fn messages(&self, chat_id: &str) -> Vec<Message> {
        self.messages.get(chat_id).cloned().unwrap_or_default()
    }

    fn append_message(&mut self, chat_id: &str, message: NewMessage) -> Result<Message, StoreError> {
        if self.chat(chat_id).is_none() {
            return Err(StoreError::UnknownChat(chat_id.to_string()));
        }

        let now = Utc::now();
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: message.role,
            content: message.content,
            evidence: Vec::new(),
            confidence: None,
            gating_mode: None,
            is_error: false,
            created_at: now,
        };

        let thread = self.messages.entry(chat_id.to_string()).or_default();
        thread.push(stored.clone());
        let count = thread.len();

        if let Some(chat) = self.chat_mut(chat_id) {
            chat.message_count = count;
            chat.updated_at = now;
            if stored.role == HistoryRole::User {
                chat.preview = stored.content.chars().take(PREVIEW_CHARS).collect();
                if count == 1 && chat.title == DEFAULT_CHAT_TITLE {
                    chat.title = stored.content.chars().take(TITLE_CHARS).collect();
                }
            }
        }
        self.publish(ChatEvent::Updated(chat_id.to_string()));
        Ok(stored)
    }

    fn update_last_message(
        &mut self,
        chat_id: &str,
        update: MessageUpdate,
    ) -> Result<Message, StoreError> {
        let last = self
            .messages
            .get_mut(chat_id)
            .and_then(|thread| thread.last_mut())
            .ok_or_else(|| StoreError::EmptyChat(chat_id.to_string()))?;
        update.apply(last);
        Ok(last.clone())
    }

    fn delete_chat(&mut self, chat_id: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != chat_id);
        if self.chats.len() == before {
            return false;
        }
        self.messages.remove(chat_id);
        debug!(chat_id, "chat deleted");
        self.publish(ChatEvent::Deleted(chat_id.to_string()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_user_message_names_the_chat() {
        let mut store = InMemoryChatStore::new();
        let chat = store.create_chat(None);
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);

        let long = "Wie beantrage ich Urlaub, wenn mein Vorgesetzter gerade selbst im Urlaub ist und niemand vertritt?";
        store.append_message(&chat.id, NewMessage::user(long)).unwrap();
        store
            .append_message(&chat.id, NewMessage::user("zweite Frage"))
            .unwrap();

        let chat = store.chat(&chat.id).unwrap();
        assert_eq!(chat.title, long.chars().take(50).collect::<String>());
        assert_eq!(chat.preview, "zweite Frage");
        assert_eq!(chat.message_count, 2);
    }

    #[test]
    fn assistant_messages_keep_preview_and_custom_title() {
        let mut store = InMemoryChatStore::new();
        let chat = store.create_chat(Some("Reisekosten"));
        store.append_message(&chat.id, NewMessage::user("Frage")).unwrap();
        store
            .append_message(&chat.id, NewMessage::assistant_placeholder())
            .unwrap();

        let chat = store.chat(&chat.id).unwrap();
        assert_eq!(chat.title, "Reisekosten");
        assert_eq!(chat.preview, "Frage");
    }

    #[test]
    fn update_last_message_patches_only_given_fields() {
        let mut store = InMemoryChatStore::new();
        let chat = store.create_chat(None);
        store
            .append_message(&chat.id, NewMessage::assistant_placeholder())
            .unwrap();

        store
            .update_last_message(
                &chat.id,
                MessageUpdate {
                    content: Some("Hallo".into()),
                    gating_mode: Some("DOCS_ONLY".into()),
                    ..MessageUpdate::default()
                },
            )
            .unwrap();
        let msg = store
            .update_last_message(
                &chat.id,
                MessageUpdate {
                    is_error: Some(true),
                    ..MessageUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(msg.content, "Hallo");
        assert_eq!(msg.gating_mode.as_deref(), Some("DOCS_ONLY"));
        assert!(msg.is_error);
        assert!(msg.as_history_turn().is_none());
    }

    #[test]
    fn unknown_and_empty_chats_are_errors() {
        let mut store = InMemoryChatStore::new();
        assert_eq!(
            store.append_message("nope", NewMessage::user("x")),
            Err(StoreError::UnknownChat("nope".into()))
        );
        let chat = store.create_chat(None);
        assert_eq!(
            store.update_last_message(&chat.id, MessageUpdate::default()),
            Err(StoreError::EmptyChat(chat.id.clone()))
        );
    }

    #[test]
    fn subscribers_see_list_changes_and_newest_first() {
        let mut store = InMemoryChatStore::new();
        let mut rx = store.subscribe();

        let a = store.create_chat(Some("a"));
        let b = store.create_chat(Some("b"));
        store.append_message(&a.id, NewMessage::user("hi")).unwrap();
        assert!(store.delete_chat(&b.id));
        assert!(!store.delete_chat(&b.id));

        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Created(a.id.clone()));
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Created(b.id.clone()));
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Updated(a.id.clone()));
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Deleted(b.id.clone()));
        assert!(rx.try_recv().is_err());

        let titles: Vec<_> = store.chats().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["a"]);
        assert!(store.messages(&b.id).is_empty());
    }
}
