use crate::message::{timestamp_millis, MessageSender};
use crate::reconcile::ViewMessage;

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub session: SessionState,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            session: SessionState::SignedOut,
            current_chat: None,
            toast: None,
        }
    }
}

/// Identity handed over by the host. The access token never leaves the actor.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SignedIn { user_id: String },
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionState::SignedIn { user_id } => Some(user_id),
            SessionState::SignedOut => None,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatViewState {
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
    /// Submission lock; the composer's send button stays disabled while set.
    pub is_sending: bool,
    pub last_send: Option<SendStatus>,
    /// Text of a rolled-back send, until the host acknowledges it.
    pub restore_draft: Option<String>,
}

impl ChatViewState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages: vec![],
            is_sending: false,
            last_send: None,
            restore_draft: None,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server id, or `optimistic:<uuid>` for rows not yet echoed by the live feed.
    pub id: String,
    pub content: String,
    pub sender: MessageSender,
    pub created_at_ms: Option<i64>,
    pub delivery: MessageDeliveryState,
    pub is_optimistic: bool,
}

impl From<&ViewMessage> for ChatMessage {
    fn from(m: &ViewMessage) -> Self {
        Self {
            id: m.id.to_string(),
            content: m.content.clone(),
            sender: m.sender,
            created_at_ms: timestamp_millis(m.created_at),
            delivery: m.delivery.clone(),
            is_optimistic: m.id.is_optimistic(),
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
}

/// Result of the most recent send in a conversation.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// Stored, but the bot reply could not be requested.
    ReplyFailed { reason: String },
    /// Not stored; the optimistic row was rolled back.
    PersistFailed { reason: String },
}

impl SendStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, SendStatus::Sent)
    }
}
