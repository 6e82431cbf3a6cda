use crate::collaborators::ReplyAck;
use crate::ledger::ClientId;
use crate::message::Message;
use crate::state::{AppState, SendStatus};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    SendFinished {
        rev: u64,
        chat_id: String,
        status: SendStatus,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::SendFinished { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Live feed: full replacement snapshot for one conversation.
    LiveSnapshot {
        chat_id: String,
        messages: Vec<Message>,
    },

    // Async results
    PersistFinished {
        chat_id: String,
        client_id: ClientId,
        result: Result<Message, String>,
    },
    NotifyFinished {
        chat_id: String,
        client_id: ClientId,
        result: Result<ReplyAck, String>,
    },
    Toast(String),
}
