//! Error types for the send path.

use thiserror::Error;

use crate::message::Message;

/// Why a submit was turned away before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    /// Empty or whitespace-only content. The only validation failure.
    #[error("message is empty")]
    EmptyContent,

    /// Another send for this conversation is still in flight.
    #[error("a message is already being sent")]
    InFlight,

    /// Too soon after the previous accepted submit.
    #[error("submitted again within the debounce interval ({remaining_ms} ms left)")]
    Debounced { remaining_ms: u64 },
}

impl SubmitRejected {
    pub fn is_validation(&self) -> bool {
        matches!(self, SubmitRejected::EmptyContent)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Rejected(#[from] SubmitRejected),

    /// The append call failed. The optimistic row was rolled back; `content` is the text to
    /// hand back to the composer.
    #[error("failed to persist message: {reason}")]
    Persist { content: String, reason: String },

    /// The message was stored but the reply trigger failed. Nothing was rolled back.
    #[error("message saved but the reply could not be requested: {reason}")]
    Notify { message: Message, reason: String },
}

impl SendError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SendError::Rejected(r) if r.is_validation())
    }
}

pub type SendResult<T> = Result<T, SendError>;
