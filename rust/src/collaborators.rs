use async_trait::async_trait;

use crate::message::Message;

/// Outcome reported by the reply trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyAck {
    pub success: bool,
    pub bot_response: Option<String>,
}

impl ReplyAck {
    pub fn ok(bot_response: impl Into<String>) -> Self {
        Self {
            success: true,
            bot_response: Some(bot_response.into()),
        }
    }
}

/// Durable store for user messages. The stored row later appears on the live feed.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, chat_id: &str, content: &str) -> anyhow::Result<Message>;
}

/// Asks the backend automation to produce a bot reply. The reply itself arrives on the
/// live feed, never through this call.
#[async_trait]
pub trait ReplyTrigger: Send + Sync {
    async fn notify(&self, chat_id: &str, content: &str, user_id: &str)
        -> anyhow::Result<ReplyAck>;
}
