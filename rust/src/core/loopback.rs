use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::webhook::DEFAULT_BOT_RESPONSE;
use crate::clock::Clock;
use crate::collaborators::{MessageStore, ReplyAck, ReplyTrigger};
use crate::message::{Message, MessageSender};

type SnapshotSink = Box<dyn Fn(&str, Vec<Message>) + Send + Sync>;

/// In-memory message store and reply trigger for running without a backend.
///
/// Every write re-publishes the conversation's full row set through the sink, the same way
/// the live subscription would.
pub struct LoopbackBackend {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<String, Vec<Message>>>,
    sink: Option<SnapshotSink>,
}

impl LoopbackBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: impl Fn(&str, Vec<Message>) + Send + Sync + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn snapshot(&self, chat_id: &str) -> Vec<Message> {
        self.rows().get(chat_id).cloned().unwrap_or_default()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, Vec<Message>>> {
        match self.rows.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn insert(&self, chat_id: &str, content: &str, sender: MessageSender) -> Message {
        let message = Message::new(
            uuid::Uuid::new_v4().to_string(),
            content,
            sender,
            Some(self.clock.now()),
        );
        let snapshot = {
            let mut rows = self.rows();
            let chat = rows.entry(chat_id.to_string()).or_default();
            chat.push(message.clone());
            chat.clone()
        };
        if let Some(sink) = &self.sink {
            sink(chat_id, snapshot);
        }
        message
    }
}

#[async_trait]
impl MessageStore for LoopbackBackend {
    async fn append(&self, chat_id: &str, content: &str) -> anyhow::Result<Message> {
        Ok(self.insert(chat_id, content, MessageSender::User))
    }
}

#[async_trait]
impl ReplyTrigger for LoopbackBackend {
    async fn notify(
        &self,
        chat_id: &str,
        _content: &str,
        user_id: &str,
    ) -> anyhow::Result<ReplyAck> {
        if user_id.trim().is_empty() {
            anyhow::bail!("user id is required");
        }
        self.insert(chat_id, DEFAULT_BOT_RESPONSE, MessageSender::Bot);
        Ok(ReplyAck::ok(DEFAULT_BOT_RESPONSE))
    }
}
