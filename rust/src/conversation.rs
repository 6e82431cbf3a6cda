//! Per-conversation context tying the ledger, the reconciliation engine and the send
//! coordinator to one live message feed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::collaborators::{MessageStore, ReplyAck, ReplyTrigger};
use crate::error::{SendError, SendResult, SubmitRejected};
use crate::ledger::{ClientId, OptimisticLedger};
use crate::message::Message;
use crate::reconcile::{ReconcileWindows, ReconciliationEngine, ViewMessage};
use crate::send::{OutgoingMessage, SendCoordinator, SendPhase, DEFAULT_SEND_DEBOUNCE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    pub windows: ReconcileWindows,
    pub send_debounce: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            windows: ReconcileWindows::default(),
            send_debounce: DEFAULT_SEND_DEBOUNCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReport {
    pub client_id: ClientId,
    pub message: Message,
    pub reply: ReplyAck,
}

pub struct Conversation {
    chat_id: String,
    clock: Arc<dyn Clock>,
    ledger: OptimisticLedger,
    engine: ReconciliationEngine,
    sender: SendCoordinator,
    snapshot: Vec<Message>,
    view: Arc<[ViewMessage]>,
}

impl Conversation {
    pub fn new(chat_id: impl Into<String>, config: ConversationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            chat_id: chat_id.into(),
            clock,
            ledger: OptimisticLedger::new(),
            engine: ReconciliationEngine::new(config.windows),
            sender: SendCoordinator::new(config.send_debounce),
            snapshot: Vec::new(),
            view: Arc::from(Vec::new()),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Current merged view. Unchanged inputs hand back the same allocation.
    pub fn view(&self) -> Arc<[ViewMessage]> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.snapshot
    }

    pub fn ledger(&self) -> &OptimisticLedger {
        &self.ledger
    }

    pub fn send_phase(&self) -> &SendPhase {
        self.sender.phase()
    }

    pub fn is_sending(&self) -> bool {
        self.sender.is_sending()
    }

    /// Replace the server snapshot with the feed's latest full set. Returns whether the view
    /// changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Message>) -> bool {
        self.snapshot = snapshot;
        self.refresh()
    }

    pub fn begin_send(&mut self, content: &str) -> Result<OutgoingMessage, SubmitRejected> {
        let now = self.clock.now();
        let outgoing = self.sender.begin(content, now, &mut self.ledger)?;
        self.refresh();
        Ok(outgoing)
    }

    pub fn persist_succeeded(&mut self, client_id: ClientId, message: &Message) -> bool {
        if !self.sender.persist_succeeded(client_id, message, &mut self.ledger) {
            return false;
        }
        // The echo may have arrived before the persist response. The engine will not feed
        // that row again, so match it by id now.
        if self.engine.has_seen(&message.id) {
            let window = self.engine.windows().optimistic_match;
            if let Some(entry) = self.ledger.reconcile(message, window) {
                tracing::debug!(
                    target: "parley_core::reconcile",
                    rule = "retire_on_persist",
                    server_id = %message.id,
                    client_id = %entry.client_id,
                    "optimistic entry confirmed by persist response"
                );
            }
        }
        self.refresh();
        true
    }

    /// Roll back a failed persist. Returns the text to put back in the composer.
    pub fn persist_failed(&mut self, client_id: ClientId) -> Option<String> {
        let restored = self.sender.persist_failed(client_id, &mut self.ledger);
        if restored.is_some() {
            self.refresh();
        }
        restored
    }

    pub fn finish_send(&mut self, client_id: ClientId) -> bool {
        self.sender.finish(client_id)
    }

    pub fn restorable_draft(&self) -> Option<&str> {
        self.sender.restorable_draft()
    }

    pub fn take_restorable_draft(&mut self) -> Option<String> {
        self.sender.take_restorable_draft()
    }

    fn refresh(&mut self) -> bool {
        let next = self.engine.recompute(&self.snapshot, &mut self.ledger);
        if *self.view == next[..] {
            return false;
        }
        self.view = Arc::from(next);
        true
    }
}

/// Cloneable handle for hosts that run sends and the live feed from separate tasks.
///
/// Each step locks the conversation briefly; no lock is held across a network call, so
/// snapshots keep applying while a send is suspended.
#[derive(Clone)]
pub struct SharedConversation {
    inner: Arc<Mutex<Conversation>>,
}

impl SharedConversation {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conversation)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Conversation> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn view(&self) -> Arc<[ViewMessage]> {
        self.lock().view()
    }

    pub fn apply_snapshot(&self, snapshot: Vec<Message>) -> bool {
        self.lock().apply_snapshot(snapshot)
    }

    /// Full send flow: optimistic insert, persist, then ask for a reply.
    ///
    /// A persist failure rolls the optimistic row back. A notify failure keeps the stored
    /// message; only the reply is missing.
    pub async fn submit(
        &self,
        content: &str,
        user_id: &str,
        store: &dyn MessageStore,
        trigger: &dyn ReplyTrigger,
    ) -> SendResult<SendReport> {
        let (chat_id, outgoing) = {
            let mut conversation = self.lock();
            let outgoing = conversation.begin_send(content)?;
            (conversation.chat_id().to_string(), outgoing)
        };
        let client_id = outgoing.client_id;

        let appended = store.append(&chat_id, &outgoing.content).await;
        let message = match appended {
            Ok(message) => message,
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(%chat_id, %client_id, err = %reason, "persist failed");
                let restored = self.lock().persist_failed(client_id);
                return Err(SendError::Persist {
                    content: restored.unwrap_or(outgoing.content),
                    reason,
                });
            }
        };
        self.lock().persist_succeeded(client_id, &message);

        let notified = trigger.notify(&chat_id, &outgoing.content, user_id).await;
        self.lock().finish_send(client_id);

        match notified {
            Ok(reply) if reply.success => Ok(SendReport {
                client_id,
                message,
                reply,
            }),
            Ok(_) => Err(SendError::Notify {
                message,
                reason: "reply trigger reported failure".into(),
            }),
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(%chat_id, %client_id, err = %reason, "notify failed");
                Err(SendError::Notify { message, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::MessageSender;
    use crate::reconcile::ViewId;
    use crate::state::MessageDeliveryState;
    use chrono::{DateTime, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_740_000_000_000).unwrap()
    }

    fn conversation() -> (Conversation, ManualClock) {
        let clock = ManualClock::new(start());
        let conv = Conversation::new("chat-1", ConversationConfig::default(), Arc::new(clock.clone()));
        (conv, clock)
    }

    fn row(id: &str, content: &str, sender: MessageSender, offset_ms: i64) -> Message {
        Message::new(
            id,
            content,
            sender,
            Some(start() + chrono::Duration::milliseconds(offset_ms)),
        )
    }

    #[test]
    fn unchanged_snapshot_keeps_the_same_view_allocation() {
        let (mut conv, _clock) = conversation();
        let rows = vec![row("m1", "Hello", MessageSender::User, 0)];
        assert!(conv.apply_snapshot(rows.clone()));
        let before = conv.view();
        assert!(!conv.apply_snapshot(rows));
        assert!(Arc::ptr_eq(&before, &conv.view()));
    }

    #[test]
    fn optimistic_row_shows_pending_then_sent() {
        let (mut conv, clock) = conversation();
        let out = conv.begin_send("  Hello ").unwrap();
        let view = conv.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, ViewId::Optimistic(out.client_id));
        assert_eq!(view[0].content, "Hello");
        assert_eq!(view[0].delivery, MessageDeliveryState::Pending);

        clock.advance_ms(300);
        let stored = row("m1", "Hello", MessageSender::User, 250);
        assert!(conv.persist_succeeded(out.client_id, &stored));
        assert_eq!(conv.view()[0].delivery, MessageDeliveryState::Sent);

        conv.apply_snapshot(vec![stored]);
        let view = conv.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, ViewId::Server("m1".into()));
        assert!(conv.ledger().is_empty());
    }

    #[test]
    fn echo_before_persist_response_is_retired_by_id() {
        let (mut conv, _clock) = conversation();
        let out = conv.begin_send("Hello").unwrap();

        // Server clock is a minute ahead, far outside every window.
        let stored = row("m1", "Hello", MessageSender::User, 60_000);
        conv.apply_snapshot(vec![stored.clone()]);
        assert_eq!(conv.view().len(), 2);
        assert_eq!(conv.ledger().len(), 1);

        conv.persist_succeeded(out.client_id, &stored);
        assert!(conv.ledger().is_empty());
        let view = conv.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, ViewId::Server("m1".into()));
    }

    #[test]
    fn failed_persist_removes_row_and_offers_draft() {
        let (mut conv, _clock) = conversation();
        let out = conv.begin_send("Y").unwrap();
        assert_eq!(conv.persist_failed(out.client_id), Some("Y".into()));
        assert!(conv.view().is_empty());
        assert!(!conv.is_sending());
        assert_eq!(conv.restorable_draft(), Some("Y"));
        assert_eq!(conv.take_restorable_draft(), Some("Y".into()));
        assert_eq!(conv.send_phase(), &SendPhase::Idle);
    }
}
