mod config;
mod graphql;
mod http;
mod loopback;
mod webhook;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{MessageStore, ReplyAck, ReplyTrigger};
use crate::conversation::Conversation;
use crate::error::SubmitRejected;
use crate::ledger::ClientId;
use crate::message::Message;
use crate::send::SendPhase;
use crate::state::{AppState, ChatMessage, ChatViewState, SendStatus, SessionState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub(crate) use config::default_app_config_json;
pub use graphql::GraphqlMessageStore;
pub use loopback::LoopbackBackend;
pub use webhook::WebhookReplyTrigger;

const PERSIST_FAILED_TOAST: &str = "Failed to send message. Please try again.";
const REPLY_FAILED_TOAST: &str = "Message saved, but the bot could not be reached.";

#[derive(Clone)]
pub(crate) struct Backend {
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) trigger: Arc<dyn ReplyTrigger>,
}

/// Test hook: when set, replaces whatever backend the config would select.
pub(crate) type SharedBackend = Arc<RwLock<Option<Backend>>>;

struct Session {
    user_id: String,
    access_token: Option<String>,
}

struct ChatEntry {
    conversation: Conversation,
    last_send: Option<SendStatus>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    clock: Arc<dyn Clock>,

    session: Option<Session>,
    backend: Option<Backend>,
    backend_override: SharedBackend,

    // chat_id -> reconciliation context; kept for chats that are not on screen too.
    // Populated only while signed in, dropped wholesale on ClearSession.
    chats: HashMap<String, ChatEntry>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        backend_override: SharedBackend,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        tracing::info!(
            data_dir = %data_dir,
            graphql = config.graphql_url().is_some(),
            webhook = config.reply_webhook_url().is_some(),
            "config loaded"
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            clock: Arc::new(SystemClock),
            session: None,
            backend: None,
            backend_override,
            chats: HashMap::new(),
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn emit_send_finished(&mut self, chat_id: String, status: SendStatus) {
        let rev = self.next_rev();
        // Keep snapshot rev in sync with the update stream even though this is a side-effect update.
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::SendFinished {
            rev,
            chat_id,
            status,
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn post_internal(&self, event: InternalEvent) {
        let _ = self.core_sender.send(CoreMsg::Internal(Box::new(event)));
    }

    fn chat_entry(&mut self, chat_id: &str) -> &mut ChatEntry {
        let conversation_config = self.config.conversation_config();
        let clock = self.clock.clone();
        self.chats
            .entry(chat_id.to_string())
            .or_insert_with(|| ChatEntry {
                conversation: Conversation::new(chat_id, conversation_config, clock),
                last_send: None,
            })
    }

    fn is_current_chat(&self, chat_id: &str) -> bool {
        self.state
            .current_chat
            .as_ref()
            .is_some_and(|c| c.chat_id == chat_id)
    }

    /// Rebuild the open chat's slice from its conversation. Returns whether it changed.
    fn refresh_current_chat(&mut self) -> bool {
        let Some(chat_id) = self.state.current_chat.as_ref().map(|c| c.chat_id.clone()) else {
            return false;
        };
        let next = match self.chats.get(&chat_id) {
            Some(entry) => ChatViewState {
                chat_id,
                messages: entry
                    .conversation
                    .view()
                    .iter()
                    .map(ChatMessage::from)
                    .collect(),
                is_sending: entry.conversation.is_sending(),
                last_send: entry.last_send.clone(),
                restore_draft: entry.conversation.restorable_draft().map(ToString::to_string),
            },
            None => ChatViewState::new(chat_id),
        };
        if self.state.current_chat.as_ref() == Some(&next) {
            return false;
        }
        self.state.current_chat = Some(next);
        true
    }

    fn refresh_if_current(&mut self, chat_id: &str) {
        if self.is_current_chat(chat_id) && self.refresh_current_chat() {
            self.emit_state();
        }
    }

    fn resolve_backend(&mut self) -> Option<Backend> {
        let overridden = match self.backend_override.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        if overridden.is_some() {
            return overridden;
        }
        if self.backend.is_none() {
            self.backend = self.build_backend();
        }
        self.backend.clone()
    }

    fn build_backend(&self) -> Option<Backend> {
        if !self.network_enabled() {
            let core_sender = self.core_sender.clone();
            let loopback = Arc::new(LoopbackBackend::new(self.clock.clone()).with_sink(
                move |chat_id, messages| {
                    let _ = core_sender.send(CoreMsg::Internal(Box::new(
                        InternalEvent::LiveSnapshot {
                            chat_id: chat_id.to_string(),
                            messages,
                        },
                    )));
                },
            ));
            tracing::info!("network disabled; using loopback backend");
            return Some(Backend {
                store: loopback.clone(),
                trigger: loopback,
            });
        }

        let (Some(graphql_url), Some(webhook_url)) =
            (self.config.graphql_url(), self.config.reply_webhook_url())
        else {
            tracing::warn!("graphql_url or reply_webhook_url missing; cannot send");
            return None;
        };
        let access_token = self.session.as_ref().and_then(|s| s.access_token.clone());
        let timeout = self.config.http_timeout();
        let built = GraphqlMessageStore::new(graphql_url, access_token, timeout).and_then(|store| {
            Ok(Backend {
                store: Arc::new(store),
                trigger: Arc::new(WebhookReplyTrigger::new(webhook_url, timeout)?),
            })
        });
        match built {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::error!(err = %format!("{e:#}"), "failed to build message backend");
                None
            }
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries the access token and message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::LiveSnapshot { chat_id, messages } => {
                let count = messages.len();
                // Late pushes after sign-out (host feed or loopback sink) must not recreate state.
                if self.session.is_none() {
                    tracing::debug!(%chat_id, count, "live_snapshot ignored: signed out");
                    return;
                }
                let changed = self.chat_entry(&chat_id).conversation.apply_snapshot(messages);
                tracing::debug!(%chat_id, count, changed, "live_snapshot");
                if changed {
                    self.refresh_if_current(&chat_id);
                }
            }
            InternalEvent::PersistFinished {
                chat_id,
                client_id,
                result,
            } => {
                tracing::info!(%chat_id, %client_id, ok = result.is_ok(), "persist_result");
                match result {
                    Ok(message) => self.on_persisted(chat_id, client_id, message),
                    Err(reason) => self.on_persist_failed(chat_id, client_id, reason),
                }
            }
            InternalEvent::NotifyFinished {
                chat_id,
                client_id,
                result,
            } => self.on_notified(chat_id, client_id, result),
            InternalEvent::Toast(msg) => self.toast(msg),
        }
    }

    fn on_persisted(&mut self, chat_id: String, client_id: ClientId, message: Message) {
        let Some(entry) = self.chats.get_mut(&chat_id) else {
            tracing::debug!(%chat_id, %client_id, "persist result for dropped conversation");
            return;
        };
        let content = match entry.conversation.send_phase() {
            SendPhase::Sending {
                client_id: current,
                content,
                ..
            } if *current == client_id => content.clone(),
            _ => message.content.trim().to_string(),
        };
        if !entry.conversation.persist_succeeded(client_id, &message) {
            return;
        }
        self.refresh_if_current(&chat_id);

        let user_id = self.session.as_ref().map(|s| s.user_id.clone()).unwrap_or_default();
        let Some(backend) = self.resolve_backend() else {
            self.post_internal(InternalEvent::NotifyFinished {
                chat_id,
                client_id,
                result: Err("message backend is not configured".into()),
            });
            return;
        };
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = backend
                .trigger
                .notify(&chat_id, &content, &user_id)
                .await
                .map_err(|e| format!("{e:#}"));
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::NotifyFinished {
                chat_id,
                client_id,
                result,
            })));
        });
    }

    fn on_persist_failed(&mut self, chat_id: String, client_id: ClientId, reason: String) {
        let Some(entry) = self.chats.get_mut(&chat_id) else {
            return;
        };
        if entry.conversation.persist_failed(client_id).is_none() {
            return;
        }
        tracing::warn!(%chat_id, %client_id, %reason, "send rolled back");
        let status = SendStatus::PersistFailed { reason };
        entry.last_send = Some(status.clone());
        self.refresh_current_chat();
        self.toast(PERSIST_FAILED_TOAST);
        self.emit_send_finished(chat_id, status);
    }

    fn on_notified(
        &mut self,
        chat_id: String,
        client_id: ClientId,
        result: Result<ReplyAck, String>,
    ) {
        let Some(entry) = self.chats.get_mut(&chat_id) else {
            return;
        };
        if !entry.conversation.finish_send(client_id) {
            tracing::warn!(%chat_id, %client_id, "stale notify result");
            return;
        }
        let status = match result {
            Ok(ack) if ack.success => SendStatus::Sent,
            Ok(_) => SendStatus::ReplyFailed {
                reason: "reply trigger reported failure".into(),
            },
            Err(reason) => SendStatus::ReplyFailed { reason },
        };
        tracing::info!(%chat_id, %client_id, ?status, "send_finished");
        entry.last_send = Some(status.clone());
        self.refresh_current_chat();
        if status.is_failure() {
            self.toast(REPLY_FAILED_TOAST);
        } else {
            self.emit_state();
        }
        self.emit_send_finished(chat_id, status);
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::SetSession {
                user_id,
                access_token,
            } => {
                let user_id = user_id.trim().to_string();
                if user_id.is_empty() {
                    self.toast("User id is required");
                    return;
                }
                self.session = Some(Session {
                    user_id: user_id.clone(),
                    access_token,
                });
                // The token may have changed; rebuild HTTP collaborators on next use.
                self.backend = None;
                self.state.session = SessionState::SignedIn { user_id };
                self.emit_state();
            }
            AppAction::ClearSession => {
                self.session = None;
                self.backend = None;
                self.chats.clear();
                self.state.session = SessionState::SignedOut;
                self.state.current_chat = None;
                self.emit_state();
            }
            AppAction::OpenChat { chat_id } => {
                let chat_id = chat_id.trim().to_string();
                if chat_id.is_empty() {
                    return;
                }
                self.chat_entry(&chat_id);
                if !self.is_current_chat(&chat_id) {
                    self.state.current_chat = Some(ChatViewState::new(chat_id));
                }
                self.refresh_current_chat();
                self.emit_state();
            }
            AppAction::CloseChat => {
                if self.state.current_chat.take().is_some() {
                    self.emit_state();
                }
            }
            AppAction::SendMessage { chat_id, content } => {
                self.send_message(chat_id, content);
            }
            AppAction::AcknowledgeDraftRestore { chat_id } => {
                let Some(entry) = self.chats.get_mut(&chat_id) else {
                    return;
                };
                if entry.conversation.take_restorable_draft().is_some() {
                    self.refresh_if_current(&chat_id);
                }
            }
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn send_message(&mut self, chat_id: String, content: String) {
        let Some(user_id) = self.session.as_ref().map(|s| s.user_id.clone()) else {
            self.toast("User not authenticated");
            return;
        };
        let Some(backend) = self.resolve_backend() else {
            self.toast("Message backend is not configured");
            return;
        };

        let entry = self.chat_entry(&chat_id);
        let outgoing = match entry.conversation.begin_send(&content) {
            Ok(outgoing) => outgoing,
            Err(SubmitRejected::EmptyContent) => return,
            Err(rejected) => {
                tracing::debug!(%chat_id, reason = %rejected, "submit ignored");
                return;
            }
        };
        entry.last_send = None;
        tracing::info!(%chat_id, client_id = %outgoing.client_id, %user_id, "send_started");
        self.refresh_if_current(&chat_id);

        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = backend
                .store
                .append(&chat_id, &outgoing.content)
                .await
                .map_err(|e| format!("{e:#}"));
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PersistFinished {
                chat_id,
                client_id: outgoing.client_id,
                result,
            })));
        });
    }
}
