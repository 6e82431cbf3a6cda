mod actions;
mod core;
mod logging;
mod state;
mod updates;

pub mod clock;
pub mod collaborators;
pub mod conversation;
pub mod error;
pub mod ledger;
pub mod message;
pub mod reconcile;
pub mod send;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use collaborators::{MessageStore, ReplyAck, ReplyTrigger};
pub use conversation::{Conversation, ConversationConfig, SendReport, SharedConversation};
pub use core::{GraphqlMessageStore, LoopbackBackend, WebhookReplyTrigger};
pub use error::{SendError, SubmitRejected};
pub use message::{LiveMessage, Message, MessageSender};
pub use state::*;
pub use updates::*;

/// Return the default `parley_config.json` payload used when no config file exists.
pub fn default_config_json() -> String {
    core::default_app_config_json()
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    backend_override: core::SharedBackend,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let backend_override: core::SharedBackend = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let backend_for_core = backend_override.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                backend_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            backend_override,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Hand over the latest full row set for a conversation from the host's live subscription.
    pub fn push_live_snapshot(&self, chat_id: String, messages: Vec<LiveMessage>) {
        let messages = messages.into_iter().map(Message::from).collect();
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::LiveSnapshot { chat_id, messages },
        )));
    }

    /// Same as `push_live_snapshot`, for hosts that forward the raw subscription payload.
    /// Malformed payloads are logged and dropped.
    pub fn push_live_payload_json(&self, chat_id: String, json: String) {
        match message::parse_live_payload(&json) {
            Ok(messages) => {
                let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::LiveSnapshot { chat_id, messages },
                )));
            }
            Err(e) => tracing::warn!(%chat_id, err = %e, "dropping malformed live payload"),
        }
    }
}

impl FfiApp {
    pub fn set_backend_for_tests(
        &self,
        store: Arc<dyn MessageStore>,
        trigger: Arc<dyn ReplyTrigger>,
    ) {
        let backend = core::Backend { store, trigger };
        match self.backend_override.write() {
            Ok(mut slot) => {
                *slot = Some(backend);
            }
            Err(poison) => {
                *poison.into_inner() = Some(backend);
            }
        }
    }
}
