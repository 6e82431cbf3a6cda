#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parley_core::{
    AppReconciler, AppState, AppUpdate, ChatViewState, FfiApp, Message, MessageSender,
    MessageStore, ReplyAck, ReplyTrigger,
};

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn write_config(data_dir: &str, v: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("parley_config.json");
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn current_chat(app: &FfiApp) -> Option<ChatViewState> {
    app.state().current_chat
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn updates(&self) -> Vec<AppUpdate> {
        self.0.lock().unwrap().clone()
    }

    pub fn last_state(&self) -> Option<AppState> {
        self.0.lock().unwrap().iter().rev().find_map(|u| match u {
            AppUpdate::FullState(s) => Some(s.clone()),
            _ => None,
        })
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

/// Message store that answers after `delay`, counting calls. Rows are stamped with the
/// wall clock, like a database default.
pub struct ScriptedStore {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail_with: Option<String>,
    pub stored: Mutex<Vec<Message>>,
}

impl ScriptedStore {
    pub fn ok(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail_with: None,
            stored: Mutex::new(vec![]),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_with: Some(reason.to_string()),
            stored: Mutex::new(vec![]),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<Message> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    async fn append(&self, _chat_id: &str, content: &str) -> anyhow::Result<Message> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = &self.fail_with {
            anyhow::bail!("{reason}");
        }
        let message = Message::new(
            format!("m{n}"),
            content,
            MessageSender::User,
            Some(Utc::now()),
        );
        self.stored.lock().unwrap().push(message.clone());
        Ok(message)
    }
}

/// Message store whose append parks until the test releases it.
pub struct GatedStore {
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Notify,
    pub row: Message,
}

impl GatedStore {
    pub fn new(row: Message) -> Arc<Self> {
        Arc::new(Self {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            row,
        })
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn append(&self, _chat_id: &str, _content: &str) -> anyhow::Result<Message> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.row.clone())
    }
}

pub struct ScriptedTrigger {
    pub calls: Mutex<Vec<(String, String, String)>>,
    pub fail_with: Option<String>,
}

impl ScriptedTrigger {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(vec![]),
            fail_with: None,
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(vec![]),
            fail_with: Some(reason.to_string()),
        })
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyTrigger for ScriptedTrigger {
    async fn notify(
        &self,
        chat_id: &str,
        content: &str,
        user_id: &str,
    ) -> anyhow::Result<ReplyAck> {
        self.calls.lock().unwrap().push((
            chat_id.to_string(),
            content.to_string(),
            user_id.to_string(),
        ));
        if let Some(reason) = &self.fail_with {
            anyhow::bail!("{reason}");
        }
        Ok(ReplyAck::ok("I received your message!"))
    }
}
