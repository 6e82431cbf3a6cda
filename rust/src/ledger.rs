//! Optimistic ledger: user messages shown locally before the live feed confirms them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::message::{content_key, Message, MessageSender};

/// Locally generated handle for one optimistic send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptimisticEntry {
    pub client_id: ClientId,
    /// Already trimmed.
    pub content: String,
    pub sender: MessageSender,
    pub created_at: DateTime<Utc>,
    /// Local insertion order; tie-break for equal timestamps.
    pub seq: u64,
    /// Id of the stored row once the persist call returned it.
    pub confirmed_id: Option<String>,
}

impl OptimisticEntry {
    fn sort_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// Pending entries keyed by trimmed content. Each key holds a FIFO so repeated identical
/// sends reconcile in send order.
#[derive(Debug, Default)]
pub struct OptimisticLedger {
    queues: HashMap<String, VecDeque<OptimisticEntry>>,
    by_client: HashMap<ClientId, String>,
    next_seq: u64,
}

impl OptimisticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, content: &str, now: DateTime<Utc>) -> ClientId {
        let client_id = ClientId::new();
        let key = content_key(content).to_string();
        self.next_seq = self.next_seq.wrapping_add(1);
        let entry = OptimisticEntry {
            client_id,
            content: key.clone(),
            sender: MessageSender::User,
            created_at: now,
            seq: self.next_seq,
            confirmed_id: None,
        };
        self.by_client.insert(client_id, key.clone());
        self.queues.entry(key).or_default().push_back(entry);
        client_id
    }

    /// Idempotent: removing an unknown id is a no-op.
    pub fn remove(&mut self, client_id: ClientId) -> Option<OptimisticEntry> {
        let key = self.by_client.remove(&client_id)?;
        let queue = self.queues.get_mut(&key)?;
        let idx = queue.iter().position(|e| e.client_id == client_id)?;
        let removed = queue.remove(idx);
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        removed
    }

    /// Record the stored row id returned by the persist call. Returns false for unknown ids.
    pub fn confirm(&mut self, client_id: ClientId, message_id: &str) -> bool {
        let Some(key) = self.by_client.get(&client_id) else {
            return false;
        };
        let Some(entry) = self
            .queues
            .get_mut(key)
            .and_then(|q| q.iter_mut().find(|e| e.client_id == client_id))
        else {
            return false;
        };
        entry.confirmed_id = Some(message_id.to_string());
        true
    }

    /// Retire at most one pending entry matched by `message`.
    ///
    /// An entry confirmed as this exact row wins. Otherwise the earliest-created entry with
    /// equal trimmed content whose timestamp is within `window` of the row is retired,
    /// skipping entries already confirmed as a different row.
    pub fn reconcile(&mut self, message: &Message, window: Duration) -> Option<OptimisticEntry> {
        if message.sender != MessageSender::User {
            return None;
        }
        let key = message.content_key();
        let queue = self.queues.get(key)?;

        let exact = queue
            .iter()
            .position(|e| e.confirmed_id.as_deref() == Some(message.id.as_str()));
        let idx = match exact {
            Some(idx) => idx,
            None => {
                let server_at = message.created_at?;
                queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.confirmed_id.is_none())
                    .filter(|(_, e)| within(e.created_at, server_at, window))
                    .min_by_key(|(_, e)| e.sort_key())
                    .map(|(idx, _)| idx)?
            }
        };

        let client_id = queue[idx].client_id;
        self.remove(client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&OptimisticEntry> {
        let key = self.by_client.get(&client_id)?;
        self.queues
            .get(key)?
            .iter()
            .find(|e| e.client_id == client_id)
    }

    /// All pending entries, ordered by creation.
    pub fn list(&self) -> Vec<OptimisticEntry> {
        let mut out: Vec<OptimisticEntry> = self.queues.values().flatten().cloned().collect();
        out.sort_by_key(|e| e.sort_key());
        out
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
        self.by_client.clear();
    }
}

pub(crate) fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    let delta_ms = (a.timestamp_millis() - b.timestamp_millis()).unsigned_abs();
    u128::from(delta_ms) <= window.as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(10);

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_740_000_000_000 + ms).unwrap()
    }

    fn user_msg(id: &str, content: &str, at_ms: i64) -> Message {
        Message::new(id, content, MessageSender::User, Some(t(at_ms)))
    }

    #[test]
    fn add_trims_and_lists_in_creation_order() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.add("  Hello  ", t(0));
        let b = ledger.add("World", t(10));
        let c = ledger.add("Hello", t(10));

        let listed = ledger.list();
        let ids: Vec<ClientId> = listed.iter().map(|e| e.client_id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(listed[0].content, "Hello");
        assert_eq!(listed[0].sender, MessageSender::User);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.add("x", t(0));
        assert!(ledger.remove(a).is_some());
        assert!(ledger.remove(a).is_none());
        assert!(ledger.remove(ClientId::new()).is_none());
        assert!(ledger.is_empty());
        assert!(ledger.queues.is_empty());
    }

    #[test]
    fn reconcile_retires_earliest_matching_entry_once() {
        let mut ledger = OptimisticLedger::new();
        let first = ledger.add("Hi", t(0));
        let second = ledger.add("Hi", t(500));

        let retired = ledger.reconcile(&user_msg("m1", " Hi ", 800), WINDOW).unwrap();
        assert_eq!(retired.client_id, first);
        assert_eq!(ledger.len(), 1);

        let retired = ledger.reconcile(&user_msg("m2", "Hi", 900), WINDOW).unwrap();
        assert_eq!(retired.client_id, second);
        assert!(ledger.reconcile(&user_msg("m3", "Hi", 900), WINDOW).is_none());
    }

    #[test]
    fn reconcile_requires_user_sender_content_and_window() {
        let mut ledger = OptimisticLedger::new();
        ledger.add("Hello", t(0));

        let bot = Message::new("b1", "Hello", MessageSender::Bot, Some(t(100)));
        assert!(ledger.reconcile(&bot, WINDOW).is_none());
        assert!(ledger.reconcile(&user_msg("m1", "Hello!", 100), WINDOW).is_none());
        assert!(ledger.reconcile(&user_msg("m2", "Hello", 10_001), WINDOW).is_none());
        let undated = Message::new("m3", "Hello", MessageSender::User, None);
        assert!(ledger.reconcile(&undated, WINDOW).is_none());

        assert!(ledger.reconcile(&user_msg("m4", "Hello", -10_000), WINDOW).is_some());
    }

    #[test]
    fn confirmed_entry_matches_its_row_regardless_of_window() {
        let mut ledger = OptimisticLedger::new();
        let early = ledger.add("Hi", t(0));
        let late = ledger.add("Hi", t(1_000));
        assert!(ledger.confirm(late, "m-late"));
        assert!(!ledger.confirm(ClientId::new(), "nope"));
        assert_eq!(ledger.get(late).unwrap().confirmed_id.as_deref(), Some("m-late"));

        // Far outside the window (clock skew), but an exact id match.
        let retired = ledger
            .reconcile(&user_msg("m-late", "Hi", 120_000), WINDOW)
            .unwrap();
        assert_eq!(retired.client_id, late);
        assert!(ledger.get(early).is_some());
    }

    #[test]
    fn confirmed_entry_is_not_retired_by_a_different_row() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.add("Hi", t(0));
        ledger.confirm(a, "m-a");
        assert!(ledger.reconcile(&user_msg("m-other", "Hi", 10), WINDOW).is_none());
        assert_eq!(ledger.len(), 1);
    }
}
