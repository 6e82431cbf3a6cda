//! Merges the live server snapshot with the optimistic ledger into the single ordered,
//! duplicate-free message list the UI renders.
//!
//! Recomputation is synchronous and performs no I/O. `merge` is pure; the only mutation is
//! the retirement pass in [`ReconciliationEngine::retire_confirmed`], which feeds each newly
//! observed server row to the ledger exactly once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ledger::{within, ClientId, OptimisticEntry, OptimisticLedger};
use crate::message::{content_key, Message, MessageSender};
use crate::state::MessageDeliveryState;

/// Time windows used to decide that two records are the same logical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileWindows {
    /// Optimistic entry vs. server row, used to retire ledger entries.
    pub optimistic_match: Duration,
    /// Server row vs. a leftover optimistic row in the merged view.
    pub cross_origin: Duration,
    /// Server user row vs. another server user row with the same content.
    pub server_duplicate: Duration,
}

impl Default for ReconcileWindows {
    fn default() -> Self {
        Self {
            optimistic_match: Duration::from_secs(10),
            cross_origin: Duration::from_secs(1),
            server_duplicate: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewId {
    Server(String),
    Optimistic(ClientId),
}

impl ViewId {
    pub fn is_optimistic(&self) -> bool {
        matches!(self, ViewId::Optimistic(_))
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewId::Server(id) => f.write_str(id),
            ViewId::Optimistic(client_id) => write!(f, "optimistic:{client_id}"),
        }
    }
}

/// One row of the merged conversation view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewMessage {
    pub id: ViewId,
    pub content: String,
    pub sender: MessageSender,
    pub created_at: Option<DateTime<Utc>>,
    pub delivery: MessageDeliveryState,
}

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    windows: ReconcileWindows,
    // Server ids already fed to the ledger. A row retires at most one entry over the
    // lifetime of the conversation, even though snapshots redeliver it.
    seen: HashSet<String>,
}

impl ReconciliationEngine {
    pub fn new(windows: ReconcileWindows) -> Self {
        Self {
            windows,
            seen: HashSet::new(),
        }
    }

    pub fn windows(&self) -> &ReconcileWindows {
        &self.windows
    }

    pub fn has_seen(&self, message_id: &str) -> bool {
        self.seen.contains(message_id)
    }

    /// Feed rows not observed before to the ledger, oldest first. Returns how many
    /// optimistic entries were retired.
    pub fn retire_confirmed(
        &mut self,
        snapshot: &[Message],
        ledger: &mut OptimisticLedger,
    ) -> usize {
        let mut fresh: Vec<&Message> = snapshot
            .iter()
            .filter(|m| !self.seen.contains(&m.id))
            .collect();
        fresh.sort_by(|a, b| {
            timeline_key(a.created_at)
                .cmp(&timeline_key(b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut retired = 0;
        for message in fresh {
            self.seen.insert(message.id.clone());
            if message.sender != MessageSender::User || message.content_key().is_empty() {
                continue;
            }
            if let Some(entry) = ledger.reconcile(message, self.windows.optimistic_match) {
                retired += 1;
                tracing::debug!(
                    target: "parley_core::reconcile",
                    rule = "retire",
                    server_id = %message.id,
                    client_id = %entry.client_id,
                    delta_ms = ?delta_ms(message.created_at, Some(entry.created_at)),
                    "optimistic entry confirmed by live feed"
                );
            }
        }
        retired
    }

    /// Retire confirmed entries, then build the merged view.
    pub fn recompute(
        &mut self,
        snapshot: &[Message],
        ledger: &mut OptimisticLedger,
    ) -> Vec<ViewMessage> {
        self.retire_confirmed(snapshot, ledger);
        merge(snapshot, &ledger.list(), &self.windows)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Server,
    Optimistic,
}

struct Candidate<'a> {
    origin: Origin,
    server_id: &'a str,
    seq: u64,
    client_id: Option<ClientId>,
    content: &'a str,
    sender: MessageSender,
    created_at: Option<DateTime<Utc>>,
    delivery: MessageDeliveryState,
}

type SortKey<'a> = ((bool, Option<DateTime<Utc>>), Origin, &'a str, u64);

impl<'a> Candidate<'a> {
    fn sort_key(&self) -> SortKey<'a> {
        (
            timeline_key(self.created_at),
            self.origin,
            self.server_id,
            self.seq,
        )
    }

    fn view_id(&self) -> ViewId {
        match self.client_id {
            Some(client_id) => ViewId::Optimistic(client_id),
            None => ViewId::Server(self.server_id.to_string()),
        }
    }
}

// Undated rows sort after every dated one, as if stamped "now".
fn timeline_key(ts: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (ts.is_none(), ts)
}

fn delta_ms(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some((a.timestamp_millis() - b.timestamp_millis()).abs()),
        _ => None,
    }
}

fn close(a: &Candidate<'_>, b: &Candidate<'_>, window: Duration) -> bool {
    match (a.created_at, b.created_at) {
        (Some(a), Some(b)) => within(a, b, window),
        _ => false,
    }
}

fn log_drop(rule: &'static str, dropped: &Candidate<'_>, kept: &Candidate<'_>) {
    tracing::debug!(
        target: "parley_core::reconcile",
        rule,
        dropped = %dropped.view_id(),
        kept = %kept.view_id(),
        delta_ms = ?delta_ms(dropped.created_at, kept.created_at),
        "collapsed duplicate row"
    );
}

/// Build the merged view from a server snapshot and the pending optimistic entries.
pub fn merge(
    snapshot: &[Message],
    pending: &[OptimisticEntry],
    windows: &ReconcileWindows,
) -> Vec<ViewMessage> {
    let mut candidates: Vec<Candidate<'_>> = Vec::with_capacity(snapshot.len() + pending.len());
    candidates.extend(snapshot.iter().map(|m| Candidate {
        origin: Origin::Server,
        server_id: m.id.as_str(),
        seq: 0,
        client_id: None,
        content: m.content.as_str(),
        sender: m.sender,
        created_at: m.created_at,
        delivery: MessageDeliveryState::Sent,
    }));
    candidates.extend(pending.iter().map(|e| Candidate {
        origin: Origin::Optimistic,
        server_id: "",
        seq: e.seq,
        client_id: Some(e.client_id),
        content: e.content.as_str(),
        sender: e.sender,
        created_at: Some(e.created_at),
        delivery: if e.confirmed_id.is_some() {
            MessageDeliveryState::Sent
        } else {
            MessageDeliveryState::Pending
        },
    }));

    let mut keep = vec![true; candidates.len()];

    // Cross-origin collapse: server truth wins over any near-simultaneous optimistic row,
    // then a burst of identical optimistic rows shows once.
    for group in dated_groups(&candidates, |_| true) {
        let (servers, optimistic): (Vec<usize>, Vec<usize>) = group
            .iter()
            .partition(|&&i| candidates[i].origin == Origin::Server);

        let mut leftover = Vec::with_capacity(optimistic.len());
        for &o in &optimistic {
            let twin = servers
                .iter()
                .find(|&&s| close(&candidates[o], &candidates[s], windows.cross_origin));
            match twin {
                Some(&s) => {
                    keep[o] = false;
                    log_drop("cross_origin", &candidates[o], &candidates[s]);
                }
                None => leftover.push(o),
            }
        }
        for pair in leftover.windows(2) {
            let (a, b) = (&candidates[pair[0]], &candidates[pair[1]]);
            if close(a, b, windows.cross_origin) {
                keep[pair[1]] = false;
                log_drop("optimistic_burst", b, a);
            }
        }
    }

    // Server-duplicate collapse: identical user rows inserted close together (client retry,
    // at-least-once upstream) show once, keeping the earliest.
    let server_user =
        |c: &Candidate<'_>| c.origin == Origin::Server && c.sender == MessageSender::User;
    for group in dated_groups(&candidates, server_user) {
        for pair in group.windows(2) {
            let (a, b) = (&candidates[pair[0]], &candidates[pair[1]]);
            if close(a, b, windows.server_duplicate) {
                keep[pair[1]] = false;
                log_drop("server_duplicate", b, a);
            }
        }
    }

    let mut survivors: Vec<&Candidate<'_>> = candidates
        .iter()
        .zip(keep)
        .filter_map(|(c, kept)| kept.then_some(c))
        .collect();
    survivors.sort_by_key(|c| c.sort_key());

    survivors
        .into_iter()
        .map(|c| ViewMessage {
            id: c.view_id(),
            content: c.content.to_string(),
            sender: c.sender,
            created_at: c.created_at,
            delivery: c.delivery.clone(),
        })
        .collect()
}

/// Candidate indices grouped by (sender, trimmed content), each group sorted on the
/// timeline. Undated candidates never take part in windowed comparisons.
fn dated_groups<'a>(
    candidates: &[Candidate<'a>],
    include: impl Fn(&Candidate<'a>) -> bool,
) -> Vec<Vec<usize>> {
    let mut groups: HashMap<(MessageSender, &str), Vec<usize>> = HashMap::new();
    for (idx, c) in candidates.iter().enumerate() {
        if c.created_at.is_none() || !include(c) {
            continue;
        }
        groups
            .entry((c.sender, content_key(c.content)))
            .or_default()
            .push(idx);
    }
    groups
        .into_values()
        .map(|mut idxs| {
            idxs.sort_by_key(|&i| candidates[i].sort_key());
            idxs
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_740_000_000_000 + ms).unwrap()
    }

    fn user(id: &str, content: &str, at_ms: i64) -> Message {
        Message::new(id, content, MessageSender::User, Some(t(at_ms)))
    }

    fn bot(id: &str, content: &str, at_ms: i64) -> Message {
        Message::new(id, content, MessageSender::Bot, Some(t(at_ms)))
    }

    fn ids(view: &[ViewMessage]) -> Vec<String> {
        view.iter().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn empty_inputs_produce_empty_view() {
        let mut engine = ReconciliationEngine::default();
        let mut ledger = OptimisticLedger::new();
        assert!(engine.recompute(&[], &mut ledger).is_empty());
    }

    #[test]
    fn server_echo_retires_optimistic_entry() {
        let mut engine = ReconciliationEngine::default();
        let mut ledger = OptimisticLedger::new();
        ledger.add("Hello", t(0));

        let view = engine.recompute(&[], &mut ledger);
        assert_eq!(view.len(), 1);
        assert!(view[0].id.is_optimistic());
        assert_eq!(view[0].delivery, MessageDeliveryState::Pending);

        let snapshot = vec![user("m1", "Hello", 1_000)];
        let view = engine.recompute(&snapshot, &mut ledger);
        assert_eq!(ids(&view), vec!["m1"]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn redelivered_row_does_not_retire_a_later_identical_send() {
        let mut engine = ReconciliationEngine::default();
        let mut ledger = OptimisticLedger::new();
        ledger.add("ok", t(0));
        let snapshot = vec![user("m1", "ok", 500)];
        engine.recompute(&snapshot, &mut ledger);
        assert!(ledger.is_empty());

        // User says "ok" again three seconds later; the old row is redelivered unchanged.
        let again = ledger.add("ok", t(3_000));
        let view = engine.recompute(&snapshot, &mut ledger);
        assert!(ledger.get(again).is_some());
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].id, ViewId::Optimistic(again));
    }

    #[test]
    fn near_simultaneous_server_row_beats_leftover_optimistic() {
        let windows = ReconcileWindows::default();
        let mut ledger = OptimisticLedger::new();
        let client = ledger.add("Hey", t(0));
        // Entry confirmed as some other row, so the ledger will not retire it by window.
        ledger.confirm(client, "elsewhere");

        let snapshot = vec![user("m1", "Hey", 600)];
        let view = merge(&snapshot, &ledger.list(), &windows);
        assert_eq!(ids(&view), vec!["m1"]);

        let far = vec![user("m1", "Hey", 1_600)];
        let view = merge(&far, &ledger.list(), &windows);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].id, ViewId::Optimistic(client));
        assert_eq!(view[0].delivery, MessageDeliveryState::Sent);
    }

    #[test]
    fn bot_row_never_hides_optimistic_user_row() {
        let windows = ReconcileWindows::default();
        let mut ledger = OptimisticLedger::new();
        let client = ledger.add("ping", t(0));
        let snapshot = vec![bot("b1", "ping", 100)];
        let view = merge(&snapshot, &ledger.list(), &windows);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].id, ViewId::Optimistic(client));
        assert_eq!(view[1].sender, MessageSender::Bot);
    }

    #[test]
    fn duplicate_server_rows_keep_the_earliest() {
        let windows = ReconcileWindows::default();
        let snapshot = vec![
            user("late", "Hi", 1_200),
            user("early", "Hi", 0),
            bot("b1", "Hi", 1_500),
        ];
        let view = merge(&snapshot, &[], &windows);
        assert_eq!(ids(&view), vec!["early", "b1"]);

        let spaced = vec![user("a", "Hi", 0), user("b", "Hi", 2_500)];
        assert_eq!(merge(&spaced, &[], &windows).len(), 2);
    }

    #[test]
    fn undated_rows_skip_collapse_and_sort_last() {
        let windows = ReconcileWindows::default();
        let snapshot = vec![
            Message::new("z-undated", "Hi", MessageSender::User, None),
            user("a", "Hi", 0),
            Message::new("b-undated", "Hi", MessageSender::User, None),
            bot("bot", "answer", 5_000),
        ];
        let view = merge(&snapshot, &[], &windows);
        assert_eq!(ids(&view), vec!["a", "bot", "b-undated", "z-undated"]);
    }

    #[test]
    fn ties_break_on_origin_then_identifier() {
        let windows = ReconcileWindows {
            cross_origin: Duration::ZERO,
            server_duplicate: Duration::ZERO,
            ..ReconcileWindows::default()
        };
        let mut ledger = OptimisticLedger::new();
        let client = ledger.add("other", t(0));
        let snapshot = vec![bot("m2", "x", 0), bot("m1", "y", 0)];
        let view = merge(&snapshot, &ledger.list(), &windows);
        assert_eq!(
            ids(&view),
            vec!["m1".to_string(), "m2".to_string(), format!("optimistic:{client}")]
        );
    }

    fn random_inputs(rng: &mut StdRng) -> (Vec<Message>, OptimisticLedger) {
        let contents = ["a", "b", " a ", "c"];
        let mut snapshot = Vec::new();
        for i in 0..rng.gen_range(0..12) {
            let content = contents[rng.gen_range(0..contents.len())];
            let at = rng.gen_range(0..8_000);
            let sender = if rng.gen_bool(0.7) {
                MessageSender::User
            } else {
                MessageSender::Bot
            };
            let created_at = if rng.gen_bool(0.1) { None } else { Some(t(at)) };
            snapshot.push(Message::new(format!("m{i}"), content, sender, created_at));
        }
        let mut ledger = OptimisticLedger::new();
        for _ in 0..rng.gen_range(0..4) {
            let content = contents[rng.gen_range(0..contents.len())];
            ledger.add(content, t(rng.gen_range(0..8_000)));
        }
        (snapshot, ledger)
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let (snapshot, mut ledger) = random_inputs(&mut rng);
            let mut engine = ReconciliationEngine::default();
            let first = engine.recompute(&snapshot, &mut ledger);
            let pending_after_first = ledger.len();
            let second = engine.recompute(&snapshot, &mut ledger);
            assert_eq!(first, second);
            assert_eq!(ledger.len(), pending_after_first);
        }
    }

    #[test]
    fn merged_view_is_ordered_and_free_of_near_duplicates() {
        let windows = ReconcileWindows::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..300 {
            let (snapshot, mut ledger) = random_inputs(&mut rng);
            let mut engine = ReconciliationEngine::new(windows);
            let view = engine.recompute(&snapshot, &mut ledger);

            for pair in view.windows(2) {
                assert!(timeline_key(pair[0].created_at) <= timeline_key(pair[1].created_at));
            }

            let users: Vec<&ViewMessage> = view
                .iter()
                .filter(|m| m.sender == MessageSender::User && m.created_at.is_some())
                .collect();
            for (i, a) in users.iter().enumerate() {
                for b in &users[i + 1..] {
                    if content_key(&a.content) != content_key(&b.content) {
                        continue;
                    }
                    let (Some(at), Some(bt)) = (a.created_at, b.created_at) else {
                        continue;
                    };
                    assert!(
                        !within(at, bt, windows.cross_origin),
                        "double-counted {} / {}",
                        a.id,
                        b.id
                    );
                }
            }
        }
    }

    #[test]
    fn matching_row_retires_exactly_one_entry() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let mut ledger = OptimisticLedger::new();
            let burst = rng.gen_range(1..5);
            for i in 0..burst {
                ledger.add("same", t(i * 300));
            }
            let mut engine = ReconciliationEngine::default();
            let retired = engine.retire_confirmed(&[user("m", "same", 200)], &mut ledger);
            assert_eq!(retired, 1);
            assert_eq!(ledger.len() as i64, burst - 1);
        }
    }
}
