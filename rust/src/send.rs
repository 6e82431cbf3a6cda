//! Send coordinator: one in-flight send per conversation, debounced, with rollback.
//!
//! The coordinator owns no I/O. Callers drive it through the transitions around their own
//! persist/notify calls; see `SharedConversation::submit` and the app actor.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SubmitRejected;
use crate::ledger::{ClientId, OptimisticLedger};
use crate::message::{content_key, Message};

pub const DEFAULT_SEND_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Sending {
        client_id: ClientId,
        content: String,
        /// The append call succeeded; waiting on the reply trigger.
        persisted: bool,
    },
    /// The append call failed. Holds the text so the composer can restore it.
    RolledBack { content: String },
}

/// Handle for an accepted submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub client_id: ClientId,
    pub content: String,
}

#[derive(Debug)]
pub struct SendCoordinator {
    phase: SendPhase,
    debounce: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl Default for SendCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_DEBOUNCE)
    }
}

impl SendCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            phase: SendPhase::Idle,
            debounce,
            last_accepted: None,
        }
    }

    pub fn phase(&self) -> &SendPhase {
        &self.phase
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.phase, SendPhase::Sending { .. })
    }

    pub fn in_flight(&self) -> Option<ClientId> {
        match &self.phase {
            SendPhase::Sending { client_id, .. } => Some(*client_id),
            _ => None,
        }
    }

    /// Accept or reject a submit. On acceptance the optimistic entry is already in the ledger.
    pub fn begin(
        &mut self,
        content: &str,
        now: DateTime<Utc>,
        ledger: &mut OptimisticLedger,
    ) -> Result<OutgoingMessage, SubmitRejected> {
        let content = content_key(content);
        if content.is_empty() {
            return Err(SubmitRejected::EmptyContent);
        }
        if self.is_sending() {
            return Err(SubmitRejected::InFlight);
        }
        if let Some(last) = self.last_accepted {
            let elapsed_ms = (now - last).num_milliseconds();
            let debounce_ms = i64::try_from(self.debounce.as_millis()).unwrap_or(i64::MAX);
            // A clock that stepped backwards never blocks sends.
            if (0..debounce_ms).contains(&elapsed_ms) {
                return Err(SubmitRejected::Debounced {
                    remaining_ms: (debounce_ms - elapsed_ms) as u64,
                });
            }
        }

        let client_id = ledger.add(content, now);
        self.last_accepted = Some(now);
        self.phase = SendPhase::Sending {
            client_id,
            content: content.to_string(),
            persisted: false,
        };
        tracing::debug!(%client_id, "send accepted");
        Ok(OutgoingMessage {
            client_id,
            content: content.to_string(),
        })
    }

    /// Record the stored row for the in-flight send. Returns false for stale results.
    pub fn persist_succeeded(
        &mut self,
        client_id: ClientId,
        message: &Message,
        ledger: &mut OptimisticLedger,
    ) -> bool {
        let SendPhase::Sending {
            client_id: current,
            persisted,
            ..
        } = &mut self.phase
        else {
            tracing::warn!(%client_id, "persist result with no send in flight");
            return false;
        };
        if *current != client_id {
            tracing::warn!(%client_id, in_flight = %current, "stale persist result");
            return false;
        }
        *persisted = true;
        ledger.confirm(client_id, &message.id);
        true
    }

    /// Roll back the in-flight send. Returns the text to restore, or `None` for stale results.
    pub fn persist_failed(
        &mut self,
        client_id: ClientId,
        ledger: &mut OptimisticLedger,
    ) -> Option<String> {
        match &self.phase {
            SendPhase::Sending {
                client_id: current,
                content,
                ..
            } if *current == client_id => {
                let content = content.clone();
                ledger.remove(client_id);
                tracing::debug!(%client_id, "send rolled back");
                self.phase = SendPhase::RolledBack {
                    content: content.clone(),
                };
                Some(content)
            }
            _ => {
                tracing::warn!(%client_id, "stale persist failure");
                None
            }
        }
    }

    /// Release the submission lock once the reply trigger has answered, whatever the outcome.
    pub fn finish(&mut self, client_id: ClientId) -> bool {
        if self.in_flight() != Some(client_id) {
            return false;
        }
        self.phase = SendPhase::Idle;
        true
    }

    pub fn restorable_draft(&self) -> Option<&str> {
        match &self.phase {
            SendPhase::RolledBack { content } => Some(content),
            _ => None,
        }
    }

    /// Hand the rolled-back text to the composer and return to idle.
    pub fn take_restorable_draft(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.phase, SendPhase::Idle) {
            SendPhase::RolledBack { content } => Some(content),
            other => {
                self.phase = other;
                None
            }
        }
    }
}
