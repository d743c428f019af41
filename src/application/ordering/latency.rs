use crate::domain::crypto::{Address, Hash};
use crate::domain::pending::{PendingBuffer, PendingKey};
use crate::domain::ports::{Decision, Deferral, OrderingPolicy, OrderingView, Stall, Tick};
use crate::domain::transaction::Transaction;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How to resolve two transactions from the same sender with the same
/// nonce.
///
/// The default, `FirstSeen`, still accepts the earliest receipt once its
/// window passes, even though a conflicting transaction arrived inside
/// that window. `RejectAll` is the strict rule: no party to a conflict is
/// ever accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// The earliest receipt keeps its slot; later ones are rejected.
    #[default]
    FirstSeen,
    /// Every party to the conflict is rejected.
    RejectAll,
}

/// Leaderless ordering by settlement delay.
///
/// A transaction becomes acceptable once it has been held for `delta` ticks
/// with no conflicting same-nonce transaction seen, and its nonce is the
/// sender's next one.
///
/// This does not guarantee agreement: a node that sees the conflict late,
/// or not at all, can finalize a transaction its peers rejected.
#[derive(Debug, Clone)]
pub struct LatencyBased {
    delta: Tick,
    rule: ConflictRule,
    received_at: HashMap<Hash, Tick>,
    // Ids per (sender, nonce), in receipt order.
    slots: HashMap<(Address, u64), Vec<Hash>>,
}

impl LatencyBased {
    pub fn new(delta: Tick) -> Self {
        Self::with_rule(delta, ConflictRule::default())
    }

    pub fn with_rule(delta: Tick, rule: ConflictRule) -> Self {
        Self {
            delta,
            rule,
            received_at: HashMap::new(),
            slots: HashMap::new(),
        }
    }

    pub fn delta(&self) -> Tick {
        self.delta
    }

    pub fn rule(&self) -> ConflictRule {
        self.rule
    }

    pub fn received_at(&self, tx: &Transaction) -> Option<Tick> {
        self.received_at.get(&tx.id()).copied()
    }

    fn conflict(&self, tx: &Transaction, id: &Hash) -> bool {
        let Some(ids) = self.slots.get(&(tx.contents.from, tx.contents.nonce)) else {
            return false;
        };
        if ids.len() < 2 {
            return false;
        }
        match self.rule {
            ConflictRule::FirstSeen => ids.first() != Some(id),
            ConflictRule::RejectAll => true,
        }
    }
}

impl OrderingPolicy for LatencyBased {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn gossip_on_receipt(&self) -> bool {
        true
    }

    fn observe(&mut self, tx: &Transaction, now: Tick) {
        let id = tx.id();
        self.received_at.entry(id).or_insert(now);
        let ids = self
            .slots
            .entry((tx.contents.from, tx.contents.nonce))
            .or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn should_accept_now(&self, tx: &Transaction, view: &OrderingView<'_>) -> Decision {
        let id = tx.id();
        let expected = view.state.nonce(&tx.contents.from);

        if tx.contents.nonce < expected {
            return Decision::Reject(ValidationError::StaleOrDuplicate);
        }
        if self.conflict(tx, &id) {
            return Decision::Reject(ValidationError::ConflictingTransaction);
        }

        let received = self.received_at.get(&id).copied().unwrap_or(view.now);
        let elapsed = view.now.saturating_sub(received);
        if elapsed < self.delta {
            return Decision::Defer(Deferral::AwaitingFinality {
                remaining: self.delta - elapsed,
            });
        }

        if tx.contents.nonce > expected {
            return Decision::Defer(Deferral::NonceGap {
                expected,
                received: tx.contents.nonce,
            });
        }
        Decision::Accept
    }

    fn on_settled(&mut self, tx: &Transaction) {
        self.received_at.remove(&tx.id());
    }

    fn pending_key(&self, tx: &Transaction) -> PendingKey {
        PendingKey::Nonce {
            from: tx.contents.from,
            nonce: tx.contents.nonce,
        }
    }

    fn drain_candidates(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Vec<PendingKey> {
        pending
            .senders()
            .into_iter()
            .flat_map(|from| pending.nonces_up_to(from, view.state.nonce(&from)))
            .collect()
    }

    fn stall(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Option<Stall> {
        pending.senders().into_iter().find_map(|from| {
            let waiting_for = PendingKey::Nonce {
                from,
                nonce: view.state.nonce(&from),
            };
            if pending.contains(&waiting_for) {
                None
            } else {
                Some(Stall {
                    waiting_for,
                    buffered: pending.len(),
                })
            }
        })
    }
}
