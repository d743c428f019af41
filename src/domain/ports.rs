use super::account::AccountState;
use super::crypto::{Address, Identity};
use super::pending::{PendingBuffer, PendingKey};
use super::transaction::Transaction;
use crate::error::ValidationError;

/// Index of a node on the transport.
pub type PeerId = usize;

/// Discrete unit of simulated (or scaled wall-clock) time.
pub type Tick = u64;

/// Outbound side of the network transport, as seen by a node.
pub trait Outbox {
    /// Sends `tx` to every peer of `sender` except `except`.
    fn broadcast(&mut self, sender: PeerId, tx: &Transaction, except: Option<PeerId>);
}

/// Why a transaction is not acceptable yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    SequenceGap { expected: u64, received: u64 },
    NonceGap { expected: u64, received: u64 },
    AwaitingFinality { remaining: Tick },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Defer(Deferral),
    Reject(ValidationError),
}

/// What a node should do with a freshly received, signature-checked
/// transaction before asking for an ordering decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run it through the ordering decision locally.
    Order,
    /// Not ours to order; pass it on unchanged.
    Relay,
    /// We assign its order; stamp it first.
    Stamp,
}

/// Read-only context handed to the policy for each decision.
#[derive(Debug, Clone, Copy)]
pub struct OrderingView<'a> {
    pub now: Tick,
    pub state: &'a AccountState,
}

/// A node holding buffered work it cannot make progress on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    pub waiting_for: PendingKey,
    pub buffered: usize,
}

/// Decides when a transaction may be applied.
///
/// A `NodeAgent` is built with exactly one policy and is otherwise
/// unaware of which ordering scheme is in use.
pub trait OrderingPolicy: Send {
    fn name(&self) -> &'static str;

    /// Address whose stamp signatures this policy trusts, if any.
    fn stamp_authority(&self) -> Option<Address> {
        None
    }

    fn admit(&self, _tx: &Transaction, _local: &Address) -> Admission {
        Admission::Order
    }

    /// Whether an unstamped `tx` may take the next ordering slot yet.
    fn ready_to_stamp(&self, _tx: &Transaction, _view: &OrderingView<'_>) -> Decision {
        Decision::Accept
    }

    /// Wraps `tx` in an ordering envelope. Only called after `admit`
    /// returned `Admission::Stamp` and `ready_to_stamp` accepted it.
    fn stamp(&mut self, tx: &Transaction, _identity: &Identity) -> Transaction {
        tx.clone()
    }

    /// Whether tentatively received transactions are gossiped before they
    /// are accepted.
    fn gossip_on_receipt(&self) -> bool {
        false
    }

    /// First signature-checked receipt of `tx`.
    fn observe(&mut self, _tx: &Transaction, _now: Tick) {}

    fn should_accept_now(&self, tx: &Transaction, view: &OrderingView<'_>) -> Decision;

    /// `tx` consumed its ordering slot, whether or not it applied.
    fn on_settled(&mut self, tx: &Transaction);

    fn pending_key(&self, tx: &Transaction) -> PendingKey;

    /// Buffered keys worth re-evaluating now.
    fn drain_candidates(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Vec<PendingKey>;

    /// Reports buffered work that is blocked on something still missing.
    fn stall(&self, _pending: &PendingBuffer, _view: &OrderingView<'_>) -> Option<Stall> {
        None
    }
}

pub type OrderingPolicyBox = Box<dyn OrderingPolicy>;

impl<T: OrderingPolicy + ?Sized> OrderingPolicy for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn stamp_authority(&self) -> Option<Address> {
        (**self).stamp_authority()
    }

    fn admit(&self, tx: &Transaction, local: &Address) -> Admission {
        (**self).admit(tx, local)
    }

    fn ready_to_stamp(&self, tx: &Transaction, view: &OrderingView<'_>) -> Decision {
        (**self).ready_to_stamp(tx, view)
    }

    fn stamp(&mut self, tx: &Transaction, identity: &Identity) -> Transaction {
        (**self).stamp(tx, identity)
    }

    fn gossip_on_receipt(&self) -> bool {
        (**self).gossip_on_receipt()
    }

    fn observe(&mut self, tx: &Transaction, now: Tick) {
        (**self).observe(tx, now)
    }

    fn should_accept_now(&self, tx: &Transaction, view: &OrderingView<'_>) -> Decision {
        (**self).should_accept_now(tx, view)
    }

    fn on_settled(&mut self, tx: &Transaction) {
        (**self).on_settled(tx)
    }

    fn pending_key(&self, tx: &Transaction) -> PendingKey {
        (**self).pending_key(tx)
    }

    fn drain_candidates(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Vec<PendingKey> {
        (**self).drain_candidates(pending, view)
    }

    fn stall(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Option<Stall> {
        (**self).stall(pending, view)
    }
}
