use crate::domain::account::AccountState;
use crate::domain::crypto::{Address, Identity};
use crate::domain::pending::{PendingBuffer, PendingKey};
use crate::domain::ports::{Admission, Decision, Deferral, OrderingPolicy, OrderingView, Stall};
use crate::domain::transaction::Transaction;
use crate::error::ValidationError;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Proof-of-authority ordering.
///
/// One designated node stamps every client transaction with the next value
/// of its counter. Every node, the authority included, applies stamped
/// transactions strictly in sequence order, starting at 1.
///
/// The authority only stamps a sender's next nonce. Earlier nonces are
/// dropped as stale; later ones wait unstamped in its pending buffer.
/// Balance and mint checks happen at acceptance on every node, so a bad
/// transaction still consumes its slot and its nonce everywhere.
#[derive(Debug, Clone)]
pub struct AuthorityOrdered {
    authority: Address,
    next_stamp: u64,
    next_expected: u64,
    // Next nonce per sender, counting envelopes this node has stamped.
    issued: HashMap<Address, u64>,
}

impl AuthorityOrdered {
    pub fn new(authority: Address) -> Self {
        Self {
            authority,
            next_stamp: 1,
            next_expected: 1,
            issued: HashMap::new(),
        }
    }

    pub fn authority(&self) -> Address {
        self.authority
    }

    /// Next sequence number this node will settle.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Next sequence number this node would stamp, if it is the authority.
    pub fn next_stamp(&self) -> u64 {
        self.next_stamp
    }

    /// Nonce the authority will stamp next for `from`.
    pub fn next_nonce(&self, from: &Address, state: &AccountState) -> u64 {
        let issued = self.issued.get(from).copied().unwrap_or_default();
        issued.max(state.nonce(from))
    }
}

impl OrderingPolicy for AuthorityOrdered {
    fn name(&self) -> &'static str {
        "authority"
    }

    fn stamp_authority(&self) -> Option<Address> {
        Some(self.authority)
    }

    fn admit(&self, tx: &Transaction, local: &Address) -> Admission {
        match tx.stamp {
            Some(_) => Admission::Order,
            None if *local == self.authority => Admission::Stamp,
            None => Admission::Relay,
        }
    }

    fn ready_to_stamp(&self, tx: &Transaction, view: &OrderingView<'_>) -> Decision {
        let expected = self.next_nonce(&tx.contents.from, view.state);
        match tx.contents.nonce.cmp(&expected) {
            Ordering::Equal => Decision::Accept,
            Ordering::Greater => Decision::Defer(Deferral::NonceGap {
                expected,
                received: tx.contents.nonce,
            }),
            Ordering::Less => Decision::Reject(ValidationError::StaleOrDuplicate),
        }
    }

    fn stamp(&mut self, tx: &Transaction, identity: &Identity) -> Transaction {
        let sequence = self.next_stamp;
        self.next_stamp += 1;
        self.issued
            .insert(tx.contents.from, tx.contents.nonce.saturating_add(1));
        debug!(sequence, tx = %tx.short_id(), "stamping");
        tx.stamped(sequence, identity)
    }

    fn should_accept_now(&self, tx: &Transaction, _view: &OrderingView<'_>) -> Decision {
        let Some(sequence) = tx.sequence() else {
            return Decision::Reject(ValidationError::InvalidSignature);
        };

        if sequence == self.next_expected {
            Decision::Accept
        } else if sequence > self.next_expected {
            Decision::Defer(Deferral::SequenceGap {
                expected: self.next_expected,
                received: sequence,
            })
        } else {
            Decision::Reject(ValidationError::StaleOrDuplicate)
        }
    }

    fn on_settled(&mut self, tx: &Transaction) {
        if tx.sequence() == Some(self.next_expected) {
            self.next_expected += 1;
        }
    }

    // Stamped envelopes wait on their sequence; unstamped ones, only ever
    // buffered at the authority, wait on the sender's nonce.
    fn pending_key(&self, tx: &Transaction) -> PendingKey {
        match tx.sequence() {
            Some(sequence) => PendingKey::Sequence(sequence),
            None => PendingKey::Nonce {
                from: tx.contents.from,
                nonce: tx.contents.nonce,
            },
        }
    }

    fn drain_candidates(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Vec<PendingKey> {
        let mut keys = Vec::new();
        let key = PendingKey::Sequence(self.next_expected);
        if pending.contains(&key) {
            keys.push(key);
        }
        for from in pending.senders() {
            keys.extend(pending.nonces_up_to(from, self.next_nonce(&from, view.state)));
        }
        keys
    }

    fn stall(&self, pending: &PendingBuffer, view: &OrderingView<'_>) -> Option<Stall> {
        let sequenced = pending
            .iter()
            .any(|(key, _)| matches!(key, PendingKey::Sequence(_)));
        if sequenced {
            let waiting_for = PendingKey::Sequence(self.next_expected);
            return (!pending.contains(&waiting_for)).then(|| Stall {
                waiting_for,
                buffered: pending.len(),
            });
        }

        pending.senders().into_iter().find_map(|from| {
            let waiting_for = PendingKey::Nonce {
                from,
                nonce: self.next_nonce(&from, view.state),
            };
            (!pending.contains(&waiting_for)).then(|| Stall {
                waiting_for,
                buffered: pending.len(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountState;
    use crate::domain::transaction::{TransactionType, TxContents};

    fn client_tx(amount: u64) -> Transaction {
        client_tx_at(amount, 0)
    }

    fn client_tx_at(amount: u64, nonce: u64) -> Transaction {
        let alice = Identity::from_seed(1);
        Transaction::sign(
            TxContents {
                r#type: TransactionType::Send,
                from: alice.address(),
                to: Identity::from_seed(2).address(),
                amount,
                nonce,
            },
            &alice,
        )
    }

    #[test]
    fn test_admission_depends_on_role() {
        let authority = Identity::from_seed(10);
        let follower = Identity::from_seed(11);
        let policy = AuthorityOrdered::new(authority.address());
        let raw = client_tx(1);

        assert_eq!(policy.admit(&raw, &authority.address()), Admission::Stamp);
        assert_eq!(policy.admit(&raw, &follower.address()), Admission::Relay);
        assert_eq!(
            policy.admit(&raw.stamped(1, &authority), &follower.address()),
            Admission::Order
        );
    }

    #[test]
    fn test_stamps_are_strictly_increasing() {
        let authority = Identity::from_seed(10);
        let mut policy = AuthorityOrdered::new(authority.address());
        let a = policy.stamp(&client_tx(1), &authority);
        let b = policy.stamp(&client_tx(2), &authority);
        assert_eq!(a.sequence(), Some(1));
        assert_eq!(b.sequence(), Some(2));
        assert_eq!(policy.next_stamp(), 3);
    }

    #[test]
    fn test_decisions_follow_next_expected() {
        let authority = Identity::from_seed(10);
        let mut policy = AuthorityOrdered::new(authority.address());
        let state = AccountState::default();
        let view = OrderingView {
            now: 0,
            state: &state,
        };
        let one = client_tx(1).stamped(1, &authority);
        let two = client_tx(2).stamped(2, &authority);

        assert_eq!(
            policy.should_accept_now(&two, &view),
            Decision::Defer(Deferral::SequenceGap {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(policy.should_accept_now(&one, &view), Decision::Accept);

        policy.on_settled(&one);
        assert_eq!(policy.next_expected(), 2);
        assert_eq!(
            policy.should_accept_now(&one, &view),
            Decision::Reject(ValidationError::StaleOrDuplicate)
        );
        assert_eq!(
            policy.should_accept_now(&client_tx(3), &view),
            Decision::Reject(ValidationError::InvalidSignature)
        );
    }

    #[test]
    fn test_stall_reports_missing_sequence() {
        let authority = Identity::from_seed(10);
        let policy = AuthorityOrdered::new(authority.address());
        let state = AccountState::default();
        let view = OrderingView {
            now: 0,
            state: &state,
        };
        let mut pending = PendingBuffer::new();
        assert_eq!(policy.stall(&pending, &view), None);

        pending.insert(
            PendingKey::Sequence(3),
            client_tx(3).stamped(3, &authority),
        );
        assert_eq!(
            policy.stall(&pending, &view),
            Some(Stall {
                waiting_for: PendingKey::Sequence(1),
                buffered: 1
            })
        );
        assert!(policy.drain_candidates(&pending, &view).is_empty());
    }

    #[test]
    fn test_only_the_next_nonce_is_stamped() {
        let authority = Identity::from_seed(10);
        let mut policy = AuthorityOrdered::new(authority.address());
        let state = AccountState::default();
        let view = OrderingView {
            now: 0,
            state: &state,
        };

        let first = client_tx_at(10, 0);
        assert_eq!(policy.ready_to_stamp(&first, &view), Decision::Accept);
        policy.stamp(&first, &authority);

        // Nonce 0 is spoken for even though nothing has been applied yet.
        assert_eq!(
            policy.ready_to_stamp(&client_tx_at(20, 0), &view),
            Decision::Reject(ValidationError::StaleOrDuplicate)
        );
        assert_eq!(
            policy.ready_to_stamp(&client_tx_at(20, 7), &view),
            Decision::Defer(Deferral::NonceGap {
                expected: 1,
                received: 7
            })
        );
        assert_eq!(
            policy.ready_to_stamp(&client_tx_at(20, 1), &view),
            Decision::Accept
        );
    }

    #[test]
    fn test_unstamped_entries_wait_on_sender_nonce() {
        let authority = Identity::from_seed(10);
        let policy = AuthorityOrdered::new(authority.address());
        let state = AccountState::default();
        let view = OrderingView {
            now: 0,
            state: &state,
        };
        let ahead = client_tx_at(5, 1);
        let key = policy.pending_key(&ahead);
        let from = ahead.contents.from;
        assert_eq!(key, PendingKey::Nonce { from, nonce: 1 });

        let mut pending = PendingBuffer::new();
        pending.insert(key, ahead);
        assert!(policy.drain_candidates(&pending, &view).is_empty());
        assert_eq!(
            policy.stall(&pending, &view),
            Some(Stall {
                waiting_for: PendingKey::Nonce { from, nonce: 0 },
                buffered: 1
            })
        );
    }
}
