use crate::application::ledger::{Ledger, LedgerConfig};
use crate::domain::account::{AccountState, Genesis};
use crate::domain::crypto::{Address, Hash, Identity};
use crate::domain::pending::{PendingBuffer, PendingKey};
use crate::domain::ports::{
    Admission, Decision, Deferral, OrderingPolicy, OrderingView, Outbox, PeerId, Stall, Tick,
};
use crate::domain::transaction::{Transaction, TransactionType, TxContents};
use crate::error::ValidationError;
use tracing::{debug, trace, warn};

/// What `NodeAgent::receive` did with a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Applied, followed by `drained` buffered transactions.
    Applied { drained: usize },
    /// Parked in the pending buffer.
    Deferred(Deferral),
    /// Passed on unchanged for another node to order.
    Relayed,
    Dropped(ValidationError),
}

/// A dropped transaction, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub tx_id: Hash,
    pub reason: ValidationError,
}

/// A participant: one identity, one ledger, one ordering policy.
///
/// All state mutation goes through `receive` (and the drain it triggers),
/// including for transactions this node created itself.
pub struct NodeAgent<P: OrderingPolicy> {
    id: PeerId,
    identity: Identity,
    ledger: Ledger,
    policy: P,
    next_nonce: u64,
    rejections: Vec<Rejection>,
}

impl<P: OrderingPolicy> NodeAgent<P> {
    pub fn new(
        id: PeerId,
        identity: Identity,
        genesis: &Genesis,
        config: LedgerConfig,
        policy: P,
    ) -> Self {
        Self {
            id,
            identity,
            ledger: Ledger::new(genesis, config),
            policy,
            next_nonce: 0,
            rejections: Vec::new(),
        }
    }

    /// Builds and signs a transaction from this node's identity.
    ///
    /// Ledger state is not touched. Consecutive calls issue consecutive
    /// nonces even before earlier transactions are applied.
    pub fn generate_tx(&mut self, to: Address, amount: u64, r#type: TransactionType) -> Transaction {
        let from = self.identity.address();
        let nonce = self.next_nonce.max(self.ledger.state().nonce(&from));
        self.next_nonce = nonce + 1;

        Transaction::sign(
            TxContents {
                r#type,
                from,
                to,
                amount,
                nonce,
            },
            &self.identity,
        )
    }

    /// Handles a transaction delivered from `from` (`None` when submitted
    /// locally).
    pub fn receive(
        &mut self,
        tx: Transaction,
        from: Option<PeerId>,
        now: Tick,
        outbox: &mut dyn Outbox,
    ) -> Outcome {
        let id = tx.id();
        if self.ledger.has_seen(&id) {
            trace!(node = self.id, tx = %tx.short_id(), "already seen");
            return Outcome::Dropped(ValidationError::StaleOrDuplicate);
        }

        if let Err(reason) = self
            .ledger
            .verify_signatures(&tx, self.policy.stamp_authority())
        {
            return self.reject(id, reason);
        }

        match self.policy.admit(&tx, &self.identity.address()) {
            Admission::Order => {}
            Admission::Relay => {
                self.ledger.mark_seen(id);
                outbox.broadcast(self.id, &tx, from);
                debug!(node = self.id, tx = %tx.short_id(), "relayed");
                return Outcome::Relayed;
            }
            Admission::Stamp => {
                self.ledger.mark_seen(id);
                return self.issue(tx, now, outbox);
            }
        }

        if self.policy.gossip_on_receipt() {
            self.ledger.mark_seen(id);
            outbox.broadcast(self.id, &tx, from);
        }
        self.policy.observe(&tx, now);

        let decision = self.policy.should_accept_now(
            &tx,
            &OrderingView {
                now,
                state: self.ledger.state(),
            },
        );
        match decision {
            Decision::Accept => match self.settle(tx, from, outbox) {
                Ok(()) => Outcome::Applied {
                    drained: self.drain(now, outbox),
                },
                Err(reason) => {
                    self.drain(now, outbox);
                    Outcome::Dropped(reason)
                }
            },
            Decision::Defer(deferral) => self.park(tx, deferral),
            Decision::Reject(reason) => self.reject(id, reason),
        }
    }

    // Stamps a client transaction once it holds its sender's next nonce and
    // orders the envelope like any other.
    fn issue(&mut self, tx: Transaction, now: Tick, outbox: &mut dyn Outbox) -> Outcome {
        let decision = self.policy.ready_to_stamp(
            &tx,
            &OrderingView {
                now,
                state: self.ledger.state(),
            },
        );
        match decision {
            Decision::Accept => {
                let stamped = self.policy.stamp(&tx, &self.identity);
                self.receive(stamped, None, now, outbox)
            }
            Decision::Defer(deferral) => self.park(tx, deferral),
            Decision::Reject(reason) => self.reject(tx.id(), reason),
        }
    }

    fn park(&mut self, tx: Transaction, deferral: Deferral) -> Outcome {
        let id = tx.id();
        let key = self.policy.pending_key(&tx);
        if let Some(parked) = self.ledger.pending().get(&key) {
            let reason = if parked.id() == id {
                ValidationError::StaleOrDuplicate
            } else if let PendingKey::Sequence(_) = key {
                // Two envelopes stamped with the same sequence.
                ValidationError::OrderingConflict
            } else {
                ValidationError::ConflictingTransaction
            };
            return self.reject(id, reason);
        }
        debug!(node = self.id, tx = %tx.short_id(), ?deferral, "deferred");
        self.ledger.pending_mut().insert(key, tx);
        Outcome::Deferred(deferral)
    }

    /// Re-evaluates the pending buffer at `now`. Time-based deferrals only
    /// settle through this.
    pub fn tick(&mut self, now: Tick, outbox: &mut dyn Outbox) -> usize {
        self.drain(now, outbox)
    }

    // Pops ready entries until a full pass makes no progress.
    fn drain(&mut self, now: Tick, outbox: &mut dyn Outbox) -> usize {
        let mut applied = 0;
        loop {
            let candidates = self.policy.drain_candidates(
                self.ledger.pending(),
                &OrderingView {
                    now,
                    state: self.ledger.state(),
                },
            );

            let mut progressed = false;
            for key in candidates {
                let Some(tx) = self.ledger.pending().get(&key) else {
                    continue;
                };
                let view = OrderingView {
                    now,
                    state: self.ledger.state(),
                };
                let stamping =
                    self.policy.admit(tx, &self.identity.address()) == Admission::Stamp;
                let decision = if stamping {
                    self.policy.ready_to_stamp(tx, &view)
                } else {
                    self.policy.should_accept_now(tx, &view)
                };
                match decision {
                    Decision::Defer(_) => {}
                    Decision::Accept => {
                        if let Some(tx) = self.ledger.pending_mut().take(&key) {
                            if stamping {
                                if let Outcome::Applied { drained } =
                                    self.issue(tx, now, outbox)
                                {
                                    applied += 1 + drained;
                                }
                            } else if self.settle(tx, None, outbox).is_ok() {
                                applied += 1;
                            }
                            progressed = true;
                        }
                    }
                    Decision::Reject(reason) => {
                        if let Some(tx) = self.ledger.pending_mut().take(&key) {
                            self.reject(tx.id(), reason);
                            progressed = true;
                        }
                    }
                }
            }

            if !progressed {
                return applied;
            }
        }
    }

    // Consumes the ordering slot and the sender's nonce, then applies. The
    // envelope is passed on either way so peers can consume the same slot.
    fn settle(
        &mut self,
        tx: Transaction,
        from: Option<PeerId>,
        outbox: &mut dyn Outbox,
    ) -> Result<(), ValidationError> {
        let id = tx.id();
        self.policy.on_settled(&tx);
        if !self.policy.gossip_on_receipt() {
            outbox.broadcast(self.id, &tx, from);
        }
        self.ledger.mark_seen(id);

        if let Err(reason) = self.ledger.check_preconditions(&tx) {
            self.ledger.consume_nonce(&tx);
            self.reject(id, reason.clone());
            return Err(reason);
        }
        let short_id = tx.short_id();
        self.ledger.apply(tx)?;
        debug!(node = self.id, tx = %short_id, "applied");
        Ok(())
    }

    fn reject(&mut self, tx_id: Hash, reason: ValidationError) -> Outcome {
        let short_id = hex::encode(&tx_id[..4]);
        if reason.is_ordering() {
            debug!(node = self.id, tx = %short_id, %reason, "dropped");
        } else {
            warn!(node = self.id, tx = %short_id, %reason, "dropped");
        }
        self.rejections.push(Rejection {
            tx_id,
            reason: reason.clone(),
        });
        Outcome::Dropped(reason)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn state(&self) -> &AccountState {
        self.ledger.state()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.ledger.state().balance(address)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.ledger.state().nonce(address)
    }

    pub fn pending(&self) -> &PendingBuffer {
        self.ledger.pending()
    }

    pub fn history(&self) -> &[Transaction] {
        self.ledger.history()
    }

    pub fn history_of(&self, address: &Address) -> Vec<&Transaction> {
        self.ledger.history_of(address)
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Buffered work blocked on a missing predecessor, evaluated at `now`.
    pub fn stall(&self, now: Tick) -> Option<Stall> {
        self.policy.stall(
            self.ledger.pending(),
            &OrderingView {
                now,
                state: self.ledger.state(),
            },
        )
    }
}
