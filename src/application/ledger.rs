use crate::domain::account::{AccountState, Genesis};
use crate::domain::crypto::{Address, Hash, recover_signer};
use crate::domain::pending::{PendingBuffer, SeenSet};
use crate::domain::transaction::{Stamp, Transaction, TransactionType};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Where minted tokens come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MintSupply {
    /// Mints create new supply.
    #[default]
    Unbounded,
    /// Mints move tokens out of the minter's own balance.
    IssuancePool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    /// The only address allowed to mint. `None` disables minting.
    pub minter: Option<Address>,
    pub mint_supply: MintSupply,
}

/// Validates and applies transactions against one node's account state.
///
/// Also owns the node's seen set and pending buffer. The ledger itself does
/// not decide ordering; that is the policy's job.
#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    state: AccountState,
    seen: SeenSet,
    pending: PendingBuffer,
    history: Vec<Transaction>,
}

impl Ledger {
    pub fn new(genesis: &Genesis, config: LedgerConfig) -> Self {
        Self {
            config,
            state: AccountState::from_genesis(genesis),
            seen: SeenSet::new(),
            pending: PendingBuffer::new(),
            history: Vec::new(),
        }
    }

    /// Full check: signatures first, then type-specific preconditions.
    pub fn validate(
        &self,
        tx: &Transaction,
        authority: Option<Address>,
    ) -> Result<(), ValidationError> {
        self.verify_signatures(tx, authority)?;
        self.check_preconditions(tx)
    }

    /// Sender signature must recover to `from`; a stamp, when present, must
    /// recover to `authority`.
    pub fn verify_signatures(
        &self,
        tx: &Transaction,
        authority: Option<Address>,
    ) -> Result<(), ValidationError> {
        let contents_hash = tx.contents.hash();
        if recover_signer(&tx.signature, &contents_hash) != Some(tx.contents.from) {
            return Err(ValidationError::InvalidSignature);
        }

        if let Some(stamp) = &tx.stamp {
            let authority = authority.ok_or(ValidationError::UnsupportedStamp)?;
            let digest = Stamp::digest(&contents_hash, stamp.sequence);
            if recover_signer(&stamp.signature, &digest) != Some(authority) {
                return Err(ValidationError::InvalidSignature);
            }
        }

        Ok(())
    }

    pub fn check_preconditions(&self, tx: &Transaction) -> Result<(), ValidationError> {
        let contents = &tx.contents;
        match contents.r#type {
            TransactionType::Send => {
                let balance = self.state.balance(&contents.from);
                if balance < contents.amount {
                    return Err(ValidationError::InsufficientFunds {
                        balance,
                        amount: contents.amount,
                    });
                }
            }
            TransactionType::Mint => {
                if self.config.minter != Some(contents.from) {
                    return Err(ValidationError::UnauthorizedMint);
                }
                if self.config.mint_supply == MintSupply::IssuancePool {
                    let balance = self.state.balance(&contents.from);
                    if balance < contents.amount {
                        return Err(ValidationError::InsufficientFunds {
                            balance,
                            amount: contents.amount,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies `tx` to the account state.
    ///
    /// Preconditions are re-checked so a balance can never go negative, even
    /// if the caller skipped `validate`. Deduplication is the caller's job.
    pub fn apply(&mut self, tx: Transaction) -> Result<(), ValidationError> {
        self.check_preconditions(&tx)?;

        let contents = &tx.contents;
        match contents.r#type {
            TransactionType::Send => {
                self.state.get_mut(contents.from).debit(contents.amount);
                self.state.get_mut(contents.to).credit(contents.amount);
            }
            TransactionType::Mint => {
                if self.config.mint_supply == MintSupply::IssuancePool {
                    self.state.get_mut(contents.from).debit(contents.amount);
                }
                self.state.get_mut(contents.to).credit(contents.amount);
            }
        }
        self.state.get_mut(contents.from).nonce += 1;

        self.seen.insert(tx.id());
        self.history.push(tx);
        Ok(())
    }

    /// Settles a transaction that failed its preconditions: the sender's
    /// nonce moves on so later transactions are not left waiting for it.
    /// Balances and history are untouched.
    pub fn consume_nonce(&mut self, tx: &Transaction) {
        let account = self.state.get_mut(tx.contents.from);
        if account.nonce == tx.contents.nonce {
            account.nonce += 1;
        }
        self.seen.insert(tx.id());
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn has_seen(&self, hash: &Hash) -> bool {
        self.seen.contains(hash)
    }

    pub fn mark_seen(&mut self, hash: Hash) -> bool {
        self.seen.insert(hash)
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingBuffer {
        &mut self.pending
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    /// Applied transactions that touched `address`, oldest first.
    pub fn history_of(&self, address: &Address) -> Vec<&Transaction> {
        self.history
            .iter()
            .filter(|tx| tx.contents.from == *address || tx.contents.to == *address)
            .collect()
    }
}
