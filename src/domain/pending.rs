use crate::domain::crypto::{Address, Hash};
use crate::domain::transaction::Transaction;
use std::collections::{BTreeMap, HashSet};

/// Key a deferred transaction is parked under until its ordering
/// precondition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingKey {
    /// Authority-assigned sequence number.
    Sequence(u64),
    /// Sender nonce.
    Nonce { from: Address, nonce: u64 },
}

/// Transactions waiting on a predecessor.
///
/// Each entry is removed exactly once, when it is taken for settlement.
#[derive(Debug, Default, Clone)]
pub struct PendingBuffer {
    entries: BTreeMap<PendingKey, Transaction>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `tx` under `key`. An existing entry under the same key is kept
    /// and `false` is returned.
    pub fn insert(&mut self, key: PendingKey, tx: Transaction) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, tx);
        true
    }

    pub fn get(&self, key: &PendingKey) -> Option<&Transaction> {
        self.entries.get(key)
    }

    pub fn take(&mut self, key: &PendingKey) -> Option<Transaction> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PendingKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PendingKey, &Transaction)> {
        self.entries.iter()
    }

    /// Nonce-keyed entries for `from` with nonce at most `max_nonce`.
    pub fn nonces_up_to(&self, from: Address, max_nonce: u64) -> Vec<PendingKey> {
        let start = PendingKey::Nonce { from, nonce: 0 };
        let end = PendingKey::Nonce {
            from,
            nonce: max_nonce,
        };
        self.entries.range(start..=end).map(|(k, _)| *k).collect()
    }

    /// Distinct senders with nonce-keyed entries.
    pub fn senders(&self) -> Vec<Address> {
        let mut out: Vec<Address> = Vec::new();
        for key in self.entries.keys() {
            if let PendingKey::Nonce { from, .. } = key
                && out.last() != Some(from)
            {
                out.push(*from);
            }
        }
        out
    }
}

/// Hashes of transactions this node has applied or broadcast.
///
/// Grows for the node's lifetime; there is no eviction.
#[derive(Debug, Default, Clone)]
pub struct SeenSet {
    hashes: HashSet<Hash>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the hash was not already present.
    pub fn insert(&mut self, hash: Hash) -> bool {
        self.hashes.insert(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
