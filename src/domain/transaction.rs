use crate::domain::crypto::{self, Address, Hash, Identity, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Send,
    Mint,
}

impl TransactionType {
    fn tag(self) -> u8 {
        match self {
            TransactionType::Send => 0,
            TransactionType::Mint => 1,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Send => f.write_str("send"),
            TransactionType::Mint => f.write_str("mint"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send" => Ok(TransactionType::Send),
            "mint" => Ok(TransactionType::Mint),
            other => Err(format!("unknown transaction type '{other}'")),
        }
    }
}

/// The signed part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContents {
    pub r#type: TransactionType,
    pub from: Address,
    pub to: Address,
    pub amount: u64,
    pub nonce: u64,
}

impl TxContents {
    /// Fixed-layout encoding: type | from | to | amount LE | nonce LE.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 20 + 20 + 8 + 8);
        out.push(self.r#type.tag());
        out.extend_from_slice(self.from.as_bytes());
        out.extend_from_slice(self.to.as_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn hash(&self) -> Hash {
        crypto::hash(&self.canonical_bytes())
    }
}

/// Ordering envelope added by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub sequence: u64,
    pub signature: Signature,
}

impl Stamp {
    /// Digest the authority signs: content hash | sequence LE.
    pub fn digest(contents_hash: &Hash, sequence: u64) -> Hash {
        let mut out = Vec::with_capacity(32 + 8);
        out.extend_from_slice(contents_hash);
        out.extend_from_slice(&sequence.to_le_bytes());
        crypto::hash(&out)
    }
}

/// A signed transaction, optionally stamped by an authority.
///
/// Immutable once built; stamping produces a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub contents: TxContents,
    pub signature: Signature,
    pub stamp: Option<Stamp>,
}

impl Transaction {
    pub fn sign(contents: TxContents, identity: &Identity) -> Self {
        let signature = identity.sign(&contents.hash());
        Self {
            contents,
            signature,
            stamp: None,
        }
    }

    /// Content address used for deduplication. A stamped envelope hashes
    /// differently from the raw client transaction it wraps.
    pub fn id(&self) -> Hash {
        let contents_hash = self.contents.hash();
        match &self.stamp {
            None => contents_hash,
            Some(stamp) => {
                let mut out = Vec::with_capacity(32 + 8);
                out.extend_from_slice(&contents_hash);
                out.extend_from_slice(&stamp.sequence.to_le_bytes());
                crypto::hash(&out)
            }
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        self.stamp.as_ref().map(|s| s.sequence)
    }

    pub fn stamped(&self, sequence: u64, authority: &Identity) -> Self {
        let signature = authority.sign(&Stamp::digest(&self.contents.hash(), sequence));
        Self {
            contents: self.contents.clone(),
            signature: self.signature.clone(),
            stamp: Some(Stamp {
                sequence,
                signature,
            }),
        }
    }

    /// Short hex prefix of the id, for logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.id()[..4])
    }
}
