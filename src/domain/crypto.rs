//! Signing, verification and hashing used by every node.
//!
//! Reference-grade only: keys live in memory and are never zeroized.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub type Hash = [u8; 32];

/// SHA-256 over arbitrary bytes.
pub fn hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A 20-byte account address derived from an ed25519 verifying key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = hash(public_key);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An ed25519 signature together with the key that produced it.
///
/// Carrying the key lets a verifier "recover" the signer address the way
/// recoverable ECDSA schemes do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signer: [u8; 32],
    pub bytes: [u8; 64],
}

/// Returns the address that produced `signature` over `digest`, or `None`
/// when the signature does not verify.
pub fn recover_signer(signature: &Signature, digest: &Hash) -> Option<Address> {
    let key = VerifyingKey::from_bytes(&signature.signer).ok()?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.bytes);
    key.verify(digest, &sig).ok()?;
    Some(Address::from_public_key(&signature.signer))
}

/// A participant's key pair and derived address.
///
/// Created once and never mutated. The signing key is not exposed.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    address: Address,
}

impl Identity {
    /// Deterministic identity for reproducible simulations.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, digest: &Hash) -> Signature {
        Signature {
            signer: self.public_key(),
            bytes: self.signing_key.sign(digest).to_bytes(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
