use thiserror::Error;

/// Why a node refused to apply a transaction.
///
/// These are local decisions. A node never tells its peers why something
/// was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("signature does not recover to the claimed signer")]
    InvalidSignature,
    #[error("insufficient funds: balance {balance}, amount {amount}")]
    InsufficientFunds { balance: u64, amount: u64 },
    #[error("sender is not the recognized minter")]
    UnauthorizedMint,
    /// Two envelopes claim the same sequence number. Sequence and nonce
    /// gaps are not errors: they are buffered as a `Deferral`.
    #[error("another transaction already holds this ordering slot")]
    OrderingConflict,
    #[error("transaction is stale or a duplicate")]
    StaleOrDuplicate,
    #[error("a conflicting transaction with the same sender and nonce was seen")]
    ConflictingTransaction,
    #[error("authority stamp present but no authority is configured")]
    UnsupportedStamp,
}

impl ValidationError {
    /// Ordering outcomes are routine under reordering and duplication;
    /// everything else points at a bad transaction.
    pub fn is_ordering(&self) -> bool {
        matches!(self, ValidationError::StaleOrDuplicate)
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Workload error: {0}")]
    WorkloadError(String),
    #[error("Transport error: {0}")]
    TransportError(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
