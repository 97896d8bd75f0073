// Wallet error taxonomy

use crate::core::Hash256;

/// Errors raised by the wallet core.
///
/// Every variant is terminal for the operation that produced it; nothing in
/// the core retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The platform random source could not be read
    #[error("entropy source unavailable: {0}")]
    Entropy(String),

    /// Malformed WIF, address, hex or transaction bytes
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Eligible UTXOs do not cover payments plus fee
    #[error("insufficient funds: available {available} sat, required {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    /// A transaction was requested with no inputs
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    /// A payment output is below the dust threshold
    #[error("output of {value} sat is below the dust threshold of {threshold} sat")]
    DustOutput { value: u64, threshold: u64 },

    /// The output spent by an input is neither P2PKH nor P2WPKH
    #[error("input {index} spends an unsupported script type")]
    UnknownScriptType { index: usize },

    /// No key in the keystore hashes to the expected public key hash
    #[error("no signing key for public key hash {0}")]
    SigningKeyMismatch(String),

    /// Another in-flight spend already holds this outpoint
    #[error("outpoint {0} is reserved by another spend")]
    OutpointReserved(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("corrupt key file: {0}")]
    CorruptKeyFile(String),

    /// The node refused the transaction; carries the node's reason verbatim
    #[error("rejected by network: {0}")]
    RejectedByNetwork(String),

    /// The node accepted the transaction but the ledger write failed; its
    /// inputs stay reserved for the life of the wallet
    #[error("transaction {txid} was broadcast but not recorded: {reason}")]
    Unrecorded { txid: Hash256, reason: String },

    /// Transport-level failure talking to the node
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WalletError>;
