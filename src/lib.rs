// Non-custodial Bitcoin wallet core
// Key management, coin selection, transaction building and signing

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod rpc;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliHandler, Commands};
pub use config::WalletConfig;
pub use self::core::{Hash256, Network, OutPoint, Transaction, TxInput, TxOutput};
pub use error::{Result, WalletError};
pub use rpc::{Broadcaster, NodeRpc, RpcClient};
pub use storage::{Ledger, TxRecord, TxStatus, Utxo, UtxoSet};
pub use wallet::{
    Address, AddressKind, FeePolicy, KeyPair, Keystore, LocalSigner, NodeSigner, Payment, SignedTransaction, Signer,
    TransactionBuilder, UnsignedTransaction, Wallet,
};
