// Node RPC boundary and transaction broadcast

mod client;
#[cfg(test)]
mod memory;

pub use client::RpcClient;

#[cfg(test)]
pub(crate) use memory::MemoryNode;

use crate::core::Hash256;
use crate::error::{Result, WalletError};
use crate::storage::Utxo;
use crate::wallet::{Address, SignedTransaction};
use log::{info, warn};
use std::time::Duration;
use zeroize::Zeroizing;

/// Rejection reasons meaning the node already has the transaction
const ALREADY_KNOWN_REASONS: [&str; 3] = [
    "txn-already-in-mempool",
    "txn-already-known",
    "transaction already in block chain",
];

/// Calls the wallet makes against a full node.
///
/// Every call carries a deadline; implementations report transport
/// failures and timeouts as `NodeUnavailable` and node-side refusals as
/// `RejectedByNetwork` with the node's reason.
pub trait NodeRpc {
    /// Unspent outputs paying to any of `addresses`
    fn list_unspent(&self, addresses: &[Address], min_confirmations: u32, timeout: Duration) -> Result<Vec<Utxo>>;

    /// Ask the node to sign `unsigned_hex` with the given keys
    fn sign_raw_transaction_with_key(
        &self,
        unsigned_hex: &str,
        keys_wif: &[Zeroizing<String>],
        prevouts: &[Utxo],
        timeout: Duration,
    ) -> Result<String>;

    /// Submit a signed transaction, returning its txid
    fn send_raw_transaction(&self, signed_hex: &str, timeout: Duration) -> Result<Hash256>;
}

/// Publishes signed transactions
pub trait Broadcaster {
    fn broadcast(&self, tx: &SignedTransaction, timeout: Duration) -> Result<Hash256>;
}

/// Whether a rejection reason says the node already has the transaction
pub fn is_already_known(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    ALREADY_KNOWN_REASONS.iter().any(|known| reason.contains(known))
}

/// Broadcasting through a node is idempotent: resubmitting a transaction
/// the node already holds succeeds with the original txid.
impl<T: NodeRpc + ?Sized> Broadcaster for T {
    fn broadcast(&self, tx: &SignedTransaction, timeout: Duration) -> Result<Hash256> {
        match self.send_raw_transaction(&tx.to_hex(), timeout) {
            Ok(txid) => {
                if txid != tx.txid {
                    warn!("Node reported txid {} for transaction {}", txid, tx.txid);
                }
                info!("Broadcast transaction {}", tx.txid);
                Ok(tx.txid)
            }
            Err(WalletError::RejectedByNetwork(reason)) if is_already_known(&reason) => {
                info!("Transaction {} already known to node ({})", tx.txid, reason);
                Ok(tx.txid)
            }
            Err(e) => {
                warn!("Broadcast of {} failed: {}", tx.txid, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_known_reasons() {
        assert!(is_already_known("txn-already-in-mempool"));
        assert!(is_already_known("Transaction already in block chain"));
        assert!(is_already_known("error code -27: txn-already-known"));
        assert!(!is_already_known("min relay fee not met"));
        assert!(!is_already_known("bad-txns-inputs-missingorspent"));
    }
}
