// In-process node used by tests

use super::NodeRpc;
use crate::core::{Hash256, Network, OutPoint, Transaction, TxOutput};
use crate::error::{Result, WalletError};
use crate::storage::Utxo;
use crate::wallet::{Address, AddressKind, Keystore, LocalSigner, Signer, UnsignedTransaction};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Default)]
struct NodeState {
    utxos: HashMap<OutPoint, Utxo>,
    mempool: HashMap<Hash256, Transaction>,
    /// Reason returned for the next send, if set
    reject_next: Option<String>,
    /// Fail every call as if the node were down
    offline: bool,
    sent: usize,
}

/// Node double: keeps UTXOs and a mempool in memory and signs with the
/// same code as the local signer
pub(crate) struct MemoryNode {
    network: Network,
    state: Mutex<NodeState>,
}

impl MemoryNode {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(NodeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Credit `value` to `address` with the given confirmations
    pub fn fund(&self, address: &Address, seed: u8, value: u64, confirmations: u32) -> Utxo {
        let utxo = Utxo::new(
            OutPoint::new(Hash256::new([seed; 32]), 0),
            TxOutput::new(value, address.script_pubkey()),
            confirmations,
        );
        self.state().utxos.insert(utxo.outpoint, utxo.clone());
        utxo
    }

    pub fn reject_next(&self, reason: &str) {
        self.state().reject_next = Some(reason.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> bool {
        self.state().mempool.contains_key(txid)
    }

    /// Number of accepted submissions
    pub fn sent_count(&self) -> usize {
        self.state().sent
    }

    fn check_online(&self) -> Result<()> {
        if self.state().offline {
            return Err(WalletError::NodeUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl NodeRpc for MemoryNode {
    fn list_unspent(&self, addresses: &[Address], min_confirmations: u32, _timeout: Duration) -> Result<Vec<Utxo>> {
        self.check_online()?;
        let scripts: Vec<Vec<u8>> = addresses.iter().map(Address::script_pubkey).collect();
        let state = self.state();
        let mut utxos: Vec<Utxo> = state
            .utxos
            .values()
            .filter(|u| u.confirmations >= min_confirmations)
            .filter(|u| scripts.contains(&u.output.script_pubkey))
            .cloned()
            .collect();
        utxos.sort_by_key(|u| u.outpoint);
        Ok(utxos)
    }

    fn sign_raw_transaction_with_key(
        &self,
        unsigned_hex: &str,
        keys_wif: &[Zeroizing<String>],
        prevouts: &[Utxo],
        _timeout: Duration,
    ) -> Result<String> {
        self.check_online()?;
        let mut keystore = Keystore::new();
        for wif in keys_wif {
            keystore.import_wif(wif, self.network, AddressKind::P2pkh)?;
        }
        let unsigned = UnsignedTransaction {
            tx: Transaction::from_hex(unsigned_hex)?,
            prevouts: prevouts.to_vec(),
        };
        Ok(LocalSigner::new().sign(&unsigned, &keystore)?.to_hex())
    }

    fn send_raw_transaction(&self, signed_hex: &str, _timeout: Duration) -> Result<Hash256> {
        self.check_online()?;
        let tx = Transaction::from_hex(signed_hex)?;
        let txid = tx.txid();
        let mut state = self.state();

        if let Some(reason) = state.reject_next.take() {
            return Err(WalletError::RejectedByNetwork(reason));
        }
        if state.mempool.contains_key(&txid) {
            return Err(WalletError::RejectedByNetwork("txn-already-in-mempool".to_string()));
        }
        if tx.inputs.iter().any(|input| !state.utxos.contains_key(&input.outpoint())) {
            return Err(WalletError::RejectedByNetwork("bad-txns-inputs-missingorspent".to_string()));
        }

        for input in &tx.inputs {
            state.utxos.remove(&input.outpoint());
        }
        state.mempool.insert(txid, tx);
        state.sent += 1;
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxInput;
    use crate::rpc::Broadcaster;
    use crate::storage::UtxoSet;
    use crate::wallet::{FeePolicy, Payment, TransactionBuilder};

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_broadcast_is_idempotent() {
        let node = MemoryNode::new(Network::Regtest);
        let mut keystore = Keystore::new();
        let address = keystore.new_address(Network::Regtest, AddressKind::P2wpkh).unwrap();
        node.fund(&address, 1, 50_000, 3);

        let utxos = UtxoSet::from_utxos(node.list_unspent(&[address], 1, TIMEOUT).unwrap());
        let policy = FeePolicy::default();
        let unsigned = TransactionBuilder::new(&policy)
            .fund(&[Payment::new(address, 20_000)], &utxos, &address)
            .unwrap();
        let signed = LocalSigner::new().sign(&unsigned, &keystore).unwrap();

        let first = node.broadcast(&signed, TIMEOUT).unwrap();
        let second = node.broadcast(&signed, TIMEOUT).unwrap();
        assert_eq!(first, signed.txid);
        assert_eq!(second, signed.txid);
        assert_eq!(node.sent_count(), 1);
        assert!(node.mempool_contains(&signed.txid));
    }

    #[test]
    fn test_rejection_reason_passes_through() {
        let node = MemoryNode::new(Network::Regtest);
        node.reject_next("min relay fee not met");
        let input = TxInput::new(OutPoint::new(Hash256::new([1; 32]), 0));
        let tx = Transaction::new(vec![input], vec![TxOutput::new(1_000, vec![0x51])]);

        let err = node.send_raw_transaction(&tx.to_hex(), TIMEOUT).unwrap_err();
        assert!(matches!(err, WalletError::RejectedByNetwork(ref r) if r == "min relay fee not met"));
    }

    #[test]
    fn test_offline_node() {
        let node = MemoryNode::new(Network::Regtest);
        node.set_offline(true);
        assert!(matches!(node.list_unspent(&[], 0, TIMEOUT), Err(WalletError::NodeUnavailable(_))));
    }

    #[test]
    fn test_list_unspent_filters_confirmations() {
        let node = MemoryNode::new(Network::Regtest);
        let address = Address::from_pubkey_hash([3; 20], Network::Regtest, AddressKind::P2pkh);
        node.fund(&address, 1, 10_000, 0);
        node.fund(&address, 2, 20_000, 2);

        assert_eq!(node.list_unspent(&[address], 1, TIMEOUT).unwrap().len(), 1);
        assert_eq!(node.list_unspent(&[address], 0, TIMEOUT).unwrap().len(), 2);
    }
}
