// Wallet ledger using sled: key records, sent transactions and spent outpoints

use crate::core::{Hash256, Network, OutPoint};
use crate::error::{Result, WalletError};
use crate::wallet::{Address, AddressKind};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::collections::HashSet;
use std::path::Path;

/// Public record of a key the wallet controls; never holds secret material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub address: Address,
    pub network: Network,
    pub kind: AddressKind,
    pub label: Option<String>,
    /// Path of the encrypted key file, when the key was saved to one
    pub key_file: Option<String>,
}

/// Lifecycle of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Rejected { reason: String },
}

/// A transaction the wallet broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Hash256,
    /// Sum of payment outputs, excluding change
    pub amount: u64,
    pub fee: u64,
    pub recipients: Vec<Address>,
    pub inputs: Vec<OutPoint>,
    pub status: TxStatus,
    /// Unix seconds when the broadcast was recorded
    pub timestamp: u64,
}

/// Wallet ledger; clones share the same database
#[derive(Clone)]
pub struct Ledger {
    db: Db,
    keys: Tree,
    txs: Tree,
    spent: Tree,
}

impl Ledger {
    /// Open (or create) the ledger at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create an in-memory ledger (for testing)
    pub fn memory() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        Self::from_db(config.open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            keys: db.open_tree("keys")?,
            txs: db.open_tree("txs")?,
            spent: db.open_tree("spent")?,
            db,
        })
    }

    /// Store a key record, replacing any previous one for the address
    pub fn add_key_record(&self, record: &KeyRecord) -> Result<()> {
        let key = record.address.to_string();
        self.keys.insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        self.db.flush()?;
        debug!("Ledger: recorded key {}", record.address);
        Ok(())
    }

    /// All key records, ordered by address
    pub fn key_records(&self) -> Result<Vec<KeyRecord>> {
        let mut records = Vec::new();
        for item in self.keys.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Record a successful broadcast and mark its inputs spent.
    ///
    /// Call only after the node accepted the transaction. The record and its
    /// spent outpoints are written in one transaction.
    pub fn record_broadcast(&self, record: &TxRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let txid = record.txid.as_bytes().as_slice();
        (&self.txs, &self.spent)
            .transaction(|(txs, spent)| {
                txs.insert(txid, value.as_slice())?;
                for outpoint in &record.inputs {
                    spent.insert(outpoint.to_bytes(), txid)?;
                }
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(storage_error)?;
        self.db.flush()?;
        info!("Ledger: recorded transaction {} spending {} inputs", record.txid, record.inputs.len());
        Ok(())
    }

    /// Get a transaction record by txid
    pub fn transaction(&self, txid: &Hash256) -> Result<Option<TxRecord>> {
        match self.txs.get(txid.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// All transaction records, oldest first
    pub fn transactions(&self) -> Result<Vec<TxRecord>> {
        let mut records: Vec<TxRecord> = Vec::new();
        for item in self.txs.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.txid.cmp(&b.txid)));
        Ok(records)
    }

    /// Update the status of a recorded transaction.
    ///
    /// A rejected transaction releases its inputs so they can be spent again.
    pub fn set_status(&self, txid: &Hash256, status: TxStatus) -> Result<()> {
        let mut record = self
            .transaction(txid)?
            .ok_or_else(|| WalletError::Config(format!("unknown transaction {}", txid)))?;

        let releases = matches!(status, TxStatus::Rejected { .. });
        record.status = status;
        let value = serde_json::to_vec(&record)?;
        let id = txid.as_bytes().as_slice();

        (&self.txs, &self.spent)
            .transaction(|(txs, spent)| {
                if releases {
                    for outpoint in &record.inputs {
                        // Only release outpoints still attributed to this transaction
                        let key = outpoint.to_bytes();
                        if spent.get(&key)?.as_deref() == Some(id) {
                            spent.remove(key)?;
                        }
                    }
                }
                txs.insert(id, value.as_slice())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(storage_error)?;
        self.db.flush()?;
        info!("Ledger: transaction {} is now {:?}", txid, record.status);
        Ok(())
    }

    /// Outpoints spent by recorded, non-rejected transactions
    pub fn spent_outpoints(&self) -> Result<HashSet<OutPoint>> {
        let mut spent = HashSet::new();
        for item in self.spent.iter() {
            let (key, _) = item?;
            spent.insert(OutPoint::from_bytes(&key)?);
        }
        Ok(spent)
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.spent.contains_key(outpoint.to_bytes())?)
    }
}

fn storage_error(e: TransactionError<()>) -> WalletError {
    match e {
        TransactionError::Storage(e) => WalletError::Storage(e),
        TransactionError::Abort(()) => WalletError::Config("ledger transaction aborted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(seed: u8) -> Address {
        Address::from_pubkey_hash([seed; 20], Network::Regtest, AddressKind::P2wpkh)
    }

    fn record(seed: u8, inputs: Vec<OutPoint>) -> TxRecord {
        TxRecord {
            txid: Hash256::new([seed; 32]),
            amount: 40_000,
            fee: 1_410,
            recipients: vec![address(0xaa)],
            inputs,
            status: TxStatus::Pending,
            timestamp: seed as u64,
        }
    }

    fn outpoint(seed: u8) -> OutPoint {
        OutPoint::new(Hash256::new([seed; 32]), 0)
    }

    #[test]
    fn test_key_records() {
        let ledger = Ledger::memory().unwrap();
        let key = KeyRecord {
            address: address(1),
            network: Network::Regtest,
            kind: AddressKind::P2wpkh,
            label: Some("savings".to_string()),
            key_file: None,
        };
        ledger.add_key_record(&key).unwrap();
        ledger.add_key_record(&key).unwrap();

        assert_eq!(ledger.key_records().unwrap(), vec![key]);
    }

    #[test]
    fn test_record_broadcast_marks_inputs_spent() {
        let ledger = Ledger::memory().unwrap();
        let tx = record(1, vec![outpoint(10), outpoint(11)]);
        ledger.record_broadcast(&tx).unwrap();

        assert!(ledger.is_spent(&outpoint(10)).unwrap());
        assert!(!ledger.is_spent(&outpoint(12)).unwrap());
        assert_eq!(ledger.spent_outpoints().unwrap().len(), 2);
        assert_eq!(ledger.transaction(&tx.txid).unwrap(), Some(tx));
    }

    #[test]
    fn test_record_written_with_all_inputs() {
        let ledger = Ledger::memory().unwrap();
        let inputs: Vec<OutPoint> = (20..30).map(outpoint).collect();
        let tx = record(2, inputs.clone());
        ledger.record_broadcast(&tx).unwrap();

        let spent = ledger.spent_outpoints().unwrap();
        assert!(inputs.iter().all(|op| spent.contains(op)));
        for op in &inputs {
            assert_eq!(ledger.spent.get(op.to_bytes()).unwrap().as_deref(), Some(tx.txid.as_bytes().as_slice()));
        }
    }

    #[test]
    fn test_rejection_keeps_outpoints_claimed_by_a_later_spend() {
        let ledger = Ledger::memory().unwrap();
        let first = record(1, vec![outpoint(10)]);
        ledger.record_broadcast(&first).unwrap();
        let second = record(2, vec![outpoint(10)]);
        ledger.record_broadcast(&second).unwrap();

        ledger
            .set_status(&first.txid, TxStatus::Rejected { reason: "conflict".to_string() })
            .unwrap();
        assert!(ledger.is_spent(&outpoint(10)).unwrap());
    }

    #[test]
    fn test_confirm_keeps_inputs_spent() {
        let ledger = Ledger::memory().unwrap();
        let tx = record(1, vec![outpoint(10)]);
        ledger.record_broadcast(&tx).unwrap();
        ledger.set_status(&tx.txid, TxStatus::Confirmed).unwrap();

        assert!(ledger.is_spent(&outpoint(10)).unwrap());
        assert_eq!(ledger.transaction(&tx.txid).unwrap().unwrap().status, TxStatus::Confirmed);
    }

    #[test]
    fn test_rejection_releases_inputs() {
        let ledger = Ledger::memory().unwrap();
        let tx = record(1, vec![outpoint(10)]);
        ledger.record_broadcast(&tx).unwrap();

        let rejected = TxStatus::Rejected { reason: "replaced".to_string() };
        ledger.set_status(&tx.txid, rejected.clone()).unwrap();

        assert!(!ledger.is_spent(&outpoint(10)).unwrap());
        assert_eq!(ledger.transaction(&tx.txid).unwrap().unwrap().status, rejected);
    }

    #[test]
    fn test_unknown_txid() {
        let ledger = Ledger::memory().unwrap();
        assert!(ledger.set_status(&Hash256::new([9; 32]), TxStatus::Confirmed).is_err());
        assert!(ledger.transaction(&Hash256::new([9; 32])).unwrap().is_none());
    }

    #[test]
    fn test_history_is_ordered() {
        let ledger = Ledger::memory().unwrap();
        ledger.record_broadcast(&record(3, vec![outpoint(30)])).unwrap();
        ledger.record_broadcast(&record(1, vec![outpoint(10)])).unwrap();

        let history = ledger.transactions().unwrap();
        let stamps: Vec<u64> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1, 3]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TxStatus::Rejected { reason: "x".to_string() }).unwrap();
        assert_eq!(json, r#"{"state":"rejected","reason":"x"}"#);
    }
}
