// UTXO (Unspent Transaction Output) snapshot

use crate::core::{Hash256, OutPoint, ScriptType, TxOutput};
use crate::error::{Result, WalletError};
use crate::wallet::{CoinSelector, FeePolicy, Selection, SpendTarget};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// UTXO - an output the wallet may spend, as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UtxoEntry", into = "UtxoEntry")]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub output: TxOutput,
    pub script_type: ScriptType,
    pub confirmations: u32,
}

/// Flat JSON layout, close to what a node's listunspent returns
#[derive(Serialize, Deserialize)]
struct UtxoEntry {
    txid: Hash256,
    vout: u32,
    value: u64,
    #[serde(with = "crate::core::hex_bytes")]
    script_pubkey: Vec<u8>,
    #[serde(default)]
    confirmations: u32,
}

impl From<UtxoEntry> for Utxo {
    fn from(entry: UtxoEntry) -> Self {
        Utxo::new(
            OutPoint::new(entry.txid, entry.vout),
            TxOutput::new(entry.value, entry.script_pubkey),
            entry.confirmations,
        )
    }
}

impl From<Utxo> for UtxoEntry {
    fn from(utxo: Utxo) -> Self {
        UtxoEntry {
            txid: utxo.outpoint.txid,
            vout: utxo.outpoint.vout,
            value: utxo.output.value,
            script_pubkey: utxo.output.script_pubkey,
            confirmations: utxo.confirmations,
        }
    }
}

impl Utxo {
    /// Create a UTXO, classifying its locking script
    pub fn new(outpoint: OutPoint, output: TxOutput, confirmations: u32) -> Self {
        let script_type = output.script_type();
        Self {
            outpoint,
            output,
            script_type,
            confirmations,
        }
    }

    pub fn value(&self) -> u64 {
        self.output.value
    }
}

/// UTXO set - a point-in-time snapshot keyed by outpoint
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: BTreeMap<OutPoint, Utxo>,
}

impl UtxoSet {
    /// Create an empty UTXO set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot; a repeated outpoint keeps the last entry
    pub fn from_utxos<I: IntoIterator<Item = Utxo>>(utxos: I) -> Self {
        let mut set = Self::new();
        for utxo in utxos {
            set.add_utxo(utxo);
        }
        set
    }

    /// Parse a JSON array of UTXOs
    pub fn from_json(json: &str) -> Result<Self> {
        let utxos: Vec<Utxo> = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid UTXO list: {}", e)))?;
        Ok(Self::from_utxos(utxos))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_vec())?)
    }

    /// Add a UTXO
    pub fn add_utxo(&mut self, utxo: Utxo) {
        self.utxos.insert(utxo.outpoint, utxo);
    }

    /// Get a UTXO
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Remove a UTXO (spent)
    pub fn remove_utxo(&mut self, outpoint: &OutPoint) -> bool {
        self.utxos.remove(outpoint).is_some()
    }

    /// Check if a UTXO exists
    pub fn has_utxo(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Iterate in outpoint order
    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    pub fn to_vec(&self) -> Vec<Utxo> {
        self.utxos.values().cloned().collect()
    }

    /// Total value of all UTXOs
    pub fn total_value(&self) -> u64 {
        self.iter().map(Utxo::value).fold(0u64, u64::saturating_add)
    }

    /// Get balance for a script pubkey
    pub fn get_balance(&self, script_pubkey: &[u8]) -> u64 {
        self.get_utxos_for_script(script_pubkey)
            .map(Utxo::value)
            .fold(0u64, u64::saturating_add)
    }

    /// Get all UTXOs for a script pubkey
    pub fn get_utxos_for_script<'a>(&'a self, script_pubkey: &'a [u8]) -> impl Iterator<Item = &'a Utxo> {
        self.iter().filter(move |utxo| utxo.output.script_pubkey == script_pubkey)
    }

    /// UTXOs the wallet can spend under `policy`
    pub fn eligible(&self, policy: &FeePolicy) -> Vec<&Utxo> {
        self.iter()
            .filter(|utxo| utxo.confirmations >= policy.min_confirmations)
            .filter(|utxo| utxo.script_type != ScriptType::NonStandard)
            .collect()
    }

    /// Snapshot minus the given outpoints
    pub fn without(&self, excluded: &HashSet<OutPoint>) -> UtxoSet {
        Self::from_utxos(self.iter().filter(|utxo| !excluded.contains(&utxo.outpoint)).cloned())
    }

    /// Choose inputs for `target` with the given strategy
    pub fn select(&self, target: &SpendTarget, policy: &FeePolicy, selector: &dyn CoinSelector) -> Result<Selection> {
        selector.select(target, policy, &self.to_vec())
    }

    /// Count total UTXOs
    pub fn count(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}
