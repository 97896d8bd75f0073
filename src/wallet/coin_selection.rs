// Coin selection strategies

use super::fee::{estimate_vsize, input_base_size, FeePolicy};
use crate::core::{OutPoint, TxOutput};
use crate::error::{Result, WalletError};
use crate::storage::Utxo;
use log::debug;

/// What a selection has to pay for
#[derive(Debug, Clone)]
pub struct SpendTarget {
    /// Payment outputs, in the order they will appear
    pub outputs: Vec<TxOutput>,
    /// Locking script of the change output, should one be needed
    pub change_script: Vec<u8>,
}

impl SpendTarget {
    pub fn new(outputs: Vec<TxOutput>, change_script: Vec<u8>) -> Self {
        Self { outputs, change_script }
    }

    /// Sum of payment values
    pub fn amount(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).fold(0u64, u64::saturating_add)
    }

    fn script_lens(&self, with_change: bool) -> Vec<usize> {
        let mut lens: Vec<usize> = self.outputs.iter().map(|o| o.script_pubkey.len()).collect();
        if with_change {
            lens.push(self.change_script.len());
        }
        lens
    }
}

/// Outcome of coin selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen UTXOs, in selection order
    pub chosen: Vec<Utxo>,
    /// Fee estimated for the final transaction shape
    pub fee: u64,
    /// Change value; zero when the remainder is absorbed into the fee
    pub change: u64,
}

impl Selection {
    pub fn total_input(&self) -> u64 {
        self.chosen.iter().map(Utxo::value).fold(0u64, u64::saturating_add)
    }

    pub fn has_change(&self) -> bool {
        self.change > 0
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.chosen.iter().map(|u| u.outpoint).collect()
    }
}

/// Strategy for picking inputs
pub trait CoinSelector {
    /// Pick UTXOs from `available` covering the target and its fee
    fn select(&self, target: &SpendTarget, policy: &FeePolicy, available: &[Utxo]) -> Result<Selection>;
}

/// Largest-first accumulation.
///
/// Eligible UTXOs are taken in descending value order (ties broken by
/// outpoint) until they cover payments plus the fee of the transaction
/// they would form. A change output is added only when what it would
/// carry, after paying for itself, exceeds the dust threshold; otherwise
/// the surplus goes to the fee.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyDescending;

impl CoinSelector for GreedyDescending {
    fn select(&self, target: &SpendTarget, policy: &FeePolicy, available: &[Utxo]) -> Result<Selection> {
        let mut candidates: Vec<&Utxo> = available
            .iter()
            .filter(|u| u.confirmations >= policy.min_confirmations)
            .filter(|u| input_base_size(u.script_type).is_some())
            .collect();
        candidates.sort_by(|a, b| b.value().cmp(&a.value()).then(a.outpoint.cmp(&b.outpoint)));

        let amount = target.amount();
        let lens_without_change = target.script_lens(false);
        let lens_with_change = target.script_lens(true);

        let mut chosen = Vec::new();
        let mut types = Vec::new();
        let mut total = 0u64;
        let mut required = amount.saturating_add(policy.fee_for_vsize(estimate_vsize(&[], &lens_without_change)?));

        for utxo in candidates {
            chosen.push(utxo.clone());
            types.push(utxo.script_type);
            total = total.saturating_add(utxo.value());

            let fee = policy.fee_for_vsize(estimate_vsize(&types, &lens_without_change)?);
            required = amount.saturating_add(fee);
            if total < required {
                continue;
            }

            let fee_with_change = policy.fee_for_vsize(estimate_vsize(&types, &lens_with_change)?);
            let change = total.saturating_sub(amount.saturating_add(fee_with_change));
            let selection = if change > policy.dust_threshold {
                Selection { chosen, fee: fee_with_change, change }
            } else {
                Selection { chosen, fee, change: 0 }
            };
            debug!(
                "Selected {} inputs totalling {} sat: fee {}, change {}",
                selection.chosen.len(),
                total,
                selection.fee,
                selection.change
            );
            return Ok(selection);
        }

        Err(WalletError::InsufficientFunds { available: total, required })
    }
}
