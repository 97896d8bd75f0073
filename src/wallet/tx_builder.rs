// Transaction builder

use super::address::Address;
use super::coin_selection::{CoinSelector, GreedyDescending, Selection, SpendTarget};
use super::fee::FeePolicy;
use crate::core::{OutPoint, Transaction, TxInput, TxOutput};
use crate::error::{Result, WalletError};
use crate::storage::{Utxo, UtxoSet};
use log::info;
use std::collections::HashSet;

/// One payment: amount in satoshis to an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub address: Address,
    pub value: u64,
}

impl Payment {
    pub fn new(address: Address, value: u64) -> Self {
        Self { address, value }
    }

    pub fn to_output(&self) -> TxOutput {
        TxOutput::new(self.value, self.address.script_pubkey())
    }
}

/// Transaction with empty unlocking data, plus the outputs its inputs spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// `prevouts[i]` is the output spent by `tx.inputs[i]`
    pub prevouts: Vec<Utxo>,
}

impl UnsignedTransaction {
    /// Sum of the values of spent outputs
    pub fn total_input(&self) -> u64 {
        self.prevouts.iter().map(Utxo::value).fold(0u64, u64::saturating_add)
    }

    /// Fee paid: inputs minus outputs
    pub fn fee(&self) -> u64 {
        self.total_input().saturating_sub(self.tx.total_output_value())
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.tx.inputs.iter().map(TxInput::outpoint).collect()
    }

    /// Check that inputs and prevouts line up one to one
    pub fn check_prevouts(&self) -> Result<()> {
        if self.tx.inputs.len() != self.prevouts.len() {
            return Err(WalletError::InvalidEncoding(format!(
                "{} inputs but {} previous outputs",
                self.tx.inputs.len(),
                self.prevouts.len()
            )));
        }
        for (index, (input, prevout)) in self.tx.inputs.iter().zip(&self.prevouts).enumerate() {
            if input.outpoint() != prevout.outpoint {
                return Err(WalletError::InvalidEncoding(format!(
                    "input {} spends {} but previous output is {}",
                    index,
                    input.outpoint(),
                    prevout.outpoint
                )));
            }
        }
        Ok(())
    }
}

/// Transaction builder
pub struct TransactionBuilder<'a> {
    policy: &'a FeePolicy,
    selector: &'a dyn CoinSelector,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder using largest-first selection
    pub fn new(policy: &'a FeePolicy) -> Self {
        Self {
            policy,
            selector: &GreedyDescending,
        }
    }

    /// Use a different coin selection strategy
    pub fn with_selector(policy: &'a FeePolicy, selector: &'a dyn CoinSelector) -> Self {
        Self { policy, selector }
    }

    /// Select inputs for `payments` from `utxos` and build the transaction
    pub fn fund(&self, payments: &[Payment], utxos: &UtxoSet, change_address: &Address) -> Result<UnsignedTransaction> {
        let outputs: Vec<TxOutput> = payments.iter().map(Payment::to_output).collect();
        self.check_outputs(&outputs)?;

        let target = SpendTarget::new(outputs, change_address.script_pubkey());
        let selection = utxos.select(&target, self.policy, self.selector)?;
        self.build(&selection, &target.outputs, change_address)
    }

    /// Assemble an unsigned transaction from an existing selection.
    ///
    /// Inputs are ordered by outpoint; payments keep their order and any
    /// change output comes last.
    pub fn build(&self, selection: &Selection, outputs: &[TxOutput], change_address: &Address) -> Result<UnsignedTransaction> {
        if selection.chosen.is_empty() {
            return Err(WalletError::NoInputs);
        }
        self.check_outputs(outputs)?;

        let mut prevouts = selection.chosen.clone();
        prevouts.sort_by_key(|utxo| utxo.outpoint);
        let mut seen = HashSet::new();
        for utxo in &prevouts {
            if !seen.insert(utxo.outpoint) {
                return Err(WalletError::InvalidEncoding(format!("outpoint {} selected twice", utxo.outpoint)));
            }
        }

        let mut tx_outputs = outputs.to_vec();
        if selection.change > 0 {
            if self.policy.is_dust(selection.change) {
                return Err(WalletError::DustOutput {
                    value: selection.change,
                    threshold: self.policy.dust_threshold,
                });
            }
            tx_outputs.push(TxOutput::new(selection.change, change_address.script_pubkey()));
        }

        let total_input = selection.total_input();
        let total_output = tx_outputs.iter().map(|o| o.value).fold(0u64, u64::saturating_add);
        let required = total_output.saturating_add(selection.fee);
        if total_input < required {
            return Err(WalletError::InsufficientFunds {
                available: total_input,
                required,
            });
        }

        let inputs = prevouts.iter().map(|utxo| TxInput::new(utxo.outpoint)).collect();
        let unsigned = UnsignedTransaction {
            tx: Transaction::new(inputs, tx_outputs),
            prevouts,
        };

        info!(
            "Built transaction: {} inputs, {} outputs, fee {} sat",
            unsigned.tx.inputs.len(),
            unsigned.tx.outputs.len(),
            unsigned.fee()
        );
        Ok(unsigned)
    }

    fn check_outputs(&self, outputs: &[TxOutput]) -> Result<()> {
        if outputs.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        for output in outputs {
            if self.policy.is_dust(output.value) {
                return Err(WalletError::DustOutput {
                    value: output.value,
                    threshold: self.policy.dust_threshold,
                });
            }
        }
        Ok(())
    }
}
