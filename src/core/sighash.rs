// Signature hash computation for legacy and segwit v0 inputs

use super::serialize::push_var_bytes;
use crate::core::{hash256, Hash256, Transaction};
use crate::error::{Result, WalletError};

/// Sign all inputs and all outputs; the only mode the wallet produces
pub const SIGHASH_ALL: u32 = 0x01;

fn check_index(tx: &Transaction, input_index: usize) -> Result<()> {
    if input_index >= tx.inputs.len() {
        return Err(WalletError::InvalidEncoding(format!(
            "input index {} out of range (tx has {} inputs)",
            input_index,
            tx.inputs.len()
        )));
    }
    Ok(())
}

/// Legacy (pre-segwit) signature hash.
///
/// The transaction is serialized with every scriptSig emptied except the
/// one being signed, which is replaced by `script_code`; the 4-byte
/// sighash type is appended and the result double-SHA256 hashed.
pub fn legacy_sighash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: u32,
) -> Result<Hash256> {
    check_index(tx, input_index)?;

    let mut copy = tx.clone();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        input.witness.clear();
        input.script_sig = if i == input_index {
            script_code.to_vec()
        } else {
            Vec::new()
        };
    }

    let mut preimage = copy.serialize_legacy();
    preimage.extend_from_slice(&sighash_type.to_le_bytes());
    Ok(hash256(&preimage))
}

/// BIP143 signature hashing with the shared midstate computed once per
/// transaction, so signing n inputs stays linear.
pub struct SighashCache<'a> {
    tx: &'a Transaction,
    hash_prevouts: Hash256,
    hash_sequence: Hash256,
    hash_outputs: Hash256,
}

impl<'a> SighashCache<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        let mut prevouts = Vec::with_capacity(tx.inputs.len() * 36);
        let mut sequences = Vec::with_capacity(tx.inputs.len() * 4);
        for input in &tx.inputs {
            prevouts.extend_from_slice(input.prev_tx_hash.as_bytes());
            prevouts.extend_from_slice(&input.prev_index.to_le_bytes());
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }

        let mut outputs = Vec::new();
        for output in &tx.outputs {
            output.serialize_into(&mut outputs);
        }

        Self {
            tx,
            hash_prevouts: hash256(&prevouts),
            hash_sequence: hash256(&sequences),
            hash_outputs: hash256(&outputs),
        }
    }

    /// BIP143 preimage for one input, before hashing
    pub fn segwit_preimage(
        &self,
        input_index: usize,
        script_code: &[u8],
        value: u64,
        sighash_type: u32,
    ) -> Result<Vec<u8>> {
        check_index(self.tx, input_index)?;
        let input = &self.tx.inputs[input_index];

        let mut preimage = Vec::with_capacity(156 + script_code.len());
        preimage.extend_from_slice(&self.tx.version.to_le_bytes());
        preimage.extend_from_slice(self.hash_prevouts.as_bytes());
        preimage.extend_from_slice(self.hash_sequence.as_bytes());
        preimage.extend_from_slice(input.prev_tx_hash.as_bytes());
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());
        push_var_bytes(&mut preimage, script_code);
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(self.hash_outputs.as_bytes());
        preimage.extend_from_slice(&self.tx.lock_time.to_le_bytes());
        preimage.extend_from_slice(&sighash_type.to_le_bytes());
        Ok(preimage)
    }

    /// BIP143 signature hash for one input
    pub fn segwit_sighash(
        &self,
        input_index: usize,
        script_code: &[u8],
        value: u64,
        sighash_type: u32,
    ) -> Result<Hash256> {
        let preimage = self.segwit_preimage(input_index, script_code, value, sighash_type)?;
        Ok(hash256(&preimage))
    }
}
