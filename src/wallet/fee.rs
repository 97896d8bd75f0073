// Fee policy and transaction size estimation

use crate::core::{varint_len, ScriptType};
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};

/// DER signature length every signer produces (grinding keeps it at 70)
pub const DER_SIGNATURE_LEN: usize = 70;
/// Signature push including the sighash type byte
pub const SIGNATURE_WITH_HASHTYPE_LEN: usize = DER_SIGNATURE_LEN + 1;
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// outpoint (36) + sequence (4)
const OUTPOINT_AND_SEQUENCE: usize = 40;
/// version (4) + locktime (4)
const TX_OVERHEAD: usize = 8;
/// segwit marker and flag, counted in weight units
const SEGWIT_HEADER_WEIGHT: usize = 2;

/// Fee and dust parameters applied when funding a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    /// Satoshis per virtual byte
    pub fee_rate: u64,
    /// UTXOs with fewer confirmations are not spent
    pub min_confirmations: u32,
    /// Outputs below this value are dust
    pub dust_threshold: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_rate: 10,
            min_confirmations: 1,
            dust_threshold: 546,
        }
    }
}

impl FeePolicy {
    /// Fee for a transaction of `vsize` virtual bytes
    pub fn fee_for_vsize(&self, vsize: usize) -> u64 {
        self.fee_rate.saturating_mul(vsize as u64)
    }

    pub fn is_dust(&self, value: u64) -> bool {
        value < self.dust_threshold
    }
}

fn p2pkh_script_sig_len() -> usize {
    1 + SIGNATURE_WITH_HASHTYPE_LEN + 1 + COMPRESSED_PUBKEY_LEN
}

/// Non-witness bytes of one signed input
pub fn input_base_size(script_type: ScriptType) -> Option<usize> {
    match script_type {
        ScriptType::P2pkh => {
            let script_sig = p2pkh_script_sig_len();
            Some(OUTPOINT_AND_SEQUENCE + varint_len(script_sig as u64) + script_sig)
        }
        // Empty scriptSig: a single zero length byte
        ScriptType::P2wpkh => Some(OUTPOINT_AND_SEQUENCE + 1),
        ScriptType::NonStandard => None,
    }
}

/// Witness bytes of one signed input when the transaction carries witnesses
pub fn input_witness_size(script_type: ScriptType) -> Option<usize> {
    match script_type {
        // Item count of an empty witness
        ScriptType::P2pkh => Some(1),
        // Item count, then signature and pubkey with their length prefixes
        ScriptType::P2wpkh => Some(1 + 1 + SIGNATURE_WITH_HASHTYPE_LEN + 1 + COMPRESSED_PUBKEY_LEN),
        ScriptType::NonStandard => None,
    }
}

/// Serialized size of an output paying to a script of `script_len` bytes
pub fn output_size(script_len: usize) -> usize {
    8 + varint_len(script_len as u64) + script_len
}

/// Weight of the signed transaction, before it is signed.
///
/// Exact: keys are always compressed and every signature is ground to the
/// same DER length.
pub fn estimate_weight(inputs: &[ScriptType], output_script_lens: &[usize]) -> Result<usize> {
    let mut base = TX_OVERHEAD + varint_len(inputs.len() as u64) + varint_len(output_script_lens.len() as u64);
    let mut witness = 0;
    for (index, script_type) in inputs.iter().enumerate() {
        let (Some(base_size), Some(witness_size)) = (input_base_size(*script_type), input_witness_size(*script_type))
        else {
            return Err(WalletError::UnknownScriptType { index });
        };
        base += base_size;
        witness += witness_size;
    }
    base += output_script_lens.iter().map(|len| output_size(*len)).sum::<usize>();

    let has_witness = inputs.iter().any(|t| t.is_segwit());
    let witness_weight = if has_witness { SEGWIT_HEADER_WEIGHT + witness } else { 0 };
    Ok(base * 4 + witness_weight)
}

/// Virtual size: weight / 4 rounded up
pub fn estimate_vsize(inputs: &[ScriptType], output_script_lens: &[usize]) -> Result<usize> {
    Ok(estimate_weight(inputs, output_script_lens)?.div_ceil(4))
}
