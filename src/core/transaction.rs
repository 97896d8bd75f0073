// Transaction data structures

use super::serialize::{decode_error, push_var_bytes, push_varint, read_array, read_var_bytes, read_varint};
use crate::core::{hash256, Hash256, ScriptType, Serializable};
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};

/// Default transaction version
pub const TX_VERSION: u32 = 2;

/// Sequence number disabling relative locktime and replacement signalling
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Segwit marker and flag bytes (BIP144)
const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Serialize to bytes (wire layout, also used as database key)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(36);
        bytes.extend_from_slice(self.txid.as_bytes());
        bytes.extend_from_slice(&self.vout.to_le_bytes());
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 36 {
            return Err(WalletError::InvalidEncoding(format!(
                "invalid outpoint bytes length: {}",
                bytes.len()
            )));
        }

        let txid = Hash256::from_slice(&bytes[0..32])?;
        let mut vout_bytes = [0u8; 4];
        vout_bytes.copy_from_slice(&bytes[32..36]);
        let vout = u32::from_le_bytes(vout_bytes);

        Ok(Self { txid, vout })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Hash of the previous transaction
    pub prev_tx_hash: Hash256,
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// Signature script (scriptSig) - empty until signed, stays empty for segwit spends
    pub script_sig: Vec<u8>,
    /// Sequence number
    pub sequence: u32,
    /// Witness stack; empty for legacy spends
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    /// Create an unsigned input spending `outpoint`
    pub fn new(outpoint: OutPoint) -> Self {
        Self {
            prev_tx_hash: outpoint.txid,
            prev_index: outpoint.vout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_tx_hash, self.prev_index)
    }

    /// Whether an unlocking script or witness has been attached
    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty() || !self.witness.is_empty()
    }

    /// Append the non-witness serialization of the input
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_tx_hash.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        push_var_bytes(buf, &self.script_sig);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
    }

    /// Append the witness stack of the input
    fn serialize_witness_into(&self, buf: &mut Vec<u8>) {
        push_varint(buf, self.witness.len() as u64);
        for item in &self.witness {
            push_var_bytes(buf, item);
        }
    }

    /// Deserialize the input (witness is read separately)
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self> {
        let prev_tx_hash = Hash256::new(read_array(reader).map_err(decode_error)?);
        let prev_index = u32::from_le_bytes(read_array(reader).map_err(decode_error)?);
        let script_sig = read_var_bytes(reader).map_err(decode_error)?;
        let sequence = u32::from_le_bytes(read_array(reader).map_err(decode_error)?);

        Ok(Self {
            prev_tx_hash,
            prev_index,
            script_sig,
            sequence,
            witness: Vec::new(),
        })
    }
}

/// Transaction output - specifies amount and recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in satoshis (1 BTC = 100,000,000 satoshis)
    pub value: u64,
    /// Public key script (scriptPubKey) - specifies conditions for spending
    #[serde(with = "hex_bytes")]
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    pub fn script_type(&self) -> ScriptType {
        ScriptType::classify(&self.script_pubkey)
    }

    /// Append the serialized output
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        push_var_bytes(buf, &self.script_pubkey);
    }

    /// Deserialize the output
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self> {
        let value = u64::from_le_bytes(read_array(reader).map_err(decode_error)?);
        let script_pubkey = read_var_bytes(reader).map_err(decode_error)?;

        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
    /// Lock time (block height or timestamp when tx becomes valid)
    pub lock_time: u32,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Whether any input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Serialization without marker, flag and witnesses; hashed for the txid
    /// and for legacy signature hashes
    pub fn serialize_legacy(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_body(&mut buf, false);
        buf
    }

    fn write_body(&self, buf: &mut Vec<u8>, with_witness: bool) {
        buf.extend_from_slice(&self.version.to_le_bytes());

        if with_witness {
            buf.push(SEGWIT_MARKER);
            buf.push(SEGWIT_FLAG);
        }

        push_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.serialize_into(buf);
        }

        push_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.serialize_into(buf);
        }

        if with_witness {
            for input in &self.inputs {
                input.serialize_witness_into(buf);
            }
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Calculate transaction ID (double SHA256 of the non-witness serialization)
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize_legacy())
    }

    /// Witness transaction ID; equals the txid when no witness is present
    pub fn wtxid(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Weight units: non-witness bytes count four times, witness bytes once
    pub fn weight(&self) -> usize {
        let base = self.serialize_legacy().len();
        let total = self.serialize().len();
        base * 3 + total
    }

    /// Virtual size in vbytes, rounded up
    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(4)
    }

    /// Calculate total output value
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Lowercase hex of the canonical serialization
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid transaction hex: {}", e)))?;
        Self::deserialize(&bytes)
    }

    /// Deserialize from a reader, accepting legacy and BIP144 layouts
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self> {
        let version = u32::from_le_bytes(read_array(reader).map_err(decode_error)?);

        let mut input_count = read_varint(reader).map_err(decode_error)?;
        let segwit = input_count == SEGWIT_MARKER as u64;
        if segwit {
            let [flag] = read_array::<_, 1>(reader).map_err(decode_error)?;
            if flag != SEGWIT_FLAG {
                return Err(WalletError::InvalidEncoding(format!("unknown segwit flag: {}", flag)));
            }
            input_count = read_varint(reader).map_err(decode_error)?;
        }

        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(reader)?);
        }

        let output_count = read_varint(reader).map_err(decode_error)?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        if segwit {
            for input in &mut inputs {
                let items = read_varint(reader).map_err(decode_error)?;
                for _ in 0..items {
                    input.witness.push(read_var_bytes(reader).map_err(decode_error)?);
                }
            }
            if !inputs.iter().any(|input| !input.witness.is_empty()) {
                return Err(WalletError::InvalidEncoding("superfluous witness record".to_string()));
            }
        }

        let lock_time = u32::from_le_bytes(read_array(reader).map_err(decode_error)?);

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Serializable for Transaction {
    /// Canonical serialization: BIP144 layout when any witness is present
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_body(&mut buf, self.has_witness());
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(WalletError::InvalidEncoding("trailing bytes after transaction".to_string()));
        }
        Ok(tx)
    }
}

/// Hex (de)serialization of byte vectors in JSON documents
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Script;

    fn sample_tx() -> Transaction {
        let input = TxInput::new(OutPoint::new(Hash256::new([1; 32]), 3));
        let output = TxOutput::new(5000000000, Script::p2pkh_script_pubkey(&[4; 20]));
        Transaction::new(vec![input], vec![output])
    }

    #[test]
    fn test_outpoint_serialization() {
        let outpoint = OutPoint::new(Hash256::new([1; 32]), 42);

        let bytes = outpoint.to_bytes();
        assert_eq!(bytes.len(), 36);

        let decoded = OutPoint::from_bytes(&bytes).unwrap();
        assert_eq!(outpoint, decoded);
        assert!(OutPoint::from_bytes(&bytes[..35]).is_err());
    }

    #[test]
    fn test_unsigned_layout() {
        let tx = sample_tx();
        let bytes = tx.serialize();

        // version | 1 input | txid | index | empty script | sequence | 1 output | value | script | locktime
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[5..37], &[1u8; 32]);
        assert_eq!(&bytes[37..41], &3u32.to_le_bytes());
        assert_eq!(bytes[41], 0);
        assert_eq!(&bytes[42..46], &[0xff; 4]);
        assert_eq!(bytes[46], 1);
        assert_eq!(&bytes[47..55], &5000000000u64.to_le_bytes());
        assert_eq!(bytes[55], 25);
        assert_eq!(bytes.len(), 56 + 25 + 4);
        assert!(!tx.has_witness());
    }

    #[test]
    fn test_legacy_round_trip() {
        let mut tx = sample_tx();
        tx.inputs[0].script_sig = vec![0xab; 106];

        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(tx.txid(), tx.wtxid());
    }

    #[test]
    fn test_segwit_round_trip() {
        let mut tx = sample_tx();
        tx.inputs.push(TxInput::new(OutPoint::new(Hash256::new([2; 32]), 0)));
        tx.inputs[1].witness = vec![vec![0x30; 71], vec![0x02; 33]];

        let bytes = tx.serialize();
        assert_eq!(bytes[4], 0x00);
        assert_eq!(bytes[5], 0x01);

        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx, decoded);
        assert_ne!(tx.txid(), tx.wtxid());
        // txid ignores witness data
        let mut stripped = tx.clone();
        stripped.inputs[1].witness.clear();
        assert_eq!(tx.txid(), stripped.txid());
    }

    #[test]
    fn test_weight_discounts_witness() {
        let mut tx = sample_tx();
        tx.inputs[0].witness = vec![vec![0u8; 71], vec![0u8; 33]];
        let base = tx.serialize_legacy().len();
        let total = tx.serialize().len();
        assert_eq!(total - base, 2 + 1 + 72 + 34);
        assert_eq!(tx.weight(), base * 4 + (total - base));
        assert_eq!(tx.vsize(), tx.weight().div_ceil(4));
    }

    #[test]
    fn test_hex_round_trip() {
        let tx = sample_tx();
        let hex = tx.to_hex();
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(Transaction::from_hex(&hex).unwrap(), tx);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let bytes = sample_tx().serialize();
        assert!(Transaction::deserialize(&bytes[..bytes.len() - 1]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Transaction::deserialize(&trailing).is_err());

        // Marker and flag without any witness item
        let mut empty_witness = Vec::new();
        empty_witness.extend_from_slice(&2u32.to_le_bytes());
        empty_witness.extend_from_slice(&[0x00, 0x01]);
        empty_witness.extend_from_slice(&bytes[4..bytes.len() - 4]);
        empty_witness.push(0x00);
        empty_witness.extend_from_slice(&[0, 0, 0, 0]);
        assert!(Transaction::deserialize(&empty_witness).is_err());
    }

    #[test]
    fn test_total_output_value() {
        let mut tx = sample_tx();
        tx.outputs.push(TxOutput::new(1000, vec![0x51]));
        assert_eq!(tx.total_output_value(), 5000001000);
    }
}
