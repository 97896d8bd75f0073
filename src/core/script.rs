// Locking and unlocking scripts for P2PKH and P2WPKH

use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opcodes used by the supported script templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Push an empty item; witness version 0
    Op0 = 0x00,
    /// Push 20 bytes (pubkey hash size)
    OpPushBytes20 = 0x14,
    /// Duplicate the top stack item
    OpDup = 0x76,
    /// Verify that the top two items are equal
    OpEqualVerify = 0x88,
    /// Hash the top stack item with HASH160
    OpHash160 = 0xa9,
    /// Check signature
    OpCheckSig = 0xac,
}

/// Spending template of a locking script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    P2pkh,
    /// OP_0 <pubKeyHash>
    P2wpkh,
    /// Anything else; the wallet cannot spend it
    NonStandard,
}

impl ScriptType {
    /// Classify a locking script
    pub fn classify(script_pubkey: &[u8]) -> Self {
        if Script::p2pkh_hash(script_pubkey).is_some() {
            ScriptType::P2pkh
        } else if Script::p2wpkh_hash(script_pubkey).is_some() {
            ScriptType::P2wpkh
        } else {
            ScriptType::NonStandard
        }
    }

    pub fn is_segwit(self) -> bool {
        self == ScriptType::P2wpkh
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2wpkh => "p2wpkh",
            ScriptType::NonStandard => "nonstandard",
        };
        f.write_str(name)
    }
}

/// Script builder and parser
pub struct Script;

impl Script {
    /// Length of a P2PKH scriptPubKey
    pub const P2PKH_LEN: usize = 25;
    /// Length of a P2WPKH scriptPubKey
    pub const P2WPKH_LEN: usize = 22;

    /// Create a P2PKH scriptPubKey
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(Self::P2PKH_LEN);
        script.push(OpCode::OpDup as u8);
        script.push(OpCode::OpHash160 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(pubkey_hash);
        script.push(OpCode::OpEqualVerify as u8);
        script.push(OpCode::OpCheckSig as u8);
        script
    }

    /// Create a P2WPKH scriptPubKey
    /// OP_0 <pubKeyHash>
    pub fn p2wpkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(Self::P2WPKH_LEN);
        script.push(OpCode::Op0 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(pubkey_hash);
        script
    }

    /// Create a P2PKH scriptSig
    /// <signature> <pubkey>
    pub fn p2pkh_script_sig(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(2 + signature.len() + pubkey.len());

        // Both items are shorter than OP_PUSHDATA1, so a single length byte pushes them
        script.push(signature.len() as u8);
        script.extend_from_slice(signature);

        script.push(pubkey.len() as u8);
        script.extend_from_slice(pubkey);

        script
    }

    /// Public key hash of a P2PKH scriptPubKey
    pub fn p2pkh_hash(script_pubkey: &[u8]) -> Option<[u8; 20]> {
        if script_pubkey.len() != Self::P2PKH_LEN
            || script_pubkey[0] != OpCode::OpDup as u8
            || script_pubkey[1] != OpCode::OpHash160 as u8
            || script_pubkey[2] != OpCode::OpPushBytes20 as u8
            || script_pubkey[23] != OpCode::OpEqualVerify as u8
            || script_pubkey[24] != OpCode::OpCheckSig as u8
        {
            return None;
        }
        script_pubkey[3..23].try_into().ok()
    }

    /// Public key hash of a P2WPKH scriptPubKey
    pub fn p2wpkh_hash(script_pubkey: &[u8]) -> Option<[u8; 20]> {
        if script_pubkey.len() != Self::P2WPKH_LEN
            || script_pubkey[0] != OpCode::Op0 as u8
            || script_pubkey[1] != OpCode::OpPushBytes20 as u8
        {
            return None;
        }
        script_pubkey[2..22].try_into().ok()
    }

    /// Public key hash committed to by either supported template
    pub fn pubkey_hash(script_pubkey: &[u8]) -> Option<[u8; 20]> {
        Self::p2pkh_hash(script_pubkey).or_else(|| Self::p2wpkh_hash(script_pubkey))
    }

    /// scriptCode signed over when spending: for P2WPKH this is the
    /// equivalent P2PKH script (BIP143)
    pub fn script_code(script_pubkey: &[u8]) -> Option<Vec<u8>> {
        match ScriptType::classify(script_pubkey) {
            ScriptType::P2pkh => Some(script_pubkey.to_vec()),
            ScriptType::P2wpkh => Self::p2wpkh_hash(script_pubkey).map(|h| Self::p2pkh_script_pubkey(&h)),
            ScriptType::NonStandard => None,
        }
    }

    /// Parse scriptSig: <sig> <pubkey>
    pub fn parse_script_sig(script_sig: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        if script_sig.is_empty() {
            return Err(WalletError::InvalidEncoding("empty scriptSig".to_string()));
        }

        let mut pos = 0;

        // Read signature
        let sig_len = script_sig[pos] as usize;
        pos += 1;

        if pos + sig_len > script_sig.len() {
            return Err(WalletError::InvalidEncoding("invalid signature length".to_string()));
        }

        let signature = script_sig[pos..pos + sig_len].to_vec();
        pos += sig_len;

        // Read pubkey
        if pos >= script_sig.len() {
            return Err(WalletError::InvalidEncoding("missing pubkey".to_string()));
        }

        let pubkey_len = script_sig[pos] as usize;
        pos += 1;

        if pos + pubkey_len != script_sig.len() {
            return Err(WalletError::InvalidEncoding("invalid pubkey length".to_string()));
        }

        let pubkey = script_sig[pos..pos + pubkey_len].to_vec();

        Ok((signature, pubkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2pkh_script_creation() {
        let pubkey_hash = [0x12; 20];
        let script = Script::p2pkh_script_pubkey(&pubkey_hash);

        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OpCode::OpDup as u8);
        assert_eq!(script[1], OpCode::OpHash160 as u8);
        assert_eq!(script[2], OpCode::OpPushBytes20 as u8);
        assert_eq!(&script[3..23], &pubkey_hash);
        assert_eq!(script[23], OpCode::OpEqualVerify as u8);
        assert_eq!(script[24], OpCode::OpCheckSig as u8);
    }

    #[test]
    fn test_p2wpkh_script_creation() {
        let pubkey_hash = [0x34; 20];
        let script = Script::p2wpkh_script_pubkey(&pubkey_hash);

        assert_eq!(script.len(), 22);
        assert_eq!(&script[..2], &[0x00, 0x14]);
        assert_eq!(Script::p2wpkh_hash(&script), Some(pubkey_hash));
    }

    #[test]
    fn test_classify() {
        let hash = [7u8; 20];
        assert_eq!(ScriptType::classify(&Script::p2pkh_script_pubkey(&hash)), ScriptType::P2pkh);
        assert_eq!(ScriptType::classify(&Script::p2wpkh_script_pubkey(&hash)), ScriptType::P2wpkh);
        // P2SH is not spendable by this wallet
        let mut p2sh = vec![0xa9, 0x14];
        p2sh.extend_from_slice(&hash);
        p2sh.push(0x87);
        assert_eq!(ScriptType::classify(&p2sh), ScriptType::NonStandard);
        assert_eq!(ScriptType::classify(&[]), ScriptType::NonStandard);
    }

    #[test]
    fn test_script_code_for_segwit_is_p2pkh() {
        let hash = [9u8; 20];
        let code = Script::script_code(&Script::p2wpkh_script_pubkey(&hash)).unwrap();
        assert_eq!(code, Script::p2pkh_script_pubkey(&hash));
        assert!(Script::script_code(&[0x6a]).is_none());
    }

    #[test]
    fn test_script_sig_round_trip() {
        let signature = vec![1, 2, 3, 4];
        let pubkey = vec![5, 6, 7, 8];

        let script_sig = Script::p2pkh_script_sig(&signature, &pubkey);

        assert_eq!(script_sig[0], 4); // sig length
        assert_eq!(&script_sig[1..5], &signature[..]);
        assert_eq!(script_sig[5], 4); // pubkey length

        let (sig, pk) = Script::parse_script_sig(&script_sig).unwrap();
        assert_eq!(sig, signature);
        assert_eq!(pk, pubkey);
    }

    #[test]
    fn test_parse_script_sig_rejects_trailing_bytes() {
        let mut script_sig = Script::p2pkh_script_sig(&[1, 2], &[3, 4]);
        script_sig.push(0xff);
        assert!(Script::parse_script_sig(&script_sig).is_err());
        assert!(Script::parse_script_sig(&[]).is_err());
    }
}
