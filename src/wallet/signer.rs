// Transaction signing: local keys or a node holding them

use super::fee::DER_SIGNATURE_LEN;
use super::keystore::{Keystore, PrivateKey};
use super::tx_builder::UnsignedTransaction;
use crate::core::{
    hash160, legacy_sighash, Hash256, Script, ScriptType, SighashCache, Transaction, SIGHASH_ALL,
};
use crate::error::{Result, WalletError};
use crate::rpc::NodeRpc;
use crate::storage::Utxo;
use log::{debug, info};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, Signing};
use std::collections::HashSet;
use std::time::Duration;
use zeroize::Zeroizing;

/// Fully signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: Hash256,
    pub wtxid: Hash256,
    pub fee: u64,
}

impl SignedTransaction {
    pub fn new(tx: Transaction, fee: u64) -> Self {
        let txid = tx.txid();
        let wtxid = tx.wtxid();
        Self { tx, txid, wtxid, fee }
    }

    pub fn to_hex(&self) -> String {
        self.tx.to_hex()
    }

    pub fn vsize(&self) -> usize {
        self.tx.vsize()
    }
}

/// How far signing of a transaction has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Unsigned,
    PartiallySigned { signed: usize, total: usize },
    FullySigned,
}

impl SigningState {
    pub fn of(tx: &Transaction) -> Self {
        let total = tx.inputs.len();
        let signed = tx.inputs.iter().filter(|input| input.is_signed()).count();
        match signed {
            0 => SigningState::Unsigned,
            n if n == total => SigningState::FullySigned,
            _ => SigningState::PartiallySigned { signed, total },
        }
    }
}

/// Produces a fully signed transaction from an unsigned one
pub trait Signer {
    fn sign(&self, unsigned: &UnsignedTransaction, keystore: &Keystore) -> Result<SignedTransaction>;
}

/// Whether `sig` has an s value in the lower half of the curve order
pub fn is_low_s(sig: &Signature) -> bool {
    let mut normalized = *sig;
    normalized.normalize_s();
    normalized == *sig
}

/// Deterministic (RFC6979) low-S signature over `digest`.
///
/// Extra nonce data is ground until the DER encoding is exactly 70 bytes,
/// which keeps fee estimates exact.
pub fn sign_digest<C: Signing>(secp: &Secp256k1<C>, digest: &Hash256, key: &PrivateKey) -> Result<Signature> {
    let msg = Message::from_digest(*digest.as_bytes());
    key.with_secret_key(|sk| {
        let mut counter = 0u32;
        loop {
            let mut sig = if counter == 0 {
                secp.sign_ecdsa(&msg, sk)
            } else {
                let mut extra = [0u8; 32];
                extra[..4].copy_from_slice(&counter.to_le_bytes());
                secp.sign_ecdsa_with_noncedata(&msg, sk, &extra)
            };
            sig.normalize_s();
            if sig.serialize_der().len() == DER_SIGNATURE_LEN {
                return sig;
            }
            counter += 1;
        }
    })
}

fn sighash_for(
    tx: &Transaction,
    cache: &SighashCache,
    index: usize,
    prevout: &Utxo,
) -> Result<(ScriptType, [u8; 20], Hash256)> {
    let script_pubkey = &prevout.output.script_pubkey;
    let script_type = ScriptType::classify(script_pubkey);
    let (Some(pubkey_hash), Some(script_code)) = (Script::pubkey_hash(script_pubkey), Script::script_code(script_pubkey))
    else {
        return Err(WalletError::UnknownScriptType { index });
    };

    let digest = match script_type {
        ScriptType::P2pkh => legacy_sighash(tx, index, &script_code, SIGHASH_ALL)?,
        ScriptType::P2wpkh => cache.segwit_sighash(index, &script_code, prevout.value(), SIGHASH_ALL)?,
        ScriptType::NonStandard => return Err(WalletError::UnknownScriptType { index }),
    };
    Ok((script_type, pubkey_hash, digest))
}

/// Check the unlocking data of one input against the output it spends
pub fn verify_input<C: secp256k1::Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    cache: &SighashCache,
    index: usize,
    prevout: &Utxo,
) -> Result<()> {
    let (script_type, expected_hash, digest) = sighash_for(tx, cache, index, prevout)?;
    let input = &tx.inputs[index];

    let (sig_bytes, pubkey_bytes) = match script_type {
        ScriptType::P2wpkh => {
            if !input.script_sig.is_empty() || input.witness.len() != 2 {
                return Err(WalletError::InvalidEncoding(format!("input {} has a malformed witness", index)));
            }
            (input.witness[0].clone(), input.witness[1].clone())
        }
        _ => Script::parse_script_sig(&input.script_sig)?,
    };

    if hash160(&pubkey_bytes) != expected_hash {
        return Err(WalletError::SigningKeyMismatch(hex::encode(expected_hash)));
    }

    let (hash_type, der) = sig_bytes
        .split_last()
        .ok_or_else(|| WalletError::InvalidEncoding(format!("input {} has an empty signature", index)))?;
    if u32::from(*hash_type) != SIGHASH_ALL {
        return Err(WalletError::InvalidEncoding(format!("input {} uses sighash type {:#04x}", index, hash_type)));
    }
    let sig = Signature::from_der(der)
        .map_err(|e| WalletError::InvalidEncoding(format!("input {} signature: {}", index, e)))?;
    if !is_low_s(&sig) {
        return Err(WalletError::InvalidEncoding(format!("input {} signature is not low-S", index)));
    }
    let pubkey = PublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| WalletError::InvalidEncoding(format!("input {} public key: {}", index, e)))?;

    secp.verify_ecdsa(&Message::from_digest(*digest.as_bytes()), &sig, &pubkey)
        .map_err(|_| WalletError::InvalidEncoding(format!("input {} signature does not verify", index)))
}

/// Verify every input of a signed transaction
pub fn verify_transaction(tx: &Transaction, prevouts: &[Utxo]) -> Result<()> {
    if tx.inputs.len() != prevouts.len() {
        return Err(WalletError::InvalidEncoding("input and previous output counts differ".to_string()));
    }
    let secp = Secp256k1::verification_only();
    let cache = SighashCache::new(tx);
    for (index, prevout) in prevouts.iter().enumerate() {
        verify_input(&secp, tx, &cache, index, prevout)?;
    }
    Ok(())
}

/// Signs with keys held in the local keystore
pub struct LocalSigner {
    secp: Secp256k1<All>,
}

impl LocalSigner {
    pub fn new() -> Self {
        Self { secp: Secp256k1::new() }
    }

    /// Sign every input the keystore has a key for, leaving the rest untouched
    pub fn sign_partial(&self, unsigned: &UnsignedTransaction, keystore: &Keystore) -> Result<(Transaction, SigningState)> {
        let tx = self.sign_inputs(unsigned, keystore, false)?;
        let state = SigningState::of(&tx);
        Ok((tx, state))
    }

    fn sign_inputs(&self, unsigned: &UnsignedTransaction, keystore: &Keystore, require_all: bool) -> Result<Transaction> {
        unsigned.check_prevouts()?;
        let tx = &unsigned.tx;
        let cache = SighashCache::new(tx);
        let mut signed = tx.clone();

        for (index, prevout) in unsigned.prevouts.iter().enumerate() {
            let (script_type, pubkey_hash, digest) = sighash_for(tx, &cache, index, prevout)?;
            let Some(keypair) = keystore.find_by_pubkey_hash(&pubkey_hash) else {
                if require_all {
                    return Err(WalletError::SigningKeyMismatch(hex::encode(pubkey_hash)));
                }
                debug!("No key for input {}, leaving it unsigned", index);
                continue;
            };
            let sig = sign_digest(&self.secp, &digest, keypair.private_key())?;
            let mut sig_bytes = sig.serialize_der().to_vec();
            sig_bytes.push(SIGHASH_ALL as u8);
            let pubkey = keypair.pubkey_bytes();

            let input = &mut signed.inputs[index];
            if script_type.is_segwit() {
                input.script_sig.clear();
                input.witness = vec![sig_bytes, pubkey];
            } else {
                input.script_sig = Script::p2pkh_script_sig(&sig_bytes, &pubkey);
                input.witness.clear();
            }
        }

        Ok(signed)
    }
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for LocalSigner {
    fn sign(&self, unsigned: &UnsignedTransaction, keystore: &Keystore) -> Result<SignedTransaction> {
        let tx = self.sign_inputs(unsigned, keystore, true)?;
        let signed = SignedTransaction::new(tx, unsigned.fee());
        info!("Signed transaction {} ({} vB, fee {} sat)", signed.txid, signed.vsize(), signed.fee);
        Ok(signed)
    }
}

/// Delegates signing to a node, handing it the needed keys as WIF.
///
/// The node's result is checked: it must leave everything but the
/// unlocking data unchanged, and every signature must verify.
pub struct NodeSigner<'a, R: NodeRpc + ?Sized> {
    node: &'a R,
    timeout: Duration,
}

impl<'a, R: NodeRpc + ?Sized> NodeSigner<'a, R> {
    pub fn new(node: &'a R, timeout: Duration) -> Self {
        Self { node, timeout }
    }
}

fn same_skeleton(expected: &Transaction, actual: &Transaction) -> bool {
    expected.version == actual.version
        && expected.lock_time == actual.lock_time
        && expected.outputs == actual.outputs
        && expected.inputs.len() == actual.inputs.len()
        && expected
            .inputs
            .iter()
            .zip(&actual.inputs)
            .all(|(a, b)| a.outpoint() == b.outpoint() && a.sequence == b.sequence)
}

impl<R: NodeRpc + ?Sized> Signer for NodeSigner<'_, R> {
    fn sign(&self, unsigned: &UnsignedTransaction, keystore: &Keystore) -> Result<SignedTransaction> {
        unsigned.check_prevouts()?;

        let mut seen = HashSet::new();
        let mut keys: Vec<Zeroizing<String>> = Vec::new();
        for (index, prevout) in unsigned.prevouts.iter().enumerate() {
            let pubkey_hash = Script::pubkey_hash(&prevout.output.script_pubkey)
                .ok_or(WalletError::UnknownScriptType { index })?;
            let keypair = keystore
                .find_by_pubkey_hash(&pubkey_hash)
                .ok_or_else(|| WalletError::SigningKeyMismatch(hex::encode(pubkey_hash)))?;
            if seen.insert(pubkey_hash) {
                keys.push(keypair.to_wif());
            }
        }

        let signed_hex =
            self.node
                .sign_raw_transaction_with_key(&unsigned.tx.to_hex(), &keys, &unsigned.prevouts, self.timeout)?;
        let tx = Transaction::from_hex(&signed_hex)?;

        if !same_skeleton(&unsigned.tx, &tx) {
            return Err(WalletError::InvalidEncoding("node altered the transaction while signing".to_string()));
        }
        verify_transaction(&tx, &unsigned.prevouts)?;

        let signed = SignedTransaction::new(tx, unsigned.fee());
        info!("Node signed transaction {}", signed.txid);
        Ok(signed)
    }
}
