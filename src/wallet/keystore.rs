// Key management

use super::address::{Address, AddressKind};
use super::keyfile::KeyFile;
use crate::core::{checksum, hash160, Network};
use crate::error::{Result, WalletError};
use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// WIF suffix marking a key whose public key is used compressed
const WIF_COMPRESSED_FLAG: u8 = 0x01;

/// Raw 32-byte secp256k1 secret, wiped from memory on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    bytes: [u8; 32],
}

/// Holds a parsed secret key only for the duration of one operation
struct ScopedSecretKey(SecretKey);

impl Drop for ScopedSecretKey {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

impl PrivateKey {
    /// Validate and wrap raw secret bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            WalletError::InvalidEncoding(format!("private key must be 32 bytes, got {}", bytes.len()))
        })?;
        let key = Self { bytes };
        // Rejects zero and values at or above the curve order
        key.scoped()?;
        Ok(key)
    }

    /// Draw a fresh key from the operating system's random source
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        loop {
            OsRng
                .try_fill_bytes(&mut bytes[..])
                .map_err(|e| WalletError::Entropy(e.to_string()))?;
            // Out-of-range draws are wiped on drop like any other key
            if let Ok(key) = Self::from_bytes(&bytes[..]) {
                return Ok(key);
            }
        }
    }

    fn scoped(&self) -> Result<ScopedSecretKey> {
        SecretKey::from_slice(&self.bytes)
            .map(ScopedSecretKey)
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid private key: {}", e)))
    }

    /// Run `f` with the parsed secret key; the parsed copy is erased afterwards
    pub(crate) fn with_secret_key<T>(&self, f: impl FnOnce(&SecretKey) -> T) -> Result<T> {
        let scoped = self.scoped()?;
        Ok(f(&scoped.0))
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let secp = Secp256k1::signing_only();
        self.with_secret_key(|sk| sk.public_key(&secp))
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Encode a private key in Wallet Import Format
pub fn export_wif(key: &PrivateKey, network: Network, compressed: bool) -> Zeroizing<String> {
    let mut payload = Zeroizing::new(Vec::with_capacity(38));
    payload.push(network.wif_prefix());
    payload.extend_from_slice(key.secret_bytes());
    if compressed {
        payload.push(WIF_COMPRESSED_FLAG);
    }
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    Zeroizing::new(bs58::encode(payload.as_slice()).into_string())
}

/// Decode a WIF string that must belong to `network`.
///
/// Returns the key and whether it is flagged compressed.
pub fn decode_wif(wif: &str, network: Network) -> Result<(PrivateKey, bool)> {
    let bytes = Zeroizing::new(
        bs58::decode(wif.trim())
            .into_vec()
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid base58 in WIF: {}", e)))?,
    );

    let compressed = match bytes.len() {
        37 => false,
        38 => true,
        len => return Err(WalletError::InvalidEncoding(format!("invalid WIF length: {}", len))),
    };

    let (payload, check) = bytes.split_at(bytes.len() - 4);
    if checksum(payload) != check {
        return Err(WalletError::InvalidEncoding("WIF checksum mismatch".to_string()));
    }
    if payload[0] != network.wif_prefix() {
        return Err(WalletError::InvalidEncoding(format!(
            "WIF version {:#04x} does not match {}",
            payload[0], network
        )));
    }
    if compressed && payload[33] != WIF_COMPRESSED_FLAG {
        return Err(WalletError::InvalidEncoding("invalid WIF compression flag".to_string()));
    }

    Ok((PrivateKey::from_bytes(&payload[1..33])?, compressed))
}

/// Key pair bound to one address.
///
/// The public key is always used in its 33-byte compressed form, so every
/// signed input has the size the fee estimate assumed.
pub struct KeyPair {
    private_key: PrivateKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate(network: Network, kind: AddressKind) -> Result<Self> {
        Self::from_private_key(PrivateKey::generate()?, network, kind)
    }

    /// Derive the public key and address for an existing private key
    pub fn from_private_key(private_key: PrivateKey, network: Network, kind: AddressKind) -> Result<Self> {
        let public_key = private_key.public_key()?;
        let address = Address::from_pubkey(&public_key.serialize(), network, kind);

        Ok(Self {
            private_key,
            public_key,
            address,
        })
    }

    /// Import a WIF-encoded key; only compressed-key WIFs are accepted
    pub fn from_wif(wif: &str, network: Network, kind: AddressKind) -> Result<Self> {
        let (private_key, compressed) = decode_wif(wif, network)?;
        if !compressed {
            return Err(WalletError::InvalidEncoding(
                "uncompressed WIF keys are not supported".to_string(),
            ));
        }
        Self::from_private_key(private_key, network, kind)
    }

    /// Same key, bound to the address of another kind
    pub fn with_kind(&self, kind: AddressKind) -> Result<Self> {
        let private_key = PrivateKey::from_bytes(self.private_key.secret_bytes())?;
        Self::from_private_key(private_key, self.network(), kind)
    }

    pub fn to_wif(&self) -> Zeroizing<String> {
        export_wif(&self.private_key, self.network(), true)
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn network(&self) -> Network {
        self.address.network()
    }

    pub fn kind(&self) -> AddressKind {
        self.address.kind()
    }

    /// Compressed public key bytes
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// Get pubkey hash
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes())
    }

    /// Get script pubkey for the key's address
    pub fn script_pubkey(&self) -> Vec<u8> {
        self.address.script_pubkey()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}

/// Keystore - holds key pairs indexed by public key hash.
///
/// P2PKH and P2WPKH addresses of one key share its hash, so a key is held
/// once and every address registered for it is tracked separately.
pub struct Keystore {
    keys: HashMap<[u8; 20], KeyPair>,
    addresses: HashSet<Address>,
    default_address: Option<Address>,
}

impl Keystore {
    /// Create a new keystore
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            addresses: HashSet::new(),
            default_address: None,
        }
    }

    /// Add a key pair and return its address
    pub fn insert(&mut self, keypair: KeyPair) -> Address {
        let address = keypair.address;

        // Set as default if first address
        if self.default_address.is_none() {
            self.default_address = Some(address);
        }

        self.addresses.insert(address);
        match self.keys.entry(keypair.pubkey_hash()) {
            Entry::Occupied(_) => debug!("Keystore: key already held, added address {}", address),
            Entry::Vacant(slot) => {
                debug!("Keystore: added key for {}", address);
                slot.insert(keypair);
            }
        }
        address
    }

    /// Generate a new address
    pub fn new_address(&mut self, network: Network, kind: AddressKind) -> Result<Address> {
        let keypair = KeyPair::generate(network, kind)?;
        Ok(self.insert(keypair))
    }

    /// Import a WIF-encoded key
    pub fn import_wif(&mut self, wif: &str, network: Network, kind: AddressKind) -> Result<Address> {
        let keypair = KeyPair::from_wif(wif, network, kind)?;
        Ok(self.insert(keypair))
    }

    /// Key pair behind a registered address
    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        if !self.addresses.contains(address) {
            return None;
        }
        self.keys.get(address.pubkey_hash())
    }

    /// Key whose public key hashes to `pubkey_hash`
    pub fn find_by_pubkey_hash(&self, pubkey_hash: &[u8; 20]) -> Option<&KeyPair> {
        self.keys.get(pubkey_hash)
    }

    /// Get all addresses, sorted for stable output
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.addresses.iter().copied().collect();
        addresses.sort_by_key(|a| a.to_string());
        addresses
    }

    /// Get default address
    pub fn default_address(&self) -> Option<&Address> {
        self.default_address.as_ref()
    }

    /// Set default address
    pub fn set_default(&mut self, address: Address) -> Result<()> {
        if self.get_keypair(&address).is_none() {
            return Err(WalletError::SigningKeyMismatch(hex::encode(address.pubkey_hash())));
        }
        self.default_address = Some(address);
        Ok(())
    }

    /// Count distinct keys
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Decrypt a key file and add its key
    pub fn load_key_file<P: AsRef<Path>>(&mut self, path: P, password: &str) -> Result<Address> {
        let keypair = KeyFile::read(path.as_ref())?.open(password)?;
        info!("Loaded key for {} from {}", keypair.address, path.as_ref().display());
        Ok(self.insert(keypair))
    }

    /// Encrypt the key for `address` into a key file
    pub fn save_key_file<P: AsRef<Path>>(&self, address: &Address, path: P, password: &str) -> Result<()> {
        let keypair = self
            .get_keypair(address)
            .ok_or_else(|| WalletError::SigningKeyMismatch(hex::encode(address.pubkey_hash())))?
            .with_kind(address.kind())?;
        KeyFile::seal(&keypair, password)?.write(path.as_ref())?;
        info!("Saved key for {} to {}", address, path.as_ref().display());
        Ok(())
    }
}

impl Default for Keystore {
    fn default() -> Self {
        Self::new()
    }
}
