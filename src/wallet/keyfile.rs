// Password-encrypted key file: PBKDF2-HMAC-SHA256 key derivation and AES-256-GCM

use super::address::AddressKind;
use super::keystore::{KeyPair, PrivateKey};
use crate::core::{hex_bytes, Network};
use crate::error::{Result, WalletError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

const KEY_FILE_VERSION: u32 = 1;
const KDF_NAME: &str = "pbkdf2-hmac-sha256";

/// PBKDF2 iteration count for newly sealed files
pub const DEFAULT_ITERATIONS: u32 = 100_000;
/// Upper bound accepted when opening, so a tampered file cannot stall the wallet
const MAX_ITERATIONS: u32 = 10_000_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// On-disk envelope of one encrypted private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub kdf: String,
    pub iterations: u32,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    pub network: Network,
    pub kind: AddressKind,
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn cipher_for(password: &str, salt: &[u8], iterations: u32) -> Aes256Gcm {
    let key = derive_key(password, salt, iterations);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]))
}

impl KeyFile {
    /// Encrypt a key pair under `password`
    pub fn seal(keypair: &KeyPair, password: &str) -> Result<Self> {
        Self::seal_with_iterations(keypair, password, DEFAULT_ITERATIONS)
    }

    pub(crate) fn seal_with_iterations(keypair: &KeyPair, password: &str, iterations: u32) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .and_then(|_| OsRng.try_fill_bytes(&mut nonce))
            .map_err(|e| WalletError::Entropy(e.to_string()))?;

        let cipher = cipher_for(password, &salt, iterations);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), keypair.private_key().secret_bytes().as_slice())
            .map_err(|_| WalletError::CorruptKeyFile("encryption failed".to_string()))?;

        Ok(Self {
            version: KEY_FILE_VERSION,
            kdf: KDF_NAME.to_string(),
            iterations,
            salt,
            nonce,
            ciphertext,
            network: keypair.network(),
            kind: keypair.kind(),
        })
    }

    /// Recover the raw private key.
    ///
    /// A failed authentication tag means the password is wrong; anything
    /// structurally off about the envelope is reported as corruption.
    pub fn decrypt(&self, password: &str) -> Result<PrivateKey> {
        if self.version != KEY_FILE_VERSION {
            return Err(WalletError::CorruptKeyFile(format!("unsupported version {}", self.version)));
        }
        if self.kdf != KDF_NAME {
            return Err(WalletError::CorruptKeyFile(format!("unsupported kdf {}", self.kdf)));
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(WalletError::CorruptKeyFile(format!("iteration count {} out of range", self.iterations)));
        }
        if self.salt.len() != SALT_LEN || self.nonce.len() != NONCE_LEN {
            return Err(WalletError::CorruptKeyFile("bad salt or nonce length".to_string()));
        }

        let cipher = cipher_for(password, &self.salt, self.iterations);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| WalletError::WrongPassword)?,
        );

        PrivateKey::from_bytes(&plaintext).map_err(|e| WalletError::CorruptKeyFile(e.to_string()))
    }

    /// Decrypt and rebuild the key pair recorded in the file
    pub fn open(&self, password: &str) -> Result<KeyPair> {
        let private_key = self.decrypt(password)?;
        KeyPair::from_private_key(private_key, self.network, self.kind)
            .map_err(|e| WalletError::CorruptKeyFile(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WalletError::CorruptKeyFile(e.to_string()))
    }

    /// Read a key file from disk
    pub fn read(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write the key file, refusing to replace an existing one
    pub fn write(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(WalletError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration count keeps the tests quick; the format is identical
    const TEST_ITERATIONS: u32 = 1_000;

    fn sample_keypair() -> KeyPair {
        KeyPair::generate(Network::Testnet, AddressKind::P2wpkh).unwrap()
    }

    #[test]
    fn test_seal_and_open() {
        let kp = sample_keypair();
        let file = KeyFile::seal_with_iterations(&kp, "correct horse", TEST_ITERATIONS).unwrap();

        assert_eq!(file.salt.len(), SALT_LEN);
        assert_eq!(file.nonce.len(), NONCE_LEN);
        // 32-byte key plus 16-byte tag
        assert_eq!(file.ciphertext.len(), 48);

        let opened = file.open("correct horse").unwrap();
        assert_eq!(opened.address, kp.address);
        assert_eq!(opened.to_wif().as_str(), kp.to_wif().as_str());
    }

    #[test]
    fn test_wrong_password() {
        let file = KeyFile::seal_with_iterations(&sample_keypair(), "right", TEST_ITERATIONS).unwrap();
        assert!(matches!(file.open("wrong"), Err(WalletError::WrongPassword)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let mut file = KeyFile::seal_with_iterations(&sample_keypair(), "pw", TEST_ITERATIONS).unwrap();
        file.ciphertext[0] ^= 0x01;
        assert!(matches!(file.decrypt("pw"), Err(WalletError::WrongPassword)));
    }

    #[test]
    fn test_corrupt_envelopes() {
        let sealed = KeyFile::seal_with_iterations(&sample_keypair(), "pw", TEST_ITERATIONS).unwrap();

        let mut short_nonce = sealed.clone();
        short_nonce.nonce.pop();
        assert!(matches!(short_nonce.decrypt("pw"), Err(WalletError::CorruptKeyFile(_))));

        let mut bad_kdf = sealed.clone();
        bad_kdf.kdf = "scrypt".to_string();
        assert!(matches!(bad_kdf.decrypt("pw"), Err(WalletError::CorruptKeyFile(_))));

        let mut huge = sealed;
        huge.iterations = u32::MAX;
        assert!(matches!(huge.decrypt("pw"), Err(WalletError::CorruptKeyFile(_))));

        assert!(matches!(KeyFile::from_json("{not json"), Err(WalletError::CorruptKeyFile(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let file = KeyFile::seal_with_iterations(&sample_keypair(), "pw", TEST_ITERATIONS).unwrap();
        let json = file.to_json().unwrap();
        assert!(json.contains("pbkdf2-hmac-sha256"));
        assert_eq!(KeyFile::from_json(&json).unwrap(), file);
    }

    #[test]
    fn test_write_refuses_overwrite() {
        let dir = std::env::temp_dir().join(format!("btc-wallet-keyfile-{}", std::process::id()));
        let path = dir.join("wallet.key");
        let _ = fs::remove_file(&path);

        let file = KeyFile::seal_with_iterations(&sample_keypair(), "pw", TEST_ITERATIONS).unwrap();
        file.write(&path).unwrap();
        assert!(file.write(&path).is_err());
        assert_eq!(KeyFile::read(&path).unwrap(), file);

        let _ = fs::remove_dir_all(&dir);
    }
}
