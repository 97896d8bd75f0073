// Bitcoin addresses: Base58Check P2PKH and bech32 P2WPKH

use crate::core::{checksum, hash160, Network, Script, ScriptType};
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of address a key is used with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    #[default]
    P2pkh,
    P2wpkh,
}

impl AddressKind {
    pub fn script_type(self) -> ScriptType {
        match self {
            AddressKind::P2pkh => ScriptType::P2pkh,
            AddressKind::P2wpkh => ScriptType::P2wpkh,
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AddressKind::P2pkh => "p2pkh",
            AddressKind::P2wpkh => "p2wpkh",
        })
    }
}

impl FromStr for AddressKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(AddressKind::P2pkh),
            "p2wpkh" | "segwit" => Ok(AddressKind::P2wpkh),
            other => Err(WalletError::Config(format!("unsupported address type: {}", other))),
        }
    }
}

/// Bitcoin address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    LegacyP2pkh { pubkey_hash: [u8; 20], network: Network },
    SegwitP2wpkh { pubkey_hash: [u8; 20], network: Network },
}

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(pubkey_hash: [u8; 20], network: Network, kind: AddressKind) -> Self {
        match kind {
            AddressKind::P2pkh => Address::LegacyP2pkh { pubkey_hash, network },
            AddressKind::P2wpkh => Address::SegwitP2wpkh { pubkey_hash, network },
        }
    }

    /// Create address from serialized public key bytes
    pub fn from_pubkey(pubkey: &[u8], network: Network, kind: AddressKind) -> Self {
        Self::from_pubkey_hash(hash160(pubkey), network, kind)
    }

    /// Address paid by a locking script, if it is one of the supported templates
    pub fn from_script(script_pubkey: &[u8], network: Network) -> Option<Self> {
        if let Some(hash) = Script::p2pkh_hash(script_pubkey) {
            return Some(Self::from_pubkey_hash(hash, network, AddressKind::P2pkh));
        }
        Script::p2wpkh_hash(script_pubkey).map(|hash| Self::from_pubkey_hash(hash, network, AddressKind::P2wpkh))
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        match self {
            Address::LegacyP2pkh { pubkey_hash, .. } | Address::SegwitP2wpkh { pubkey_hash, .. } => pubkey_hash,
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Address::LegacyP2pkh { network, .. } | Address::SegwitP2wpkh { network, .. } => *network,
        }
    }

    pub fn kind(&self) -> AddressKind {
        match self {
            Address::LegacyP2pkh { .. } => AddressKind::P2pkh,
            Address::SegwitP2wpkh { .. } => AddressKind::P2wpkh,
        }
    }

    /// Locking script paying to this address
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            Address::LegacyP2pkh { pubkey_hash, .. } => Script::p2pkh_script_pubkey(pubkey_hash),
            Address::SegwitP2wpkh { pubkey_hash, .. } => Script::p2wpkh_script_pubkey(pubkey_hash),
        }
    }

    /// Parse an address and check that it belongs to `network`.
    ///
    /// Testnet and regtest share the Base58 version byte, so a legacy
    /// address parsed this way takes the expected network.
    pub fn parse_for(s: &str, network: Network) -> Result<Self> {
        let parsed: Address = s.parse()?;
        let compatible = match (parsed, network) {
            (Address::LegacyP2pkh { network: found, .. }, _) => found.p2pkh_prefix() == network.p2pkh_prefix(),
            (Address::SegwitP2wpkh { network: found, .. }, _) => found == network,
        };
        if !compatible {
            return Err(WalletError::InvalidEncoding(format!("address {} is not valid on {}", s, network)));
        }
        Ok(Self::from_pubkey_hash(*parsed.pubkey_hash(), network, parsed.kind()))
    }

    fn decode_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid base58: {}", e)))?;
        if bytes.len() != 25 {
            return Err(WalletError::InvalidEncoding(format!("invalid address length: {}", bytes.len())));
        }
        let (payload, check) = bytes.split_at(21);
        if checksum(payload) != check {
            return Err(WalletError::InvalidEncoding("address checksum mismatch".to_string()));
        }

        let network = match payload[0] {
            0x00 => Network::Mainnet,
            0x6f => Network::Testnet,
            version => {
                return Err(WalletError::InvalidEncoding(format!("unsupported address version: {:#04x}", version)));
            }
        };
        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&payload[1..]);
        Ok(Address::LegacyP2pkh { pubkey_hash, network })
    }

    fn decode_bech32(s: &str) -> Result<Self> {
        let (hrp, version, program) = bech32::segwit::decode(s)
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid bech32 address: {}", e)))?;

        let network = match hrp.as_str().to_ascii_lowercase().as_str() {
            "bc" => Network::Mainnet,
            "tb" => Network::Testnet,
            "bcrt" => Network::Regtest,
            other => return Err(WalletError::InvalidEncoding(format!("unknown address prefix: {}", other))),
        };
        if version != bech32::segwit::VERSION_0 {
            return Err(WalletError::InvalidEncoding("only witness version 0 is supported".to_string()));
        }
        let pubkey_hash: [u8; 20] = program.as_slice().try_into().map_err(|_| {
            WalletError::InvalidEncoding(format!("unsupported witness program length: {}", program.len()))
        })?;
        Ok(Address::SegwitP2wpkh { pubkey_hash, network })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::LegacyP2pkh { pubkey_hash, network } => {
                let mut payload = Vec::with_capacity(25);
                payload.push(network.p2pkh_prefix());
                payload.extend_from_slice(pubkey_hash);
                let check = checksum(&payload);
                payload.extend_from_slice(&check);
                f.write_str(&bs58::encode(payload).into_string())
            }
            Address::SegwitP2wpkh { pubkey_hash, network } => {
                let hrp = match network {
                    Network::Mainnet => bech32::hrp::BC,
                    Network::Testnet => bech32::hrp::TB,
                    Network::Regtest => bech32::hrp::BCRT,
                };
                let encoded = bech32::segwit::encode_v0(hrp, pubkey_hash).map_err(|_| fmt::Error)?;
                f.write_str(&encoded)
            }
        }
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let is_bech32 = ["bc1", "tb1", "bcrt1"].iter().any(|prefix| lower.starts_with(prefix));
        if is_bech32 {
            Self::decode_bech32(s)
        } else {
            Self::decode_base58(s)
        }
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
