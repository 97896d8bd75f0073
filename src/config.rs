// Wallet configuration

use crate::core::Network;
use crate::error::{Result, WalletError};
use crate::wallet::FeePolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable settings handed to the wallet at construction
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    pub fee_policy: FeePolicy,
    pub data_dir: PathBuf,
    /// Node JSON-RPC endpoint; the network's default local port when unset
    pub rpc_url: Option<String>,
    pub rpc_user: String,
    pub rpc_password: String,
    pub rpc_timeout_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            fee_policy: FeePolicy::default(),
            data_dir: PathBuf::from("./data"),
            rpc_url: None,
            rpc_user: String::new(),
            rpc_password: String::new(),
            rpc_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("network", &self.network)
            .field("fee_policy", &self.fee_policy)
            .field("data_dir", &self.data_dir)
            .field("rpc_url", &self.rpc_url())
            .field("rpc_user", &self.rpc_user)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl WalletConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref()).map_err(|e| {
            WalletError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_policy.fee_rate == 0 {
            return Err(WalletError::Config("fee_rate must be at least 1 sat/vB".to_string()));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(WalletError::Config("rpc_timeout_secs must be positive".to_string()));
        }
        if let Some(url) = &self.rpc_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(WalletError::Config(format!("rpc_url must be an http(s) URL, got {}", url)));
            }
        }
        Ok(())
    }

    /// Configured endpoint, or the node's default port on localhost
    pub fn rpc_url(&self) -> String {
        match &self.rpc_url {
            Some(url) => url.clone(),
            None => {
                let port = match self.network {
                    Network::Mainnet => 8332,
                    Network::Testnet => 18332,
                    Network::Regtest => 18443,
                };
                format!("http://127.0.0.1:{}", port)
            }
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Directory of the sled ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// Default location of the encrypted key file
    pub fn key_file_path(&self) -> PathBuf {
        self.data_dir.join("wallet.key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.fee_policy.fee_rate, 10);
        assert_eq!(config.fee_policy.min_confirmations, 1);
        assert_eq!(config.fee_policy.dust_threshold, 546);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
        assert_eq!(config.ledger_path(), PathBuf::from("./data").join("ledger"));
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8332");
    }

    #[test]
    fn test_rpc_settings() {
        let config = WalletConfig::from_json(
            r#"{"network": "regtest", "rpc_user": "alice", "rpc_password": "s3cret"}"#,
        )
        .unwrap();
        assert_eq!(config.rpc_url(), "http://127.0.0.1:18443");
        assert_eq!(config.rpc_user, "alice");
        assert!(!format!("{:?}", config).contains("s3cret"));

        let config = WalletConfig::from_json(r#"{"rpc_url": "http://node.local:8332"}"#).unwrap();
        assert_eq!(config.rpc_url(), "http://node.local:8332");
        assert!(WalletConfig::from_json(r#"{"rpc_url": "node.local:8332"}"#).is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WalletConfig::from_json(r#"{"network": "regtest", "fee_policy": {"fee_rate": 25}}"#).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.fee_policy.fee_rate, 25);
        assert_eq!(config.fee_policy.dust_threshold, 546);
        assert_eq!(config.rpc_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WalletConfig::from_json(r#"{"network": "moonnet"}"#),
            Err(WalletError::Config(_))
        ));
        assert!(WalletConfig::from_json(r#"{"fee_policy": {"fee_rate": 0}}"#).is_err());
        assert!(WalletConfig::load("/nonexistent/wallet.json").is_err());
    }
}
