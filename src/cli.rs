// CLI commands

use crate::config::WalletConfig;
use crate::core::{Network, Transaction};
use crate::error::{Result, WalletError};
use crate::rpc::{Broadcaster, RpcClient};
use crate::storage::{KeyRecord, Ledger, TxStatus, UtxoSet};
use crate::wallet::{
    Address, AddressKind, KeyFile, KeyPair, Keystore, LocalSigner, NodeSigner, Payment, SignedTransaction, Signer,
    SigningState, TransactionBuilder, Wallet,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "btc-wallet")]
#[command(about = "Non-custodial Bitcoin wallet", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Network override (mainnet, testnet, regtest)
    #[arg(long, global = true)]
    pub network: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new key and save it to an encrypted key file
    Generate {
        /// Address kind: p2wpkh or p2pkh
        #[arg(short, long, default_value = "p2wpkh")]
        kind: String,
        /// Key file to write (defaults to <data_dir>/wallet.key)
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Label stored in the ledger
        #[arg(long)]
        label: Option<String>,
    },

    /// Import a WIF private key into an encrypted key file
    ImportWif {
        /// WIF string; read from stdin when omitted
        wif: Option<String>,
        #[arg(short, long, default_value = "p2wpkh")]
        kind: String,
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Print the WIF of the key in a key file
    ExportWif {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Build and sign a payment offline from a UTXO snapshot
    Sign {
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// JSON file with the spendable UTXOs
        #[arg(long)]
        utxos: PathBuf,
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Fee rate in sat/vB (defaults to the configured rate)
        #[arg(long)]
        fee_rate: Option<u64>,
        /// Change address (defaults to the key's own address)
        #[arg(long)]
        change: Option<String>,
    },

    /// Show the balance the node reports for the key, minus recorded spends
    Balance {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Pay an address through the node and record the spend in the ledger
    Send {
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Fee rate in sat/vB (defaults to the configured rate)
        #[arg(long)]
        fee_rate: Option<u64>,
        /// Change address (defaults to the key's own address)
        #[arg(long)]
        change: Option<String>,
        /// Let the node sign with signrawtransactionwithkey
        #[arg(long)]
        node_sign: bool,
    },

    /// Submit a fully signed raw transaction to the node
    Broadcast {
        /// Transaction hex
        hex: String,
    },

    /// Decode a raw transaction
    Decode {
        /// Transaction hex
        hex: String,
    },

    /// Show transactions recorded in the ledger
    History,

    /// List addresses recorded in the ledger
    Addresses,
}

/// CLI handler
pub struct CliHandler {
    config: WalletConfig,
    ledger: Option<Ledger>,
}

impl CliHandler {
    /// Create a new CLI handler from global options
    pub fn new(config_path: Option<&Path>, network: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                WalletConfig::load(path)?
            }
            None => WalletConfig::default(),
        };
        if let Some(network) = network {
            config.network = network.parse()?;
        }
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: WalletConfig) -> Self {
        Self { config, ledger: None }
    }

    /// Open the ledger on first use
    fn ledger(&mut self) -> Result<&Ledger> {
        if self.ledger.is_none() {
            fs::create_dir_all(&self.config.data_dir)?;
            let path = self.config.ledger_path();
            log::info!("Opening ledger at {}", path.display());
            self.ledger = Some(Ledger::open(path)?);
        }
        self.ledger
            .as_ref()
            .ok_or_else(|| WalletError::Config("ledger not open".to_string()))
    }

    fn key_file_path(&self, key_file: Option<PathBuf>) -> PathBuf {
        key_file.unwrap_or_else(|| self.config.key_file_path())
    }

    /// Handle CLI command, reading secrets from stdin
    pub fn handle(&mut self, cli: Cli) -> Result<()> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        self.handle_with_input(cli.command, &mut input)
    }

    /// Handle a command, reading secrets from `input`
    pub fn handle_with_input(&mut self, command: Commands, input: &mut dyn BufRead) -> Result<()> {
        match command {
            Commands::Generate { kind, key_file, label } => {
                let kind: AddressKind = kind.parse()?;
                let keypair = KeyPair::generate(self.config.network, kind)?;
                let password = read_new_password(input)?;
                let path = self.key_file_path(key_file);
                self.save_key(&keypair, &path, &password, label)?;
                println!("New address: {}", keypair.address);
                println!("  Key file: {}", path.display());
                Ok(())
            }
            Commands::ImportWif { wif, kind, key_file } => {
                let kind: AddressKind = kind.parse()?;
                let wif = match wif {
                    Some(wif) => Zeroizing::new(wif),
                    None => read_secret(input, "WIF")?,
                };
                let keypair = KeyPair::from_wif(&wif, self.config.network, kind)?;
                let password = read_new_password(input)?;
                let path = self.key_file_path(key_file);
                self.save_key(&keypair, &path, &password, None)?;
                println!("Imported address: {}", keypair.address);
                println!("  Key file: {}", path.display());
                Ok(())
            }
            Commands::ExportWif { key_file } => {
                let path = self.key_file_path(key_file);
                let password = read_secret(input, "password")?;
                let keypair = KeyFile::read(&path)?.open(&password)?;
                let wif = keypair.to_wif();
                println!("{}", wif.as_str());
                Ok(())
            }
            Commands::Sign {
                key_file,
                utxos,
                to,
                amount,
                fee_rate,
                change,
            } => self.sign(key_file, &utxos, &to, amount, fee_rate, change.as_deref(), input),
            Commands::Balance { key_file } => {
                let (keystore, own) = self.load_keystore(key_file, input)?;
                let node = RpcClient::from_config(&self.config)?;
                let wallet = Wallet::new(self.config.clone(), keystore, self.ledger()?.clone(), LocalSigner::new());
                let balance = wallet.balance(&node)?;
                println!("Balance of {}: {} satoshis", own, balance);
                Ok(())
            }
            Commands::Send {
                key_file,
                to,
                amount,
                fee_rate,
                change,
                node_sign,
            } => self.send(key_file, &to, amount, fee_rate, change.as_deref(), node_sign, input),
            Commands::Broadcast { hex } => {
                let tx = Transaction::from_hex(hex.trim())?;
                if SigningState::of(&tx) != SigningState::FullySigned {
                    return Err(WalletError::InvalidEncoding("transaction is not fully signed".to_string()));
                }
                let node = RpcClient::from_config(&self.config)?;
                // Fee is unknown for a transaction built elsewhere
                let txid = node.broadcast(&SignedTransaction::new(tx, 0), self.config.rpc_timeout())?;
                println!("Broadcast transaction {}", txid);
                Ok(())
            }
            Commands::Decode { hex } => {
                let tx = Transaction::from_hex(hex.trim())?;
                print_transaction(&tx, self.config.network);
                Ok(())
            }
            Commands::History => {
                let records = self.ledger()?.transactions()?;
                println!("Transactions ({}):", records.len());
                for record in records {
                    let status = match &record.status {
                        TxStatus::Pending => "pending".to_string(),
                        TxStatus::Confirmed => "confirmed".to_string(),
                        TxStatus::Rejected { reason } => format!("rejected: {}", reason),
                    };
                    println!("  {} amount={} fee={} [{}]", record.txid, record.amount, record.fee, status);
                    for recipient in &record.recipients {
                        println!("    -> {}", recipient);
                    }
                }
                Ok(())
            }
            Commands::Addresses => {
                let records = self.ledger()?.key_records()?;
                println!("Addresses ({}):", records.len());
                for record in records {
                    match &record.label {
                        Some(label) => println!("  {} ({}, {})", record.address, record.kind, label),
                        None => println!("  {} ({})", record.address, record.kind),
                    }
                }
                Ok(())
            }
        }
    }

    fn save_key(&mut self, keypair: &KeyPair, path: &Path, password: &str, label: Option<String>) -> Result<()> {
        KeyFile::seal(keypair, password)?.write(path)?;
        let record = KeyRecord {
            address: keypair.address,
            network: keypair.network(),
            kind: keypair.kind(),
            label,
            key_file: Some(path.display().to_string()),
        };
        self.ledger()?.add_key_record(&record)?;
        log::info!("Saved key for {} to {}", keypair.address, path.display());
        Ok(())
    }

    /// Decrypt the key file into a keystore, checking its network
    fn load_keystore(&self, key_file: Option<PathBuf>, input: &mut dyn BufRead) -> Result<(Keystore, Address)> {
        let network = self.config.network;
        let path = self.key_file_path(key_file);
        let password = read_secret(input, "password")?;

        let mut keystore = Keystore::new();
        let own_address = keystore.load_key_file(&path, &password)?;
        if own_address.network() != network {
            return Err(WalletError::Config(format!(
                "key file is for {} but wallet is configured for {}",
                own_address.network(),
                network
            )));
        }
        Ok((keystore, own_address))
    }

    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        key_file: Option<PathBuf>,
        utxos_path: &Path,
        to: &str,
        amount: u64,
        fee_rate: Option<u64>,
        change: Option<&str>,
        input: &mut dyn BufRead,
    ) -> Result<()> {
        let network = self.config.network;
        let (keystore, own_address) = self.load_keystore(key_file, input)?;

        let utxos = UtxoSet::from_json(&fs::read_to_string(utxos_path)?)?;
        let recipient = Address::parse_for(to, network)?;
        let change_address = match change {
            Some(change) => Address::parse_for(change, network)?,
            None => own_address,
        };

        let mut policy = self.config.fee_policy;
        if let Some(rate) = fee_rate {
            policy.fee_rate = rate;
        }

        let unsigned =
            TransactionBuilder::new(&policy).fund(&[Payment::new(recipient, amount)], &utxos, &change_address)?;
        let signed = LocalSigner::new().sign(&unsigned, &keystore)?;

        println!("Transaction signed:");
        println!("  TXID: {}", signed.txid);
        println!("  Inputs: {}", signed.tx.inputs.len());
        println!("  Outputs: {}", signed.tx.outputs.len());
        println!("  Fee: {} satoshis ({} vB)", signed.fee, signed.vsize());
        println!("{}", signed.to_hex());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &mut self,
        key_file: Option<PathBuf>,
        to: &str,
        amount: u64,
        fee_rate: Option<u64>,
        change: Option<&str>,
        node_sign: bool,
        input: &mut dyn BufRead,
    ) -> Result<()> {
        let network = self.config.network;
        let (keystore, own_address) = self.load_keystore(key_file, input)?;
        let recipient = Address::parse_for(to, network)?;
        let change_address = match change {
            Some(change) => Address::parse_for(change, network)?,
            None => own_address,
        };

        let mut config = self.config.clone();
        if let Some(rate) = fee_rate {
            config.fee_policy.fee_rate = rate;
        }
        config.validate()?;

        let ledger = self.ledger()?.clone();
        let node = RpcClient::from_config(&config)?;
        let payments = [Payment::new(recipient, amount)];
        let signed = if node_sign {
            let signer = NodeSigner::new(&node, config.rpc_timeout());
            Wallet::new(config, keystore, ledger, signer).send(&node, &payments, &change_address)?
        } else {
            Wallet::new(config, keystore, ledger, LocalSigner::new()).send(&node, &payments, &change_address)?
        };

        println!("Transaction sent:");
        println!("  TXID: {}", signed.txid);
        println!("  Fee: {} satoshis ({} vB)", signed.fee, signed.vsize());
        Ok(())
    }
}

/// Read one line from `input`, without the trailing newline
fn read_secret(input: &mut dyn BufRead, what: &str) -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    if input.read_line(&mut line)? == 0 {
        return Err(WalletError::Config(format!("expected {} on stdin", what)));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

fn read_new_password(input: &mut dyn BufRead) -> Result<Zeroizing<String>> {
    let password = read_secret(input, "password")?;
    if password.is_empty() {
        return Err(WalletError::Config("password must not be empty".to_string()));
    }
    Ok(password)
}

fn print_transaction(tx: &Transaction, network: Network) {
    println!("Transaction:");
    println!("  TXID: {}", tx.txid());
    println!("  WTXID: {}", tx.wtxid());
    println!("  Version: {}", tx.version);
    println!("  Lock time: {}", tx.lock_time);
    println!("  Weight: {} (vsize {})", tx.weight(), tx.vsize());
    match SigningState::of(tx) {
        SigningState::Unsigned => println!("  Signing: unsigned"),
        SigningState::PartiallySigned { signed, total } => println!("  Signing: {}/{} inputs signed", signed, total),
        SigningState::FullySigned => println!("  Signing: fully signed"),
    }

    println!("  Inputs ({}):", tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        println!("    [{}] {}", i, input.outpoint());
    }
    println!("  Outputs ({}):", tx.outputs.len());
    for (i, output) in tx.outputs.iter().enumerate() {
        match Address::from_script(&output.script_pubkey, network) {
            Some(address) => println!("    [{}] {} sat -> {}", i, output.value, address),
            None => println!("    [{}] {} sat -> script {}", i, output.value, hex::encode(&output.script_pubkey)),
        }
    }
}
