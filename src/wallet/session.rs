// Wallet facade: ties keys, ledger, signer and the node together

use super::address::{Address, AddressKind};
use super::keystore::Keystore;
use super::reservation::{Reservation, ReservationTable};
use super::signer::{SignedTransaction, Signer};
use super::tx_builder::{Payment, TransactionBuilder};
use crate::config::WalletConfig;
use crate::core::Hash256;
use crate::error::{Result, WalletError};
use crate::rpc::{Broadcaster, NodeRpc};
use crate::storage::{KeyRecord, Ledger, TxRecord, TxStatus, UtxoSet};
use log::{debug, info, warn};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wallet
pub struct Wallet<S: Signer> {
    config: WalletConfig,
    keystore: Keystore,
    ledger: Ledger,
    signer: S,
    reservations: ReservationTable,
}

impl<S: Signer> Wallet<S> {
    pub fn new(config: WalletConfig, keystore: Keystore, ledger: Ledger, signer: S) -> Self {
        Self {
            config,
            keystore,
            ledger,
            signer,
            reservations: ReservationTable::new(),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Generate a key for a new address and record it in the ledger
    pub fn new_address(&mut self, kind: AddressKind, label: Option<String>) -> Result<Address> {
        let address = self.keystore.new_address(self.config.network, kind)?;
        self.ledger.add_key_record(&KeyRecord {
            address,
            network: self.config.network,
            kind,
            label,
            key_file: None,
        })?;
        info!("New {} address {}", kind, address);
        Ok(address)
    }

    /// UTXOs available for a new spend: the node's view minus outpoints
    /// already spent by recorded or in-flight transactions
    pub fn spendable<N: NodeRpc + ?Sized>(&self, node: &N) -> Result<UtxoSet> {
        let addresses = self.keystore.list_addresses();
        let listed = node.list_unspent(
            &addresses,
            self.config.fee_policy.min_confirmations,
            self.config.rpc_timeout(),
        )?;
        let snapshot = UtxoSet::from_utxos(listed).without(&self.ledger.spent_outpoints()?);
        let available = self.reservations.filter(&snapshot);
        debug!("{} spendable UTXOs worth {} sat", available.count(), available.total_value());
        Ok(available)
    }

    /// Confirmed, unspent balance
    pub fn balance<N: NodeRpc + ?Sized>(&self, node: &N) -> Result<u64> {
        Ok(self.spendable(node)?.total_value())
    }

    /// Pay `payments`, sending any change to `change_address`.
    ///
    /// The ledger is written only after the node accepts the transaction;
    /// on any earlier failure the chosen outpoints are released. If that
    /// write fails the outpoints stay reserved and `Unrecorded` names the
    /// broadcast txid.
    pub fn send<N: NodeRpc + ?Sized>(
        &self,
        node: &N,
        payments: &[Payment],
        change_address: &Address,
    ) -> Result<SignedTransaction> {
        let utxos = self.spendable(node)?;
        let unsigned = TransactionBuilder::new(&self.config.fee_policy).fund(payments, &utxos, change_address)?;

        let reservation = self.reservations.reserve(&unsigned.outpoints())?;
        let signed = self.signer.sign(&unsigned, &self.keystore)?;
        node.broadcast(&signed, self.config.rpc_timeout())?;

        let recorded = self.ledger.record_broadcast(&TxRecord {
            txid: signed.txid,
            amount: payments.iter().map(|p| p.value).fold(0u64, u64::saturating_add),
            fee: signed.fee,
            recipients: payments.iter().map(|p| p.address).collect(),
            inputs: unsigned.outpoints(),
            status: TxStatus::Pending,
            timestamp: unix_now(),
        });
        self.settle(reservation, signed, recorded)
    }

    /// Finish a send the node already accepted
    fn settle(
        &self,
        reservation: Reservation<'_>,
        signed: SignedTransaction,
        recorded: Result<()>,
    ) -> Result<SignedTransaction> {
        match recorded {
            Ok(()) => {
                drop(reservation);
                Ok(signed)
            }
            Err(e) => {
                let held = reservation.keep();
                warn!(
                    "Transaction {} was broadcast but not recorded ({}); keeping {} inputs reserved",
                    signed.txid,
                    e,
                    held.len()
                );
                Err(WalletError::Unrecorded {
                    txid: signed.txid,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Mark a sent transaction confirmed or rejected
    pub fn set_status(&self, txid: &Hash256, status: TxStatus) -> Result<()> {
        self.ledger.set_status(txid, status)
    }

    pub fn history(&self) -> Result<Vec<TxRecord>> {
        self.ledger.transactions()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
