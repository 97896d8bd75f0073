// Storage layer: UTXO snapshots and the persistent wallet ledger

mod ledger;
mod utxo_set;

pub use ledger::{KeyRecord, Ledger, TxRecord, TxStatus};
pub use utxo_set::{Utxo, UtxoSet};
