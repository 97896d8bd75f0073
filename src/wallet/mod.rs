// Wallet: keys, addresses, coin selection, signing and spending

mod address;
mod coin_selection;
mod fee;
mod keyfile;
mod keystore;
mod reservation;
mod session;
mod signer;
mod tx_builder;

pub use address::{Address, AddressKind};
pub use coin_selection::{CoinSelector, GreedyDescending, Selection, SpendTarget};
pub use fee::{estimate_vsize, estimate_weight, input_base_size, input_witness_size, output_size, FeePolicy};
pub use keyfile::KeyFile;
pub use keystore::{decode_wif, export_wif, KeyPair, Keystore, PrivateKey};
pub use reservation::{Reservation, ReservationTable};
pub use session::Wallet;
pub use signer::{
    is_low_s, sign_digest, verify_input, verify_transaction, LocalSigner, NodeSigner, SignedTransaction, Signer,
    SigningState,
};
pub use tx_builder::{Payment, TransactionBuilder, UnsignedTransaction};
