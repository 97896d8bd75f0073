// Core transaction data structures

mod types;
mod transaction;
mod serialize;
mod hash;
pub mod script;
pub mod sighash;

pub use types::*;
pub use transaction::*;
pub use serialize::*;
pub use hash::*;
pub use script::{Script, ScriptType};
pub use sighash::{legacy_sighash, SighashCache, SIGHASH_ALL};
