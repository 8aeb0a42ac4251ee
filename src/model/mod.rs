//! Data model (§3): Blockchain, Account, Transaction, and the transaction
//! state machine.

mod account;
mod blockchain;
mod transaction;

pub use account::Account;
pub use blockchain::Blockchain;
pub use transaction::{HistoryEntry, Transaction, TransactionState, Variant};
