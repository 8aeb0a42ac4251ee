//! Store: durable persistence of Accounts, Blockchains, and Transactions
//! (§6). A trait so the FSM/Scheduler/Writer/Watcher can run against either
//! [`PgStore`] in production or [`InMemoryStore`] in tests — both satisfy
//! the identical contract.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Account, Blockchain, Transaction, TransactionState};

/// A terminal state never re-enters the pipeline through ordinary FSM
/// transitions (only the Chain Watcher's reorg reset crosses this line).
pub fn is_terminal(state: TransactionState) -> bool {
    state.is_terminal()
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, OrchestratorError>;
    async fn save_account(&self, account: &Account) -> Result<(), OrchestratorError>;

    async fn get_blockchain(&self, id: Uuid) -> Result<Option<Blockchain>, OrchestratorError>;
    async fn save_blockchain(&self, blockchain: &Blockchain) -> Result<(), OrchestratorError>;
    async fn list_active_blockchains(&self) -> Result<Vec<Blockchain>, OrchestratorError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, OrchestratorError>;

    /// Validates and inserts a new Transaction. Inherits contract fields
    /// from `contract_ref` (§3) when present.
    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction, OrchestratorError>;

    /// Persists a full row overwrite — the FSM's single point of mutation.
    /// Callers pass the already-updated row (state, history, and whatever
    /// else changed); the Store does not re-derive history itself.
    async fn save_transaction(&self, tx: &Transaction) -> Result<(), OrchestratorError>;

    /// The oldest non-terminal Transaction for `sender_id`, or `None` if the
    /// sender has no outstanding work (§4.2 tie-break rule).
    async fn next_pending_transaction(&self, sender_id: Uuid) -> Result<Option<Transaction>, OrchestratorError>;

    /// All Transactions belonging to `sender_id`, oldest first.
    async fn transactions_for_sender(&self, sender_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError>;

    /// Every Call Transaction whose `contract_ref` points at `origination_id`
    /// (§4.5 origination fan-out).
    async fn transactions_referencing(&self, origination_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError>;

    /// Every Transaction for `blockchain_id` carrying a non-null `txhash`
    /// (the Chain Watcher's known-hash set `H`, §4.5).
    async fn transactions_with_txhash(&self, blockchain_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError>;

    /// All non-terminal Transactions across every sender (the Writer's raw
    /// candidate pool before eligibility filtering, §4.4).
    async fn pending_transactions(&self) -> Result<Vec<Transaction>, OrchestratorError>;

    /// Resets every Transaction on `blockchain_id` with `level >= from_level`
    /// back to `held`, clearing `level`/`txhash`/`contract_address` (§4.5
    /// reorg rule).
    async fn reset_for_reorg(&self, blockchain_id: Uuid, from_level: u64) -> Result<(), OrchestratorError>;

    async fn all_accounts(&self) -> Result<Vec<Account>, OrchestratorError>;
}
