//! In-memory Store (§6, §10 test tooling): a `tokio::sync::RwLock`-guarded
//! set of maps satisfying the same [`super::Store`] trait as [`super::PgStore`].
//! Backs the engine's own integration tests so FSM/Scheduler/Watcher
//! behavior can be exercised without a live Postgres instance.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Account, Blockchain, Transaction, TransactionState};

use super::Store;

#[derive(Default)]
pub struct InMemoryStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    blockchains: RwLock<HashMap<Uuid, Blockchain>>,
    transactions: RwLock<HashMap<Uuid, Transaction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn blockchain_id_of_sender(&self, sender_id: Uuid) -> Option<Uuid> {
        self.accounts.read().await.get(&sender_id).map(|a| a.blockchain_id)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, OrchestratorError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<(), OrchestratorError> {
        self.accounts.write().await.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_blockchain(&self, id: Uuid) -> Result<Option<Blockchain>, OrchestratorError> {
        Ok(self.blockchains.read().await.get(&id).cloned())
    }

    async fn save_blockchain(&self, blockchain: &Blockchain) -> Result<(), OrchestratorError> {
        self.blockchains.write().await.insert(blockchain.id, blockchain.clone());
        Ok(())
    }

    async fn list_active_blockchains(&self) -> Result<Vec<Blockchain>, OrchestratorError> {
        Ok(self
            .blockchains
            .read()
            .await
            .values()
            .filter(|b| b.is_active)
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, OrchestratorError> {
        Ok(self.transactions.read().await.get(&id).cloned())
    }

    async fn create_transaction(&self, mut tx: Transaction) -> Result<Transaction, OrchestratorError> {
        if let Some(origination_id) = tx.contract_ref {
            if let Some(origination) = self.transactions.read().await.get(&origination_id) {
                tx.inherit_from_contract_ref(origination);
            }
        }
        tx.validate()?;
        let mut transactions = self.transactions.write().await;
        if tx.txhash.is_some() && transactions.values().any(|existing| existing.txhash == tx.txhash) {
            return Err(OrchestratorError::Store("duplicate txhash".into()));
        }
        transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn save_transaction(&self, tx: &Transaction) -> Result<(), OrchestratorError> {
        let mut transactions = self.transactions.write().await;
        if let Some(hash) = &tx.txhash {
            let clashes = transactions
                .values()
                .any(|existing| existing.id != tx.id && existing.txhash.as_ref() == Some(hash));
            if clashes {
                return Err(OrchestratorError::Store("duplicate txhash".into()));
            }
        }
        transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn next_pending_transaction(&self, sender_id: Uuid) -> Result<Option<Transaction>, OrchestratorError> {
        // `held` is excluded, not just terminal states: a held row is parked
        // pending manual/external release and must not block siblings from
        // advancing (matches `to_spool`'s exclusion of `held`).
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.sender_id == Some(sender_id) && !tx.state.is_terminal() && tx.state != TransactionState::Held)
            .min_by_key(|tx| tx.created_at)
            .cloned())
    }

    async fn transactions_for_sender(&self, sender_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let transactions = self.transactions.read().await;
        let mut rows: Vec<_> = transactions
            .values()
            .filter(|tx| tx.sender_id == Some(sender_id))
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.created_at);
        Ok(rows)
    }

    async fn transactions_referencing(&self, origination_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.contract_ref == Some(origination_id))
            .cloned()
            .collect())
    }

    async fn transactions_with_txhash(&self, blockchain_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let transactions = self.transactions.read().await;
        let accounts = self.accounts.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.txhash.is_some())
            .filter(|tx| {
                tx.sender_id
                    .and_then(|s| accounts.get(&s))
                    .map(|a| a.blockchain_id == blockchain_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn pending_transactions(&self) -> Result<Vec<Transaction>, OrchestratorError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| !tx.state.is_terminal() && tx.state != TransactionState::Held)
            .cloned()
            .collect())
    }

    async fn reset_for_reorg(&self, blockchain_id: Uuid, from_level: u64) -> Result<(), OrchestratorError> {
        let accounts = self.accounts.read().await;
        let mut transactions = self.transactions.write().await;
        for tx in transactions.values_mut() {
            let same_chain = tx
                .sender_id
                .and_then(|s| accounts.get(&s))
                .map(|a| a.blockchain_id == blockchain_id)
                .unwrap_or(false);
            if same_chain && tx.level.map(|l| l >= from_level).unwrap_or(false) {
                tx.level = None;
                tx.txhash = None;
                tx.contract_address = None;
                tx.state_set(TransactionState::Held);
            }
        }
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>, OrchestratorError> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionState;

    #[tokio::test]
    async fn next_pending_picks_oldest_non_terminal() {
        let store = InMemoryStore::new();
        let sender = Uuid::new_v4();
        let older = Transaction::new_transfer(sender, Uuid::new_v4(), 1, TransactionState::Deploy);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = Transaction::new_transfer(sender, Uuid::new_v4(), 2, TransactionState::Deploy);
        store.create_transaction(newer.clone()).await.unwrap();
        store.create_transaction(older.clone()).await.unwrap();

        let picked = store.next_pending_transaction(sender).await.unwrap().unwrap();
        assert_eq!(picked.id, older.id);
    }

    #[tokio::test]
    async fn duplicate_txhash_rejected() {
        let store = InMemoryStore::new();
        let sender = Uuid::new_v4();
        let mut a = Transaction::new_transfer(sender, Uuid::new_v4(), 1, TransactionState::Deploy);
        a.txhash = Some("dup".into());
        let mut b = Transaction::new_transfer(sender, Uuid::new_v4(), 1, TransactionState::Deploy);
        b.txhash = Some("dup".into());

        store.create_transaction(a).await.unwrap();
        let err = store.create_transaction(b).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reorg_resets_affected_rows() {
        let store = InMemoryStore::new();
        let blockchain = Blockchain::new("tzlocal", "http://localhost:8732", "fake");
        store.save_blockchain(&blockchain).await.unwrap();
        let mut account = Account::new(blockchain.id, "a1");
        account.address = Some("tz1abc".into());
        store.save_account(&account).await.unwrap();

        let mut tx = Transaction::new_transfer(account.id, Uuid::new_v4(), 1, TransactionState::Deploy);
        tx.level = Some(105);
        tx.txhash = Some("H".into());
        tx.state_set(TransactionState::Done);
        store.save_transaction(&tx).await.unwrap();

        store.reset_for_reorg(blockchain.id, 100).await.unwrap();

        let reloaded = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(reloaded.level, None);
        assert_eq!(reloaded.txhash, None);
        assert_eq!(reloaded.contract_address, None);
        assert_eq!(reloaded.state, TransactionState::Held);
    }
}
