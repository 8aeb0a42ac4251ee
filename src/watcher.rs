//! Chain Watcher (§4.5): a cursor-based block scanner reconciling persisted
//! Transactions against on-chain state, per Blockchain. Handles reorgs by
//! resetting the watermark's affected rows, otherwise scans the head-ward
//! window for known txhashes and advances the watermark.
//!
//! Limitation (recorded in DESIGN.md): this implementation reconciles rows
//! this engine already knows about (by persisted `txhash`). Discovering and
//! auto-creating Call rows for *unknown* incoming operations against a
//! tracked contract address would need a "list every operation in a block"
//! Provider method, which the chain-agnostic `Provider` trait does not
//! expose — every implementation here (Tezos, Ethereum, Fake) only supports
//! point lookups by txhash.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Blockchain, TransactionState};
use crate::provider::ProviderRegistry;
use crate::store::Store;

pub struct ChainWatcher {
    store: Arc<dyn Store>,
    providers: ProviderRegistry,
    max_depth: u64,
}

impl ChainWatcher {
    pub fn new(store: Arc<dyn Store>, providers: ProviderRegistry, max_depth: u64) -> Self {
        Self {
            store,
            providers,
            max_depth,
        }
    }

    /// Runs one reconciliation pass for every active Blockchain. Errors on
    /// one blockchain are logged and do not abort the others (§6 `sync`).
    pub async fn run_all(&self) -> Result<(), OrchestratorError> {
        for blockchain in self.store.list_active_blockchains().await? {
            if let Err(e) = self.run_once(blockchain.id).await {
                tracing::warn!(blockchain = %blockchain.name, error = %e, "chain watcher pass failed");
            }
        }
        Ok(())
    }

    pub async fn run_once(&self, blockchain_id: Uuid) -> Result<(), OrchestratorError> {
        let blockchain = self
            .store
            .get_blockchain(blockchain_id)
            .await?
            .ok_or(OrchestratorError::BlockchainNotFound(blockchain_id))?;
        let provider = self
            .providers
            .resolve(&blockchain.provider_class)
            .ok_or_else(|| OrchestratorError::Store(format!("no provider registered for {}", blockchain.provider_class)))?;

        let head = provider.head_level(&blockchain).await?;

        if let Some(max_level) = blockchain.max_level {
            if head < max_level {
                tracing::warn!(blockchain = %blockchain.name, head, max_level, "chain watcher: reorg detected");
                self.store.reset_for_reorg(blockchain.id, max_level).await?;
                return Ok(());
            }
        }

        let depth = match blockchain.max_level {
            None => self.max_depth,
            Some(max_level) if head == max_level => 1,
            Some(max_level) => (head - max_level).min(self.max_depth),
        };
        let scan_from = head.saturating_sub(depth.saturating_sub(1));

        for mut tx in self.store.transactions_with_txhash(blockchain.id).await? {
            if tx.state.is_terminal() {
                continue;
            }
            let Some(txhash) = tx.txhash.clone() else { continue };
            let Some(found) = provider.find_operation(&blockchain, &txhash, scan_from, head).await? else {
                continue;
            };

            tx.gas = Some(found.fee);
            tx.level = Some(found.level);
            if let Some(address) = &found.originated_contract {
                tx.contract_address = Some(address.clone());
                for mut dependent in self.store.transactions_referencing(tx.id).await? {
                    dependent.contract_address = Some(address.clone());
                    self.store.save_transaction(&dependent).await?;
                }
            }
            tx.error.clear();
            tx.state_set(TransactionState::Done);
            self.store.save_transaction(&tx).await?;
        }

        let mut updated: Blockchain = blockchain;
        updated.max_level = Some(head.saturating_sub(1));
        self.store.save_blockchain(&updated).await
    }
}

/// Spawns a task that invokes [`ChainWatcher::run_all`] on a fixed cadence
/// until the returned handle is dropped or aborted — the `sync` daemon mode
/// backing the `serve` CLI subcommand (§6).
pub fn spawn_periodic(watcher: Arc<ChainWatcher>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = watcher.run_all().await {
                tracing::error!(error = %e, "chain watcher cycle failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;
    use crate::provider::fake_for_tests::StaticHeadProvider;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn reorg_resets_watermark_rows_without_scanning() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut blockchain = Blockchain::new("tzlocal", "http://localhost", "static-head");
        blockchain.max_level = Some(100);
        store.save_blockchain(&blockchain).await.unwrap();

        let account = Account::new(blockchain.id, "a1");
        store.save_account(&account).await.unwrap();

        let mut tx = crate::model::Transaction::new_transfer(account.id, Uuid::new_v4(), 1, TransactionState::Deploy);
        tx.level = Some(105);
        tx.txhash = Some("H".into());
        tx.state_set(TransactionState::Done);
        store.save_transaction(&tx).await.unwrap();

        let mut providers = ProviderRegistry::new();
        providers.register("static-head", Arc::new(StaticHeadProvider::new(90)));
        let watcher = ChainWatcher::new(store.clone(), providers, 500);

        watcher.run_once(blockchain.id).await.unwrap();

        let reloaded = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, TransactionState::Held);
        assert_eq!(reloaded.level, None);

        let reloaded_chain = store.get_blockchain(blockchain.id).await.unwrap().unwrap();
        assert_eq!(reloaded_chain.max_level, Some(100));
    }
}
