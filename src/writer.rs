//! Writer (§4.4): the batch admission pass used by the newer ("djtezos")
//! flow. Each invocation selects one eligible Transaction by variant and
//! recency, deploys it, and applies the consecutive-failure abort rule —
//! independent of the Scheduler/FSM pipeline, grounded on
//! `djtezos_write.py`'s single-candidate-per-run loop.

use std::sync::Arc;

use chrono::Utc;

use crate::error::OrchestratorError;
use crate::model::{Account, Blockchain, Transaction, TransactionState, Variant};
use crate::provider::{Provider, ProviderRegistry};
use crate::store::Store;

pub struct Writer {
    store: Arc<dyn Store>,
    providers: ProviderRegistry,
    abort_threshold: u32,
}

impl Writer {
    pub fn new(store: Arc<dyn Store>, providers: ProviderRegistry, abort_threshold: u32) -> Self {
        Self {
            store,
            providers,
            abort_threshold,
        }
    }

    /// Runs one Writer pass: at most one deploy. Returns the id of the
    /// Transaction deployed, if any.
    pub async fn run_once(&self) -> Result<Option<uuid::Uuid>, OrchestratorError> {
        let mut buckets: [Vec<Transaction>; 6] = Default::default();

        for tx in self.store.pending_transactions().await? {
            let Ok(variant) = tx.variant() else { continue };
            if !self.eligible(&tx, variant).await? {
                continue;
            }
            let is_new = tx.last_fail.is_none();
            let index = match (is_new, variant) {
                (true, Variant::Transfer) => 0,
                (true, Variant::Contract) => 1,
                (true, Variant::Call) => 2,
                (false, Variant::Transfer) => 3,
                (false, Variant::Contract) => 4,
                (false, Variant::Call) => 5,
            };
            buckets[index].push(tx);
        }

        for (index, mut bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            if index < 3 {
                bucket.sort_by_key(|tx| tx.created_at);
            } else {
                bucket.sort_by_key(|tx| tx.last_fail);
            }
            if let Some(tx) = bucket.into_iter().next() {
                let tx_id = tx.id;
                self.deploy_one(tx).await?;
                return Ok(Some(tx_id));
            }
        }
        Ok(None)
    }

    async fn eligible(&self, tx: &Transaction, variant: Variant) -> Result<bool, OrchestratorError> {
        if tx.txhash.is_some() {
            return Ok(false);
        }
        if matches!(tx.state, TransactionState::Held) {
            return Ok(false);
        }
        let variant_ready = match variant {
            Variant::Contract => tx.contract_code.is_some(),
            Variant::Call => tx.contract_address.is_some(),
            Variant::Transfer => true,
        };
        if !variant_ready {
            return Ok(false);
        }
        let Some(sender_id) = tx.sender_id else { return Ok(false) };
        let Some(account) = self.store.get_account(sender_id).await? else { return Ok(false) };
        if !matches!(account.balance, Some(b) if b > 0) {
            return Ok(false);
        }
        let Some(blockchain) = self.store.get_blockchain(account.blockchain_id).await? else { return Ok(false) };
        Ok(blockchain.is_active)
    }

    async fn resolve(&self, tx: &Transaction) -> Result<(Account, Blockchain, Arc<dyn Provider>), OrchestratorError> {
        let sender_id = tx.sender_id.ok_or_else(|| OrchestratorError::Validation(crate::error::ValidationError::new("transaction has no sender")))?;
        let account = self.store.get_account(sender_id).await?.ok_or(OrchestratorError::AccountNotFound(sender_id))?;
        let blockchain = self
            .store
            .get_blockchain(account.blockchain_id)
            .await?
            .ok_or(OrchestratorError::BlockchainNotFound(account.blockchain_id))?;
        let provider = self
            .providers
            .resolve(&blockchain.provider_class)
            .ok_or_else(|| OrchestratorError::Store(format!("no provider registered for {}", blockchain.provider_class)))?;
        Ok((account, blockchain, provider))
    }

    async fn deploy_one(&self, mut tx: Transaction) -> Result<(), OrchestratorError> {
        let (_account, blockchain, provider) = self.resolve(&tx).await?;

        // Append a `deploying` history entry before the call so the abort
        // rule's reverse scan sees this attempt (§4.2 abort rule).
        tx.state_set(TransactionState::Deploying);
        self.store.save_transaction(&tx).await?;

        match provider.deploy(&blockchain, &tx).await {
            Ok(txhash) => {
                tx.txhash = Some(txhash);
                tx.error.clear();
                tx.last_fail = None;
                let next = if tx.variant() == Ok(Variant::Contract) {
                    TransactionState::Watching
                } else {
                    TransactionState::Done
                };
                tx.state_set(next);
            }
            Err(e) => {
                tx.last_fail = Some(Utc::now());
                tx.error = e.message();
                let consecutive = tx.consecutive_deploying_since_last_abort();
                if consecutive >= self.abort_threshold {
                    tx.error = format!("Aborting because >= {} failures, last error: {}", self.abort_threshold, tx.error);
                    tx.state_set(TransactionState::Aborted);
                } else {
                    tx.state_set(TransactionState::Retrying);
                }
            }
        }
        self.store.save_transaction(&tx).await
    }
}
