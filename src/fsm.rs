//! Transaction FSM (§4.2): the state machine that drives a Transaction
//! through deploy → watch → postdeploy → done, with retry and abort
//! transitions. Grounded on the phase-collapse-and-retry shape of
//! `ETHSender::drive_to_completion` — each step re-reads persisted state,
//! makes one Provider call, and writes the outcome back before returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{OrchestratorError, ProviderError};
use crate::model::{Transaction, TransactionState, Variant};
use crate::provider::{Provider, ProviderRegistry, WatchOutcome};
use crate::store::Store;

/// A user-supplied hook invoked at the `postdeploy` phase (§9 Design Notes).
/// The default is no-op: `postdeploy_state` transitions straight to `done`.
pub type PostDeployHook =
    Arc<dyn Fn(Transaction) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send>> + Send + Sync>;

/// Drives individual Transactions one phase at a time. Stateless beyond its
/// Store/Provider/hook handles — safe to share across worker tasks.
pub struct Fsm {
    store: Arc<dyn Store>,
    providers: ProviderRegistry,
    postdeploy_hook: Option<PostDeployHook>,
}

impl Fsm {
    pub fn new(store: Arc<dyn Store>, providers: ProviderRegistry) -> Self {
        Self {
            store,
            providers,
            postdeploy_hook: None,
        }
    }

    pub fn with_postdeploy_hook(mut self, hook: PostDeployHook) -> Self {
        self.postdeploy_hook = Some(hook);
        self
    }

    async fn resolve(&self, tx: &Transaction) -> Result<(crate::model::Account, crate::model::Blockchain, Arc<dyn Provider>), OrchestratorError> {
        let sender_id = tx.sender_id.ok_or_else(|| OrchestratorError::Validation(crate::error::ValidationError::new("transaction has no sender")))?;
        let account = self
            .store
            .get_account(sender_id)
            .await?
            .ok_or(OrchestratorError::AccountNotFound(sender_id))?;
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

    /// `deploy`/`deploying` → broadcasts the transaction (§4.2).
    pub async fn deploy_state(&self, tx_id: Uuid) -> Result<(), OrchestratorError> {
        let Some(mut tx) = self.store.get_transaction(tx_id).await? else {
            return Ok(());
        };
        if tx.state.is_terminal() {
            return Ok(());
        }
        let (_account, blockchain, provider) = self.resolve(&tx).await?;

        tx.state_set(TransactionState::Deploying);
        self.store.save_transaction(&tx).await?;

        match provider.deploy(&blockchain, &tx).await {
            Ok(txhash) => {
                tx.txhash = Some(txhash);
                tx.error.clear();
                tx.last_fail = None;
                tx.state_set(TransactionState::Watch);
            }
            Err(ProviderError::Temporary(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::Deploy);
            }
            Err(ProviderError::Permanent(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::DeployAborted);
            }
        }
        self.store.save_transaction(&tx).await
    }

    /// `watch`/`watching` → polls for confirmation depth (§4.2, §4.6).
    pub async fn watch_state(&self, tx_id: Uuid) -> Result<(), OrchestratorError> {
        let Some(mut tx) = self.store.get_transaction(tx_id).await? else {
            return Ok(());
        };
        if tx.state.is_terminal() {
            return Ok(());
        }
        let (_account, blockchain, provider) = self.resolve(&tx).await?;

        tx.state_set(TransactionState::Watching);
        self.store.save_transaction(&tx).await?;

        match provider.watch(&tx, &blockchain).await {
            Ok(WatchOutcome { gas, contract_address }) => {
                if let Some(gas) = gas {
                    tx.gas = Some(gas);
                }
                if contract_address.is_some() {
                    tx.contract_address = contract_address.clone();
                }
                tx.error.clear();
                tx.last_fail = None;
                tx.state_set(TransactionState::Postdeploy);
                self.store.save_transaction(&tx).await?;

                if tx.variant() == Ok(Variant::Contract) {
                    if let Some(address) = contract_address {
                        for mut dependent in self.store.transactions_referencing(tx.id).await? {
                            dependent.contract_address = Some(address.clone());
                            self.store.save_transaction(&dependent).await?;
                        }
                    }
                }
                Ok(())
            }
            Err(ProviderError::Temporary(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::Watch);
                self.store.save_transaction(&tx).await
            }
            Err(ProviderError::Permanent(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::WatchAborted);
                self.store.save_transaction(&tx).await
            }
        }
    }

    /// `postdeploy`/`postdeploying` → runs the optional user hook then
    /// settles at `done` (§9 Design Notes).
    pub async fn postdeploy_state(&self, tx_id: Uuid) -> Result<(), OrchestratorError> {
        let Some(mut tx) = self.store.get_transaction(tx_id).await? else {
            return Ok(());
        };
        if tx.state.is_terminal() {
            return Ok(());
        }

        tx.state_set(TransactionState::Postdeploying);
        self.store.save_transaction(&tx).await?;

        let outcome = match &self.postdeploy_hook {
            Some(hook) => hook(tx.clone()).await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                tx.error.clear();
                tx.last_fail = None;
                tx.state_set(TransactionState::Done);
            }
            Err(ProviderError::Temporary(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::Postdeploy);
            }
            Err(ProviderError::Permanent(e)) => {
                tx.error = e.0;
                tx.last_fail = Some(Utc::now());
                tx.state_set(TransactionState::PostdeployAborted);
            }
        }
        self.store.save_transaction(&tx).await
    }
}
