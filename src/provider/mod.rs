//! Provider: the chain-specific adapter presenting a uniform interface
//! (§4.1). Implementations: [`fake`] (deterministic test doubles), [`tezos`],
//! [`ethereum`].

mod ethereum;
mod fake;
mod tezos;

pub use ethereum::EthereumProvider;
pub use fake::{FailDeployProvider, FailWatchProvider, FakeProvider};
pub use tezos::TezosProvider;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::model::{Blockchain, Transaction};

/// Result of a block scan for a single operation (§4.1 `find_operation`,
/// §4.6 watch fallback).
#[derive(Debug, Clone)]
pub struct FoundOperation {
    pub level: u64,
    pub fee: i64,
    /// Set when the operation is an origination; the first originated
    /// contract address.
    pub originated_contract: Option<String>,
}

/// The uniform chain-specific interface every backend implements (§4.1).
///
/// `deploy` is the dispatcher: it routes to `transfer`, `send`, or
/// `originate` based on the Transaction's derived [`crate::model::Variant`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Mints a fresh keypair. Returns `(address, private_key_bytes)`.
    async fn create_wallet(&self, blockchain: &Blockchain, passphrase: &str) -> Result<(String, Vec<u8>), ProviderError>;

    /// Reads the on-chain balance for `address`.
    async fn get_balance(&self, blockchain: &Blockchain, address: &str, private_key: &[u8]) -> Result<u128, ProviderError>;

    /// Dispatches to `transfer`/`send`/`originate` based on the
    /// Transaction's shape. May mutate `tx.gas`/`tx.txhash` via its return.
    async fn deploy(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        match tx.variant().map_err(|e| ProviderError::permanent(e.0))? {
            crate::model::Variant::Transfer => self.transfer(blockchain, tx).await,
            crate::model::Variant::Call => self.send(blockchain, tx).await,
            crate::model::Variant::Contract => self.originate(blockchain, tx).await,
        }
    }

    async fn transfer(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError>;
    async fn send(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError>;
    async fn originate(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError>;

    /// Checks confirmation depth and extracts results for a broadcast
    /// Transaction. Returns `(gas, originated_contract_address)`.
    async fn watch(&self, tx: &Transaction, blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError>;

    async fn head_level(&self, blockchain: &Blockchain) -> Result<u64, ProviderError>;

    /// Searches `[from_level, to_level]` for `txhash`.
    async fn find_operation(
        &self,
        blockchain: &Blockchain,
        txhash: &str,
        from_level: u64,
        to_level: u64,
    ) -> Result<Option<FoundOperation>, ProviderError>;
}

/// Outcome of a successful [`Provider::watch`] call.
#[derive(Debug, Clone, Default)]
pub struct WatchOutcome {
    pub gas: Option<i64>,
    pub contract_address: Option<String>,
}

/// Maps a `provider_class` symbolic identifier to a constructor producing a
/// [`Provider`] (§9 Design Notes: "Runtime polymorphism via `provider_class`
/// strings"). Registration happens once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider_class: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(provider_class.into(), provider);
    }

    pub fn resolve(&self, provider_class: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_class).cloned()
    }

    /// A registry pre-populated with the deterministic test backends
    /// (`"fake"`, `"fail-deploy"`, `"fail-watch"`), matching
    /// `djtezos.fake.{Provider,FailDeploy,FailWatch}`.
    pub fn with_test_providers(fake_sleep: std::time::Duration) -> Self {
        let mut registry = Self::new();
        registry.register("fake", Arc::new(FakeProvider::new(fake_sleep)));
        registry.register("fail-deploy", Arc::new(FailDeployProvider::new(fake_sleep)));
        registry.register("fail-watch", Arc::new(FailWatchProvider::new(fake_sleep)));
        registry
    }
}

/// A minimal Provider stub used only by the Chain Watcher's own unit tests,
/// where only `head_level` is ever called.
#[cfg(test)]
pub(crate) mod fake_for_tests {
    use super::*;

    pub struct StaticHeadProvider {
        head: u64,
    }

    impl StaticHeadProvider {
        pub fn new(head: u64) -> Self {
            Self { head }
        }
    }

    #[async_trait]
    impl Provider for StaticHeadProvider {
        async fn create_wallet(&self, _blockchain: &Blockchain, _passphrase: &str) -> Result<(String, Vec<u8>), ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn get_balance(&self, _blockchain: &Blockchain, _address: &str, _private_key: &[u8]) -> Result<u128, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn transfer(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn send(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn originate(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn watch(&self, _tx: &Transaction, _blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }

        async fn head_level(&self, _blockchain: &Blockchain) -> Result<u64, ProviderError> {
            Ok(self.head)
        }

        async fn find_operation(
            &self,
            _blockchain: &Blockchain,
            _txhash: &str,
            _from_level: u64,
            _to_level: u64,
        ) -> Result<Option<FoundOperation>, ProviderError> {
            unimplemented!("not exercised by the reorg test")
        }
    }
}
