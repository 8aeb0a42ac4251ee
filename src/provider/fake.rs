//! Deterministic test-double Providers, grounded on `djtezos/fake.py`:
//! `Provider` (renamed [`FakeProvider`] here), `FailDeploy`, `FailWatch`.
//! Used by CI and by this crate's own test harness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{Blockchain, Transaction, Variant};

use super::{FoundOperation, Provider, WatchOutcome};

/// Produces readable, unique-per-call fake hashes, replacing the original's
/// `random.randint` suffix with a counter so uniqueness is guaranteed across
/// a test run (the original relies on `random` alone, which is not a safe
/// assumption to carry into a Rust test suite asserting txhash uniqueness).
fn fake_hash(prefix: &str, counter: &AtomicU64) -> String {
    let n = counter.fetch_add(1, Ordering::Relaxed);
    format!("0x{prefix}5EF2D798D17e2ecB37{n:016x}")
}

/// Deterministic, in-process Provider for tests (`djtezos.fake.Provider`).
/// Every write operation sleeps for `sleep` before returning, so tests can
/// exercise interleaving without hitting a real node.
pub struct FakeProvider {
    sleep: Duration,
    counter: AtomicU64,
    head: AtomicU64,
}

impl FakeProvider {
    pub fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            counter: AtomicU64::new(0),
            head: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_wallet(&self, _blockchain: &Blockchain, _passphrase: &str) -> Result<(String, Vec<u8>), ProviderError> {
        Ok((
            fake_hash("w41137", &self.counter),
            b"\x5f\xf2\x7f\xf6\xfd\xad\x75\x3a\x0a\xe3\x59\xc3\x61\xd2\x92\x97".to_vec(),
        ))
    }

    async fn get_balance(&self, _blockchain: &Blockchain, _address: &str, _private_key: &[u8]) -> Result<u128, ProviderError> {
        Ok(1234)
    }

    async fn transfer(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.sleep).await;
        Ok(fake_hash("d3pl0y3d7xh4sH", &self.counter))
    }

    async fn send(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.sleep).await;
        Ok(fake_hash("d3pl0y3d7xh4sH", &self.counter))
    }

    async fn originate(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.sleep).await;
        Ok(fake_hash("d3pl0y3d7xh4sH", &self.counter))
    }

    async fn watch(&self, tx: &Transaction, _blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError> {
        tokio::time::sleep(self.sleep).await;
        let contract_address = if tx.variant() == Ok(Variant::Contract) && tx.contract_address.is_none() {
            Some(fake_hash("c0n7r4c7", &self.counter))
        } else {
            None
        };
        Ok(WatchOutcome {
            gas: Some(1337),
            contract_address,
        })
    }

    async fn head_level(&self, _blockchain: &Blockchain) -> Result<u64, ProviderError> {
        Ok(self.head.fetch_add(1, Ordering::Relaxed))
    }

    async fn find_operation(
        &self,
        _blockchain: &Blockchain,
        _txhash: &str,
        _from_level: u64,
        to_level: u64,
    ) -> Result<Option<FoundOperation>, ProviderError> {
        Ok(Some(FoundOperation {
            level: to_level,
            fee: 1337,
            originated_contract: Some(fake_hash("c0n7r4c7", &self.counter)),
        }))
    }
}

/// Always fails at the deploy phase (`djtezos.fake.FailDeploy`). Used to
/// exercise the abort path (§8 scenario 4).
pub struct FailDeployProvider {
    inner: FakeProvider,
}

impl FailDeployProvider {
    pub fn new(sleep: Duration) -> Self {
        Self {
            inner: FakeProvider::new(sleep),
        }
    }
}

#[async_trait]
impl Provider for FailDeployProvider {
    async fn create_wallet(&self, blockchain: &Blockchain, passphrase: &str) -> Result<(String, Vec<u8>), ProviderError> {
        self.inner.create_wallet(blockchain, passphrase).await
    }

    async fn get_balance(&self, blockchain: &Blockchain, address: &str, private_key: &[u8]) -> Result<u128, ProviderError> {
        self.inner.get_balance(blockchain, address, private_key).await
    }

    async fn transfer(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.inner.sleep).await;
        Err(ProviderError::permanent("Deploy failed as requested"))
    }

    async fn send(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.inner.sleep).await;
        Err(ProviderError::permanent("Deploy failed as requested"))
    }

    async fn originate(&self, _blockchain: &Blockchain, _tx: &Transaction) -> Result<String, ProviderError> {
        tokio::time::sleep(self.inner.sleep).await;
        Err(ProviderError::permanent("Deploy failed as requested"))
    }

    async fn watch(&self, tx: &Transaction, blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError> {
        self.inner.watch(tx, blockchain).await
    }

    async fn head_level(&self, blockchain: &Blockchain) -> Result<u64, ProviderError> {
        self.inner.head_level(blockchain).await
    }

    async fn find_operation(
        &self,
        blockchain: &Blockchain,
        txhash: &str,
        from_level: u64,
        to_level: u64,
    ) -> Result<Option<FoundOperation>, ProviderError> {
        self.inner.find_operation(blockchain, txhash, from_level, to_level).await
    }
}

/// Always fails at the watch phase (`djtezos.fake.FailWatch`).
pub struct FailWatchProvider {
    inner: FakeProvider,
}

impl FailWatchProvider {
    pub fn new(sleep: Duration) -> Self {
        Self {
            inner: FakeProvider::new(sleep),
        }
    }
}

#[async_trait]
impl Provider for FailWatchProvider {
    async fn create_wallet(&self, blockchain: &Blockchain, passphrase: &str) -> Result<(String, Vec<u8>), ProviderError> {
        self.inner.create_wallet(blockchain, passphrase).await
    }

    async fn get_balance(&self, blockchain: &Blockchain, address: &str, private_key: &[u8]) -> Result<u128, ProviderError> {
        self.inner.get_balance(blockchain, address, private_key).await
    }

    async fn transfer(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        self.inner.transfer(blockchain, tx).await
    }

    async fn send(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        self.inner.send(blockchain, tx).await
    }

    async fn originate(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        self.inner.originate(blockchain, tx).await
    }

    async fn watch(&self, _tx: &Transaction, _blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError> {
        tokio::time::sleep(self.inner.sleep).await;
        Err(ProviderError::permanent("Watch failed as requested"))
    }

    async fn head_level(&self, blockchain: &Blockchain) -> Result<u64, ProviderError> {
        self.inner.head_level(blockchain).await
    }

    async fn find_operation(
        &self,
        blockchain: &Blockchain,
        txhash: &str,
        from_level: u64,
        to_level: u64,
    ) -> Result<Option<FoundOperation>, ProviderError> {
        self.inner.find_operation(blockchain, txhash, from_level, to_level).await
    }
}
