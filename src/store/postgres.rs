//! Postgres-backed Store (§6) built on `sqlx`. Uses runtime-checked queries
//! (`sqlx::query`/`query_as`, not the `query!` compile-time macros) since
//! this repo has no reachable database at build time; row mapping is done
//! explicitly via `FromRow`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Account, Blockchain, HistoryEntry, Transaction};

use super::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, OrchestratorError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), OrchestratorError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Store(e.to_string()))
    }
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    blockchain_id: Uuid,
    address: Option<String>,
    encrypted_private_key: Vec<u8>,
    owner_id: Option<Uuid>,
    balance: Option<String>,
    name: String,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            blockchain_id: row.blockchain_id,
            address: row.address,
            encrypted_private_key: row.encrypted_private_key,
            owner_id: row.owner_id,
            balance: row.balance.and_then(|b| b.parse().ok()),
            name: row.name,
        }
    }
}

#[derive(FromRow)]
struct BlockchainRow {
    id: Uuid,
    name: String,
    endpoint: String,
    provider_class: String,
    explorer_template: Option<String>,
    confirmation_blocks: i32,
    is_active: bool,
    max_level: Option<i64>,
    min_level: Option<i64>,
}

impl From<BlockchainRow> for Blockchain {
    fn from(row: BlockchainRow) -> Self {
        Blockchain {
            id: row.id,
            name: row.name,
            endpoint: row.endpoint,
            provider_class: row.provider_class,
            explorer_template: row.explorer_template,
            confirmation_blocks: row.confirmation_blocks.max(0) as u32,
            is_active: row.is_active,
            max_level: row.max_level.map(|l| l.max(0) as u64),
            min_level: row.min_level.map(|l| l.max(0) as u64),
        }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    sender_id: Option<Uuid>,
    receiver_id: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    txhash: Option<String>,
    gasprice: Option<i64>,
    gas: Option<i64>,
    contract_address: Option<String>,
    contract_name: Option<String>,
    contract_source: Option<String>,
    contract_code: Option<Json<Value>>,
    contract_ref: Option<Uuid>,
    function: Option<String>,
    args: Json<Value>,
    args_resolved: Option<Json<Value>>,
    amount: Option<String>,
    level: Option<i64>,
    last_fail: Option<chrono::DateTime<chrono::Utc>>,
    state: String,
    error: String,
    history: Json<Vec<HistoryEntry>>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = OrchestratorError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            txhash: row.txhash,
            gasprice: row.gasprice,
            gas: row.gas,
            contract_address: row.contract_address,
            contract_name: row.contract_name,
            contract_source: row.contract_source,
            contract_code: row.contract_code.map(|Json(v)| v),
            contract_ref: row.contract_ref,
            function: row.function,
            args: row.args.0,
            args_resolved: row.args_resolved.map(|Json(v)| v),
            amount: row.amount.and_then(|a| a.parse().ok()),
            level: row.level.map(|l| l.max(0) as u64),
            last_fail: row.last_fail,
            state: row.state.parse().map_err(|e: crate::error::ValidationError| OrchestratorError::Validation(e))?,
            error: row.error,
            history: row.history.0,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, OrchestratorError> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    async fn save_account(&self, account: &Account) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO accounts (id, blockchain_id, address, encrypted_private_key, owner_id, balance, name)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                address = EXCLUDED.address,
                encrypted_private_key = EXCLUDED.encrypted_private_key,
                balance = EXCLUDED.balance",
        )
        .bind(account.id)
        .bind(account.blockchain_id)
        .bind(&account.address)
        .bind(&account.encrypted_private_key)
        .bind(account.owner_id)
        .bind(account.balance.map(|b| b.to_string()))
        .bind(&account.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_blockchain(&self, id: Uuid) -> Result<Option<Blockchain>, OrchestratorError> {
        let row: Option<BlockchainRow> = sqlx::query_as("SELECT * FROM blockchains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Blockchain::from))
    }

    async fn save_blockchain(&self, blockchain: &Blockchain) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO blockchains (id, name, endpoint, provider_class, explorer_template, confirmation_blocks, is_active, max_level, min_level)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                max_level = EXCLUDED.max_level,
                min_level = EXCLUDED.min_level,
                is_active = EXCLUDED.is_active",
        )
        .bind(blockchain.id)
        .bind(&blockchain.name)
        .bind(&blockchain.endpoint)
        .bind(&blockchain.provider_class)
        .bind(&blockchain.explorer_template)
        .bind(blockchain.confirmation_blocks as i32)
        .bind(blockchain.is_active)
        .bind(blockchain.max_level.map(|l| l as i64))
        .bind(blockchain.min_level.map(|l| l as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_blockchains(&self) -> Result<Vec<Blockchain>, OrchestratorError> {
        let rows: Vec<BlockchainRow> = sqlx::query_as("SELECT * FROM blockchains WHERE is_active")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Blockchain::from).collect())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, OrchestratorError> {
        let row: Option<TransactionRow> = sqlx::query_as("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn create_transaction(&self, mut tx: Transaction) -> Result<Transaction, OrchestratorError> {
        if let Some(origination_id) = tx.contract_ref {
            if let Some(origination) = self.get_transaction(origination_id).await? {
                tx.inherit_from_contract_ref(&origination);
            }
        }
        tx.validate()?;
        self.save_transaction(&tx).await?;
        Ok(tx)
    }

    async fn save_transaction(&self, tx: &Transaction) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO transactions (
                id, sender_id, receiver_id, created_at, updated_at, txhash, gasprice, gas,
                contract_address, contract_name, contract_source, contract_code, contract_ref,
                function, args, args_resolved, amount, level, last_fail, state, error, history
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
             )
             ON CONFLICT (id) DO UPDATE SET
                updated_at = EXCLUDED.updated_at,
                txhash = EXCLUDED.txhash,
                gasprice = EXCLUDED.gasprice,
                gas = EXCLUDED.gas,
                contract_address = EXCLUDED.contract_address,
                contract_ref = EXCLUDED.contract_ref,
                args_resolved = EXCLUDED.args_resolved,
                level = EXCLUDED.level,
                last_fail = EXCLUDED.last_fail,
                state = EXCLUDED.state,
                error = EXCLUDED.error,
                history = EXCLUDED.history",
        )
        .bind(tx.id)
        .bind(tx.sender_id)
        .bind(tx.receiver_id)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(&tx.txhash)
        .bind(tx.gasprice)
        .bind(tx.gas)
        .bind(&tx.contract_address)
        .bind(&tx.contract_name)
        .bind(&tx.contract_source)
        .bind(tx.contract_code.clone().map(Json))
        .bind(tx.contract_ref)
        .bind(&tx.function)
        .bind(Json(&tx.args))
        .bind(tx.args_resolved.clone().map(Json))
        .bind(tx.amount.map(|a| a.to_string()))
        .bind(tx.level.map(|l| l as i64))
        .bind(tx.last_fail)
        .bind(tx.state.to_string())
        .bind(&tx.error)
        .bind(Json(&tx.history))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn next_pending_transaction(&self, sender_id: Uuid) -> Result<Option<Transaction>, OrchestratorError> {
        // `held` is excluded, not just terminal states: a held row is parked
        // pending manual/external release and must not block siblings from
        // advancing (matches `to_spool`'s exclusion of `held`).
        let row: Option<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions
             WHERE sender_id = $1 AND state NOT IN ('held', 'done', 'deploy-aborted', 'watch-aborted', 'postdeploy-aborted', 'aborted')
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn transactions_for_sender(&self, sender_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions WHERE sender_id = $1 ORDER BY created_at ASC",
        )
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn transactions_referencing(&self, origination_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let rows: Vec<TransactionRow> = sqlx::query_as("SELECT * FROM transactions WHERE contract_ref = $1")
            .bind(origination_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn transactions_with_txhash(&self, blockchain_id: Uuid) -> Result<Vec<Transaction>, OrchestratorError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT t.* FROM transactions t
             JOIN accounts a ON a.id = t.sender_id
             WHERE a.blockchain_id = $1 AND t.txhash IS NOT NULL",
        )
        .bind(blockchain_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn pending_transactions(&self) -> Result<Vec<Transaction>, OrchestratorError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions
             WHERE state NOT IN ('held', 'done', 'deploy-aborted', 'watch-aborted', 'postdeploy-aborted', 'aborted')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn reset_for_reorg(&self, blockchain_id: Uuid, from_level: u64) -> Result<(), OrchestratorError> {
        // Append a `held` history entry rather than just rewriting `state`,
        // so this matches `Transaction::state_set` (every state change
        // appends exactly one history entry, §3).
        sqlx::query(
            "UPDATE transactions t SET
                level = NULL, txhash = NULL, contract_address = NULL, state = 'held', updated_at = now(),
                history = t.history || jsonb_build_array(jsonb_build_object('state', 'held', 'at', extract(epoch from now())::bigint))
             FROM accounts a
             WHERE a.id = t.sender_id AND a.blockchain_id = $1 AND t.level >= $2",
        )
        .bind(blockchain_id)
        .bind(from_level as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>, OrchestratorError> {
        let rows: Vec<AccountRow> = sqlx::query_as("SELECT * FROM accounts").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }
}
