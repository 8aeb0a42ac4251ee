//! End-to-end scenarios (§8), driven against `InMemoryStore` with the Fake
//! Provider family.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use chain_orchestrator::fsm::Fsm;
use chain_orchestrator::model::{Account, Blockchain, Transaction, TransactionState};
use chain_orchestrator::provider::ProviderRegistry;
use chain_orchestrator::scheduler::Scheduler;
use chain_orchestrator::store::{InMemoryStore, Store};

fn test_registry() -> ProviderRegistry {
    ProviderRegistry::with_test_providers(Duration::from_millis(1))
}

async fn setup_account(store: &Arc<dyn Store>, provider_class: &str) -> Account {
    let blockchain = Blockchain::new("testnet", "http://localhost", provider_class);
    store.save_blockchain(&blockchain).await.unwrap();
    let account = Account::new(blockchain.id, "sender");
    store.save_account(&account).await.unwrap();
    account
}

/// Steps a single Transaction through the FSM until it reaches a terminal
/// state, bounded so a stuck test fails fast instead of hanging.
async fn drive_to_terminal(fsm: &Fsm, tx_id: Uuid, store: &Arc<dyn Store>) -> Transaction {
    for _ in 0..50 {
        let tx = store.get_transaction(tx_id).await.unwrap().unwrap();
        if tx.state.is_terminal() {
            return tx;
        }
        match tx.state {
            TransactionState::Deploy | TransactionState::Deploying => fsm.deploy_state(tx_id).await.unwrap(),
            TransactionState::Watch | TransactionState::Watching => fsm.watch_state(tx_id).await.unwrap(),
            TransactionState::Postdeploy | TransactionState::Postdeploying => fsm.postdeploy_state(tx_id).await.unwrap(),
            other => panic!("transaction stuck in non-terminal, non-FSM state {other}"),
        }
    }
    panic!("transaction {tx_id} did not reach a terminal state within the step budget");
}

#[tokio::test]
async fn happy_path_origination() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let account = setup_account(&store, "fake").await;
    let fsm = Fsm::new(store.clone(), test_registry());

    let t1 = Transaction::new_contract(account.id, "test", json!({"int": 1}), json!({"int": 1}), TransactionState::Deploy);
    let t1 = store.create_transaction(t1).await.unwrap();

    let done = drive_to_terminal(&fsm, t1.id, &store).await;

    assert_eq!(done.state, TransactionState::Done);
    assert!(done.contract_address.is_some());
    assert!(done.error.is_empty());
    let states: Vec<_> = done.history.iter().map(|h| h.state).collect();
    assert!(states.contains(&TransactionState::Deploying));
    assert!(states.contains(&TransactionState::Watching));
}

#[tokio::test]
async fn call_after_origination_inherits_contract_address() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let account = setup_account(&store, "fake").await;
    let fsm = Fsm::new(store.clone(), test_registry());

    let t1 = Transaction::new_contract(account.id, "test", json!({"int": 1}), json!({"int": 1}), TransactionState::Deploy);
    let t1 = store.create_transaction(t1).await.unwrap();
    let t1_done = drive_to_terminal(&fsm, t1.id, &store).await;

    let t2 = Transaction::new_call_on(account.id, t1.id, "replace", json!([3]), TransactionState::Deploy);
    let t2 = store.create_transaction(t2).await.unwrap();
    assert_eq!(t2.contract_address, t1_done.contract_address);

    let t2_done = drive_to_terminal(&fsm, t2.id, &store).await;
    assert_eq!(t2_done.state, TransactionState::Done);
    assert_eq!(t2_done.contract_address, t1_done.contract_address);
}

#[tokio::test]
async fn permanent_failure_aborts_without_watch_entry() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let account = setup_account(&store, "fail-deploy").await;
    let fsm = Fsm::new(store.clone(), test_registry());

    let t = Transaction::new_transfer(account.id, Uuid::new_v4(), 10, TransactionState::Deploy);
    let t = store.create_transaction(t).await.unwrap();

    let aborted = drive_to_terminal(&fsm, t.id, &store).await;

    assert_eq!(aborted.state, TransactionState::DeployAborted);
    assert!(!aborted.error.is_empty());
    assert!(!aborted.history.iter().any(|h| h.state == TransactionState::Watch));
}

#[tokio::test]
async fn per_sender_serialization_and_cross_sender_parallelism() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let blockchain = Blockchain::new("testnet", "http://localhost", "fake");
    store.save_blockchain(&blockchain).await.unwrap();
    let a1 = Account::new(blockchain.id, "a1");
    let a2 = Account::new(blockchain.id, "a2");
    store.save_account(&a1).await.unwrap();
    store.save_account(&a2).await.unwrap();

    let fsm = Arc::new(Fsm::new(store.clone(), test_registry()));
    let scheduler = Scheduler::new(fsm, store.clone());

    let t1 = store
        .create_transaction(Transaction::new_transfer(a1.id, Uuid::new_v4(), 1, TransactionState::Deploy))
        .await
        .unwrap();
    let t2 = store
        .create_transaction(Transaction::new_transfer(a1.id, Uuid::new_v4(), 2, TransactionState::Deploy))
        .await
        .unwrap();
    let t3 = store
        .create_transaction(Transaction::new_transfer(a2.id, Uuid::new_v4(), 3, TransactionState::Deploy))
        .await
        .unwrap();

    scheduler.enqueue(a1.id).await;
    scheduler.enqueue(a2.id).await;

    let (t1_done, t2_done, t3_done) = wait_for_all_terminal(&store, &[t1.id, t2.id, t3.id]).await;

    assert_eq!(t1_done.state, TransactionState::Done);
    assert_eq!(t2_done.state, TransactionState::Done);
    assert_eq!(t3_done.state, TransactionState::Done);

    let t1_done_at = history_at(&t1_done, TransactionState::Done);
    let t2_deploying_at = history_at(&t2_done, TransactionState::Deploying);
    assert!(t2_deploying_at >= t1_done_at, "sender a1's second tx must not start deploying until the first finishes");

    // History timestamps are unix-epoch seconds (§3), too coarse to prove
    // strict overlap in a fast test run; this only checks a2's tx was never
    // forced to wait behind a1's queue finishing first.
    let t3_deploying_at = history_at(&t3_done, TransactionState::Deploying);
    assert!(t3_deploying_at <= t1_done_at, "sender a2's tx is free to run while a1's queue is still draining");
}

#[tokio::test]
async fn blocked_queue_does_not_stall_other_senders() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let blockchain = Blockchain::new("testnet", "http://localhost", "fail-deploy");
    store.save_blockchain(&blockchain).await.unwrap();
    let a1 = Account::new(blockchain.id, "a1");
    store.save_account(&a1).await.unwrap();

    let other_chain = Blockchain::new("testnet-2", "http://localhost", "fake");
    store.save_blockchain(&other_chain).await.unwrap();
    let a2 = Account::new(other_chain.id, "a2");
    store.save_account(&a2).await.unwrap();

    let fsm = Arc::new(Fsm::new(store.clone(), test_registry()));
    let scheduler = Scheduler::new(fsm, store.clone());

    let t1 = store
        .create_transaction(Transaction::new_transfer(a1.id, Uuid::new_v4(), 1, TransactionState::Deploy))
        .await
        .unwrap();
    let t2 = store
        .create_transaction(Transaction::new_transfer(a1.id, Uuid::new_v4(), 2, TransactionState::Deploy))
        .await
        .unwrap();
    let t3 = store
        .create_transaction(Transaction::new_transfer(a2.id, Uuid::new_v4(), 3, TransactionState::Deploy))
        .await
        .unwrap();

    scheduler.enqueue(a1.id).await;
    scheduler.enqueue(a2.id).await;

    let (t1_done, t2_done, t3_done) = wait_for_all_terminal(&store, &[t1.id, t2.id, t3.id]).await;

    // Both of sender a1's transactions abort against the failing provider,
    // but sender a2's transaction is on an independent worker and is not
    // held up by a1's failures (§4.3 cross-sender parallelism).
    assert_eq!(t1_done.state, TransactionState::DeployAborted);
    assert!(!t1_done.error.is_empty());
    assert_eq!(t2_done.state, TransactionState::DeployAborted);
    assert_eq!(t3_done.state, TransactionState::Done);
}

#[tokio::test]
async fn reorg_resets_affected_rows() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let mut blockchain = Blockchain::new("testnet", "http://localhost", "fake");
    blockchain.max_level = Some(100);
    store.save_blockchain(&blockchain).await.unwrap();
    let account = Account::new(blockchain.id, "a1");
    store.save_account(&account).await.unwrap();

    let mut t = Transaction::new_transfer(account.id, Uuid::new_v4(), 1, TransactionState::Deploy);
    t.level = Some(105);
    t.txhash = Some("H".to_string());
    t.state_set(TransactionState::Done);
    store.save_transaction(&t).await.unwrap();

    store.reset_for_reorg(blockchain.id, blockchain.max_level.unwrap()).await.unwrap();

    let reloaded = store.get_transaction(t.id).await.unwrap().unwrap();
    assert_eq!(reloaded.level, None);
    assert_eq!(reloaded.txhash, None);
    assert_eq!(reloaded.contract_address, None);
    assert_eq!(reloaded.state, TransactionState::Held);
}

fn history_at(tx: &Transaction, state: TransactionState) -> i64 {
    tx.history
        .iter()
        .find(|h| h.state == state)
        .unwrap_or_else(|| panic!("transaction {} never entered {state}", tx.id))
        .at
}

async fn wait_for_all_terminal(store: &Arc<dyn Store>, ids: &[Uuid]) -> (Transaction, Transaction, Transaction) {
    for _ in 0..200 {
        let txs: Vec<Transaction> = futures_join_all(store, ids).await;
        if txs.iter().all(|tx| tx.state.is_terminal()) {
            let mut it = txs.into_iter();
            return (it.next().unwrap(), it.next().unwrap(), it.next().unwrap());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transactions did not all reach a terminal state in time");
}

async fn futures_join_all(store: &Arc<dyn Store>, ids: &[Uuid]) -> Vec<Transaction> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        out.push(store.get_transaction(*id).await.unwrap().unwrap());
    }
    out
}
