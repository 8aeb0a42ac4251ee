//! Scheduler (§4.3): one logical worker per sender Account, serial within a
//! sender, parallel across senders. Generalizes the teacher's
//! `NonceManager` — an `Arc<Mutex<HashMap<Key, State>>>` keyed job cache —
//! from "next nonce" to "is a worker running for this sender."

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::fsm::Fsm;
use crate::model::TransactionState;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    RunningRerunRequested,
}

/// Maintains at most one active worker per sender (§4.3 invariants).
#[derive(Clone)]
pub struct Scheduler {
    fsm: Arc<Fsm>,
    store: Arc<dyn Store>,
    run_states: Arc<Mutex<HashMap<Uuid, RunState>>>,
}

impl Scheduler {
    pub fn new(fsm: Arc<Fsm>, store: Arc<dyn Store>) -> Self {
        Self {
            fsm,
            store,
            run_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Notifies the scheduler that `sender_id` may have new work. Spawns a
    /// worker if none is running; otherwise coalesces into a rerun flag.
    pub async fn enqueue(&self, sender_id: Uuid) {
        let mut states = self.run_states.lock().await;
        match states.get(&sender_id) {
            None => {
                states.insert(sender_id, RunState::Running);
                drop(states);
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.run_worker(sender_id).await });
            }
            Some(RunState::Running) => {
                states.insert(sender_id, RunState::RunningRerunRequested);
            }
            Some(RunState::RunningRerunRequested) => {}
        }
    }

    async fn run_worker(&self, sender_id: Uuid) {
        loop {
            while let Ok(true) = self.step(sender_id).await {}

            let mut states = self.run_states.lock().await;
            match states.get(&sender_id) {
                Some(RunState::RunningRerunRequested) => {
                    states.insert(sender_id, RunState::Running);
                }
                _ => {
                    states.remove(&sender_id);
                    return;
                }
            }
        }
    }

    /// Advances the sender's oldest non-terminal transaction by exactly one
    /// FSM phase. Returns `Ok(true)` if work was done, `Ok(false)` if the
    /// sender has no outstanding work.
    async fn step(&self, sender_id: Uuid) -> Result<bool, OrchestratorError> {
        if self.store.get_account(sender_id).await?.is_none() {
            tracing::warn!(%sender_id, "scheduler: sender account not found");
            return Ok(false);
        }
        let Some(tx) = self.store.next_pending_transaction(sender_id).await? else {
            return Ok(false);
        };

        let result = match tx.state {
            TransactionState::Deploy | TransactionState::Deploying => self.fsm.deploy_state(tx.id).await,
            TransactionState::Watch | TransactionState::Watching => self.fsm.watch_state(tx.id).await,
            TransactionState::Postdeploy | TransactionState::Postdeploying => self.fsm.postdeploy_state(tx.id).await,
            // `held`, terminal, and Writer-only states are not scheduler work.
            _ => return Ok(false),
        };

        if let Err(e) = &result {
            tracing::warn!(tx_id = %tx.id, %sender_id, error = %e, "scheduler: fsm step failed");
        }
        result.map(|()| true)
    }
}
