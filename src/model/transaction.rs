//! Transaction: a persistent record of an intent to originate, call, or
//! transfer, plus the FSM that drives it to a terminal state (§3, §4.2).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// One entry in a Transaction's append-only `history` log: the state it
/// entered, and the unix-epoch second it entered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: TransactionState,
    pub at: i64,
}

/// The FSM position of a Transaction (§4.2).
///
/// This unifies the two variants the original source offered: the
/// phase-collapsed model with a generic `retrying`/`aborted` (used only by
/// the Writer's batch admission pass, §4.4) and the per-phase `*-aborted`
/// model (used by the Scheduler-driven pipeline, §4.3). Both live here as
/// distinct states rather than forcing one flow to borrow the other's
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    Held,
    Deploy,
    Deploying,
    DeployAborted,
    Watch,
    Watching,
    WatchAborted,
    Postdeploy,
    Postdeploying,
    PostdeployAborted,
    Done,
    /// Writer-flow synonym of `Deploy` (§4.4): a row that failed at least
    /// once and is waiting to be retried in `last_fail` order.
    Retrying,
    /// Writer-flow terminal abort after the threshold in §4.2 is reached.
    Aborted,
}

impl TransactionState {
    /// Terminal states: nothing but the Chain Watcher's reorg handling may
    /// move a row out of these (§3 Lifecycle, §8 "Terminal stickiness").
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Done
                | TransactionState::DeployAborted
                | TransactionState::WatchAborted
                | TransactionState::PostdeployAborted
                | TransactionState::Aborted
        )
    }

    pub fn is_aborted(self) -> bool {
        matches!(
            self,
            TransactionState::DeployAborted
                | TransactionState::WatchAborted
                | TransactionState::PostdeployAborted
                | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Held => "held",
            TransactionState::Deploy => "deploy",
            TransactionState::Deploying => "deploying",
            TransactionState::DeployAborted => "deploy-aborted",
            TransactionState::Watch => "watch",
            TransactionState::Watching => "watching",
            TransactionState::WatchAborted => "watch-aborted",
            TransactionState::Postdeploy => "postdeploy",
            TransactionState::Postdeploying => "postdeploying",
            TransactionState::PostdeployAborted => "postdeploy-aborted",
            TransactionState::Done => "done",
            TransactionState::Retrying => "retrying",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "held" => TransactionState::Held,
            "deploy" => TransactionState::Deploy,
            "deploying" => TransactionState::Deploying,
            "deploy-aborted" => TransactionState::DeployAborted,
            "watch" => TransactionState::Watch,
            "watching" => TransactionState::Watching,
            "watch-aborted" => TransactionState::WatchAborted,
            "postdeploy" => TransactionState::Postdeploy,
            "postdeploying" => TransactionState::Postdeploying,
            "postdeploy-aborted" => TransactionState::PostdeployAborted,
            "done" => TransactionState::Done,
            "retrying" => TransactionState::Retrying,
            "aborted" => TransactionState::Aborted,
            other => return Err(ValidationError::new(format!("invalid state {other:?}"))),
        })
    }
}

/// The three logical shapes a Transaction row can take (§3). Derived from
/// which fields are populated, never stored directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Transfer,
    Call,
    Contract,
}

/// A persistent record of an intent to originate, call, or transfer, plus
/// the results observed (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub sender_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub txhash: Option<String>,
    pub gasprice: Option<i64>,
    pub gas: Option<i64>,
    pub contract_address: Option<String>,
    pub contract_name: Option<String>,
    pub contract_source: Option<String>,
    pub contract_code: Option<Value>,
    pub contract_ref: Option<Uuid>,
    pub function: Option<String>,
    pub args: Value,
    pub args_resolved: Option<Value>,
    pub amount: Option<u128>,
    pub level: Option<u64>,
    pub last_fail: Option<DateTime<Utc>>,
    pub state: TransactionState,
    pub error: String,
    pub history: Vec<HistoryEntry>,
}

impl Transaction {
    /// Builds a new, unsaved Transfer intent.
    pub fn new_transfer(sender_id: Uuid, receiver_id: Uuid, amount: u128, initial_state: TransactionState) -> Self {
        Self::new_raw(Some(sender_id), Some(receiver_id), initial_state, |tx| {
            tx.amount = Some(amount);
        })
    }

    /// Builds a new, unsaved Contract origination intent.
    pub fn new_contract(
        sender_id: Uuid,
        contract_name: impl Into<String>,
        contract_code: Value,
        args: Value,
        initial_state: TransactionState,
    ) -> Self {
        Self::new_raw(Some(sender_id), None, initial_state, |tx| {
            tx.contract_name = Some(contract_name.into());
            tx.contract_code = Some(contract_code);
            tx.args = args;
        })
    }

    /// Builds a new, unsaved Call intent against a deployed contract
    /// referenced directly by address.
    pub fn new_call(
        sender_id: Uuid,
        contract_address: impl Into<String>,
        function: impl Into<String>,
        args: Value,
        initial_state: TransactionState,
    ) -> Self {
        Self::new_raw(Some(sender_id), None, initial_state, |tx| {
            tx.contract_address = Some(contract_address.into());
            tx.function = Some(function.into());
            tx.args = args;
        })
    }

    /// Builds a new, unsaved Call intent against a contract originated by
    /// another Transaction in this Store, inheriting its name/address at
    /// save time (§3 invariant).
    pub fn new_call_on(
        sender_id: Uuid,
        contract_ref: Uuid,
        function: impl Into<String>,
        args: Value,
        initial_state: TransactionState,
    ) -> Self {
        Self::new_raw(Some(sender_id), None, initial_state, |tx| {
            tx.contract_ref = Some(contract_ref);
            tx.function = Some(function.into());
            tx.args = args;
        })
    }

    fn new_raw(
        sender_id: Option<Uuid>,
        receiver_id: Option<Uuid>,
        initial_state: TransactionState,
        fill: impl FnOnce(&mut Transaction),
    ) -> Self {
        let now = Utc::now();
        let mut tx = Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            created_at: now,
            updated_at: now,
            txhash: None,
            gasprice: None,
            gas: None,
            contract_address: None,
            contract_name: None,
            contract_source: None,
            contract_code: None,
            contract_ref: None,
            function: None,
            args: Value::Null,
            args_resolved: None,
            amount: None,
            level: None,
            last_fail: None,
            state: initial_state,
            error: String::new(),
            history: vec![HistoryEntry {
                state: initial_state,
                at: now.timestamp(),
            }],
        };
        fill(&mut tx);
        tx
    }

    /// Derives the logical variant from row shape (§3, §9 Design Notes).
    /// A row that matches none or more than one of the three shapes fails
    /// validation: it is neither Transfer, Call, nor Contract.
    pub fn variant(&self) -> Result<Variant, ValidationError> {
        let is_transfer = self.amount.is_some() && self.function.is_none();
        let is_call = self.function.is_some();
        let is_contract = self.amount.is_none() && self.function.is_none();

        match (is_transfer, is_call, is_contract) {
            (true, false, false) => Ok(Variant::Transfer),
            (false, true, false) => Ok(Variant::Call),
            (false, false, true) => Ok(Variant::Contract),
            _ => Err(ValidationError::new(
                "transaction is not exactly one of Transfer, Call, Contract",
            )),
        }
    }

    /// Validates variant-specific required fields and the `state` field,
    /// before any Provider call. Mirrors `Transaction.save()`'s guard in the
    /// original source.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.variant()? {
            Variant::Transfer => {
                if self.receiver_id.is_none() {
                    return Err(ValidationError::new("transfer requires a receiver"));
                }
            }
            Variant::Call => {
                if self.contract_address.is_none() && self.contract_ref.is_none() {
                    return Err(ValidationError::new(
                        "call requires contract_address or contract_ref",
                    ));
                }
            }
            Variant::Contract => {
                if self.contract_code.is_none() {
                    return Err(ValidationError::new("contract origination requires contract_code"));
                }
            }
        }
        Ok(())
    }

    /// Inherits `contract_name`/`contract_address` from the originating
    /// Transaction when `contract_ref` is set and they are not already
    /// populated (§3 invariant).
    pub fn inherit_from_contract_ref(&mut self, origination: &Transaction) {
        if self.contract_ref != Some(origination.id) {
            return;
        }
        if self.contract_name.is_none() {
            self.contract_name = origination.contract_name.clone();
        }
        if self.contract_address.is_none() {
            self.contract_address = origination.contract_address.clone();
        }
    }

    /// Appends exactly one `(state, now)` history entry and updates `state`
    /// and `updated_at`. The sole mutator of `state`/`history`, used by every
    /// FSM transition (§4.2 invariant 1).
    pub fn state_set(&mut self, state: TransactionState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.history.push(HistoryEntry {
            state,
            at: now.timestamp(),
        });
    }

    /// Counts consecutive `Deploying` history entries, scanning backward
    /// from the end, stopping at the most recent `Aborted` marker (§4.2
    /// Abort rule, used by the Writer).
    pub fn consecutive_deploying_since_last_abort(&self) -> u32 {
        let mut count = 0;
        for entry in self.history.iter().rev() {
            match entry.state {
                TransactionState::Deploying => count += 1,
                TransactionState::Aborted => break,
                _ => {}
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held_tx() -> Transaction {
        Transaction::new_transfer(Uuid::new_v4(), Uuid::new_v4(), 10, TransactionState::Held)
    }

    #[test]
    fn variant_derivation_matches_shape() {
        let transfer = held_tx();
        assert_eq!(transfer.variant().unwrap(), Variant::Transfer);

        let call = Transaction::new_call(Uuid::new_v4(), "KT1abc", "replace", Value::Null, TransactionState::Deploy);
        assert_eq!(call.variant().unwrap(), Variant::Call);

        let contract = Transaction::new_contract(
            Uuid::new_v4(),
            "test",
            serde_json::json!({"code": []}),
            Value::Null,
            TransactionState::Deploy,
        );
        assert_eq!(contract.variant().unwrap(), Variant::Contract);
    }

    #[test]
    fn neither_amount_nor_function_but_missing_code_is_invalid() {
        let mut tx = held_tx();
        tx.amount = None;
        tx.function = None;
        tx.contract_code = None;
        assert!(tx.validate().is_err());
    }

    #[test]
    fn state_set_appends_exactly_one_history_entry() {
        let mut tx = held_tx();
        let before = tx.history.len();
        tx.state_set(TransactionState::Deploy);
        assert_eq!(tx.history.len(), before + 1);
        assert_eq!(tx.state, TransactionState::Deploy);
        assert_eq!(tx.history.last().unwrap().state, TransactionState::Deploy);
    }

    #[test]
    fn history_timestamps_are_non_decreasing() {
        let mut tx = held_tx();
        tx.state_set(TransactionState::Deploy);
        tx.state_set(TransactionState::Deploying);
        let timestamps: Vec<i64> = tx.history.iter().map(|h| h.at).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn abort_rule_counts_deploying_since_last_abort() {
        let mut tx = held_tx();
        for _ in 0..3 {
            tx.state_set(TransactionState::Deploying);
            tx.state_set(TransactionState::Retrying);
        }
        assert_eq!(tx.consecutive_deploying_since_last_abort(), 3);

        tx.state_set(TransactionState::Aborted);
        tx.state_set(TransactionState::Deploying);
        assert_eq!(tx.consecutive_deploying_since_last_abort(), 1);
    }

    #[test]
    fn inherits_contract_name_and_address_from_ref() {
        let origination = Transaction::new_contract(
            Uuid::new_v4(),
            "escrow",
            serde_json::json!({"code": []}),
            Value::Null,
            TransactionState::Done,
        );
        let mut call = Transaction::new_call_on(Uuid::new_v4(), origination.id, "release", Value::Null, TransactionState::Deploy);
        call.inherit_from_contract_ref(&origination);
        assert_eq!(call.contract_name.as_deref(), Some("escrow"));
    }

    #[test]
    fn state_round_trips_through_display_and_from_str() {
        for state in [
            TransactionState::Held,
            TransactionState::Deploy,
            TransactionState::Deploying,
            TransactionState::DeployAborted,
            TransactionState::Watch,
            TransactionState::Watching,
            TransactionState::WatchAborted,
            TransactionState::Postdeploy,
            TransactionState::Postdeploying,
            TransactionState::PostdeployAborted,
            TransactionState::Done,
            TransactionState::Retrying,
            TransactionState::Aborted,
        ] {
            let round_tripped: TransactionState = state.to_string().parse().unwrap();
            assert_eq!(round_tripped, state);
        }
    }
}
