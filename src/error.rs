//! Error taxonomy for the orchestration engine (§7).
//!
//! Three categories meet at the Provider boundary: [`TemporaryError`] (retry),
//! [`PermanentError`] (abort), and [`ValidationError`] (reject before any
//! Provider call). Everything downstream is folded into [`OrchestratorError`]
//! so `?` works across Store, Scheduler, Writer and Watcher code.

use thiserror::Error;

/// A transient condition: network hiccup, counter mismatch, not enough
/// confirmations yet, operation not found within the search window.
/// Policy: retry, and count the attempt toward the abort threshold.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TemporaryError(pub String);

impl TemporaryError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A stable, protocol-level rejection: malformed args/storage, script
/// failure, reveal impossible. Policy: terminal abort.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PermanentError(pub String);

impl PermanentError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// An invariant violation caught before any Provider call: bad state name,
/// a Transaction that is none of Transfer/Call/Contract, etc. The row is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors a Provider call can resolve to. Anything a Provider implementation
/// does not explicitly classify should be surfaced as `Temporary` — the FSM
/// treats unknown failures as retryable by default, with the abort threshold
/// providing the eventual ceiling (§7).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Temporary(#[from] TemporaryError),
    #[error(transparent)]
    Permanent(#[from] PermanentError),
}

impl ProviderError {
    pub fn temporary(msg: impl Into<String>) -> Self {
        Self::Temporary(TemporaryError::new(msg))
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(PermanentError::new(msg))
    }

    pub fn message(&self) -> String {
        match self {
            ProviderError::Temporary(e) => e.0.clone(),
            ProviderError::Permanent(e) => e.0.clone(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }
}

/// Umbrella error for everything above the Provider boundary: Store,
/// Scheduler, Writer, Watcher.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("store error: {0}")]
    Store(String),
    #[error("account {0} not found")]
    AccountNotFound(uuid::Uuid),
    #[error("blockchain {0} not found")]
    BlockchainNotFound(uuid::Uuid),
    #[error("transaction {0} not found")]
    TransactionNotFound(uuid::Uuid),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(e: sqlx::Error) -> Self {
        OrchestratorError::Store(e.to_string())
    }
}
