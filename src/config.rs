//! Process-wide configuration (§6, §10).
//!
//! A single typed `Settings` struct populated from environment variables at
//! startup, rather than scattering `env::var` calls through the engine.

use std::env;
use std::time::Duration;

use crate::crypto::Secret;

/// Default maximum block depth the Chain Watcher and per-transaction watch
/// fallback will scan before giving up (§4.5, §4.6).
pub const DEFAULT_MAX_DEPTH: u64 = 500;

/// Default block-range chunk size per RPC call, to avoid node payload limits
/// (§4.6).
pub const DEFAULT_CHUNK: u64 = 20;

/// Default number of consecutive `deploying` failures before the Writer's
/// abort rule fires (§4.2).
pub const DEFAULT_WRITER_ABORT_THRESHOLD: u32 = 10;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Master secret used to derive the AES-CBC key/IV (§6).
    pub secret: Secret,
    /// Filesystem root for Tezos contract bytecode JSON lookups by name.
    pub tezos_contracts: Option<String>,
    /// Filesystem root for Ethereum ABI/bytecode JSON lookups by name.
    pub ethereum_contracts: Option<String>,
    /// Per-operation delay for the Fake Provider family.
    pub fake_sleep: Duration,
    /// Maximum block depth scanned by the watcher and the watch fallback.
    pub max_depth: u64,
    /// Block range chunk size per RPC call.
    pub chunk: u64,
    /// Consecutive `deploying` failures before the Writer aborts a row.
    pub writer_abort_threshold: u32,
    /// Postgres connection string for `PgStore`.
    pub database_url: Option<String>,
}

impl Settings {
    /// Loads configuration from the environment, falling back to the
    /// documented defaults (§6) for anything unset.
    pub fn from_env() -> Self {
        Self {
            secret: Secret::new(
                env::var("SECRET").unwrap_or_else(|_| "insecure-development-secret".to_string()),
            ),
            tezos_contracts: env::var("TEZOS_CONTRACTS").ok(),
            ethereum_contracts: env::var("ETHEREUM_CONTRACTS").ok(),
            fake_sleep: Duration::from_secs_f64(
                env::var("FAKE_SLEEP")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
            ),
            max_depth: env::var("DEFAULT_MAX_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_DEPTH),
            chunk: env::var("DEFAULT_CHUNK")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CHUNK),
            writer_abort_threshold: env::var("WRITER_ABORT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WRITER_ABORT_THRESHOLD),
            database_url: env::var("DATABASE_URL").ok(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret: Secret::new("insecure-development-secret"),
            tezos_contracts: None,
            ethereum_contracts: None,
            fake_sleep: Duration::from_millis(100),
            max_depth: DEFAULT_MAX_DEPTH,
            chunk: DEFAULT_CHUNK,
            writer_abort_threshold: DEFAULT_WRITER_ABORT_THRESHOLD,
            database_url: None,
        }
    }
}
