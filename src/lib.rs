//! Chain orchestration engine: drives submitted Transactions across
//! heterogeneous blockchains through a deploy/watch/postdeploy FSM, a
//! per-sender Scheduler, a batch Writer, and a reorg-aware Chain Watcher
//! (see SPEC_FULL.md for the full component design).

pub mod config;
pub mod crypto;
pub mod error;
pub mod fsm;
pub mod model;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod watcher;
pub mod writer;

pub use config::Settings;
pub use error::{OrchestratorError, PermanentError, ProviderError, TemporaryError, ValidationError};
pub use fsm::Fsm;
pub use scheduler::Scheduler;
pub use store::Store;
pub use watcher::ChainWatcher;
pub use writer::Writer;
