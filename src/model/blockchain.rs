//! Blockchain: a configured remote chain endpoint with a Provider class (§3).

use uuid::Uuid;

/// A configured remote chain endpoint.
///
/// `provider_class` is a symbolic identifier (e.g. `"tezos"`, `"fake"`)
/// resolved at runtime to a concrete [`crate::provider::Provider`] via the
/// registry (§9 Design Notes).
#[derive(Debug, Clone, PartialEq)]
pub struct Blockchain {
    pub id: Uuid,
    pub name: String,
    pub endpoint: String,
    pub provider_class: String,
    pub explorer_template: Option<String>,
    pub confirmation_blocks: u32,
    pub is_active: bool,
    /// Highest block level previously scanned by the Chain Watcher (the
    /// watermark). `None` means the watcher has never run for this chain.
    pub max_level: Option<u64>,
    pub min_level: Option<u64>,
}

impl Blockchain {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, provider_class: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            endpoint: endpoint.into(),
            provider_class: provider_class.into(),
            explorer_template: None,
            confirmation_blocks: 0,
            is_active: true,
            max_level: None,
            min_level: None,
        }
    }

    pub fn explorer_link(&self, txhash: &str) -> Option<String> {
        self.explorer_template
            .as_ref()
            .map(|tpl| tpl.replace("{}", txhash))
    }
}
