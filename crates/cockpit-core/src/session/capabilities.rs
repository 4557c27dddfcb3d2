use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AI capability status reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCapabilities {
    pub ai_enabled: bool,
    /// Enabled flag per provider name.
    #[serde(default)]
    pub providers: BTreeMap<String, bool>,
}

impl AiCapabilities {
    pub fn provider_enabled(&self, provider: &str) -> bool {
        self.ai_enabled && self.providers.get(provider).copied().unwrap_or(false)
    }
}
