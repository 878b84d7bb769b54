//! Bounded in-process cache of evaluated token contract state.
//!
//! Evaluating a contract is a network round-trip through the token's
//! gateway, so results are cached per contract id. Removing a token
//! drops its entry; a stale entry for a re-added token would otherwise
//! outlive the registry record.

use std::collections::HashMap;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use super::TokenState;

const DEFAULT_CACHE_CAPACITY: u64 = 64;

/// Evaluated contract state plus the validity verdict per interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub state: TokenState,
    #[serde(default)]
    pub validity: HashMap<String, bool>,
}

pub struct EvalCache {
    entries: Cache<String, EvaluationResult>,
}

impl Default for EvalCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl EvalCache {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn get(&self, contract_id: &str) -> Option<EvaluationResult> {
        self.entries.get(contract_id)
    }

    pub fn insert(&self, contract_id: &str, result: EvaluationResult) {
        log::debug!("Caching evaluation result for {contract_id}");
        self.entries.insert(contract_id.to_string(), result);
    }

    /// Drop the cached result for `contract_id`. No-op when absent.
    pub fn invalidate(&self, contract_id: &str) {
        log::debug!("Invalidating cached evaluation for {contract_id}");
        self.entries.invalidate(contract_id);
    }
}
