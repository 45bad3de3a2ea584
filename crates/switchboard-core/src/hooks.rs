//! Collaborator traits wired into the application at construction time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

/// Primes named caches at startup.
#[async_trait]
pub trait CachePrimer: Send + Sync {
    /// Load every cache named in `caches`, seeded with its configured value.
    async fn gather(&self, caches: &BTreeMap<String, Value>) -> Result<(), String>;
}
