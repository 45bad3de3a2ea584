//! Named caches primed at startup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use switchboard_core::hooks::CachePrimer;

#[derive(Debug, Default)]
pub struct MemoryCaches {
    entries: DashMap<String, Value>,
}

impl MemoryCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, name: impl Into<String>, value: Value) {
        let _ = self.entries.insert(name.into(), value);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CachePrimer for MemoryCaches {
    async fn gather(&self, caches: &BTreeMap<String, Value>) -> Result<(), String> {
        for (name, seed) in caches {
            if name.is_empty() {
                return Err("cache name must be non-empty".into());
            }
            self.insert(name.clone(), seed.clone());
        }
        tracing::info!(count = caches.len(), "caches primed");
        Ok(())
    }
}
