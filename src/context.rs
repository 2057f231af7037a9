//! Per-call store of the most recent visual description.
//!
//! One entry per call id, last write wins. Descriptions are idempotent
//! "current state" snapshots, so concurrent writers for the same call are
//! not serialized beyond single-key map atomicity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct VisualContext {
    pub description: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct VisualContextStore {
    entries: RwLock<HashMap<String, VisualContext>>,
}

impl VisualContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional upsert; overwrites any previous description.
    pub async fn set(&self, call_id: &str, description: String, observed_at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            call_id.to_string(),
            VisualContext {
                description,
                observed_at,
            },
        );
    }

    pub async fn get(&self, call_id: &str) -> Option<VisualContext> {
        let entries = self.entries.read().await;
        entries.get(call_id).cloned()
    }

    /// Clears the context for a call. Removing an absent entry is a no-op.
    pub async fn remove(&self, call_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(call_id);
    }
}
