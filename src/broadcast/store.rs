use std::collections::HashSet;

use tokio::sync::RwLock;

/// Values this node has already accepted. Entries are never removed.
pub struct SeenStore {
    values: RwLock<HashSet<i64>>,
}

impl SeenStore {
    pub fn new() -> Self {
        SeenStore {
            values: RwLock::new(HashSet::new()),
        }
    }

    pub async fn has_seen(&self, value: i64) -> bool {
        self.values.read().await.contains(&value)
    }

    /// Records `value`. Returns true only for the single caller that
    /// actually inserted it; every racing or later caller gets false.
    pub async fn mark_seen(&self, value: i64) -> bool {
        if self.has_seen(value).await {
            return false;
        }
        // Checked again under the write lock: `insert` reports the winner.
        self.values.write().await.insert(value)
    }

    pub async fn snapshot(&self) -> Vec<i64> {
        self.values.read().await.iter().copied().collect()
    }
}

impl Default for SeenStore {
    fn default() -> Self {
        Self::new()
    }
}
