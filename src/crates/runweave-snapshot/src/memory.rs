//! In-memory snapshot store
//!
//! Reference [`SnapshotStore`] implementation holding every run's latest
//! snapshot in process memory. Suitable for development and tests; production
//! deployments implement the trait over a durable backend.

use crate::error::Result;
use crate::snapshot::RunSnapshot;
use crate::traits::SnapshotStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory snapshot storage, keyed by run id
type SnapshotStorage = Arc<RwLock<HashMap<String, RunSnapshot>>>;

/// In-memory snapshot store implementation
///
/// # Example
///
/// ```rust
/// use runweave_snapshot::{InMemorySnapshotStore, SnapshotStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemorySnapshotStore::new();
///     assert!(store.load("missing").await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    storage: SnapshotStorage,
}

impl InMemorySnapshotStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of runs currently tracked
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Drop all snapshots (useful for tests)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &RunSnapshot) -> Result<()> {
        self.storage
            .write()
            .await
            .insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        Ok(self.storage.read().await.get(run_id).cloned())
    }

    async fn list(&self, workflow_name: &str) -> Result<Vec<RunSnapshot>> {
        let storage = self.storage.read().await;
        let mut snapshots: Vec<RunSnapshot> = storage
            .values()
            .filter(|s| s.workflow_name == workflow_name)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }
}
