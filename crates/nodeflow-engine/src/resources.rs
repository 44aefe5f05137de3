use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use nodeflow_core::traits::{Resource, ResourceStore};
use nodeflow_core::types::ExecutionId;

/// In-process side table of stateful resources keyed by execution id.
///
/// One table is shared by every run in the process. Entries of a run that
/// dies before its handlers clean up stay until `release` is called.
#[derive(Default)]
pub struct ResourceTable {
    entries: Mutex<HashMap<ExecutionId, HashMap<String, Resource>>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execution ids that still hold at least one resource.
    pub fn active_executions(&self) -> Vec<ExecutionId> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<ExecutionId> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ResourceStore for ResourceTable {
    fn insert(&self, execution_id: &ExecutionId, key: &str, value: Resource) -> Option<Resource> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(execution_id.clone())
            .or_default()
            .insert(key.to_string(), value)
    }

    fn get(&self, execution_id: &ExecutionId, key: &str) -> Option<Resource> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(execution_id).and_then(|m| m.get(key)).cloned()
    }

    fn remove(&self, execution_id: &ExecutionId, key: &str) -> Option<Resource> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let scoped = entries.get_mut(execution_id)?;
        let removed = scoped.remove(key);
        if scoped.is_empty() {
            entries.remove(execution_id);
        }
        removed
    }

    fn release(&self, execution_id: &ExecutionId) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let count = entries.remove(execution_id).map(|m| m.len()).unwrap_or(0);
        if count > 0 {
            debug!(execution_id = %execution_id, count, "Released execution resources");
        }
        count
    }
}
