use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{NodeError, Result};
use crate::node::WindowNode;

/// Name → node table, the host-side stand-in for a misc-device registry.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<BTreeMap<String, Arc<WindowNode>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Arc<WindowNode>>> {
        // The map stays consistent even if a holder panicked; keep serving it.
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes `node` under its name. Names must be non-empty and free of `/`.
    pub fn register(&self, node: WindowNode) -> Result<Arc<WindowNode>> {
        let name = node.name().to_string();
        if name.is_empty() || name.contains('/') {
            return Err(NodeError::InvalidName(name));
        }

        let mut nodes = self.nodes();
        if nodes.contains_key(&name) {
            tracing::error!("cannot register {name:?}: name already taken");
            return Err(NodeError::NameTaken(name));
        }
        let node = Arc::new(node);
        nodes.insert(name.clone(), node.clone());
        tracing::info!("registered node {name:?} (0x{:x} bytes)", node.size());
        Ok(node)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<WindowNode>> {
        self.nodes().get(name).cloned()
    }

    /// Removes a node. Handles already open keep working until they are dropped.
    pub fn deregister(&self, name: &str) -> Result<Arc<WindowNode>> {
        let node = self
            .nodes()
            .remove(name)
            .ok_or_else(|| NodeError::NotRegistered(name.to_string()))?;
        tracing::info!("deregistered node {name:?}");
        Ok(node)
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes().keys().cloned().collect()
    }
}
