use std::collections::HashMap;
use std::sync::Arc;

use nodeflow_core::traits::{NodeHandler, NodeTypeCatalog};

use crate::executor::WrappedHandler;

/// Registry mapping node type tags to wrapped handlers.
///
/// Built once at startup and shared by reference with the run driver and
/// the graph repository (as its type catalog).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, WrappedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name. A later registration under
    /// the same name replaces the earlier one.
    pub fn register(&mut self, handler: impl NodeHandler) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn NodeHandler>) {
        let wrapped = WrappedHandler::from_arc(handler);
        self.handlers.insert(wrapped.action().to_string(), wrapped);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&WrappedHandler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered type tags, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl NodeTypeCatalog for HandlerRegistry {
    fn contains(&self, node_type: &str) -> bool {
        HandlerRegistry::contains(self, node_type)
    }
}
