//! Node-type registry: maps a node's `type` string to its executor.
//!
//! Built-ins are loaded by [`NodeRegistry::with_builtins`]; domains register
//! their own `action.<domain>.*` executors on top before the registry is
//! shared with the engine. Registration replaces any earlier executor for
//! the same type.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::builtin::{self, trigger::TriggerNode};
use crate::catalog::{Catalog, EventDescriptor, NodeDescriptor};
use crate::ExecutableNode;

pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn ExecutableNode>>,
    descriptors: BTreeMap<String, NodeDescriptor>,
    events: BTreeMap<String, Vec<EventDescriptor>>,
    trigger_fallback: Arc<dyn ExecutableNode>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// An empty registry. Only `trigger.*` types resolve.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            descriptors: BTreeMap::new(),
            events: BTreeMap::new(),
            trigger_fallback: Arc::new(TriggerNode),
        }
    }

    /// A registry pre-loaded with the trigger, logic, data and utility nodes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register an executor together with its catalog entry.
    pub fn register(&mut self, descriptor: NodeDescriptor, executor: Arc<dyn ExecutableNode>) {
        debug!(node_type = %descriptor.node_type, "registering node type");
        self.executors.insert(descriptor.node_type.clone(), executor);
        self.descriptors.insert(descriptor.node_type.clone(), descriptor);
    }

    /// Register an executor that has no catalog entry.
    pub fn register_executor(&mut self, node_type: impl Into<String>, executor: Arc<dyn ExecutableNode>) {
        self.executors.insert(node_type.into(), executor);
    }

    /// Publish the events a domain emits through the engine's event bridge.
    pub fn register_events(&mut self, domain: impl Into<String>, events: Vec<EventDescriptor>) {
        self.events.insert(domain.into(), events);
    }

    /// Resolve the executor for `node_type`. Unregistered `trigger.*` types
    /// fall back to a pass-through.
    pub fn resolve(&self, node_type: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.executors.get(node_type).cloned().or_else(|| {
            node_type
                .starts_with("trigger.")
                .then(|| self.trigger_fallback.clone())
        })
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.resolve(node_type).is_some()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.descriptors.values()
    }

    pub fn catalog(&self) -> Catalog {
        Catalog {
            nodes: self.descriptors.values().cloned().collect(),
            events: self.events.clone(),
        }
    }
}
