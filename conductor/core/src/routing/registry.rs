//! Model Registry
//!
//! Catalog of known backend models. Registration replaces by id; lookups and
//! capability searches take a shared read lock and never touch the network.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::ModelDescriptor;
use crate::error::{OrchestrationError, Result};

/// Registry of model descriptors
#[derive(Debug, Default)]
pub struct ModelRegistry {
    /// Descriptors by id
    models: RwLock<HashMap<String, Arc<ModelDescriptor>>>,
    /// Registration order, used to keep capability search deterministic
    order: RwLock<Vec<String>>,
}

impl ModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with descriptors
    #[must_use]
    pub fn with_models(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let registry = Self::new();
        for model in models {
            registry.register(model);
        }
        registry
    }

    /// Register a descriptor, replacing any existing entry with the same id
    pub fn register(&self, descriptor: ModelDescriptor) {
        let id = descriptor.id.clone();
        let replaced = {
            let mut models = self.models.write();
            models.insert(id.clone(), Arc::new(descriptor)).is_some()
        };

        if !replaced {
            self.order.write().push(id.clone());
        }

        tracing::info!(model = %id, replaced, "Registered model");
    }

    /// Remove a descriptor
    pub fn remove(&self, id: &str) -> Option<Arc<ModelDescriptor>> {
        let removed = self.models.write().remove(id);
        if removed.is_some() {
            self.order.write().retain(|m| m != id);
            tracing::info!(model = %id, "Removed model");
        }
        removed
    }

    /// Look up a descriptor by id
    ///
    /// # Errors
    ///
    /// Returns `ModelNotFound` if no model with that id is registered.
    pub fn lookup(&self, id: &str) -> Result<Arc<ModelDescriptor>> {
        self.models
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestrationError::ModelNotFound(id.to_string()))
    }

    /// All models declaring every one of the given capability tags, in
    /// registration order. An empty tag list matches every model.
    #[must_use]
    pub fn by_capability<S: AsRef<str>>(&self, tags: &[S]) -> Vec<Arc<ModelDescriptor>> {
        let order = self.order.read();
        let models = self.models.read();
        order
            .iter()
            .filter_map(|id| models.get(id))
            .filter(|m| m.has_capabilities(tags))
            .cloned()
            .collect()
    }

    /// All registered models, in registration order
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ModelDescriptor>> {
        self.by_capability::<&str>(&[])
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelRegistry {
        ModelRegistry::with_models([
            ModelDescriptor::new("coder", "ollama").with_capabilities(["code", "tools"]),
            ModelDescriptor::new("writer", "ollama").with_capabilities(["creative"]),
            ModelDescriptor::new("generalist", "ollama").with_capabilities(["code", "creative"]),
        ])
    }

    #[test]
    fn test_lookup() {
        let registry = sample();
        assert_eq!(registry.lookup("coder").unwrap().provider, "ollama");
        assert!(matches!(
            registry.lookup("missing"),
            Err(OrchestrationError::ModelNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_by_capability_keeps_registration_order() {
        let registry = sample();
        let ids: Vec<_> = registry
            .by_capability(&["code"])
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(ids, vec!["coder", "generalist"]);

        assert_eq!(registry.by_capability(&["code", "tools"]).len(), 1);
        assert!(registry.by_capability(&["vision"]).is_empty());
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn test_register_replaces_by_id() {
        let registry = sample();
        registry.register(ModelDescriptor::new("coder", "openai").with_costs(0.01, 0.02));

        assert_eq!(registry.len(), 3);
        let coder = registry.lookup("coder").unwrap();
        assert_eq!(coder.provider, "openai");
        // Position in the order is unchanged
        assert_eq!(registry.all()[0].id, "coder");
    }

    #[test]
    fn test_remove() {
        let registry = sample();
        assert!(registry.remove("writer").is_some());
        assert!(registry.remove("writer").is_none());
        assert_eq!(registry.len(), 2);
        assert!(registry.all().iter().all(|m| m.id != "writer"));
    }

    #[test]
    fn test_concurrent_reads() {
        let registry = Arc::new(sample());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.by_capability(&["creative"]).len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }
}
