//! Fallback Chain
//!
//! Ordered sequence of models to try for one request. When the primary
//! exhausts its retries, the invoker advances to the next fallback; it never
//! retries an exhausted model.
//!
//! ```text
//! primary (retries exhausted)
//!     |
//!     v
//! fallback 1 (retries exhausted)
//!     |
//!     v
//! fallback 2 ... -> AllModelsFailed
//! ```

use std::sync::Arc;

use serde::Serialize;

use super::config::{ModelDescriptor, TaskClass};

/// A primary model plus ordered fallbacks
#[derive(Clone, Debug, Serialize)]
pub struct FallbackChain {
    /// Primary model
    pub primary: Arc<ModelDescriptor>,

    /// Ordered fallbacks, best first
    pub fallbacks: Vec<Arc<ModelDescriptor>>,

    /// Task class this chain was routed for
    pub task_class: TaskClass,
}

impl FallbackChain {
    /// Create a new fallback chain
    #[must_use]
    pub fn new(
        primary: Arc<ModelDescriptor>,
        fallbacks: Vec<Arc<ModelDescriptor>>,
        task_class: TaskClass,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            task_class,
        }
    }

    /// Build a chain from an ordered list; `None` when the list is empty
    #[must_use]
    pub fn from_ordered(models: Vec<Arc<ModelDescriptor>>, task_class: TaskClass) -> Option<Self> {
        let mut iter = models.into_iter();
        let primary = iter.next()?;
        Some(Self::new(primary, iter.collect(), task_class))
    }

    /// A chain with no fallbacks
    #[must_use]
    pub fn single(model: Arc<ModelDescriptor>, task_class: TaskClass) -> Self {
        Self::new(model, Vec::new(), task_class)
    }

    /// Get the next fallback after the given model
    /// Returns None if there are no more fallbacks
    #[must_use]
    pub fn next_fallback(&self, current: &str) -> Option<&Arc<ModelDescriptor>> {
        if current == self.primary.id {
            return self.fallbacks.first();
        }

        let pos = self.fallbacks.iter().position(|m| m.id == current)?;
        self.fallbacks.get(pos + 1)
    }

    /// Check if a model is in this chain (either primary or fallback)
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.primary.id == model_id || self.fallbacks.iter().any(|m| m.id == model_id)
    }

    /// Get the total depth of this chain (including primary)
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.fallbacks.len()
    }

    /// All models in try order
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Model ids in try order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.models().map(|m| m.id.clone()).collect()
    }

    /// The same chain starting at `model_id`, keeping the rest in order
    #[must_use]
    pub fn starting_with(&self, model_id: &str) -> Option<Self> {
        let models: Vec<_> = self.models().cloned().collect();
        let pos = models.iter().position(|m| m.id == model_id)?;
        let mut rotated = vec![Arc::clone(&models[pos])];
        rotated.extend(
            models
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, m)| Arc::clone(m)),
        );
        Self::from_ordered(rotated, self.task_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> FallbackChain {
        let m = |id: &str| Arc::new(ModelDescriptor::new(id, "mock"));
        FallbackChain::new(m("a"), vec![m("b"), m("c")], TaskClass::General)
    }

    #[test]
    fn test_next_fallback() {
        let chain = chain();
        assert_eq!(chain.next_fallback("a").unwrap().id, "b");
        assert_eq!(chain.next_fallback("b").unwrap().id, "c");
        assert!(chain.next_fallback("c").is_none());
        assert!(chain.next_fallback("zzz").is_none());
    }

    #[test]
    fn test_depth_and_ids() {
        let chain = chain();
        assert_eq!(chain.depth(), 3);
        assert_eq!(chain.ids(), vec!["a", "b", "c"]);
        assert!(chain.contains("c"));
        assert!(!chain.contains("d"));
    }

    #[test]
    fn test_starting_with_rotates_to_front() {
        let chain = chain().starting_with("b").unwrap();
        assert_eq!(chain.ids(), vec!["b", "a", "c"]);
        assert!(chain.starting_with("missing").is_none());
    }

    #[test]
    fn test_from_ordered_empty() {
        assert!(FallbackChain::from_ordered(Vec::new(), TaskClass::General).is_none());
    }
}
