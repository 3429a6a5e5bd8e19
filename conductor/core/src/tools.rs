//! Lazy Tool Registry
//!
//! Tool metadata is registered eagerly at startup; a tool's implementation is
//! loaded on first use and cached. Concurrent first calls for the same tool
//! share one load: every caller waits on the same cell and receives the same
//! handler. A failed load is not cached, so the next call tries again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Errors from the tool registry
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    /// No metadata registered under this name
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The loader failed
    #[error("failed to load tool {name}: {message}")]
    LoadFailed {
        /// Tool name
        name: String,
        /// Loader message
        message: String,
    },

    /// The handler failed
    #[error("tool {name} failed: {message}")]
    ExecutionFailed {
        /// Tool name
        name: String,
        /// Handler message
        message: String,
    },
}

/// Eagerly registered description of a tool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique name
    pub name: String,
    /// One-line description
    pub description: String,
    /// Grouping for listings
    pub category: Option<String>,
}

impl ToolMetadata {
    /// Create metadata
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: None,
        }
    }

    /// Set category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A loaded tool implementation
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Produces a tool's handler on first use
pub type ToolLoader =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn ToolHandler>, ToolError>> + Send + Sync>;

struct ToolEntry {
    metadata: ToolMetadata,
    loader: ToolLoader,
    handler: OnceCell<Arc<dyn ToolHandler>>,
    load_count: AtomicU64,
}

/// Registry with eager metadata and lazily loaded handlers
#[derive(Default)]
pub struct LazyToolRegistry {
    tools: DashMap<String, Arc<ToolEntry>>,
}

impl std::fmt::Debug for LazyToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyToolRegistry")
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl LazyToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool's metadata and its loader. Nothing is loaded yet.
    /// Re-registering a name replaces the entry and drops any cached handler.
    pub fn register_metadata(&self, metadata: ToolMetadata, loader: ToolLoader) {
        tracing::debug!(tool = %metadata.name, "Registered tool metadata");
        let name = metadata.name.clone();
        self.tools.insert(
            name,
            Arc::new(ToolEntry {
                metadata,
                loader,
                handler: OnceCell::new(),
                load_count: AtomicU64::new(0),
            }),
        );
    }

    /// Register with a loader built from an async closure
    pub fn register<F, Fut>(&self, metadata: ToolMetadata, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn ToolHandler>, ToolError>> + Send + 'static,
    {
        let loader: ToolLoader = Arc::new(move || Box::pin(loader()));
        self.register_metadata(metadata, loader);
    }

    /// Get a tool's handler, loading it on first use
    ///
    /// # Errors
    ///
    /// `UnknownTool` for unregistered names, `LoadFailed` when the loader fails.
    pub async fn get_implementation(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        // Clone the entry out so no map guard is held across the load
        let entry = self
            .tools
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let handler = entry
            .handler
            .get_or_try_init(|| async {
                entry.load_count.fetch_add(1, Ordering::SeqCst);
                tracing::info!(tool = %name, "Loading tool implementation");
                (entry.loader)().await
            })
            .await?;

        Ok(Arc::clone(handler))
    }

    /// Load (if needed) and run a tool
    ///
    /// # Errors
    ///
    /// Any load or execution error.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let handler = self.get_implementation(name).await?;
        handler.execute(args).await
    }

    /// All registered metadata, sorted by name
    #[must_use]
    pub fn list_metadata(&self) -> Vec<ToolMetadata> {
        let sorted: BTreeMap<String, ToolMetadata> = self
            .tools
            .iter()
            .map(|e| (e.key().clone(), e.value().metadata.clone()))
            .collect();
        sorted.into_values().collect()
    }

    /// Whether a tool's handler is cached
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .is_some_and(|e| e.handler.initialized())
    }

    /// How many times a tool's loader has run
    #[must_use]
    pub fn load_count(&self, name: &str) -> u64 {
        self.tools
            .get(name)
            .map_or(0, |e| e.load_count.load(Ordering::SeqCst))
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl ToolHandler for Upper {
        async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let text = args.as_str().unwrap_or_default().to_uppercase();
            Ok(serde_json::Value::String(text))
        }
    }

    fn upper_loader() -> ToolLoader {
        Arc::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Arc::new(Upper) as Arc<dyn ToolHandler>)
            })
        })
    }

    #[tokio::test]
    async fn test_metadata_is_eager_handler_is_lazy() {
        let registry = LazyToolRegistry::new();
        registry.register_metadata(ToolMetadata::new("upper", "Uppercase text"), upper_loader());

        assert_eq!(registry.list_metadata()[0].name, "upper");
        assert!(!registry.is_loaded("upper"));
        assert_eq!(registry.load_count("upper"), 0);

        let result = registry.execute("upper", serde_json::json!("hi")).await.unwrap();
        assert_eq!(result, serde_json::json!("HI"));
        assert!(registry.is_loaded("upper"));

        registry.get_implementation("upper").await.unwrap();
        assert_eq!(registry.load_count("upper"), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = LazyToolRegistry::new();
        assert_eq!(
            registry.get_implementation("nope").await.err(),
            Some(ToolError::UnknownTool("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        let registry = LazyToolRegistry::new();
        registry.register(ToolMetadata::new("flaky", "Fails once"), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ToolError::LoadFailed {
                        name: "flaky".into(),
                        message: "disk busy".into(),
                    })
                } else {
                    Ok(Arc::new(Upper) as Arc<dyn ToolHandler>)
                }
            }
        });

        tokio_test::assert_err!(registry.execute("flaky", serde_json::json!("a")).await);
        assert!(!registry.is_loaded("flaky"));
        tokio_test::assert_ok!(registry.execute("flaky", serde_json::json!("a")).await);
        assert_eq!(registry.load_count("flaky"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_load_once() {
        let registry = Arc::new(LazyToolRegistry::new());
        registry.register_metadata(ToolMetadata::new("upper", "Uppercase text"), upper_loader());

        let calls = (0..10).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_implementation("upper").await })
        });
        let handlers: Vec<_> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(registry.load_count("upper"), 1);
        assert!(handlers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
