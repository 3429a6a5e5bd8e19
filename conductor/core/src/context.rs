//! Orchestration Context
//!
//! The process-wide state shared by every request: model registry,
//! performance history and usage ledger, plus the optimizer and router built
//! over them. Created once at startup and passed explicitly to whatever needs
//! it; there are no ambient singletons.

use std::sync::Arc;

use crate::routing::{
    CostOptimizer, CostWeights, ModelRegistry, ModelRouter, PerformanceConfig, PerformanceMonitor,
    UsageLedger,
};

/// Shared routing state
#[derive(Debug)]
pub struct OrchestrationContext {
    registry: Arc<ModelRegistry>,
    monitor: Arc<PerformanceMonitor>,
    ledger: Arc<UsageLedger>,
    optimizer: Arc<CostOptimizer>,
    router: ModelRouter,
}

impl OrchestrationContext {
    /// Create a context with an empty registry
    #[must_use]
    pub fn new(performance: PerformanceConfig, weights: CostWeights) -> Self {
        Self::with_registry(Arc::new(ModelRegistry::new()), performance, weights)
    }

    /// Create a context over an existing registry
    #[must_use]
    pub fn with_registry(
        registry: Arc<ModelRegistry>,
        performance: PerformanceConfig,
        weights: CostWeights,
    ) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new(performance));
        let ledger = Arc::new(UsageLedger::new());
        let optimizer = Arc::new(CostOptimizer::new(
            weights,
            Arc::clone(&monitor),
            Arc::clone(&ledger),
        ));
        let router = ModelRouter::new(
            Arc::clone(&registry),
            Arc::clone(&optimizer),
            Arc::clone(&monitor),
        );

        Self {
            registry,
            monitor,
            ledger,
            optimizer,
            router,
        }
    }

    /// Get the model registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Get the performance monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Get the usage ledger
    #[must_use]
    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Get the cost optimizer
    #[must_use]
    pub fn optimizer(&self) -> &Arc<CostOptimizer> {
        &self.optimizer
    }

    /// Get the model router
    #[must_use]
    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Clear performance history and the usage ledger. Registered models stay.
    pub fn reset(&self) {
        self.monitor.reset();
        self.ledger.clear();
        tracing::debug!("Orchestration context reset");
    }
}

impl Default for OrchestrationContext {
    fn default() -> Self {
        Self::new(PerformanceConfig::default(), CostWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ModelDescriptor, OutcomeRecord};
    use std::time::Duration;

    #[test]
    fn test_components_share_state() {
        let context = OrchestrationContext::default();
        context
            .registry()
            .register(ModelDescriptor::new("a", "mock").with_costs(1.0, 1.0));

        // The router sees the same registry, the optimizer the same ledger
        assert_eq!(context.router().registry().len(), 1);
        let model = context.registry().lookup("a").unwrap();
        context.optimizer().track_usage(&model, 1000, 0);
        assert_eq!(context.ledger().totals().calls, 1);
    }

    #[test]
    fn test_reset_keeps_registry() {
        let context = OrchestrationContext::default();
        context.registry().register(ModelDescriptor::new("a", "mock"));
        context
            .monitor()
            .record("a", OutcomeRecord::success(Duration::from_millis(3)));
        context.ledger().track("a", 10, 10, 0.5);

        context.reset();

        assert_eq!(context.registry().len(), 1);
        assert_eq!(context.monitor().record_len("a"), 0);
        assert_eq!(context.ledger().totals().calls, 0);
    }
}
