#![allow(missing_docs)]
//! Model Routing
//!
//! Selection infrastructure for multi-model requests: which models may serve
//! a request, in what order, and at what estimated cost.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   ModelRouter    |  <-- route(task, constraints, budget) -> RoutePlan
//! +--------+---------+
//!          |
//!    +-----+--------------+-------------------+
//!    |                    |                   |
//!    v                    v                   v
//! +---------------+ +---------------+ +--------------------+
//! | ModelRegistry | | CostOptimizer | | PerformanceMonitor |
//! +---------------+ +-------+-------+ +--------------------+
//!                           |
//!                           v
//!                    +-------------+
//!                    | UsageLedger |
//!                    +-------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Capability first**: a model lacking a required tag is never a candidate
//! 2. **History-aware**: reliability and latency come from recent outcomes
//! 3. **Graceful Degradation**: every plan carries an ordered fallback chain
//! 4. **Budget-safe**: nothing over the remaining budget is ever selected

pub mod config;
pub mod cost;
pub mod fallback;
pub mod metrics;
pub mod policy;
pub mod registry;

pub use config::*;
pub use cost::{
    estimate_tokens, Budget, BudgetReservation, CostOptimizer, ScoredModel, Selection,
    UsageLedger, UsageSnapshot, UsageTotals,
};
pub use fallback::FallbackChain;
pub use metrics::{
    InvocationHandle, OutcomeRecord, PerformanceMonitor, PerformanceStats, SystemMetrics,
    ToolMetrics, ToolStats,
};
pub use policy::{classify_prompt, ModelRouter, RoutePlan, TaskSource};
pub use registry::ModelRegistry;
