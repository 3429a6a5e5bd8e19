//! Model Provider Integration
//!
//! This module provides abstracted access to model providers through the
//! [`ProviderAdapter`] trait. The invocation primitive is the only caller.
//!
//! # Available Providers
//!
//! - **Ollama**: Local LLM server
//! - **Mock**: Scripted per-model behaviour for tests and offline demos
//!
//! # Usage
//!
//! ```ignore
//! use model_conductor::backend::{OllamaProvider, ProviderAdapter, ProviderParams};
//!
//! let provider = OllamaProvider::from_env();
//! let response = provider.call("llama3", "Hello!", &ProviderParams::default()).await?;
//! ```

pub mod mock;
mod ollama;
mod traits;

pub use mock::{MockBehavior, MockProvider, MockRequest};
pub use ollama::{classify_status, OllamaProvider};
pub use traits::{ProviderAdapter, ProviderError, ProviderParams, ProviderResponse};
