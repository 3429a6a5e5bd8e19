//! Ollama Provider Implementation
//!
//! Provider adapter for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! Ollama provides a REST API for:
//! - `/api/generate` - Generate completions (streaming or batch)
//! - `/api/tags` - List available models
//!
//! This adapter uses the generate endpoint in batch mode and classifies
//! HTTP failures for the invocation primitive:
//!
//! | Response | Classification |
//! |---|---|
//! | 429 (+ `Retry-After`) | `RateLimited` |
//! | 5xx, connect error, timeout | `Transient` |
//! | 4xx mentioning safety/policy | `ContentPolicy` |
//! | other 4xx | `Permanent` |

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::traits::{ProviderAdapter, ProviderError, ProviderParams, ProviderResponse};

/// Ollama provider client
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Upper bound on one HTTP exchange; the invoker's deadline is usually tighter
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            request_timeout: Duration::from_secs(120),
            http_client: reqwest::Client::new(),
        }
    }

    /// Set the HTTP timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self::new(host, port)
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for `/api/generate`
    fn build_request(model_id: &str, prompt: &str, params: &ProviderParams) -> serde_json::Value {
        let mut json_request = serde_json::json!({
            "model": model_id,
            "prompt": prompt,
            "stream": false,
        });

        if let Some(system) = &params.system {
            json_request["system"] = serde_json::json!(system);
        }

        let mut options = serde_json::Map::new();
        if let Some(temperature) = params.temperature {
            options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = params.max_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
        }
        if !options.is_empty() {
            json_request["options"] = serde_json::Value::Object(options);
        }

        json_request
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

/// Map a non-success HTTP status and body onto the error taxonomy
#[must_use]
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let message = extract_error_message(body).unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        500..=599 | 408 => ProviderError::Transient(message),
        400..=499 => {
            let lower = message.to_lowercase();
            if ["safety", "policy", "blocked", "moderation"]
                .iter()
                .any(|needle| lower.contains(needle))
            {
                ProviderError::ContentPolicy(message)
            } else {
                ProviderError::Permanent(message)
            }
        }
        _ => ProviderError::Permanent(message),
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_json = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from));
    Some(from_json.unwrap_or_else(|| trimmed.to_string()))
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn classify_transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

fn token_count(data: &serde_json::Value, key: &str) -> u32 {
    data.get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(0)
}

#[async_trait]
impl ProviderAdapter for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        params: &ProviderParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let start = Instant::now();
        let json_request = Self::build_request(model_id, prompt, params);

        let response = self
            .http_client
            .post(self.generate_url())
            .timeout(self.request_timeout)
            .json(&json_request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
            return Err(ProviderError::Permanent(error.to_string()));
        }

        let text = data
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        Ok(ProviderResponse {
            text,
            input_tokens: token_count(&data, "prompt_eval_count"),
            output_tokens: token_count(&data, "eval_count"),
            latency: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_ollama_provider_creation() {
        let provider = OllamaProvider::new("localhost", 11434);
        assert_eq!(provider.host, "localhost");
        assert_eq!(provider.port, 11434);
        assert_eq!(provider.base_url(), "http://localhost:11434");
        assert_eq!(provider.generate_url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_build_request() {
        let body = OllamaProvider::build_request("llama3", "Hello", &ProviderParams::default());
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert!(body.get("options").is_none());
        assert!(body.get("system").is_none());

        let params = ProviderParams::default()
            .with_temperature(0.0)
            .with_max_tokens(32)
            .with_system("Be helpful");
        let body = OllamaProvider::build_request("llama3", "Hello", &params);
        assert_eq!(body["options"]["num_predict"], 32);
        assert_eq!(body["options"]["temperature"], 0.0);
        assert_eq!(body["system"], "Be helpful");
    }

    #[test]
    fn test_classify_status() {
        let limited = classify_status(429, "", Some(Duration::from_secs(7)));
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));

        assert_eq!(classify_status(503, "overloaded", None).kind(), ErrorKind::Transient);

        let refusal = classify_status(
            400,
            r#"{"error":"prompt blocked by safety policy"}"#,
            None,
        );
        assert_eq!(refusal.kind(), ErrorKind::ContentPolicy);
        assert_eq!(refusal.message(), "prompt blocked by safety policy");

        let missing = classify_status(404, r#"{"error":"model 'nope' not found"}"#, None);
        assert_eq!(missing.kind(), ErrorKind::Permanent);
        assert_eq!(missing.message(), "model 'nope' not found");
    }

    #[test]
    fn test_parse_retry_after() {
        let header = reqwest::header::HeaderValue::from_static("2");
        assert_eq!(parse_retry_after(Some(&header)), Some(Duration::from_secs(2)));

        let bogus = reqwest::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&bogus)), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
