//! Conductor Orchestrate
//!
//! Command-line front end for the model conductor. Loads the configuration,
//! registers its models, runs one strategy and prints the run as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Parallel strategy over the configured models (Ollama)
//! conductor-orchestrate "Explain recursion"
//!
//! # Debate between two named models, at most 2 rounds
//! conductor-orchestrate --strategy debate --models llama3.2,qwen2.5 --max-rounds 2 "Is P = NP?"
//!
//! # Offline, against scripted mock models
//! conductor-orchestrate --mock --strategy consensus "Pick a colour"
//!
//! # With verbose logging
//! RUST_LOG=debug conductor-orchestrate "hello"
//! ```
//!
//! # Environment Variables
//!
//! - `CONDUCTOR_CONFIG`: Config file path (default: `~/.config/model-conductor/conductor.toml`)
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Ollama server address
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use model_conductor::{
    config::{default_config_path, load_config_from_path, ConfigOverrides},
    Conductor, MockProvider, ModelDescriptor, OllamaProvider, OrchestrationOptions,
    ProviderAdapter, Strategy,
};

/// Run a multi-model strategy and print the result as JSON
#[derive(Debug, Parser)]
#[command(name = "conductor-orchestrate", version, about)]
struct Cli {
    /// Prompt to orchestrate
    prompt: String,

    /// Strategy: sequential, parallel, debate, consensus, specialist, hierarchical, mixture
    #[arg(short, long, default_value = "parallel")]
    strategy: Strategy,

    /// Comma-separated model ids to use instead of routing
    #[arg(short, long, value_delimiter = ',')]
    models: Vec<String>,

    /// Config file path
    #[arg(short, long, env = "CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Use scripted mock models instead of Ollama
    #[arg(long)]
    mock: bool,

    /// Maximum debate/consensus rounds
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Maximum spend for the whole request
    #[arg(long)]
    budget: Option<f64>,

    /// Sampling temperature for every call
    #[arg(long)]
    temperature: Option<f32>,

    /// Route as a deep-thinking task
    #[arg(long)]
    deep: bool,

    /// Attach the routing and round trace
    #[arg(long)]
    reasoning: bool,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Global cap on in-flight calls
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Print usage and system metrics after the run
    #[arg(long)]
    metrics: bool,
}

/// Models registered when `--mock` is set and the config lists none
fn mock_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("mock-fast", "mock")
            .with_costs(0.0001, 0.0002)
            .with_capabilities(["fast", "general"])
            .with_baseline_latency_ms(200),
        ModelDescriptor::new("mock-deep", "mock")
            .with_costs(0.003, 0.006)
            .with_capabilities(["reasoning", "general"])
            .with_baseline_latency_ms(2500),
        ModelDescriptor::new("mock-code", "mock")
            .with_costs(0.001, 0.002)
            .with_capabilities(["code", "general"])
            .with_baseline_latency_ms(1200),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conductor_orchestrate=info".parse()?)
                .add_directive("model_conductor=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = load_config_from_path(cli.config.clone().or_else(default_config_path))?;
    let mut overrides = ConfigOverrides::new();
    if let Some(n) = cli.max_in_flight {
        overrides = overrides.with_max_in_flight(n);
    }
    if let Some(ms) = cli.timeout_ms {
        overrides = overrides.with_call_timeout_ms(ms);
    }
    overrides.apply(&mut settings);
    info!(source = %settings.source(), "Configuration resolved");

    let provider: Arc<dyn ProviderAdapter> = if cli.mock {
        if settings.models.is_empty() {
            settings.models = mock_catalog();
        }
        // Mock models answer under their registered provider name
        for model in &mut settings.models {
            model.provider = "mock".to_string();
        }
        Arc::new(MockProvider::new())
    } else {
        Arc::new(
            OllamaProvider::new(settings.ollama_host.clone(), settings.ollama_port)
                .with_request_timeout(settings.retry.call_timeout()),
        )
    };

    if settings.models.is_empty() {
        warn!("No models configured; add [[models]] to the config file or use --mock");
        anyhow::bail!("no models configured");
    }

    let conductor = Conductor::from_settings(&settings, [provider]);

    let mut options: OrchestrationOptions = conductor.defaults().clone();
    if let Some(rounds) = cli.max_rounds {
        options = options.with_max_rounds(rounds);
    }
    if let Some(ceiling) = cli.budget {
        options = options.with_budget(ceiling);
    }
    if let Some(temperature) = cli.temperature {
        options = options.with_temperature(temperature);
    }
    if let Some(ms) = cli.timeout_ms {
        options.call_timeout_ms = Some(ms);
    }
    options.use_deep_reasoning = cli.deep;
    options.include_reasoning = cli.reasoning;

    let models_override = (!cli.models.is_empty()).then_some(cli.models.as_slice());
    let run = conductor
        .orchestrate(&cli.prompt, cli.strategy, models_override, options)
        .await?;

    println!("{}", serde_json::to_string_pretty(&run)?);

    if cli.metrics {
        let report = serde_json::json!({
            "system": conductor.system_metrics(),
            "tools": conductor.tool_metrics(),
            "usage": conductor.usage(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
