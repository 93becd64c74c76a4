use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insight::config::AppConfig;
use insight::router::{RoutingClassifier, TrainingSet};
use insight::{ApiServer, ApiServerConfig, Orchestrator};

#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Hybrid LLM query routing with resilient caching", long_about = None)]
struct Cli {
    /// Config file (defaults to ./insight.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start API server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a single query
    Ask {
        query: String,

        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Train the learned routing classifier
    TrainRouter {
        /// Labelled data with train/val/test splits
        data: PathBuf,

        /// Where to write the model
        #[arg(short, long, default_value = "models/routing_classifier.json")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Remove every cached entry and reset statistics
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "insight=info,insight_cache=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { ref host, port } => {
            let config = load_config(&cli)?;
            let orch = Arc::new(Orchestrator::from_config(&config).await?);

            let server_config = ApiServerConfig {
                host: host.clone().unwrap_or_else(|| config.server.host.clone()),
                port: port.unwrap_or(config.server.port),
            };
            println!("Starting API server on {}:{}", server_config.host, server_config.port);
            ApiServer::new(server_config, orch).start().await?;
        }

        Commands::Ask { ref query, json } => {
            let config = load_config(&cli)?;
            let orch = Orchestrator::from_config(&config).await?;

            let answer = match orch.answer(query).await {
                Ok(answer) => answer,
                Err(e) if e.is_auth_failure() => {
                    bail!("{} (check the API keys in your environment)", e)
                }
                Err(e) => bail!(e),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                let source = if answer.used_cache { "cache" } else { answer.backend.as_str() };
                let agent = answer.agent.map(|a| a.to_string()).unwrap_or_else(|| "general".to_string());
                println!("[{} | agent: {} | {}ms]", source, agent, answer.latency_ms);
                if answer.escalated {
                    println!("(escalated from the routed backend)");
                }
                println!("\n{}", answer.text);
                if !answer.citations.is_empty() {
                    println!("\nSources:");
                    for (i, citation) in answer.citations.iter().enumerate() {
                        println!("  [{}] {}", i + 1, citation);
                    }
                }
            }
        }

        Commands::Cache { ref action } => {
            let config = load_config(&cli)?;
            let orch = Orchestrator::from_config(&config).await?;

            match action {
                CacheAction::Stats => {
                    let stats = orch.cache_stats().await;
                    println!("Cache: {} ({})", stats.backend, if stats.enabled { "enabled" } else { "disabled" });
                    println!("{}", "=".repeat(50));
                    println!("  Hits:            {}", stats.hits);
                    println!("  Misses:          {}", stats.misses);
                    println!("  Hit rate:        {:.1}%", stats.hit_rate());
                    println!("  Evictions:       {}", stats.evictions);
                    println!("  Degraded writes: {}", stats.degraded_writes);
                    println!("  Promotions:      {}", stats.promotions);
                    if !stats.provider_failures.is_empty() {
                        println!("  Provider failures:");
                        for (provider, count) in &stats.provider_failures {
                            println!("    {}: {}", provider, count);
                        }
                    }
                }
                CacheAction::Clear => {
                    let report = orch.clear_cache().await?;
                    println!("Cleared {} cached entries", report.removed);
                    for tier in &report.unreachable {
                        println!("Warning: {} tier unreachable; its entries are masked until they expire", tier);
                    }
                }
            }
        }

        Commands::TrainRouter { ref data, ref out } => {
            let set = TrainingSet::load(data)?;
            if set.train.is_empty() {
                bail!("No training examples in {}", data.display());
            }

            let model = RoutingClassifier::train(&set);
            println!("Trained on {} examples", set.train.len());
            println!("  Validation accuracy: {:.1}%", model.validation_accuracy() * 100.0);
            if !set.test.is_empty() {
                println!("  Test accuracy:       {:.1}%", model.evaluate(&set.test) * 100.0);
            }

            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            model.save(out)?;
            println!("Model written to {}", out.display());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = AppConfig::load(cli.config.as_deref())?;
    for problem in config.validate() {
        tracing::warn!("Config: {}", problem);
    }
    Ok(config)
}
