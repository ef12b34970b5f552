//! hugin: completion router CLI
//!
//! Generate through the router, test individual providers, and inspect
//! provider, model and usage state.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hugin::{
    CompletionRequest, FileSettingsStore, JsonlUsageStore, Router, RouterConfig, SettingsStore,
};

/// Hugin CLI
#[derive(Parser)]
#[command(name = "hugin")]
#[command(version = hugin::PKG_VERSION)]
#[command(about = "Multi-backend completion router")]
struct Args {
    /// Config file (default: ~/.hugin/config.toml, then /etc/hugin/config.toml)
    #[arg(short, long, env = "HUGIN_CONFIG")]
    config: Option<PathBuf>,

    /// Usage log (default: ~/.hugin/usage.jsonl)
    #[arg(long, env = "HUGIN_USAGE_LOG")]
    usage_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a completion through the router
    Generate {
        /// Prompt (or omit to read from stdin)
        prompt: Option<String>,
        /// Requesting user id
        #[arg(short, long)]
        user: Option<String>,
        /// Logical feature tag
        #[arg(short, long, default_value = "cli")]
        tool: String,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Send a prompt to one provider, bypassing the cache
    Test {
        /// Provider key
        provider: String,
        /// Prompt (or omit to read from stdin)
        prompt: Option<String>,
    },

    /// Probe providers and show their state
    Providers {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List models a provider can serve
    Models {
        /// Provider key
        provider: String,
    },

    /// Change and persist a provider's model
    SetModel {
        /// Provider key
        provider: String,
        /// Model identifier
        model: String,
    },

    /// Show cumulative usage per provider
    Usage {
        /// Also print the most recent N records
        #[arg(long, default_value_t = 0)]
        recent: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let settings = FileSettingsStore::discover(args.config.as_deref())?;
    let config = RouterConfig::load_from_file(settings.config_path())?;
    let usage_path = args.usage_log.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hugin")
            .join("usage.jsonl")
    });
    let settings: Arc<dyn SettingsStore> = Arc::new(settings);

    let router = Router::builder()
        .settings(settings)
        .config(config)
        .usage_store(Arc::new(JsonlUsageStore::open(usage_path).await?))
        .build()?;

    match args.command {
        Command::Generate {
            prompt,
            user,
            tool,
            max_tokens,
            temperature,
        } => {
            let prompt = resolve_text(prompt, "generate")?;
            let mut request = CompletionRequest::new(prompt).tool(tool);
            request.user_id = user;
            request.max_tokens = max_tokens;
            request.temperature = temperature;
            let response = router.generate_response(&request).await?;
            println!("{}", response.content);
            eprintln!("[{} / {}]", response.provider_key, response.model);
        }
        Command::Test { provider, prompt } => {
            let prompt = resolve_text(prompt, "test")?;
            let response = router
                .test_provider(&provider, &CompletionRequest::new(prompt).tool("provider-test"))
                .await?;
            println!("{}", response.content);
            if let Some(timing) = response.timing {
                eprintln!(
                    "[{} / {}] {} ms{}",
                    response.provider_key,
                    response.model,
                    timing.duration_ms,
                    timing
                        .tokens_per_second
                        .map(|tps| format!(", {tps:.1} tok/s"))
                        .unwrap_or_default()
                );
            }
        }
        Command::Providers { json } => {
            router.initialize().await?;
            let stats = router.provider_stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else if stats.is_empty() {
                println!("no providers configured");
            } else {
                for p in stats {
                    let status = match (p.enabled, p.available) {
                        (false, _) => "disabled",
                        (true, true) => "available",
                        (true, false) => "unavailable",
                    };
                    println!(
                        "{:<16} {:<17} {:<11} priority={} model={} latency={}",
                        p.key,
                        p.family,
                        status,
                        p.priority.map_or_else(|| "-".to_string(), |n| n.to_string()),
                        p.model,
                        p.avg_latency_ms
                            .map_or_else(|| "-".to_string(), |ms| format!("{ms:.0}ms")),
                    );
                }
            }
            let routing = router.routing_summary().await;
            if let Some(default) = routing.default_provider {
                println!("default provider: {default}");
            }
        }
        Command::Models { provider } => {
            for model in router.list_models(&provider).await? {
                println!("{model}");
            }
        }
        Command::SetModel { provider, model } => {
            if router.update_provider_model(&provider, &model).await? {
                println!("{provider}: model set to {model}");
            } else {
                println!("{provider}: already using {model}");
            }
        }
        Command::Usage { recent } => {
            let summaries = router.usage_summaries().await?;
            if summaries.is_empty() {
                println!("no usage recorded");
            }
            for s in summaries {
                println!(
                    "{:<16} requests={} tokens={} (prompt {} / completion {}) cost={:.6}",
                    s.provider_key,
                    s.request_count,
                    s.total_tokens,
                    s.prompt_tokens,
                    s.completion_tokens,
                    s.total_cost
                );
            }
            if recent > 0 {
                for r in router.recent_usage(recent).await? {
                    println!("{}", serde_json::to_string(&r)?);
                }
            }
        }
    }

    Ok(())
}

/// Resolve text input from an optional CLI argument and/or stdin.
///
/// - arg only → arg
/// - stdin only → stdin
/// - both → `"{arg}\n\n{stdin}"`
/// - neither → error
fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    let stdin_text = if io::stdin().is_terminal() {
        None
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        let trimmed = buf.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };

    match (arg, stdin_text) {
        (Some(a), Some(s)) => Ok(format!("{a}\n\n{s}")),
        (Some(a), None) => Ok(a),
        (None, Some(s)) => Ok(s),
        (None, None) => {
            Err(format!("{command}: no input provided (pass text as argument or via stdin)").into())
        }
    }
}
