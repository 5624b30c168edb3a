mod api;
mod config;
mod error;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use runtime::{Agent, AnthropicBackend, Bridge, ToolCallingAgent, ToolProvider};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use error::Result;
use state::AppState;

#[derive(Parser)]
#[command(name = "myngl")]
#[command(about = "Chat-completion service backed by MCP tool servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "MYNGL_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "MYNGL_PORT", default_value_t = 3000)]
    port: u16,

    /// Path to the TOML config file
    #[arg(short, long, env = "MYNGL_CONFIG", default_value = "myngl.toml")]
    config: PathBuf,

    /// Model id, overriding the config file
    #[arg(long, env = "MODEL_ID")]
    model: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "myngl failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    info!("myngl v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_default(&cli.config);
    let model = cli.model.unwrap_or_else(|| config.agent.model.clone());

    let bridge = Arc::new(Bridge::new()?);
    let tools = Arc::new(ToolProvider::new(
        config.enabled_servers(),
        bridge,
        config.tools.options(),
        config.tools.cache,
    ));

    // Connect tool servers up front so the first request does not pay for it.
    if tools.is_cached() {
        let provider = Arc::clone(&tools);
        let capabilities = tokio::task::spawn_blocking(move || provider.capabilities()).await?;
        info!(tools = ?capabilities.names(), "tool capabilities ready");
    }

    let agent = cli.api_key.filter(|key| !key.is_empty()).map(|key| {
        let mut builder = AnthropicBackend::builder(key, &model)
            .max_tokens(config.agent.max_tokens)
            .temperature(config.agent.temperature);
        if let Some(system) = &config.agent.system {
            builder = builder.system(system);
        }
        let agent = ToolCallingAgent::new(builder.build(), tokio::runtime::Handle::current())
            .max_steps(config.agent.max_steps);
        Arc::new(agent) as Arc<dyn Agent>
    });
    if agent.is_none() {
        warn!("ANTHROPIC_API_KEY not set, chat requests will fail");
    }

    let app = api::router(AppState::new(agent, tools, model)).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
