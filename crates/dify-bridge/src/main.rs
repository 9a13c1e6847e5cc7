//! dify-bridge daemon - OpenAI-compatible endpoint for the portal chat API

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dify_bridge::BridgeError;
use dify_bridge::auth::{AuthProvider, CredentialBundle, PortalAuthProvider};
use dify_bridge::config::Config;
use dify_bridge::error::Result;
use dify_bridge::proxy::BridgeServer;

/// dify-bridge - Serve a Dify-based portal app as an OpenAI chat endpoint
#[derive(Parser)]
#[command(name = "dify-bridge")]
#[command(about = "Serve a Dify-based portal app as an OpenAI-compatible chat endpoint")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Portal config URL carrying userToken and appId
    #[arg(long, env = "CONFIG_URL")]
    pub config_url: Option<String>,

    /// Address to listen on, e.g. 0.0.0.0:5000
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen: Option<String>,

    /// Delete backend conversations after each turn ("true" to enable)
    #[arg(long, env = "AUTO_DELETE_CONVERSATIONS")]
    pub auto_delete: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    let config_url = match config.backend.config_url.clone() {
        Some(url) if !url.trim().is_empty() => url,
        _ => prompt_config_url().await?,
    };

    tracing::info!("Initializing portal credentials...");
    let provider = PortalAuthProvider::new(&config.backend, config_url)?;
    let credentials = provider.credentials().await?;
    log_startup_summary(&credentials);

    let server = BridgeServer::new(config, Arc::new(credentials))?;
    server.serve().await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dify_bridge=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.config_url {
        config.backend.config_url = Some(url.clone());
    }
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(flag) = &cli.auto_delete {
        config.backend.auto_delete_conversations = flag.trim().eq_ignore_ascii_case("true");
    }
}

async fn prompt_config_url() -> Result<String> {
    print!("Enter the portal config URL: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;

    let url = line.trim();
    if url.is_empty() {
        return Err(BridgeError::Config(
            "A config URL is required (--config-url, CONFIG_URL or backend.config_url)"
                .to_string(),
        ));
    }
    Ok(url.to_string())
}

fn log_startup_summary(credentials: &CredentialBundle) {
    let cookie_names: Vec<&str> = credentials
        .cookies
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();

    tracing::info!("Credentials initialized");
    tracing::info!("  Model: {}", credentials.model);
    tracing::info!("  UID: {}", credentials.uid);
    tracing::info!("  Token: {}", credentials.masked_token());
    tracing::info!("  Cookies: {}", cookie_names.join(", "));
}
