use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use wechat_relay::Relay;
use wechat_relay::api::{ApiServer, ApiServerConfig, AppState};
use wechat_relay::config::{DEFAULT_CONFIG_PATH, RelayConfig};
use wechat_relay::logging::init_logging;
use wechat_relay::stream::{RouteMatcher, resolve_stream_url};
use wechat_relay::utils::mask;

/// Filter used with `--verbose`.
const VERBOSE_LOG_FILTER: &str = "wechat_relay=debug,wechat_api=debug,tower_http=debug";

/// Relay Gotify notifications to WeChat template messages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging for the relay crates
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and forward the Gotify message stream
    Run,
    /// Validate the configuration and print the stream setup
    Check,
    /// Print the markdown status page
    StatusPage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match args.command {
        Command::Run => run(&args.config, args.verbose).await,
        Command::Check => check(&args.config),
        Command::StatusPage => status_page(&args.config).await,
    }
}

fn load(path: &Path) -> anyhow::Result<RelayConfig> {
    RelayConfig::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

async fn run(config_path: &Path, verbose: bool) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if verbose {
        config.logging.filter = VERBOSE_LOG_FILTER.to_string();
    }
    let _guard = init_logging(&config.logging)?;
    wechat_api::install_rustls_provider();

    info!("Starting wechat-relay {}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path.display(), "Using configuration file");

    let enabled = config.enabled;
    let server_config = ApiServerConfig::from(&config.server);

    let relay = Arc::new(Relay::new());
    relay.set_config(config).await?;
    if enabled {
        relay.enable().await?;
    } else {
        info!("Relay starts disabled; enable it with POST /api/enable");
    }

    let server = Arc::new(ApiServer::new(server_config, AppState::new(relay.clone())));
    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = &mut serving => {
            relay.disable().await?;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("API server failed"),
                Err(e) => Err(e).context("API server task failed"),
            };
        }
        result = wait_for_shutdown(&relay, config_path) => result?,
    }

    info!("Shutting down");
    server.shutdown();
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server stopped with an error"),
        Err(e) => error!(error = %e, "API server task failed"),
    }
    relay.disable().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM. SIGHUP reloads the configuration file.
#[cfg(unix)]
async fn wait_for_shutdown(relay: &Relay, config_path: &Path) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                return Ok(());
            }
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => reload(relay, config_path).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_relay: &Relay, _config_path: &Path) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}

#[cfg(unix)]
async fn reload(relay: &Relay, config_path: &Path) {
    info!(path = %config_path.display(), "Reloading configuration");
    let result = match RelayConfig::load(config_path) {
        Ok(config) => relay.set_config(config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => info!("Configuration reloaded"),
        Err(e) => warn!(error = %e, "Reload failed, keeping the running configuration"),
    }
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let recipients = config.effective_recipients();

    println!("Configuration OK: {}", config_path.display());
    println!("Recipients:");
    for recipient in &recipients {
        println!("  - {}: {}", recipient.name, mask(&recipient.openid));
    }

    if config.stream_enabled() {
        let url = resolve_stream_url(
            &config.stream.gotify_url,
            &mask(&config.stream.client_token),
        )?;
        let matcher = RouteMatcher::new(&config.stream.routes, &recipients)?;

        println!("Stream URL: {url}");
        println!("Routes:");
        for route in matcher.describe() {
            println!("  - {route}");
        }
    } else {
        println!("Stream: disabled (no client token)");
    }
    Ok(())
}

async fn status_page(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let base_url = format!(
        "http://{}:{}",
        config.server.bind_address, config.server.port
    );

    let relay = Relay::new();
    relay.set_config(config).await?;
    println!("{}", relay.display(&base_url).await);
    Ok(())
}
