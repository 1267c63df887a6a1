//! Margin Liquidation Bot
//!
//! Autonomous liquidator for a cross-margin lending protocol. Features:
//! - Streaming account feed with incremental updates
//! - Self-rebalancing inventory held in the quote asset
//! - Opportunistic wallet dust sweeping
//! - Random or risk-priority scan ordering with failure cooldowns

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liqbot_api::AggregatorClient;
use liqbot_chain::{Address, GatewayClient, MetadataRegistry, ProtocolClient};
use liqbot_core::{
    CooldownTracker, Engine, ErrorReporter, LiquidatorConfig, LogReporter, Rebalancer, Scanner,
    SwapExecutor, WebhookReporter,
};

/// Environment variable names.
mod env {
    pub const GATEWAY_URL: &str = "GATEWAY_URL";
    pub const AGGREGATOR_URL: &str = "AGGREGATOR_URL";
    pub const LIQUIDATOR_ACCOUNT: &str = "LIQUIDATOR_ACCOUNT";
    pub const WALLET_ADDRESS: &str = "WALLET_ADDRESS";
    pub const CONFIG_PATH: &str = "CONFIG_PATH";
    pub const ERROR_WEBHOOK_URL: &str = "ERROR_WEBHOOK_URL";
}

#[tokio::main]
async fn main() {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liqbot_core=debug,liqbot_chain=debug")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let env_config = load_env_config()?;

    let config = LiquidatorConfig::from_file(&env_config.config_path)?.with_profile_from_env();
    config.log_config();

    info!("Starting margin liquidation bot");

    let engine = initialize_components(env_config, &config).await?;

    info!("Bootstrapping...");
    let feed = engine.start().await?;

    info!("Starting main loop...");
    engine.run(feed).await
}

/// Connection endpoints and identities loaded from environment.
struct EnvConfig {
    gateway_url: String,
    aggregator_url: String,
    liquidator_account: Address,
    wallet_address: Address,
    config_path: String,
    error_webhook_url: Option<String>,
}

fn load_env_config() -> Result<EnvConfig> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let get_address = |name: &str| -> Result<Address> {
        get_env(name)?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", name, e))
    };

    Ok(EnvConfig {
        gateway_url: get_env(env::GATEWAY_URL)?,
        aggregator_url: get_env(env::AGGREGATOR_URL)?,
        liquidator_account: get_address(env::LIQUIDATOR_ACCOUNT)?,
        wallet_address: get_address(env::WALLET_ADDRESS)?,
        config_path: get_env(env::CONFIG_PATH).unwrap_or_else(|_| "liqbot.toml".to_string()),
        error_webhook_url: std::env::var(env::ERROR_WEBHOOK_URL).ok(),
    })
}

async fn initialize_components(env_config: EnvConfig, config: &LiquidatorConfig) -> Result<Engine> {
    info!("Initializing components...");

    let gateway = Arc::new(
        GatewayClient::connect(
            env_config.gateway_url.as_str(),
            env_config.liquidator_account,
            env_config.wallet_address,
        )
        .await
        .context("gateway connection failed")?,
    );
    let protocol: Arc<dyn ProtocolClient> = gateway.clone();
    info!(
        account = %env_config.liquidator_account.short(),
        wallet = %env_config.wallet_address.short(),
        banks = protocol.banks().len(),
        "Gateway connected"
    );

    let metadata = MetadataRegistry::new();

    let aggregator = Arc::new(AggregatorClient::new(env_config.aggregator_url.as_str()));
    let swapper = Arc::new(SwapExecutor::new(
        aggregator,
        protocol.clone(),
        config.rebalance.slippage_bps,
    ));

    let rebalancer = Arc::new(Rebalancer::new(
        protocol.clone(),
        swapper,
        metadata.clone(),
        config.quote_mint,
        config.native_mint,
        config.rebalance.clone(),
    ));

    let cooldown = Arc::new(CooldownTracker::new(config.scanner.cooldown()));
    let scanner = Arc::new(Scanner::new(
        protocol.clone(),
        metadata.clone(),
        cooldown,
        config.scanner.clone(),
    ));

    let reporter: Arc<dyn ErrorReporter> = match &env_config.error_webhook_url {
        Some(url) => Arc::new(WebhookReporter::new(url.clone())),
        None => Arc::new(LogReporter),
    };

    info!("All components initialized");

    Ok(Engine::new(
        gateway,
        protocol,
        metadata,
        rebalancer,
        scanner,
        reporter,
        config.timing.clone(),
    ))
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╦  ╦┌─┐ ╔╗ ┌─┐┌┬┐
    ║  ║│─┼┐╠╩╗│ │ │
    ╩═╝╩└─┘└╚═╝└─┘ ┴
    Margin Liquidation Bot v0.1.0
    "#
    );
}
