//! HueFlow bridge host
//!
//! Runs a bridge against an MQTT broker, pairs with a new bridge, or prints
//! the effective configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use hueflow_core::config::{BridgeConfig, Config, ConfigBuilder, ENV_PREFIX};
use hueflow_core::logging;
use hueflow_devices::protocols::{HttpConnector, MemoryBus, MqttBus, VirtualBridge};
use hueflow_devices::{BridgeConnector, MessageBus};
use hueflow_engine::{BridgeController, PairingCoordinator};

const VIRTUAL_ADDRESS: &str = "virtual";
const VIRTUAL_TOKEN: &str = "virtual-token";

#[derive(Parser, Debug)]
#[command(name = "hueflow")]
#[command(about = "Bridge Hue lights to an MQTT bus")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Put the bridge's lights on the bus until interrupted
    Run {
        /// Use an in-memory bridge and bus instead of the network
        #[arg(long = "virtual")]
        use_virtual: bool,
    },
    /// Pair with the bridge at ADDRESS and print the issued token
    Pair {
        /// Bridge address, e.g. 192.168.1.20
        address: String,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut builder = ConfigBuilder::new().with_environment_prefix(ENV_PREFIX);
    if let Some(path) = path {
        builder = builder.with_config_file(path);
    }
    builder.build().context("loading configuration")
}

/// Bridge settings for the in-memory bridge, which needs no real credentials
fn virtual_settings(bridge: &BridgeConfig) -> BridgeConfig {
    BridgeConfig {
        address: Some(VIRTUAL_ADDRESS.to_string()),
        auth_token: Some(VIRTUAL_TOKEN.to_string()),
        ..bridge.clone()
    }
}

/// Effective configuration as TOML, headed by the compiled transports
fn render_config(config: &Config) -> Result<String> {
    Ok(format!(
        "# transports: {}\n{}",
        hueflow_devices::available_protocols().join(", "),
        redacted(config).to_toml()?
    ))
}

fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if config.mqtt.password.is_some() {
        config.mqtt.password = Some("********".to_string());
    }
    config
}

async fn run(config: Config, use_virtual: bool) -> Result<()> {
    let (connector, bus, settings): (Arc<dyn BridgeConnector>, Arc<dyn MessageBus>, BridgeConfig) =
        if use_virtual {
            let bridge = VirtualBridge::new("HueFlow virtual bridge")
                .with_light("Living room")
                .with_light("Kitchen")
                .with_token(VIRTUAL_TOKEN);
            (
                Arc::new(bridge),
                Arc::new(MemoryBus::new()),
                virtual_settings(&config.bridge),
            )
        } else {
            (
                Arc::new(HttpConnector::new(config.bridge.request_timeout())?),
                Arc::new(MqttBus::connect(&config.mqtt)?),
                config.bridge.clone(),
            )
        };

    let controller =
        BridgeController::new(connector, bus).with_pairing(config.pairing.clone());
    if let Err(e) = controller.start(&settings).await {
        controller.stop().await?;
        return Err(e).context("starting bridge");
    }

    info!("Bridge running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("Shutting down");
    controller.stop().await?;
    Ok(())
}

async fn pair(config: Config, address: &str) -> Result<()> {
    let connector = HttpConnector::new(config.bridge.request_timeout())?;
    let coordinator = PairingCoordinator::new(Arc::new(connector), &config.pairing);
    let token = coordinator
        .pair(address)
        .await
        .with_context(|| format!("pairing with {}", address))?;
    println!("{}", token);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    if cli.verbose {
        logging::init_with_filter("debug")?;
    } else {
        logging::init_from_config(&config.logging)?;
    }
    hueflow_devices::init()?;

    match cli.command {
        Command::Run { use_virtual } => run(config, use_virtual).await,
        Command::Pair { address } => pair(config, &address).await,
        Command::Config => {
            print!("{}", render_config(&config)?);
            Ok(())
        }
    }
}
