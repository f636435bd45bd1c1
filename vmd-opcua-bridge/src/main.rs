//! VMD alarm to OPC UA bridge.

use anyhow::{Context, Result};
use clap::Parser;

use vmd_common::init_tracing;
use vmd_opcua_bridge::{BridgeArgs, BridgeRunner, VmdBridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    let config = VmdBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    init_tracing(&args.logging(&config.logging)).context("Failed to initialize logging")?;

    BridgeRunner::new(config)
        .run()
        .await
        .context("Bridge failed to start")
}
