// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use launcher::config::{Config, LauncherNodeConfig};
use launcher::node::run_launcher_node;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LauncherNodeConfig::load(&args.config_path)?.finalize()?;
    info!(
        "starting launcher (chain id {}, {} signer(s))",
        config.ethereum.chain_id,
        config.ethereum.signers.len()
    );

    let registry = prometheus::Registry::new();
    let node = run_launcher_node(config, registry).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight work");
    node.cancel.cancel();
    for handle in node.loop_handles {
        let _ = handle.await;
    }
    node.server_handle.abort();
    let _ = node.server_handle.await;

    Ok(())
}
