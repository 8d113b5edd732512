// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::LauncherNodeConfig;
use crate::eth_client::EthClient;
use crate::gas::NodeGasOracle;
use crate::metrics::LauncherMetrics;
use crate::send_loop::{SendLoop, SendLoopConfig};
use crate::server::handler::LauncherRequestHandler;
use crate::server::run_server;
use crate::store::{BlockCursorStore, LaunchLogStore};
use crate::subscribe_hub::SubscribeHub;
use crate::watcher::Watcher;
use anyhow::Context;
use ethers::types::U256;
use launcher_pg_db::{Db, DbArgs};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

// Wake signals queued while the send loop is mid-batch; extras are
// dropped, the periodic tick guarantees liveness.
const WAKE_CHANNEL_SIZE: usize = 16;

pub struct LauncherNodeHandle {
    // The send loop and watcher; they observe the token and drain.
    pub loop_handles: Vec<JoinHandle<()>>,
    // The API server; aborted once the loops are down.
    pub server_handle: JoinHandle<()>,
    pub cancel: CancellationToken,
}

pub async fn run_launcher_node(
    config: LauncherNodeConfig,
    registry: prometheus::Registry,
) -> anyhow::Result<LauncherNodeHandle> {
    let metrics = Arc::new(LauncherMetrics::new(&registry));

    let database_url: Url = config
        .database_url
        .parse()
        .context("invalid database-url")?;
    let db = Db::for_write(database_url, DbArgs::default()).await?;
    db.run_migrations(None).await?;

    let store = LaunchLogStore::new(db.clone());
    let cursor = BlockCursorStore::new(db);

    let eth_client = Arc::new(
        EthClient::new(
            &config.ethereum.ethereum_node_url,
            config.ethereum.chain_id,
            &config.ethereum.signers,
        )
        .context("failed to create Ethereum client")?,
    );

    let max_gas_price = match &config.gas.max_gas_price {
        Some(price) => Some(
            U256::from_dec_str(price).map_err(|e| anyhow::anyhow!("invalid max-gas-price: {e}"))?,
        ),
        None => None,
    };
    let gas_oracle = Arc::new(NodeGasOracle::new(
        eth_client.provider(),
        config.gas.urgent_gas_percent,
        max_gas_price,
    ));

    let hub = Arc::new(SubscribeHub::new());
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // Send loop
    let (wake_tx, wake_rx) = mpsc::channel(WAKE_CHANNEL_SIZE);
    let send_loop = SendLoop::new(
        store.clone(),
        eth_client.clone(),
        gas_oracle.clone(),
        hub.clone(),
        metrics.clone(),
        SendLoopConfig {
            tick_interval: Duration::from_secs(config.send_loop_tick_seconds),
            stale_pending_seconds: config.gas.stale_pending_seconds,
            gas_bump_percent: config.gas.gas_bump_percent,
            max_gas_price,
            batch_size: config.dispatch_batch_size,
        },
        wake_rx,
        wake_tx.clone(),
    );
    let send_loop_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        send_loop.run(send_loop_cancel).await;
    }));

    // Watcher
    let watcher = Watcher::new(
        store.clone(),
        cursor,
        eth_client.clone(),
        hub.clone(),
        metrics.clone(),
        Duration::from_secs(config.watcher_poll_seconds),
        config.confirmation_blocks,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to start watcher: {e}"))?;
    let watcher_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        watcher.run(watcher_cancel).await;
    }));

    // API server
    let socket_address = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        config.server_listen_port,
    );
    let handler = LauncherRequestHandler::new(store, hub, gas_oracle, wake_tx, metrics.clone());
    let server_handle = run_server(&socket_address, handler, metrics, registry);

    info!("launcher node started");
    Ok(LauncherNodeHandle {
        loop_handles: handles,
        server_handle,
        cancel,
    })
}
