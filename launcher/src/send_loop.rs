// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The single scheduler that puts launch logs on the wire.
//!
//! Activated by the create API's wake signal or by a periodic tick, the
//! loop gathers dispatchable logs (fresh `CREATED` rows and `PENDING`
//! rows stuck past the stale threshold) and processes each one inside its
//! own repeatable-read transaction:
//!
//! - the target row is re-read `SELECT ... FOR UPDATE` and the state
//!   re-checked after the lock is acquired, so a concurrent watcher
//!   transition makes this dispatch a clean no-op;
//! - the broadcast happens inside the transaction, and the row is only
//!   committed once the node has accepted (or permanently rejected) the
//!   transaction;
//! - subscribers are notified strictly after commit.
//!
//! Exactly one send loop runs per process; nothing else assigns nonces or
//! creates `PENDING` rows.

use crate::error::{LauncherError, LauncherResult};
use crate::eth_client::EthClient;
use crate::gas::{bumped_gas_price, GasOracle};
use crate::metrics::LauncherMetrics;
use crate::store::{self, LaunchLogStore};
use crate::subscribe_hub::SubscribeHub;
use crate::types::{bigdecimal_to_u256, u256_to_bigdecimal};
use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address, U256};
use launcher_schema::models::{LaunchLog, LaunchLogStatus, NewLaunchLog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SendLoopConfig {
    pub tick_interval: Duration,
    pub stale_pending_seconds: u64,
    pub gas_bump_percent: u64,
    pub max_gas_price: Option<U256>,
    pub batch_size: i64,
}

pub struct SendLoop<P> {
    store: LaunchLogStore,
    eth_client: Arc<EthClient<P>>,
    gas_oracle: Arc<dyn GasOracle>,
    hub: Arc<SubscribeHub>,
    metrics: Arc<LauncherMetrics>,
    config: SendLoopConfig,
    wake_rx: mpsc::Receiver<()>,
    // Keeps the wake channel open even if every API handler is gone.
    _wake_tx: mpsc::Sender<()>,
}

/// Committed state change that still needs publishing.
enum DispatchEvent {
    Sent(LaunchLog),
    Failed(LaunchLog),
    Retried { successor: LaunchLog },
}

impl<P> SendLoop<P>
where
    P: JsonRpcClient + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: LaunchLogStore,
        eth_client: Arc<EthClient<P>>,
        gas_oracle: Arc<dyn GasOracle>,
        hub: Arc<SubscribeHub>,
        metrics: Arc<LauncherMetrics>,
        config: SendLoopConfig,
        wake_rx: mpsc::Receiver<()>,
        wake_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            store,
            eth_client,
            gas_oracle,
            hub,
            metrics,
            config,
            wake_rx,
            _wake_tx: wake_tx,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "send loop started (tick {:?}, stale threshold {}s)",
            self.config.tick_interval, self.config.stale_pending_seconds
        );
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("send loop cancelled");
                    break;
                }
                _ = self.wake_rx.recv() => {}
                _ = tick.tick() => {}
            }

            if let Err(e) = self.dispatch_batch().await {
                warn!("send loop batch failed, will retry on next activation: {e}");
            }
        }
    }

    pub(crate) async fn dispatch_batch(&self) -> LauncherResult<()> {
        let stale_before =
            Utc::now() - chrono::Duration::seconds(self.config.stale_pending_seconds as i64);
        let logs = self
            .store
            .find_dispatchable(stale_before, self.config.batch_size)
            .await?;
        if logs.is_empty() {
            return Ok(());
        }
        debug!("send loop picked up {} dispatchable logs", logs.len());

        for log in logs {
            let kind = match log.status {
                LaunchLogStatus::Created => "send",
                LaunchLogStatus::Pending => "retry",
                _ => continue,
            };
            let timer = self
                .metrics
                .dispatch_latency
                .with_label_values(&[kind])
                .start_timer();
            let outcome = match log.status {
                LaunchLogStatus::Created => self.dispatch_created(&log).await,
                LaunchLogStatus::Pending => self.retry_stale_pending(&log).await,
                _ => unreachable!(),
            };
            timer.observe_duration();

            match outcome {
                Ok(Some(event)) => self.publish_event(event),
                Ok(None) => {}
                Err(e) => {
                    self.metrics
                        .broadcast_errors
                        .with_label_values(&[e.error_type()])
                        .inc();
                    warn!("dispatch of log {} failed: {e}", log.id);
                }
            }
        }

        Ok(())
    }

    /// First broadcast of a `CREATED` log: assign a nonce, sign, send,
    /// and commit `PENDING` with the hash.
    async fn dispatch_created(&self, log: &LaunchLog) -> LauncherResult<Option<DispatchEvent>> {
        let from: Address = parse_stored_address(&log.from_address)?;
        let to: Address = parse_stored_address(&log.to_address)?;
        let value = bigdecimal_to_u256(&log.value)?;
        let gas_price = bigdecimal_to_u256(&log.gas_price)?;

        let mut conn = self
            .store
            .db()
            .connect()
            .await
            .map_err(|e| LauncherError::StorageError(format!("connection pool: {e:#}")))?;

        conn.build_transaction()
            .repeatable_read()
            .run(|conn| {
                async move {
                    let Some(locked) = store::lock_log_by_id(conn, log.id).await? else {
                        return Ok(None);
                    };
                    if locked.status != LaunchLogStatus::Created {
                        debug!("log {} no longer CREATED, skipping send", locked.id);
                        return Ok(None);
                    }

                    let stored_max =
                        store::max_nonce_for_address(conn, &locked.from_address).await?;
                    let node_pending = self.eth_client.pending_nonce(from).await?;
                    let nonce = next_nonce(node_pending, stored_max);

                    let (hash, raw) = self.eth_client.sign_legacy(
                        from,
                        to,
                        value,
                        gas_price,
                        locked.gas_limit as u64,
                        nonce,
                        locked.data.clone(),
                    )?;
                    let hash_hex = format!("{hash:#x}");

                    match self.eth_client.send_raw(raw).await {
                        Ok(_) => {}
                        Err(e) => match classify_broadcast_error(&e.to_string()) {
                            BroadcastErrorKind::AlreadyKnown => {
                                debug!("log {} already in mempool as {hash_hex}", locked.id);
                            }
                            BroadcastErrorKind::Transient => {
                                return Err(LauncherError::TransientProviderError(format!(
                                    "broadcast of log {}: {e}",
                                    locked.id
                                )));
                            }
                            BroadcastErrorKind::Permanent => {
                                let failed =
                                    store::mark_failed(conn, locked.id, &e.to_string()).await?;
                                return Ok(Some(DispatchEvent::Failed(failed)));
                            }
                        },
                    }

                    let sent = store::mark_pending(conn, locked.id, nonce as i64, &hash_hex).await?;
                    Ok(Some(DispatchEvent::Sent(sent)))
                }
                .scope_boxed()
            })
            .await
    }

    /// Gas-escalation retry of a stale `PENDING` log: retire the old row
    /// and broadcast a same-nonce replacement at a bumped price.
    ///
    /// The superseded row must leave `PENDING` before the successor is
    /// inserted: the store allows only one live row per intent, and both
    /// writes commit atomically anyway.
    async fn retry_stale_pending(&self, log: &LaunchLog) -> LauncherResult<Option<DispatchEvent>> {
        let from: Address = parse_stored_address(&log.from_address)?;
        let to: Address = parse_stored_address(&log.to_address)?;
        let value = bigdecimal_to_u256(&log.value)?;
        let old_price = bigdecimal_to_u256(&log.gas_price)?;

        let oracle_price = self.gas_oracle.current_gas_price().await?;
        let new_price = bumped_gas_price(
            old_price,
            oracle_price.urgent,
            self.config.gas_bump_percent,
            self.config.max_gas_price,
        );

        let mut conn = self
            .store
            .db()
            .connect()
            .await
            .map_err(|e| LauncherError::StorageError(format!("connection pool: {e:#}")))?;

        conn.build_transaction()
            .repeatable_read()
            .run(|conn| {
                async move {
                    let Some(locked) = store::lock_log_by_id(conn, log.id).await? else {
                        return Ok(None);
                    };
                    if locked.status != LaunchLogStatus::Pending {
                        // The watcher won the race while we waited on the lock.
                        debug!("log {} no longer PENDING, skipping retry", locked.id);
                        return Ok(None);
                    }

                    let old_hash = locked.hash.clone().ok_or_else(|| {
                        LauncherError::InternalError(format!(
                            "PENDING log {} has no hash",
                            locked.id
                        ))
                    })?;
                    let nonce = locked.nonce.ok_or_else(|| {
                        LauncherError::InternalError(format!(
                            "PENDING log {} has no nonce",
                            locked.id
                        ))
                    })?;

                    let (hash, raw) = self.eth_client.sign_legacy(
                        from,
                        to,
                        value,
                        new_price,
                        locked.gas_limit as u64,
                        nonce as u64,
                        locked.data.clone(),
                    )?;
                    let hash_hex = format!("{hash:#x}");

                    // Retire every live row of the intent (the locked row
                    // included) before the replacement becomes visible.
                    store::retire_other_pending(
                        conn,
                        &locked.item_type,
                        &locked.item_id,
                        &old_hash,
                    )
                    .await?;
                    store::mark_retried(conn, locked.id).await?;

                    let successor = store::insert_log(
                        conn,
                        &NewLaunchLog {
                            item_type: locked.item_type.clone(),
                            item_id: locked.item_id.clone(),
                            status: LaunchLogStatus::Pending,
                            from_address: locked.from_address.clone(),
                            to_address: locked.to_address.clone(),
                            value: locked.value.clone(),
                            gas_price: u256_to_bigdecimal(new_price),
                            gas_limit: locked.gas_limit,
                            nonce: Some(nonce),
                            hash: Some(hash_hex.clone()),
                            data: locked.data.clone(),
                            is_urgent: locked.is_urgent,
                        },
                    )
                    .await?;

                    match self.eth_client.send_raw(raw).await {
                        Ok(_) => {}
                        Err(e) => match classify_broadcast_error(&e.to_string()) {
                            BroadcastErrorKind::AlreadyKnown => {
                                debug!(
                                    "retry of log {} already in mempool as {hash_hex}",
                                    locked.id
                                );
                            }
                            BroadcastErrorKind::Transient => {
                                // Roll everything back; the row stays
                                // PENDING and the next tick tries again.
                                return Err(LauncherError::TransientProviderError(format!(
                                    "retry broadcast of log {}: {e}",
                                    locked.id
                                )));
                            }
                            BroadcastErrorKind::Permanent => {
                                let failed =
                                    store::mark_failed(conn, successor.id, &e.to_string())
                                        .await?;
                                return Ok(Some(DispatchEvent::Failed(failed)));
                            }
                        },
                    }

                    info!(
                        "retried log {} with gas price {} -> {}, new hash {hash_hex}",
                        locked.id, old_price, new_price
                    );
                    Ok(Some(DispatchEvent::Retried { successor }))
                }
                .scope_boxed()
            })
            .await
    }

    fn publish_event(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::Sent(log) => {
                self.metrics.logs_broadcast.inc();
                info!(
                    "log {} broadcast as {} with nonce {:?}",
                    log.id,
                    log.hash.as_deref().unwrap_or_default(),
                    log.nonce
                );
                self.hub.publish(&log, None);
            }
            DispatchEvent::Failed(log) => {
                self.metrics.logs_failed.inc();
                warn!("log {} failed permanently: {}", log.id, log.err_msg);
                self.hub.publish(&log, None);
            }
            DispatchEvent::Retried { successor } => {
                self.metrics.logs_retried.inc();
                self.hub.publish(&successor, None);
            }
        }
    }
}

/// Next nonce for a `from` address: the node's pending count, floored by
/// one past the highest nonce this store has ever assigned to the
/// address. The store side covers the node briefly forgetting its own
/// mempool; the node side covers external transactions from the same key.
pub(crate) fn next_nonce(node_pending: u64, stored_max: Option<i64>) -> u64 {
    let stored_next = stored_max.map(|n| n as u64 + 1).unwrap_or(0);
    node_pending.max(stored_next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BroadcastErrorKind {
    /// The node already has this exact transaction; treat as broadcast.
    AlreadyKnown,
    /// Worth retrying on a later tick with state rolled back.
    Transient,
    /// No retry can fix this; the log fails.
    Permanent,
}

/// Classify a node broadcast error by message. Unknown errors default to
/// transient: rolling back and retrying is always safe, failing is not.
pub(crate) fn classify_broadcast_error(message: &str) -> BroadcastErrorKind {
    const ALREADY_KNOWN: &[&str] = &["already known", "known transaction", "alreadyknown"];
    const PERMANENT: &[&str] = &[
        "invalid sender",
        "invalid signature",
        "intrinsic gas too low",
        "exceeds block gas limit",
        "insufficient funds",
        "invalid chain id",
        "oversized data",
    ];

    let message = message.to_lowercase();
    if ALREADY_KNOWN.iter().any(|needle| message.contains(needle)) {
        BroadcastErrorKind::AlreadyKnown
    } else if PERMANENT.iter().any(|needle| message.contains(needle)) {
        BroadcastErrorKind::Permanent
    } else {
        BroadcastErrorKind::Transient
    }
}

fn parse_stored_address(address: &str) -> LauncherResult<Address> {
    address
        .parse()
        .map_err(|e| LauncherError::InternalError(format!("stored address {address}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Nonce selection
    // ------------------------------------------------------------------

    #[test]
    fn test_next_nonce_fresh_address() {
        // Nothing stored, nothing pending on the node.
        assert_eq!(next_nonce(0, None), 0);
    }

    #[test]
    fn test_next_nonce_node_ahead() {
        // External transactions moved the node past our records.
        assert_eq!(next_nonce(7, Some(2)), 7);
    }

    #[test]
    fn test_next_nonce_store_ahead() {
        // The node has not seen our latest broadcast yet.
        assert_eq!(next_nonce(3, Some(5)), 6);
    }

    #[test]
    fn test_next_nonce_agreement() {
        // Stored max 4 means nonces 0..=4 are taken; node agrees.
        assert_eq!(next_nonce(5, Some(4)), 5);
    }

    // ------------------------------------------------------------------
    // Broadcast error classification
    // ------------------------------------------------------------------

    #[test]
    fn test_classify_already_known() {
        assert_eq!(
            classify_broadcast_error("(code: -32000, message: already known, data: None)"),
            BroadcastErrorKind::AlreadyKnown
        );
        assert_eq!(
            classify_broadcast_error("known transaction: 0xabc"),
            BroadcastErrorKind::AlreadyKnown
        );
    }

    #[test]
    fn test_classify_permanent() {
        for message in [
            "invalid sender",
            "intrinsic gas too low",
            "exceeds block gas limit",
            "insufficient funds for gas * price + value",
            "Invalid Chain Id",
        ] {
            assert_eq!(
                classify_broadcast_error(message),
                BroadcastErrorKind::Permanent,
                "{message} should be permanent"
            );
        }
    }

    #[test]
    fn test_classify_transient() {
        for message in [
            "connection refused",
            "nonce too low",
            "replacement transaction underpriced",
            "request timed out",
            "some error this code has never seen",
        ] {
            assert_eq!(
                classify_broadcast_error(message),
                BroadcastErrorKind::Transient,
                "{message} should be transient"
            );
        }
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(
            classify_broadcast_error("ALREADY KNOWN"),
            BroadcastErrorKind::AlreadyKnown
        );
        assert_eq!(
            classify_broadcast_error("Insufficient Funds"),
            BroadcastErrorKind::Permanent
        );
    }
}
