// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain watcher: follows the chain forward from the stored block cursor
//! and reconciles confirmed receipts back into the launch log store.
//!
//! Receipts are matched to logs by transaction hash. A matching log is
//! transitioned out of `PENDING` under the same row lock the send loop
//! uses, so replays after a restart and races with an in-flight retry
//! both degrade to clean no-ops. The cursor only advances once a block's
//! receipts have all been applied, which makes the watcher resumable
//! from persistent state alone.

use crate::error::{LauncherError, LauncherResult};
use crate::eth_client::EthClient;
use crate::metrics::LauncherMetrics;
use crate::retry_with_backoff;
use crate::store::{self, BlockCursorStore, LaunchLogStore};
use crate::subscribe_hub::SubscribeHub;
use diesel_async::scoped_futures::ScopedFutureExt;
use ethers::providers::JsonRpcClient;
use ethers::types::{TransactionReceipt, U64};
use launcher_schema::models::{LaunchLog, LaunchLogStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RPC_RETRY_MAX_ELAPSED: Duration = Duration::from_secs(30);

pub struct Watcher<P> {
    store: LaunchLogStore,
    cursor: BlockCursorStore,
    eth_client: Arc<EthClient<P>>,
    hub: Arc<SubscribeHub>,
    metrics: Arc<LauncherMetrics>,
    poll_interval: Duration,
    confirmation_blocks: u64,
    // Mirrors the persisted cursor so redundant writes are skipped; only
    // monotonically increasing values are committed.
    last_saved_block: Mutex<i64>,
}

impl<P> Watcher<P>
where
    P: JsonRpcClient + 'static,
{
    pub async fn new(
        store: LaunchLogStore,
        cursor: BlockCursorStore,
        eth_client: Arc<EthClient<P>>,
        hub: Arc<SubscribeHub>,
        metrics: Arc<LauncherMetrics>,
        poll_interval: Duration,
        confirmation_blocks: u64,
    ) -> LauncherResult<Self> {
        cursor.ensure_initialized().await?;
        let last_saved_block = cursor.get().await?;

        Ok(Self {
            store,
            cursor,
            eth_client,
            hub,
            metrics,
            poll_interval,
            confirmation_blocks,
            last_saved_block: Mutex::new(last_saved_block),
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "watcher started from block {} (poll {:?}, {} confirmation blocks)",
            *self.last_saved_block.lock().unwrap(),
            self.poll_interval,
            self.confirmation_blocks
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("watcher cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Err(e) = self.catch_up(&cancel).await {
                // The next poll acts as the reconnect backoff; the cursor
                // makes any replayed receipts idempotent.
                warn!("watcher error, resuming from cursor: {e}");
            }
        }
    }

    /// Apply every block between the cursor and the confirmed head.
    async fn catch_up(&self, cancel: &CancellationToken) -> LauncherResult<()> {
        let latest = self.eth_client.latest_block_number().await?;
        self.metrics.eth_node_connected.set(1);
        let target = latest.saturating_sub(self.confirmation_blocks);

        let mut next = (*self.last_saved_block.lock().unwrap() + 1) as u64;
        while next <= target && !cancel.is_cancelled() {
            let fetched = match retry_with_backoff!(
                self.eth_client.block_receipts(next),
                RPC_RETRY_MAX_ELAPSED
            ) {
                Ok(fetched) => fetched,
                Err(e) => {
                    self.metrics.eth_node_connected.set(0);
                    return Err(e);
                }
            };
            let Some((timestamp, receipts)) = fetched else {
                // The node no longer agrees this block exists; try again
                // on the next poll.
                break;
            };

            debug!("watcher applying block {next} ({} receipts)", receipts.len());
            for receipt in &receipts {
                if let Some(updated) = self.apply_receipt(receipt, timestamp).await? {
                    self.hub.publish(&updated, None);
                }
            }

            self.save_block_number(next as i64).await;
            next += 1;
        }

        Ok(())
    }

    /// Match one receipt against the store and apply the terminal status.
    /// Returns the updated row when this call performed the transition.
    pub(crate) async fn apply_receipt(
        &self,
        receipt: &TransactionReceipt,
        block_timestamp: u64,
    ) -> LauncherResult<Option<LaunchLog>> {
        let hash_hex = format!("{:#x}", receipt.transaction_hash);
        let Some(log) = self.store.get_by_hash(&hash_hex).await? else {
            return Ok(None);
        };

        let (status, err_msg) = receipt_outcome(receipt.status);
        let gas_used = receipt.gas_used.map(|g| g.as_u64() as i64).unwrap_or(0);

        let mut conn = self
            .store
            .db()
            .connect()
            .await
            .map_err(|e| LauncherError::StorageError(format!("connection pool: {e:#}")))?;

        let updated = conn
            .build_transaction()
            .repeatable_read()
            .run(|conn| {
                async move {
                    let Some(locked) = store::lock_log_by_id(conn, log.id).await? else {
                        return Ok::<_, LauncherError>(None);
                    };
                    if locked.status != LaunchLogStatus::Pending {
                        // Already terminal (replayed receipt) or retired
                        // under us while we waited on the lock.
                        debug!("log {} is {}, ignoring receipt", locked.id, locked.status);
                        return Ok::<_, LauncherError>(None);
                    }

                    let updated = store::mark_executed(
                        conn,
                        locked.id,
                        status,
                        gas_used,
                        block_timestamp as i64,
                        err_msg,
                    )
                    .await?;
                    Ok(Some(updated))
                }
                .scope_boxed()
            })
            .await?;

        if let Some(updated) = &updated {
            self.metrics.watcher_receipts_matched.inc();
            match updated.status {
                LaunchLogStatus::Success => self.metrics.logs_success.inc(),
                LaunchLogStatus::Failed => self.metrics.logs_failed.inc(),
                _ => {}
            }
            info!(
                "tx {} for log {} finished with {}",
                hash_hex, updated.id, updated.status
            );
        }

        Ok(updated)
    }

    /// Persist the cursor, skipping values at or below what is already
    /// saved. The in-memory cache keeps redundant round trips off the
    /// store on replays.
    async fn save_block_number(&self, block_number: i64) {
        {
            let last = self.last_saved_block.lock().unwrap();
            if block_number <= *last {
                return;
            }
        }

        match self.cursor.increase_to(block_number).await {
            Ok(_) => {
                *self.last_saved_block.lock().unwrap() = block_number;
                self.metrics.last_processed_block.set(block_number);
                debug!("saved block number {block_number}");
            }
            Err(e) => {
                warn!("save block number {block_number} failed: {e}");
            }
        }
    }
}

/// Map a receipt's status field to the log's terminal state.
fn receipt_outcome(status: Option<U64>) -> (LaunchLogStatus, &'static str) {
    if status == Some(U64::one()) {
        (LaunchLogStatus::Success, "")
    } else {
        (LaunchLogStatus::Failed, "transaction reverted")
    }
}
