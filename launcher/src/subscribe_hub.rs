// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of launch log status changes to interested parties.
//!
//! The hub maps an intent key to the set of handlers currently watching
//! that intent: open streaming subscriptions and blocked Create callers.
//! The lock is held only to mutate the set or snapshot it; delivery
//! happens outside the lock and every send is non-blocking, so a slow or
//! gone subscriber can never stall the send loop or the watcher.

use crate::error::LauncherError;
use crate::types::{CreateOutcome, SubscribeFrame};
use launcher_schema::models::{LaunchLog, LaunchLogStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A registered status consumer.
#[derive(Clone)]
pub enum StatusHandler {
    /// Open subscription: receives one frame per observed transition.
    Streaming(mpsc::Sender<SubscribeFrame>),
    /// Blocked Create caller: resolved by the first status that is final
    /// from the caller's perspective (PENDING, SUCCESS or FAILED).
    OneShot(mpsc::Sender<CreateOutcome>),
}

#[derive(Default)]
struct HubInner {
    next_handle: u64,
    data: HashMap<String, HashMap<u64, StatusHandler>>,
}

#[derive(Default)]
pub struct SubscribeHub {
    inner: Mutex<HubInner>,
}

/// Removes its handler from the hub when dropped, so a cancelled caller
/// or a closed subscription deregisters without extra bookkeeping.
pub struct SubscriptionGuard {
    hub: Arc<SubscribeHub>,
    key: String,
    handle: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.remove(&self.key, self.handle);
    }
}

impl SubscribeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, key: &str, handler: StatusHandler) -> SubscriptionGuard {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            let handle = inner.next_handle;
            inner.next_handle += 1;
            inner
                .data
                .entry(key.to_string())
                .or_default()
                .insert(handle, handler);
            handle
        };
        debug!("registered handler {handle} for {key}");

        SubscriptionGuard {
            hub: self.clone(),
            key: key.to_string(),
            handle,
        }
    }

    fn remove(&self, key: &str, handle: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handlers) = inner.data.get_mut(key) {
            handlers.remove(&handle);
            if handlers.is_empty() {
                inner.data.remove(key);
            }
        }
    }

    /// Push a committed status change to every handler watching the log's
    /// intent. Best-effort per handler: a full or closed receiver only
    /// loses its own frame.
    pub fn publish(&self, log: &LaunchLog, err: Option<&LauncherError>) {
        let key = log.intent_key();

        let handlers: Vec<(u64, StatusHandler)> = {
            let inner = self.inner.lock().unwrap();
            match inner.data.get(&key) {
                Some(handlers) => handlers
                    .iter()
                    .map(|(handle, handler)| (*handle, handler.clone()))
                    .collect(),
                None => {
                    debug!("no subscriber handlers found for log {}", log.id);
                    return;
                }
            }
        };

        for (handle, handler) in handlers {
            match handler {
                StatusHandler::Streaming(sender) => {
                    if sender.try_send(SubscribeFrame::from_log(log)).is_err() {
                        warn!(
                            "dropping status frame for log {} (subscriber {handle} full or gone)",
                            log.id
                        );
                    }
                }
                StatusHandler::OneShot(sender) => {
                    let outcome = match err {
                        Some(e) => Some(Err(e.clone())),
                        None if resolves_one_shot(log.status) => Some(Ok(log.clone())),
                        None => None,
                    };
                    if let Some(outcome) = outcome {
                        // Capacity one; a second resolution attempt is a no-op.
                        let _ = sender.try_send(outcome);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn handler_count(&self, key: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.data.get(key).map(|h| h.len()).unwrap_or(0)
    }
}

/// PENDING means the transaction is on the wire, which is the success
/// reply for a Create caller; RETRIED keeps the caller waiting on the
/// successor row.
fn resolves_one_shot(status: LaunchLogStatus) -> bool {
    matches!(
        status,
        LaunchLogStatus::Pending | LaunchLogStatus::Success | LaunchLogStatus::Failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_log;

    #[test]
    fn test_one_shot_resolution_statuses() {
        assert!(resolves_one_shot(LaunchLogStatus::Pending));
        assert!(resolves_one_shot(LaunchLogStatus::Success));
        assert!(resolves_one_shot(LaunchLogStatus::Failed));
        assert!(!resolves_one_shot(LaunchLogStatus::Created));
        assert!(!resolves_one_shot(LaunchLogStatus::Retried));
    }

    #[tokio::test]
    async fn test_streaming_handler_receives_frames() {
        let hub = Arc::new(SubscribeHub::new());
        let log = sample_log("T", "a", LaunchLogStatus::Pending, Some("0xabc"));

        let (tx, mut rx) = mpsc::channel(8);
        let _guard = hub.register(&log.intent_key(), StatusHandler::Streaming(tx));

        hub.publish(&log, None);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.status, LaunchLogStatus::Pending);
        assert_eq!(frame.hash, "0xabc");
        assert_eq!(frame.item_type, "T");
        assert_eq!(frame.item_id, "a");
    }

    #[tokio::test]
    async fn test_one_shot_skips_retried_resolves_on_pending() {
        let hub = Arc::new(SubscribeHub::new());
        let retried = sample_log("T", "a", LaunchLogStatus::Retried, Some("0xold"));
        let pending = sample_log("T", "a", LaunchLogStatus::Pending, Some("0xnew"));

        let (tx, mut rx) = mpsc::channel(1);
        let _guard = hub.register(&retried.intent_key(), StatusHandler::OneShot(tx));

        hub.publish(&retried, None);
        assert!(rx.try_recv().is_err());

        hub.publish(&pending, None);
        let outcome = rx.recv().await.unwrap().unwrap();
        assert_eq!(outcome.hash.as_deref(), Some("0xnew"));
    }

    #[tokio::test]
    async fn test_one_shot_receives_error() {
        let hub = Arc::new(SubscribeHub::new());
        let log = sample_log("T", "a", LaunchLogStatus::Created, None);

        let (tx, mut rx) = mpsc::channel(1);
        let _guard = hub.register(&log.intent_key(), StatusHandler::OneShot(tx));

        hub.publish(
            &log,
            Some(&LauncherError::StorageError("connection lost".to_string())),
        );
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_guard_drop_deregisters_and_empty_key_is_removed() {
        let hub = Arc::new(SubscribeHub::new());
        let key = "Type:T-ID:a";

        let (tx, _rx) = mpsc::channel(1);
        let guard = hub.register(key, StatusHandler::Streaming(tx));
        assert_eq!(hub.handler_count(key), 1);

        drop(guard);
        assert_eq!(hub.handler_count(key), 0);
    }

    #[tokio::test]
    async fn test_full_streaming_buffer_does_not_block_publish() {
        let hub = Arc::new(SubscribeHub::new());
        let log = sample_log("T", "a", LaunchLogStatus::Pending, Some("0xabc"));

        let (tx, mut rx) = mpsc::channel(1);
        let _guard = hub.register(&log.intent_key(), StatusHandler::Streaming(tx));

        // Second publish overflows the buffer and must drop, not block.
        hub.publish(&log, None);
        hub.publish(&log, None);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_multiple_handlers() {
        let hub = Arc::new(SubscribeHub::new());
        let log = sample_log("T", "a", LaunchLogStatus::Success, Some("0xabc"));

        let (tx_a, mut rx_a) = mpsc::channel(1);
        let (tx_b, mut rx_b) = mpsc::channel(1);
        let _guard_a = hub.register(&log.intent_key(), StatusHandler::Streaming(tx_a));
        let _guard_b = hub.register(&log.intent_key(), StatusHandler::OneShot(tx_b));

        hub.publish(&log, None);

        assert_eq!(rx_a.recv().await.unwrap().status, LaunchLogStatus::Success);
        assert!(rx_b.recv().await.unwrap().is_ok());
    }
}
