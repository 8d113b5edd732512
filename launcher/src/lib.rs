// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod error;
pub mod eth_client;
pub mod gas;
pub mod metrics;
pub mod node;
pub mod send_loop;
pub mod server;
pub mod store;
pub mod subscribe_hub;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub mod eth_mock_provider;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod e2e_tests;

/// Re-run a fallible async operation with jittered exponential backoff
/// until it succeeds or `$max_elapsed` has passed, then surface the last
/// error. Every failure counts as retryable here; callers that can tell
/// permanent errors apart must not route them through this macro.
#[macro_export]
macro_rules! retry_with_backoff {
    ($op:expr, $max_elapsed:expr) => {{
        let policy = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(250),
            max_interval: std::time::Duration::from_secs(60),
            max_elapsed_time: Some($max_elapsed),
            ..Default::default()
        };
        backoff::future::retry(policy, || async {
            $op.await.map_err(|e| {
                tracing::debug!("operation failed, backing off: {e:?}");
                backoff::Error::transient(e)
            })
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    // A node that is unreachable for the first two polls and then serves
    // the block, the shape of outage the watcher rides out.
    async fn fetch_block_flaky(attempts: &AtomicU32) -> anyhow::Result<u64> {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(anyhow::anyhow!("node unreachable"))
        } else {
            Ok(42)
        }
    }

    async fn fetch_block_down() -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("connection refused"))
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let block =
            retry_with_backoff!(fetch_block_flaky(&attempts), Duration::from_secs(5)).unwrap();
        assert_eq!(block, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_surfaces_last_error_at_deadline() {
        let started = Instant::now();
        let err = retry_with_backoff!(fetch_block_down(), Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        // The deadline bounds the whole attempt, not each try.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
