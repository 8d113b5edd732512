// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 30., 60., 120.,
];

#[derive(Clone, Debug)]
pub struct LauncherMetrics {
    pub(crate) requests_received: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,

    pub(crate) logs_created: IntCounter,
    pub(crate) logs_broadcast: IntCounter,
    pub(crate) logs_retried: IntCounter,
    pub(crate) logs_success: IntCounter,
    pub(crate) logs_failed: IntCounter,

    pub(crate) broadcast_errors: IntCounterVec,
    pub(crate) dispatch_latency: HistogramVec,

    pub(crate) watcher_receipts_matched: IntCounter,
    pub(crate) last_processed_block: IntGauge,
    pub(crate) eth_node_connected: IntGauge,
}

impl LauncherMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            requests_received: register_int_counter_vec_with_registry!(
                "launcher_requests_received",
                "Total requests received, by route",
                &["route"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "launcher_err_requests",
                "Total failed requests, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            logs_created: register_int_counter_with_registry!(
                "launcher_logs_created",
                "Launch logs accepted by the create API",
                registry,
            )
            .unwrap(),
            logs_broadcast: register_int_counter_with_registry!(
                "launcher_logs_broadcast",
                "First broadcasts that reached the node (CREATED -> PENDING)",
                registry,
            )
            .unwrap(),
            logs_retried: register_int_counter_with_registry!(
                "launcher_logs_retried",
                "Gas-escalation retries (PENDING -> RETRIED + new PENDING)",
                registry,
            )
            .unwrap(),
            logs_success: register_int_counter_with_registry!(
                "launcher_logs_success",
                "Launch logs confirmed successful on chain",
                registry,
            )
            .unwrap(),
            logs_failed: register_int_counter_with_registry!(
                "launcher_logs_failed",
                "Launch logs that ended FAILED (revert or permanent send error)",
                registry,
            )
            .unwrap(),
            broadcast_errors: register_int_counter_vec_with_registry!(
                "launcher_broadcast_errors",
                "Broadcast errors, by classification",
                &["kind"],
                registry,
            )
            .unwrap(),
            dispatch_latency: register_histogram_vec_with_registry!(
                "launcher_dispatch_latency_seconds",
                "Time spent processing one dispatchable log",
                &["kind"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            watcher_receipts_matched: register_int_counter_with_registry!(
                "launcher_watcher_receipts_matched",
                "Receipts the watcher matched to a launch log",
                registry,
            )
            .unwrap(),
            last_processed_block: register_int_gauge_with_registry!(
                "launcher_last_processed_block",
                "Highest block fully applied by the watcher",
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "launcher_eth_node_connected",
                "Whether the last Ethereum node call succeeded",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
