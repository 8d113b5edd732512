// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::LauncherResult;
use crate::gas::{GasOracle, GasPrice};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use ethers::types::{Address, U256};
use launcher_schema::models::{LaunchLog, LaunchLogStatus};
use std::collections::BTreeMap;

// Well-known test key; never fund this account.
pub const TEST_SIGNER_KEY: &str =
    "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const TEST_SIGNER_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

pub fn test_signers() -> BTreeMap<String, String> {
    let mut signers = BTreeMap::new();
    signers.insert(TEST_SIGNER_ADDRESS.to_string(), TEST_SIGNER_KEY.to_string());
    signers
}

pub fn test_signer_address() -> Address {
    TEST_SIGNER_ADDRESS
        .parse()
        .expect("test signer address is valid")
}

/// An in-memory launch log row for hub and view tests.
pub fn sample_log(
    item_type: &str,
    item_id: &str,
    status: LaunchLogStatus,
    hash: Option<&str>,
) -> LaunchLog {
    let now = Utc::now();
    LaunchLog {
        id: 1,
        item_type: item_type.to_string(),
        item_id: item_id.to_string(),
        status,
        from_address: TEST_SIGNER_ADDRESS.to_string(),
        to_address: "0x2222222222222222222222222222222222222222".to_string(),
        value: BigDecimal::from(0),
        gas_price: BigDecimal::from(10_000_000_000u64),
        gas_limit: 100_000,
        nonce: None,
        hash: hash.map(|h| h.to_string()),
        data: vec![],
        is_urgent: false,
        err_msg: String::new(),
        gas_used: 0,
        executed_at: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Unique intent id so concurrently running tests never collide on the
/// live-intent index.
pub fn random_intent_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!("intent-{:016x}", rng.gen::<u64>())
}

pub fn init_tracing_for_testing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Oracle returning a constant price, for deterministic dispatch tests.
pub struct FixedGasOracle(pub GasPrice);

impl FixedGasOracle {
    pub fn with_prices(normal: u64, urgent: u64) -> Self {
        Self(GasPrice {
            normal: U256::from(normal),
            urgent: U256::from(urgent),
        })
    }
}

#[async_trait]
impl GasOracle for FixedGasOracle {
    async fn current_gas_price(&self) -> LauncherResult<GasPrice> {
        Ok(self.0)
    }
}
