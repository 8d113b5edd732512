// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request/reply shapes of the launcher API and the numeric conversions
//! between on-chain integers and the store's exact NUMERIC columns.

use crate::error::{LauncherError, LauncherResult};
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use ethers::types::U256;
use launcher_schema::models::{LaunchLog, LaunchLogStatus};
use serde::{Deserialize, Serialize};

/// Request to launch one transaction for a logical intent.
///
/// `value` and `gas_price` are decimal strings; an empty `value` means 0 and
/// an empty `gas_price` defers to the gas oracle. `data` is 0x-prefixed hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLogRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub gas_price: String,
    pub gas_limit: u64,
    #[serde(default)]
    pub data: String,
    pub item_type: String,
    pub item_id: String,
    #[serde(default)]
    pub is_urgent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLogsQuery {
    pub hash: Option<String>,
    pub item_type: Option<String>,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeQuery {
    pub item_type: String,
    pub item_id: String,
}

/// External view of a launch log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogView {
    pub item_type: String,
    pub item_id: String,
    pub status: LaunchLogStatus,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_price: String,
    pub gas_limit: u64,
    pub nonce: Option<i64>,
    pub gas_used: i64,
    pub executed_at: i64,
    pub err_msg: String,
}

impl From<&LaunchLog> for LogView {
    fn from(log: &LaunchLog) -> Self {
        Self {
            item_type: log.item_type.clone(),
            item_id: log.item_id.clone(),
            status: log.status,
            hash: log.hash.clone().unwrap_or_default(),
            from: log.from_address.clone(),
            to: log.to_address.clone(),
            value: log.value.with_scale(0).to_string(),
            gas_price: log.gas_price.with_scale(0).to_string(),
            gas_limit: log.gas_limit as u64,
            nonce: log.nonce,
            gas_used: log.gas_used,
            executed_at: log.executed_at,
            err_msg: log.err_msg.clone(),
        }
    }
}

/// One status frame pushed to subscribers, one per observed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeFrame {
    pub status: LaunchLogStatus,
    pub hash: String,
    pub item_type: String,
    pub item_id: String,
    pub err_msg: String,
}

impl SubscribeFrame {
    pub fn from_log(log: &LaunchLog) -> Self {
        Self {
            status: log.status,
            hash: log.hash.clone().unwrap_or_default(),
            item_type: log.item_type.clone(),
            item_id: log.item_id.clone(),
            err_msg: log.err_msg.clone(),
        }
    }
}

/// Reply delivered to a blocked Create caller.
pub type CreateOutcome = Result<LaunchLog, LauncherError>;

/// Convert an on-chain integer to an exact NUMERIC value.
pub fn u256_to_bigdecimal(v: U256) -> BigDecimal {
    let mut bytes = [0u8; 32];
    v.to_big_endian(&mut bytes);
    BigDecimal::from(BigInt::from_bytes_be(Sign::Plus, &bytes))
}

/// Convert a stored NUMERIC value back to an on-chain integer.
///
/// Stored values are integral and non-negative (enforced at create time),
/// so a failure here means the row was tampered with out of band.
pub fn bigdecimal_to_u256(v: &BigDecimal) -> LauncherResult<U256> {
    let normalized = v.with_scale(0);
    U256::from_dec_str(&normalized.to_string())
        .map_err(|e| LauncherError::InternalError(format!("numeric column out of range: {e}")))
}
