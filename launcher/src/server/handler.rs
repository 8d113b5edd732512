// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{LauncherError, LauncherResult};
use crate::gas::{GasOracle, GasPrice};
use crate::metrics::LauncherMetrics;
use crate::store::LaunchLogStore;
use crate::subscribe_hub::{StatusHandler, SubscribeHub, SubscriptionGuard};
use crate::types::{
    u256_to_bigdecimal, CreateLogRequest, GetLogsQuery, LogView, SubscribeFrame,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use launcher_schema::models::{intent_key, LaunchLogStatus, NewLaunchLog};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

// Buffered frames per streaming subscriber before frames start dropping.
const SUBSCRIBE_CHANNEL_SIZE: usize = 64;

#[async_trait]
pub trait LauncherRequestHandlerTrait {
    // Validates and persists a new launch intent, then blocks until the
    // transaction is on the wire (first PENDING) or terminally failed.
    async fn handle_create(&self, msg: CreateLogRequest) -> LauncherResult<LogView>;
    // Read-only lookup by hash or by (item_type, item_id).
    async fn handle_get(&self, query: GetLogsQuery) -> LauncherResult<Vec<LogView>>;
    // Opens a status stream for one intent.
    fn handle_subscribe(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> (SubscriptionGuard, mpsc::Receiver<SubscribeFrame>);
}

pub struct LauncherRequestHandler {
    store: LaunchLogStore,
    hub: Arc<SubscribeHub>,
    gas_oracle: Arc<dyn GasOracle>,
    wake: mpsc::Sender<()>,
    metrics: Arc<LauncherMetrics>,
}

impl LauncherRequestHandler {
    pub fn new(
        store: LaunchLogStore,
        hub: Arc<SubscribeHub>,
        gas_oracle: Arc<dyn GasOracle>,
        wake: mpsc::Sender<()>,
        metrics: Arc<LauncherMetrics>,
    ) -> Self {
        Self {
            store,
            hub,
            gas_oracle,
            wake,
            metrics,
        }
    }
}

#[async_trait]
impl LauncherRequestHandlerTrait for LauncherRequestHandler {
    async fn handle_create(&self, msg: CreateLogRequest) -> LauncherResult<LogView> {
        let oracle_price = if msg.gas_price.is_empty() {
            Some(self.gas_oracle.current_gas_price().await?)
        } else {
            None
        };
        let new_log = new_log_from_request(&msg, oracle_price)?;

        if self.store.count_by_intent(&msg.item_type, &msg.item_id).await? > 0 {
            return Err(LauncherError::AlreadyExists(format!(
                "a launch log already exists for ({}, {})",
                msg.item_type, msg.item_id
            )));
        }

        // Register the reply callback before inserting so the first
        // PENDING publish cannot slip past the caller. The guard
        // deregisters on return and on cancellation alike.
        let key = intent_key(&msg.item_type, &msg.item_id);
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let _guard = self.hub.register(&key, StatusHandler::OneShot(reply_tx));

        let log = self.store.insert(new_log).await?;
        self.metrics.logs_created.inc();
        info!(
            "created launch log {} for ({}, {})",
            log.id, log.item_type, log.item_id
        );

        // Edge-triggered wake; a full buffer is fine, the periodic tick
        // keeps the loop live.
        if self.wake.try_send(()).is_err() {
            debug!("send loop wake buffer full, relying on tick");
        }

        match reply_rx.recv().await {
            Some(Ok(log)) => Ok(LogView::from(&log)),
            Some(Err(err)) => Err(err),
            None => Err(LauncherError::InternalError(
                "status callback channel closed".to_string(),
            )),
        }
    }

    async fn handle_get(&self, query: GetLogsQuery) -> LauncherResult<Vec<LogView>> {
        let logs = match (&query.hash, &query.item_type, &query.item_id) {
            (Some(hash), _, _) => match self.store.get_by_hash(hash).await? {
                Some(log) => vec![log],
                None => vec![],
            },
            (None, Some(item_type), Some(item_id)) => {
                self.store.get_by_intent(item_type, item_id).await?
            }
            _ => {
                return Err(LauncherError::InvalidArgument(
                    "need hash or (item_type, item_id)".to_string(),
                ))
            }
        };

        Ok(logs.iter().map(LogView::from).collect())
    }

    fn handle_subscribe(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> (SubscriptionGuard, mpsc::Receiver<SubscribeFrame>) {
        let key = intent_key(item_type, item_id);
        let (tx, rx) = mpsc::channel(SUBSCRIBE_CHANNEL_SIZE);
        let guard = self.hub.register(&key, StatusHandler::Streaming(tx));
        (guard, rx)
    }
}

/// Validate a create request into an insertable row.
///
/// `oracle_price` must be supplied when the request leaves `gas_price`
/// empty; the caller resolves the oracle beforehand so this stays pure.
pub(crate) fn new_log_from_request(
    msg: &CreateLogRequest,
    oracle_price: Option<GasPrice>,
) -> LauncherResult<NewLaunchLog> {
    if msg.item_type.is_empty() || msg.item_id.is_empty() {
        return Err(LauncherError::InvalidArgument(
            "item_type and item_id are required".to_string(),
        ));
    }

    let value = if msg.value.is_empty() {
        BigDecimal::from(0)
    } else {
        let value = BigDecimal::from_str(&msg.value).map_err(|_| {
            LauncherError::InvalidArgument("convert value to decimal failed".to_string())
        })?;
        if !value.is_integer() {
            return Err(LauncherError::InvalidArgument(
                "value must be an integer, not a decimal".to_string(),
            ));
        }
        if value.sign() == bigdecimal::num_bigint::Sign::Minus {
            return Err(LauncherError::InvalidArgument(
                "value must not be negative".to_string(),
            ));
        }
        value
    };

    let gas_price = if msg.gas_price.is_empty() {
        let price = oracle_price.ok_or_else(|| {
            LauncherError::InternalError("gas oracle price missing".to_string())
        })?;
        let chosen = if msg.is_urgent {
            price.urgent
        } else {
            price.normal
        };
        u256_to_bigdecimal(chosen)
    } else {
        let gas_price = BigDecimal::from_str(&msg.gas_price).map_err(|_| {
            LauncherError::InvalidArgument("convert gas price to decimal failed".to_string())
        })?;
        if !gas_price.is_integer() {
            return Err(LauncherError::InvalidArgument(
                "gas price must be an integer, not a decimal".to_string(),
            ));
        }
        if gas_price.sign() != bigdecimal::num_bigint::Sign::Plus {
            return Err(LauncherError::InvalidArgument(
                "gas price must be positive".to_string(),
            ));
        }
        gas_price
    };

    if !is_valid_eth_address(&msg.from) {
        return Err(LauncherError::InvalidArgument(
            "`from` format error, not a valid ethereum address".to_string(),
        ));
    }
    if !is_valid_eth_address(&msg.to) {
        return Err(LauncherError::InvalidArgument(
            "`to` format error, not a valid ethereum address".to_string(),
        ));
    }

    if msg.gas_limit == 0 {
        return Err(LauncherError::InvalidArgument(
            "gas_limit must be positive".to_string(),
        ));
    }

    let data = decode_hex_data(&msg.data)?;

    Ok(NewLaunchLog {
        item_type: msg.item_type.clone(),
        item_id: msg.item_id.clone(),
        status: LaunchLogStatus::Created,
        from_address: msg.from.to_lowercase(),
        to_address: msg.to.to_lowercase(),
        value,
        gas_price,
        gas_limit: msg.gas_limit as i64,
        nonce: None,
        hash: None,
        data,
        is_urgent: msg.is_urgent,
    })
}

pub(crate) fn is_valid_eth_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn decode_hex_data(data: &str) -> LauncherResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(vec![]);
    }
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped)
        .map_err(|_| LauncherError::InvalidArgument("data is not valid hex".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn base_request() -> CreateLogRequest {
        CreateLogRequest {
            from: "0x11A6075EB1Fbe3e21Bd653D3B7a139Cbc2cB1cF7".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            value: String::new(),
            gas_price: "10000000000".to_string(),
            gas_limit: 100_000,
            data: String::new(),
            item_type: "T".to_string(),
            item_id: "a".to_string(),
            is_urgent: false,
        }
    }

    fn oracle() -> Option<GasPrice> {
        Some(GasPrice {
            normal: U256::from(20u64),
            urgent: U256::from(30u64),
        })
    }

    // ------------------------------------------------------------------
    // Address validation
    // ------------------------------------------------------------------

    #[test]
    fn test_address_validation() {
        assert!(is_valid_eth_address(
            "0x11a6075eb1fbe3e21bd653d3b7a139cbc2cb1cf7"
        ));
        assert!(is_valid_eth_address(
            "0x11A6075EB1FBE3E21BD653D3B7A139CBC2CB1CF7"
        ));
        // Wrong length
        assert!(!is_valid_eth_address("0x11a6075eb1fbe3e21bd653d3b7a139"));
        // Missing prefix
        assert!(!is_valid_eth_address(
            "1111a6075eb1fbe3e21bd653d3b7a139cbc2cb1cf7"
        ));
        // Non-hex character
        assert!(!is_valid_eth_address(
            "0x11a6075eb1fbe3e21bd653d3b7a139cbc2cb1cfg"
        ));
        assert!(!is_valid_eth_address(""));
    }

    #[test]
    fn test_addresses_are_normalized_to_lowercase() {
        let log = new_log_from_request(&base_request(), None).unwrap();
        assert_eq!(
            log.from_address,
            "0x11a6075eb1fbe3e21bd653d3b7a139cbc2cb1cf7"
        );
        assert_eq!(log.to_address, "0x2222222222222222222222222222222222222222");
    }

    // ------------------------------------------------------------------
    // Value parsing
    // ------------------------------------------------------------------

    #[test]
    fn test_empty_value_defaults_to_zero() {
        let log = new_log_from_request(&base_request(), None).unwrap();
        assert_eq!(log.value, BigDecimal::from(0));
    }

    #[test]
    fn test_fractional_value_rejected() {
        let mut msg = base_request();
        msg.value = "1.5".to_string();
        let err = new_log_from_request(&msg, None).unwrap_err();
        assert_eq!(err.error_type(), "invalid_argument");
    }

    #[test]
    fn test_negative_value_rejected() {
        let mut msg = base_request();
        msg.value = "-3".to_string();
        assert!(new_log_from_request(&msg, None).is_err());
    }

    #[test]
    fn test_garbage_value_rejected() {
        let mut msg = base_request();
        msg.value = "one wei".to_string();
        assert!(new_log_from_request(&msg, None).is_err());
    }

    #[test]
    fn test_trailing_zero_decimal_value_accepted() {
        // "10.0" is integral even though it is written with a scale.
        let mut msg = base_request();
        msg.value = "10.0".to_string();
        let log = new_log_from_request(&msg, None).unwrap();
        assert_eq!(log.value.with_scale(0).to_string(), "10");
    }

    // ------------------------------------------------------------------
    // Gas price selection
    // ------------------------------------------------------------------

    #[test]
    fn test_explicit_gas_price_used() {
        let log = new_log_from_request(&base_request(), None).unwrap();
        assert_eq!(log.gas_price, BigDecimal::from(10_000_000_000u64));
    }

    #[test]
    fn test_oracle_normal_price_when_not_urgent() {
        let mut msg = base_request();
        msg.gas_price = String::new();
        let log = new_log_from_request(&msg, oracle()).unwrap();
        assert_eq!(log.gas_price, BigDecimal::from(20));
    }

    #[test]
    fn test_oracle_urgent_price_when_urgent() {
        let mut msg = base_request();
        msg.gas_price = String::new();
        msg.is_urgent = true;
        let log = new_log_from_request(&msg, oracle()).unwrap();
        assert_eq!(log.gas_price, BigDecimal::from(30));
    }

    #[test]
    fn test_zero_gas_price_rejected() {
        let mut msg = base_request();
        msg.gas_price = "0".to_string();
        assert!(new_log_from_request(&msg, None).is_err());
    }

    // ------------------------------------------------------------------
    // Remaining fields
    // ------------------------------------------------------------------

    #[test]
    fn test_zero_gas_limit_rejected() {
        let mut msg = base_request();
        msg.gas_limit = 0;
        assert!(new_log_from_request(&msg, None).is_err());
    }

    #[test]
    fn test_data_hex_decoding() {
        let mut msg = base_request();
        msg.data = "0xdeadbeef".to_string();
        let log = new_log_from_request(&msg, None).unwrap();
        assert_eq!(log.data, vec![0xde, 0xad, 0xbe, 0xef]);

        msg.data = "cafe".to_string();
        let log = new_log_from_request(&msg, None).unwrap();
        assert_eq!(log.data, vec![0xca, 0xfe]);

        msg.data = "0xnothex".to_string();
        assert!(new_log_from_request(&msg, None).is_err());
    }

    #[test]
    fn test_missing_intent_identifiers_rejected() {
        let mut msg = base_request();
        msg.item_id = String::new();
        assert!(new_log_from_request(&msg, None).is_err());
    }

    #[test]
    fn test_new_log_starts_created_without_nonce_or_hash() {
        let log = new_log_from_request(&base_request(), None).unwrap();
        assert_eq!(log.status, LaunchLogStatus::Created);
        assert!(log.nonce.is_none());
        assert!(log.hash.is_none());
    }
}
