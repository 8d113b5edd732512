// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Gas price source and the escalation formula used on retries.

use crate::error::{LauncherError, LauncherResult};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::U256;
use std::sync::Arc;

/// Current (normal, urgent) gas price in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPrice {
    pub normal: U256,
    pub urgent: U256,
}

#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn current_gas_price(&self) -> LauncherResult<GasPrice>;
}

/// Oracle backed by the node's `eth_gasPrice`, with urgent derived by a
/// configured percentage markup and an optional operator ceiling.
pub struct NodeGasOracle<P> {
    provider: Arc<Provider<P>>,
    urgent_gas_percent: u64,
    max_gas_price: Option<U256>,
}

impl<P> NodeGasOracle<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Arc<Provider<P>>,
        urgent_gas_percent: u64,
        max_gas_price: Option<U256>,
    ) -> Self {
        Self {
            provider,
            urgent_gas_percent,
            max_gas_price,
        }
    }
}

#[async_trait]
impl<P> GasOracle for NodeGasOracle<P>
where
    P: JsonRpcClient + 'static,
{
    async fn current_gas_price(&self) -> LauncherResult<GasPrice> {
        let normal = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| LauncherError::TransientProviderError(format!("eth_gasPrice: {e}")))?;

        let urgent = apply_percent_markup(normal, self.urgent_gas_percent);
        let (normal, urgent) = match self.max_gas_price {
            Some(cap) => (normal.min(cap), urgent.min(cap)),
            None => (normal, urgent),
        };

        Ok(GasPrice { normal, urgent })
    }
}

fn apply_percent_markup(price: U256, percent: u64) -> U256 {
    price + price * U256::from(percent) / U256::from(100u64)
}

/// Replacement gas price for a stuck transaction:
/// `max(current urgent price, ceil(old price * (100 + bump_percent) / 100))`,
/// clamped to `max_gas_price` when configured.
///
/// The bump term satisfies the node's minimum-increase rule for same-nonce
/// replacements; the urgent floor keeps the replacement competitive when
/// the market has moved past the old price.
pub fn bumped_gas_price(
    old_price: U256,
    current_urgent: U256,
    bump_percent: u64,
    max_gas_price: Option<U256>,
) -> U256 {
    let numerator = old_price * U256::from(100 + bump_percent);
    let bumped = (numerator + U256::from(99u64)) / U256::from(100u64);
    let price = bumped.max(current_urgent);
    match max_gas_price {
        Some(cap) => price.min(cap),
        None => price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Bump formula
    // ------------------------------------------------------------------

    #[test]
    fn test_bump_exact_ten_percent() {
        // 100 * 1.10 = 110, no ceiling needed
        let bumped = bumped_gas_price(U256::from(100u64), U256::zero(), 10, None);
        assert_eq!(bumped, U256::from(110u64));
    }

    #[test]
    fn test_bump_rounds_up() {
        // ceil(10 * 1.1) = 11
        let bumped = bumped_gas_price(U256::from(10u64), U256::zero(), 10, None);
        assert_eq!(bumped, U256::from(11u64));

        // ceil(15 * 1.1) = ceil(16.5) = 17
        let bumped = bumped_gas_price(U256::from(15u64), U256::zero(), 10, None);
        assert_eq!(bumped, U256::from(17u64));
    }

    #[test]
    fn test_bump_floored_by_urgent_price() {
        // ceil(10 * 1.1) = 11, but the oracle urgent price is 12
        let bumped = bumped_gas_price(U256::from(10u64), U256::from(12u64), 10, None);
        assert_eq!(bumped, U256::from(12u64));
    }

    #[test]
    fn test_bump_wins_over_stale_urgent() {
        // Urgent price below the mandatory bump must not shrink the bump.
        let bumped = bumped_gas_price(U256::from(100u64), U256::from(50u64), 10, None);
        assert_eq!(bumped, U256::from(110u64));
    }

    #[test]
    fn test_bump_respects_cap() {
        let cap = Some(U256::from(105u64));
        let bumped = bumped_gas_price(U256::from(100u64), U256::zero(), 10, cap);
        assert_eq!(bumped, U256::from(105u64));
    }

    #[test]
    fn test_bump_custom_percent() {
        // 200 * 1.25 = 250
        let bumped = bumped_gas_price(U256::from(200u64), U256::zero(), 25, None);
        assert_eq!(bumped, U256::from(250u64));
    }

    #[test]
    fn test_bump_zero_price() {
        // Degenerate stored price still takes the urgent floor.
        let bumped = bumped_gas_price(U256::zero(), U256::from(7u64), 10, None);
        assert_eq!(bumped, U256::from(7u64));
    }

    // ------------------------------------------------------------------
    // Urgent markup
    // ------------------------------------------------------------------

    #[test]
    fn test_urgent_markup() {
        assert_eq!(
            apply_percent_markup(U256::from(100u64), 25),
            U256::from(125u64)
        );
        assert_eq!(apply_percent_markup(U256::from(100u64), 0), U256::from(100u64));
    }
}
