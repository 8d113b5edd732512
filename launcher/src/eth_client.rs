// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Thin client over an Ethereum node: nonce reads, legacy-transaction
//! signing, raw broadcast, and receipt access for the watcher.

use crate::error::{LauncherError, LauncherResult};
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(test)]
use crate::eth_mock_provider::EthMockProvider;

pub struct EthClient<P> {
    provider: Arc<Provider<P>>,
    chain_id: u64,
    // One signing key per `from` address the launcher is allowed to use.
    wallets: BTreeMap<Address, LocalWallet>,
}

impl EthClient<Http> {
    pub fn new(
        provider_url: &str,
        chain_id: u64,
        signers: &BTreeMap<String, String>,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(provider_url)?;
        Self::with_provider(Arc::new(provider), chain_id, signers)
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn with_provider(
        provider: Arc<Provider<P>>,
        chain_id: u64,
        signers: &BTreeMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut wallets = BTreeMap::new();
        for (address, key) in signers {
            let address: Address = address
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid signer address {address}: {e}"))?;
            let wallet: LocalWallet = key
                .parse::<LocalWallet>()
                .map_err(|e| anyhow::anyhow!("invalid signer key for {address:?}: {e}"))?
                .with_chain_id(chain_id);
            if wallet.address() != address {
                return Err(anyhow::anyhow!(
                    "signer key for {address:?} derives a different address {:?}",
                    wallet.address()
                ));
            }
            wallets.insert(address, wallet);
        }

        Ok(Self {
            provider,
            chain_id,
            wallets,
        })
    }

    pub fn provider(&self) -> Arc<Provider<P>> {
        self.provider.clone()
    }

    pub fn has_signer_for(&self, address: &Address) -> bool {
        self.wallets.contains_key(address)
    }

    /// Next nonce according to the node, mempool included.
    pub async fn pending_nonce(&self, address: Address) -> LauncherResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| {
                LauncherError::TransientProviderError(format!("eth_getTransactionCount: {e}"))
            })?;
        Ok(nonce.as_u64())
    }

    /// Sign a legacy transaction and return its hash together with the raw
    /// bytes to broadcast. The hash is known before the node sees the
    /// transaction, so the store can record it first.
    pub fn sign_legacy(
        &self,
        from: Address,
        to: Address,
        value: U256,
        gas_price: U256,
        gas_limit: u64,
        nonce: u64,
        data: Vec<u8>,
    ) -> LauncherResult<(H256, Bytes)> {
        let wallet = self
            .wallets
            .get(&from)
            .ok_or_else(|| LauncherError::NoSignerForAddress(format!("{from:?}")))?;

        let request = TransactionRequest::new()
            .from(from)
            .to(to)
            .value(value)
            .gas_price(gas_price)
            .gas(gas_limit)
            .nonce(nonce)
            .data(data)
            .chain_id(self.chain_id);
        let typed: TypedTransaction = request.into();

        let signature = wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| LauncherError::InternalError(format!("sign transaction: {e}")))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(raw.as_ref()));

        Ok((hash, raw))
    }

    /// Broadcast raw transaction bytes. Errors are returned untranslated so
    /// the send loop can classify them.
    pub async fn send_raw(&self, raw: Bytes) -> Result<H256, ProviderError> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    pub async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> LauncherResult<Option<TransactionReceipt>> {
        self.provider.get_transaction_receipt(hash).await.map_err(|e| {
            LauncherError::TransientProviderError(format!("eth_getTransactionReceipt: {e}"))
        })
    }

    pub async fn latest_block_number(&self) -> LauncherResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| LauncherError::TransientProviderError(format!("eth_blockNumber: {e}")))?;
        Ok(number.as_u64())
    }

    /// Timestamp and full receipt set of one block, or `None` when the node
    /// does not have the block yet.
    pub async fn block_receipts(
        &self,
        block_number: u64,
    ) -> LauncherResult<Option<(u64, Vec<TransactionReceipt>)>> {
        let block = self
            .provider
            .get_block(BlockNumber::from(block_number))
            .await
            .map_err(|e| {
                LauncherError::TransientProviderError(format!("eth_getBlockByNumber: {e}"))
            })?;
        let Some(block) = block else {
            return Ok(None);
        };

        let receipts = self
            .provider
            .get_block_receipts(block_number)
            .await
            .map_err(|e| {
                LauncherError::TransientProviderError(format!("eth_getBlockReceipts: {e}"))
            })?;

        Ok(Some((block.timestamp.as_u64(), receipts)))
    }
}

#[cfg(test)]
impl EthClient<EthMockProvider> {
    pub fn new_mocked(
        provider: EthMockProvider,
        chain_id: u64,
        signers: &BTreeMap<String, String>,
    ) -> Self {
        let provider = Provider::new(provider);
        Self::with_provider(Arc::new(provider), chain_id, signers)
            .expect("mock client construction should not fail")
    }
}
