// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`EvmBackend`] over JSON-RPC with an alloy HTTP provider.

use super::{Eip1559Fees, EvmBackend};
use crate::error::ChainError;
use alloy::eips::BlockNumberOrTag;
use alloy::network::Ethereum;
use alloy::primitives::{Address, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use url::Url;

type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

pub struct AlloyBackend {
    provider: HttpProvider,
}

impl AlloyBackend {
    pub fn new(rpc_url: Url) -> Self {
        AlloyBackend {
            provider: ProviderBuilder::new().connect_http(rpc_url),
        }
    }
}

fn rpc_error(e: impl std::fmt::Display) -> ChainError {
    ChainError::Network(e.to_string())
}

#[async_trait]
impl EvmBackend for AlloyBackend {
    async fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(rpc_error)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(address).await.map_err(rpc_error)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider.get_gas_price().await.map_err(rpc_error)
    }

    async fn fee_estimate(&self) -> Result<Eip1559Fees, ChainError> {
        let estimate = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(rpc_error)?;
        Ok(Eip1559Fees {
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        })
    }

    async fn base_fee(&self) -> Result<u128, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| ChainError::Network("latest block not found".to_string()))?;
        block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| ChainError::Network("latest block has no base fee".to_string()))
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, ChainError> {
        self.provider.estimate_gas(request).await.map_err(rpc_error)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(rpc_error)?;
        Ok(pending.tx_hash().to_string())
    }
}
