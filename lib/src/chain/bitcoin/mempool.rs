// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`BitcoinBackend`] over a mempool.space compatible REST API.

use super::{BitcoinBackend, Utxo};
use crate::error::{ChainError, ConfigError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

pub struct MempoolClient {
    base_url: Url,
    client: reqwest::Client,
}

impl MempoolClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(MempoolClient { base_url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    pub async fn recommended_fees(&self) -> Result<RecommendedFees, ChainError> {
        let fees = self
            .client
            .get(self.endpoint("v1/fees/recommended"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(fees)
    }
}

#[async_trait]
impl BitcoinBackend for MempoolClient {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let utxos: Vec<Utxo> = self
            .client
            .get(self.endpoint(&format!("address/{address}/utxo")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        log::debug!("{} utxo(s) for {address}", utxos.len());
        Ok(utxos)
    }

    async fn recommended_fee_rate(&self) -> Result<u64, ChainError> {
        Ok(self.recommended_fees().await?.fastest_fee)
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError> {
        let response = self
            .client
            .post(self.endpoint("tx"))
            .body(tx_hex.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChainError::Network(format!("broadcast rejected ({status}): {body}")));
        }
        Ok(body.trim().to_string())
    }
}
