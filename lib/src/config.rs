// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static chain parameters and runtime network configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `FORTIS_MEMPOOL_API_URL` | mempool.space compatible REST API | `https://mempool.space/api` |
//! | `FORTIS_ETHEREUM_RPC_URL` | Ethereum mainnet JSON-RPC endpoint | Infura, from `INFURA_API_KEY` |
//! | `FORTIS_ARBITRUM_RPC_URL` | Arbitrum One JSON-RPC endpoint | Infura, from `INFURA_API_KEY` |
//! | `INFURA_API_KEY` | Project key used for the default RPC endpoints | none |
//! | `FORTIS_HTTP_TIMEOUT_SECS` | Timeout for every network request | `30` |

use crate::apdu::EllipticCurve;
use crate::error::ConfigError;
use std::time::Duration;
use url::Url;

pub const MEMPOOL_API_URL_ENV: &str = "FORTIS_MEMPOOL_API_URL";
pub const ETHEREUM_RPC_URL_ENV: &str = "FORTIS_ETHEREUM_RPC_URL";
pub const ARBITRUM_RPC_URL_ENV: &str = "FORTIS_ARBITRUM_RPC_URL";
pub const INFURA_API_KEY_ENV: &str = "INFURA_API_KEY";
pub const HTTP_TIMEOUT_ENV: &str = "FORTIS_HTTP_TIMEOUT_SECS";

pub const DEFAULT_MEMPOOL_API_URL: &str = "https://mempool.space/api";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Newest firmware release, older cards should be updated.
pub const LATEST_FIRMWARE_VERSION: &str = "1.0.0";

/// Per chain constants shared by every account on that chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub name: &'static str,
    pub symbol: &'static str,
    /// BIP-44 purpose, hardened on the card.
    pub purpose: u8,
    pub coin_type: u32,
    /// Extended public key version prefix.
    pub version_bytes: [u8; 4],
    pub curve: EllipticCurve,
    pub decimals: u8,
    pub explorer_url: &'static str,
}

impl ProtocolConfig {
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}{}", self.explorer_url, tx_hash)
    }
}

pub const BITCOIN_NATIVE_SEGWIT: ProtocolConfig = ProtocolConfig {
    name: "Bitcoin (Native SegWit)",
    symbol: "BTC",
    purpose: 84,
    coin_type: 0,
    version_bytes: [0x04, 0xB2, 0x47, 0x46],
    curve: EllipticCurve::Secp256k1,
    decimals: 8,
    explorer_url: "https://mempool.space/tx/",
};

pub const ETHEREUM: ProtocolConfig = ProtocolConfig {
    name: "Ethereum",
    symbol: "ETH",
    purpose: 44,
    coin_type: 60,
    version_bytes: [0x04, 0x88, 0xB2, 0x1E],
    curve: EllipticCurve::Secp256k1,
    decimals: 18,
    explorer_url: "https://etherscan.io/tx/",
};

pub const ARBITRUM_ONE: ProtocolConfig = ProtocolConfig {
    name: "Arbitrum One",
    explorer_url: "https://arbiscan.io/tx/",
    ..ETHEREUM
};

pub const ETHEREUM_CHAIN_ID: u64 = 1;
pub const ARBITRUM_ONE_CHAIN_ID: u64 = 42161;

/// Endpoints of the network backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mempool_api_url: Url,
    pub ethereum_rpc_url: Url,
    pub arbitrum_rpc_url: Url,
    pub http_timeout: Duration,
}

impl NetworkConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let infura_key = lookup(INFURA_API_KEY_ENV);
        let rpc_url = |var: &'static str, chain: &'static str, infura_network: &str| {
            match (lookup(var), &infura_key) {
                (Some(url), _) => parse_url(var, &url),
                (None, Some(key)) => parse_url(
                    INFURA_API_KEY_ENV,
                    &format!("https://{infura_network}.infura.io/v3/{key}"),
                ),
                (None, None) => Err(ConfigError::MissingRpcUrl { chain, var }),
            }
        };

        let mempool_api_url = parse_url(
            MEMPOOL_API_URL_ENV,
            &lookup(MEMPOOL_API_URL_ENV).unwrap_or_else(|| DEFAULT_MEMPOOL_API_URL.to_string()),
        )?;
        let ethereum_rpc_url = rpc_url(ETHEREUM_RPC_URL_ENV, ETHEREUM.name, "mainnet")?;
        let arbitrum_rpc_url =
            rpc_url(ARBITRUM_RPC_URL_ENV, ARBITRUM_ONE.name, "arbitrum-mainnet")?;
        let http_timeout = match lookup(HTTP_TIMEOUT_ENV) {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    var: HTTP_TIMEOUT_ENV,
                    msg: e.to_string(),
                }
            })?),
            None => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(NetworkConfig {
            mempool_api_url,
            ethereum_rpc_url,
            arbitrum_rpc_url,
            http_timeout,
        })
    }
}

fn parse_url(var: &'static str, url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        var,
        msg: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn test_infura_defaults() {
        let config = NetworkConfig::from_lookup(lookup(&[(INFURA_API_KEY_ENV, "abc")])).unwrap();
        assert_eq!(config.mempool_api_url.as_str(), "https://mempool.space/api");
        assert_eq!(
            config.ethereum_rpc_url.as_str(),
            "https://mainnet.infura.io/v3/abc"
        );
        assert_eq!(
            config.arbitrum_rpc_url.as_str(),
            "https://arbitrum-mainnet.infura.io/v3/abc"
        );
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn test_overrides_and_errors() {
        let config = NetworkConfig::from_lookup(lookup(&[
            (ETHEREUM_RPC_URL_ENV, "http://localhost:8545"),
            (ARBITRUM_RPC_URL_ENV, "http://localhost:8547"),
            (HTTP_TIMEOUT_ENV, "5"),
        ]))
        .unwrap();
        assert_eq!(config.ethereum_rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(config.http_timeout, Duration::from_secs(5));

        assert_eq!(
            NetworkConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingRpcUrl {
                chain: "Ethereum",
                var: ETHEREUM_RPC_URL_ENV
            }
        );
        assert!(NetworkConfig::from_lookup(lookup(&[
            (INFURA_API_KEY_ENV, "abc"),
            (HTTP_TIMEOUT_ENV, "soon")
        ]))
        .is_err());
    }

    #[test]
    fn test_protocol_configs() {
        assert_eq!(ARBITRUM_ONE.purpose, 44);
        assert_eq!(ARBITRUM_ONE.coin_type, 60);
        assert_eq!(ARBITRUM_ONE.version_bytes, ETHEREUM.version_bytes);
        assert_eq!(
            BITCOIN_NATIVE_SEGWIT.explorer_tx_url("abcd"),
            "https://mempool.space/tx/abcd"
        );
    }
}
