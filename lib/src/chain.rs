// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chain protocols: one implementation per supported chain, looked up by name
//! or symbol through the [`Registry`].

pub mod bitcoin;
pub mod evm;

use crate::apdu::Pin;
use crate::card::FortisCard;
use crate::config::{NetworkConfig, ProtocolConfig};
use crate::error::{ChainError, ConfigError, ProtocolError};
use crate::keys;
use ::bitcoin::secp256k1::PublicKey;
use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::sync::{Arc, OnceLock};

pub use self::bitcoin::BitcoinNativeSegWit;
pub use self::evm::request::DappRequest;
pub use self::evm::Evm;

/// Caller supplied fee parameters. Deserializes from a bag of camelCase
/// fields, a bag carrying `gasPrice` selects the legacy EVM model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeeModel {
    Legacy {
        #[serde(rename = "gasPrice")]
        gas_price: u128,
        #[serde(rename = "gasLimit")]
        gas_limit: u64,
    },
    Eip1559 {
        #[serde(rename = "maxFeePerGas")]
        max_fee_per_gas: u128,
        #[serde(rename = "maxPriorityFeePerGas")]
        max_priority_fee_per_gas: u128,
        #[serde(rename = "gasLimit")]
        gas_limit: u64,
    },
    Bitcoin {
        #[serde(rename = "satsPerVByte")]
        sats_per_vbyte: u64,
    },
}

/// Fees a chain recommends right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeeSuggestion {
    Bitcoin {
        #[serde(rename = "satsPerVByte")]
        sats_per_vbyte: u64,
    },
    Evm {
        #[serde(rename = "gasPrice")]
        gas_price: u128,
        #[serde(rename = "maxFeePerGas")]
        max_fee_per_gas: u128,
        #[serde(rename = "maxPriorityFeePerGas")]
        max_priority_fee_per_gas: u128,
    },
}

/// Every fee field either type may carry. Untagged enums cannot buffer `u128`,
/// so both fee types decode through this struct.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeFields {
    gas_price: Option<u128>,
    gas_limit: Option<u64>,
    max_fee_per_gas: Option<u128>,
    max_priority_fee_per_gas: Option<u128>,
    #[serde(rename = "satsPerVByte")]
    sats_per_vbyte: Option<u64>,
}

impl<'de> Deserialize<'de> for FeeModel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match FeeFields::deserialize(deserializer)? {
            FeeFields {
                gas_price: Some(gas_price),
                gas_limit: Some(gas_limit),
                ..
            } => Ok(FeeModel::Legacy {
                gas_price,
                gas_limit,
            }),
            FeeFields {
                max_fee_per_gas: Some(max_fee_per_gas),
                max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
                gas_limit: Some(gas_limit),
                ..
            } => Ok(FeeModel::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                gas_limit,
            }),
            FeeFields {
                sats_per_vbyte: Some(sats_per_vbyte),
                ..
            } => Ok(FeeModel::Bitcoin { sats_per_vbyte }),
            _ => Err(de::Error::custom(
                "expected gasPrice and gasLimit, maxFeePerGas, maxPriorityFeePerGas and gasLimit, or satsPerVByte",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for FeeSuggestion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match FeeFields::deserialize(deserializer)? {
            FeeFields {
                sats_per_vbyte: Some(sats_per_vbyte),
                ..
            } => Ok(FeeSuggestion::Bitcoin { sats_per_vbyte }),
            FeeFields {
                gas_price: Some(gas_price),
                max_fee_per_gas: Some(max_fee_per_gas),
                max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
                ..
            } => Ok(FeeSuggestion::Evm {
                gas_price,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            _ => Err(de::Error::custom(
                "expected satsPerVByte, or gasPrice, maxFeePerGas and maxPriorityFeePerGas",
            )),
        }
    }
}

/// Everything needed to build and sign one transfer. The sender is derived
/// from `xpub` and `address_index`.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub xpub: String,
    pub to_address: String,
    pub address_index: u32,
    /// Decimal amount in whole units of the chain's currency.
    pub amount: String,
    pub fee: FeeModel,
    pub use_suggested_fee: bool,
    pub pin: Pin,
    /// EVM call data.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTx {
    /// Hex serialized transaction, ready for [`ChainProtocol::broadcast_tx`].
    pub signed_tx: String,
    /// Fee in whole units, e.g. "0.00042".
    pub total_fee: String,
    pub total_fee_base_units: u128,
}

/// The capability set every chain implements. Every error is tagged with the
/// chain name and the failing operation.
#[async_trait]
pub trait ChainProtocol: Send + Sync {
    fn static_config(&self) -> &ProtocolConfig;

    fn name(&self) -> &'static str {
        self.static_config().name
    }

    fn address(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError>;

    fn public_key(&self, xpub: &str, address_index: u32) -> Result<PublicKey, ProtocolError> {
        keys::derive_public_key(xpub, self.static_config().version_bytes, address_index)
            .map_err(|e| self.error("public_key", e.into()))
    }

    /// Balance in whole units.
    async fn balance(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError>;

    async fn suggested_fees(&self) -> Result<FeeSuggestion, ProtocolError>;

    async fn sign_tx(
        &self,
        card: &FortisCard,
        request: &SendRequest,
    ) -> Result<SignedTx, ProtocolError>;

    /// Submit a transaction produced by [`ChainProtocol::sign_tx`], returns its hash.
    async fn broadcast_tx(&self, signed_tx: &str) -> Result<String, ProtocolError>;

    fn use_wallet_connect(&self) -> bool {
        false
    }

    fn chain_id(&self) -> Option<u64> {
        None
    }

    /// Serve a request from a connected dapp.
    async fn handle_request(
        &self,
        _card: &FortisCard,
        _xpub: &str,
        _address_index: u32,
        _pin: &Pin,
        request: &DappRequest,
    ) -> Result<String, ProtocolError> {
        Err(self.error(
            "handle_request",
            ChainError::UnsupportedMethod(request.method().to_string()),
        ))
    }

    fn error(&self, operation: &str, source: ChainError) -> ProtocolError {
        ProtocolError::new(self.name(), operation, source)
    }
}

static REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

/// Process wide set of chains, read-only once built.
pub struct Registry {
    chains: Vec<Arc<dyn ChainProtocol>>,
}

impl Registry {
    /// Build every supported chain against the given network endpoints.
    pub fn new(config: &NetworkConfig) -> Result<Self, ConfigError> {
        let mempool = bitcoin::mempool::MempoolClient::new(
            config.mempool_api_url.clone(),
            config.http_timeout,
        )?;
        let ethereum = evm::rpc::AlloyBackend::new(config.ethereum_rpc_url.clone());
        let arbitrum = evm::rpc::AlloyBackend::new(config.arbitrum_rpc_url.clone());

        Ok(Registry::with_chains(vec![
            Arc::new(BitcoinNativeSegWit::new(Arc::new(mempool))),
            Arc::new(Evm::ethereum(Arc::new(ethereum))),
            Arc::new(Evm::arbitrum_one(Arc::new(arbitrum))),
        ]))
    }

    pub fn with_chains(chains: Vec<Arc<dyn ChainProtocol>>) -> Self {
        Registry { chains }
    }

    /// The registry built from [`NetworkConfig::from_env`] on first use.
    pub fn global() -> Result<Arc<Registry>, ConfigError> {
        if let Some(registry) = REGISTRY.get() {
            return Ok(registry.clone());
        }
        let registry = Arc::new(Registry::new(&NetworkConfig::from_env()?)?);
        Ok(REGISTRY.get_or_init(|| registry).clone())
    }

    pub fn chains(&self) -> &[Arc<dyn ChainProtocol>] {
        &self.chains
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.chains.iter().map(|c| c.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChainProtocol>> {
        self.chains.iter().find(|c| c.name() == name).cloned()
    }

    /// First chain with the symbol, Ethereum and Arbitrum One share "ETH".
    pub fn by_symbol(&self, symbol: &str) -> Option<Arc<dyn ChainProtocol>> {
        self.chains
            .iter()
            .find(|c| c.static_config().symbol == symbol)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::bitcoin::test::MockBitcoinBackend;
    use crate::chain::evm::test::MockEvmBackend;

    fn registry() -> Registry {
        Registry::with_chains(vec![
            Arc::new(BitcoinNativeSegWit::new(Arc::new(MockBitcoinBackend::default()))),
            Arc::new(Evm::ethereum(Arc::new(MockEvmBackend::default()))),
            Arc::new(Evm::arbitrum_one(Arc::new(MockEvmBackend::default()))),
        ])
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec!["Bitcoin (Native SegWit)", "Ethereum", "Arbitrum One"]
        );
        let arbitrum = registry.get("Arbitrum One").unwrap();
        assert_eq!(arbitrum.chain_id(), Some(42161));
        assert!(arbitrum.use_wallet_connect());
        assert_eq!(registry.by_symbol("ETH").unwrap().name(), "Ethereum");

        let bitcoin = registry.by_symbol("BTC").unwrap();
        assert_eq!(bitcoin.chain_id(), None);
        assert!(!bitcoin.use_wallet_connect());
        assert!(registry.get("Dogecoin").is_none());
    }

    #[test]
    fn test_fee_model_from_json() {
        let fee: FeeModel = serde_json::from_str(r#"{"gasPrice": 20, "gasLimit": 21000}"#).unwrap();
        assert_eq!(
            fee,
            FeeModel::Legacy {
                gas_price: 20,
                gas_limit: 21000
            }
        );
        let fee: FeeModel = serde_json::from_str(
            r#"{"maxFeePerGas": 30, "maxPriorityFeePerGas": 2, "gasLimit": 21000}"#,
        )
        .unwrap();
        assert!(matches!(fee, FeeModel::Eip1559 { .. }));
        let fee: FeeModel = serde_json::from_str(r#"{"satsPerVByte": 12}"#).unwrap();
        assert_eq!(fee, FeeModel::Bitcoin { sats_per_vbyte: 12 });
        assert!(serde_json::from_str::<FeeModel>(r#"{"gasLimit": 21000}"#).is_err());
    }

    #[test]
    fn test_fee_json_keeps_wide_quantities() {
        let fee = FeeModel::Eip1559 {
            max_fee_per_gas: u64::MAX as u128 + 1,
            max_priority_fee_per_gas: 2_000_000_000,
            gas_limit: 21_000,
        };
        let json = serde_json::to_string(&fee).unwrap();
        assert_eq!(serde_json::from_str::<FeeModel>(&json).unwrap(), fee);

        let suggestion = FeeSuggestion::Evm {
            gas_price: 20_000_000_000,
            max_fee_per_gas: u64::MAX as u128 + 1,
            max_priority_fee_per_gas: 1,
        };
        let json = serde_json::to_string(&suggestion).unwrap();
        assert_eq!(
            serde_json::from_str::<FeeSuggestion>(&json).unwrap(),
            suggestion
        );
        let suggestion = FeeSuggestion::Bitcoin { sats_per_vbyte: 7 };
        let json = serde_json::to_string(&suggestion).unwrap();
        assert_eq!(
            serde_json::from_str::<FeeSuggestion>(&json).unwrap(),
            suggestion
        );
    }

    #[test]
    fn test_public_key_default() {
        let registry = registry();
        let bitcoin = registry.by_symbol("BTC").unwrap();
        let zpub = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";
        assert_eq!(
            bitcoin.public_key(zpub, 0).unwrap().to_string(),
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );
        let err = bitcoin.public_key(zpub, 256).unwrap_err();
        assert_eq!(err.chain, "Bitcoin (Native SegWit)");
        assert_eq!(err.operation, "public_key");
    }
}
