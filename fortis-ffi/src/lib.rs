// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

uniffi::setup_scaffolding!();

mod error;

pub use error::{CardError, FortisError};

use rust_fortis::chain::evm::request::SUPPORTED_METHODS;
use rust_fortis::config::{
    ARBITRUM_RPC_URL_ENV, ETHEREUM_RPC_URL_ENV, HTTP_TIMEOUT_ENV, INFURA_API_KEY_ENV,
    MEMPOOL_API_URL_ENV,
};
use rust_fortis::{NetworkConfig, Registry};
use std::sync::Arc;
use std::time::Duration;

/// NFC tag access provided by the host app.
#[uniffi::export(callback_interface)]
#[async_trait::async_trait]
pub trait NfcTransport: Send + Sync {
    async fn connect(&self, timeout_ms: u64) -> Result<(), FortisError>;
    async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, FortisError>;
    fn release(&self);
}

pub struct NfcTransportWrapper(Box<dyn NfcTransport>);

#[async_trait::async_trait]
impl rust_fortis::CardChannel for NfcTransportWrapper {
    async fn connect(&self, timeout: Duration) -> Result<(), rust_fortis::FortisError> {
        self.0
            .connect(timeout.as_millis() as u64)
            .await
            .map_err(|e| rust_fortis::FortisError::CardCommunication(e.to_string()))
    }

    async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, rust_fortis::FortisError> {
        self.0
            .transmit_apdu(command_apdu)
            .await
            .map_err(|e| rust_fortis::FortisError::CardCommunication(e.to_string()))
    }

    fn release(&self) {
        self.0.release()
    }
}

/// Endpoint overrides, unset fields use the library defaults.
#[derive(uniffi::Record, Debug, Clone, Default)]
pub struct NetworkSettings {
    pub mempool_api_url: Option<String>,
    pub ethereum_rpc_url: Option<String>,
    pub arbitrum_rpc_url: Option<String>,
    pub infura_api_key: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

impl NetworkSettings {
    fn lookup(&self, var: &str) -> Option<String> {
        match var {
            MEMPOOL_API_URL_ENV => self.mempool_api_url.clone(),
            ETHEREUM_RPC_URL_ENV => self.ethereum_rpc_url.clone(),
            ARBITRUM_RPC_URL_ENV => self.arbitrum_rpc_url.clone(),
            INFURA_API_KEY_ENV => self.infura_api_key.clone(),
            HTTP_TIMEOUT_ENV => self.http_timeout_secs.map(|s| s.to_string()),
            _ => None,
        }
    }
}

#[derive(uniffi::Record, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub chain: String,
    pub xpub: String,
    pub address_index: u8,
    pub selected: bool,
}

impl From<rust_fortis::Account> for Account {
    fn from(value: rust_fortis::Account) -> Self {
        Account {
            chain: value.chain,
            xpub: value.xpub,
            address_index: value.address_index,
            selected: value.selected,
        }
    }
}

impl From<Account> for rust_fortis::Account {
    fn from(value: Account) -> Self {
        rust_fortis::Account {
            chain: value.chain,
            xpub: value.xpub,
            address_index: value.address_index,
            selected: value.selected,
        }
    }
}

#[derive(uniffi::Record, Debug, Clone)]
pub struct ChainSummary {
    pub name: String,
    pub symbol: String,
    pub chain_id: Option<u64>,
    pub use_wallet_connect: bool,
}

/// Fee parameters, EVM quantities in wei.
#[derive(uniffi::Enum, Debug, Clone)]
pub enum FeeModel {
    Legacy {
        gas_price: u64,
        gas_limit: u64,
    },
    Eip1559 {
        max_fee_per_gas: u64,
        max_priority_fee_per_gas: u64,
        gas_limit: u64,
    },
    Bitcoin {
        sats_per_vbyte: u64,
    },
}

impl From<FeeModel> for rust_fortis::FeeModel {
    fn from(value: FeeModel) -> Self {
        match value {
            FeeModel::Legacy {
                gas_price,
                gas_limit,
            } => rust_fortis::FeeModel::Legacy {
                gas_price: gas_price.into(),
                gas_limit,
            },
            FeeModel::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                gas_limit,
            } => rust_fortis::FeeModel::Eip1559 {
                max_fee_per_gas: max_fee_per_gas.into(),
                max_priority_fee_per_gas: max_priority_fee_per_gas.into(),
                gas_limit,
            },
            FeeModel::Bitcoin { sats_per_vbyte } => rust_fortis::FeeModel::Bitcoin { sats_per_vbyte },
        }
    }
}

#[derive(uniffi::Enum, Debug, Clone)]
pub enum FeeSuggestion {
    Bitcoin {
        sats_per_vbyte: u64,
    },
    Evm {
        gas_price: u64,
        max_fee_per_gas: u64,
        max_priority_fee_per_gas: u64,
    },
}

fn saturating_u64(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

impl From<rust_fortis::FeeSuggestion> for FeeSuggestion {
    fn from(value: rust_fortis::FeeSuggestion) -> Self {
        match value {
            rust_fortis::FeeSuggestion::Bitcoin { sats_per_vbyte } => {
                FeeSuggestion::Bitcoin { sats_per_vbyte }
            }
            rust_fortis::FeeSuggestion::Evm {
                gas_price,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeSuggestion::Evm {
                gas_price: saturating_u64(gas_price),
                max_fee_per_gas: saturating_u64(max_fee_per_gas),
                max_priority_fee_per_gas: saturating_u64(max_priority_fee_per_gas),
            },
        }
    }
}

#[derive(uniffi::Record, Debug, Clone)]
pub struct SendRequest {
    pub xpub: String,
    pub to_address: String,
    pub address_index: u32,
    /// Decimal amount in whole units, e.g. "0.01".
    pub amount: String,
    pub fee: FeeModel,
    pub use_suggested_fee: bool,
    pub pin: String,
    pub data: Option<Vec<u8>>,
}

#[derive(uniffi::Record, Debug, Clone)]
pub struct SignedTx {
    pub signed_tx: String,
    pub total_fee: String,
    /// Satoshis or wei, as a decimal string.
    pub total_fee_base_units: String,
}

impl From<rust_fortis::SignedTx> for SignedTx {
    fn from(value: rust_fortis::SignedTx) -> Self {
        SignedTx {
            signed_tx: value.signed_tx,
            total_fee: value.total_fee,
            total_fee_base_units: value.total_fee_base_units.to_string(),
        }
    }
}

fn parse_pin(pin: &str) -> Result<rust_fortis::Pin, FortisError> {
    pin.parse().map_err(|e: rust_fortis::FortisError| FortisError::InvalidPin {
        msg: e.to_string(),
    })
}

#[derive(uniffi::Object)]
pub struct FortisWallet(rust_fortis::Wallet);

#[uniffi::export(async_runtime = "tokio")]
impl FortisWallet {
    #[uniffi::constructor]
    pub fn new(
        transport: Box<dyn NfcTransport>,
        settings: NetworkSettings,
    ) -> Result<Arc<Self>, FortisError> {
        let config = NetworkConfig::from_lookup(|var| settings.lookup(var))?;
        let registry = Arc::new(Registry::new(&config)?);
        let card = rust_fortis::FortisCard::new(Arc::new(NfcTransportWrapper(transport)));
        Ok(Arc::new(FortisWallet(rust_fortis::Wallet::new(
            registry,
            Arc::new(card),
        ))))
    }

    pub fn list_chains(&self) -> Vec<ChainSummary> {
        self.0
            .list_chains()
            .into_iter()
            .map(|c| ChainSummary {
                name: c.name,
                symbol: c.symbol,
                chain_id: c.chain_id,
                use_wallet_connect: c.use_wallet_connect,
            })
            .collect()
    }

    pub async fn firmware_version(&self) -> Result<String, FortisError> {
        Ok(self.0.card().firmware_version().await?)
    }

    pub async fn is_firmware_outdated(&self) -> Result<bool, FortisError> {
        Ok(self.0.card().is_firmware_outdated().await?)
    }

    pub async fn add_account(
        &self,
        chain: String,
        pin: String,
        existing: Vec<Account>,
    ) -> Result<Account, FortisError> {
        let pin = parse_pin(&pin)?;
        let existing: Vec<rust_fortis::Account> = existing.into_iter().map(Into::into).collect();
        let account = self.0.add_account(&chain, &pin, &existing).await?;
        Ok(account.into())
    }

    pub fn address(&self, account: Account) -> Result<String, FortisError> {
        Ok(self.0.address(&account.into())?)
    }

    pub async fn balance(&self, account: Account) -> Result<String, FortisError> {
        Ok(self.0.balance(&account.into()).await?)
    }

    pub async fn suggested_fees(&self, chain: String) -> Result<FeeSuggestion, FortisError> {
        Ok(self.0.suggested_fees(&chain).await?.into())
    }

    pub async fn sign_tx(
        &self,
        chain: String,
        request: SendRequest,
    ) -> Result<SignedTx, FortisError> {
        let request = rust_fortis::SendRequest {
            pin: parse_pin(&request.pin)?,
            xpub: request.xpub,
            to_address: request.to_address,
            address_index: request.address_index,
            amount: request.amount,
            fee: request.fee.into(),
            use_suggested_fee: request.use_suggested_fee,
            data: request.data,
        };
        Ok(self.0.sign_tx(&chain, &request).await?.into())
    }

    pub async fn broadcast_tx(&self, chain: String, signed_tx: String) -> Result<String, FortisError> {
        Ok(self.0.broadcast_tx(&chain, &signed_tx).await?)
    }

    pub fn explorer_url(&self, chain: String, tx_hash: String) -> Result<String, FortisError> {
        Ok(self.0.explorer_url(&chain, &tx_hash)?)
    }

    /// `params_json` is the JSON-RPC `params` array exactly as the dapp sent it.
    pub async fn handle_dapp_request(
        &self,
        account: Account,
        pin: String,
        method: String,
        params_json: String,
    ) -> Result<String, FortisError> {
        let pin = parse_pin(&pin)?;
        let params: serde_json::Value =
            serde_json::from_str(&params_json).map_err(|e| FortisError::Core {
                msg: format!("request params: {e}"),
            })?;
        Ok(self
            .0
            .handle_dapp_request(&account.into(), &pin, &method, &params)
            .await?)
    }
}

/// Methods to advertise when approving a WalletConnect session.
#[uniffi::export]
pub fn supported_dapp_methods() -> Vec<String> {
    SUPPORTED_METHODS.iter().map(|m| m.to_string()).collect()
}
