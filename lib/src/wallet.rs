// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller facing operations over one card and the chain registry.

use crate::apdu::Pin;
use crate::card::FortisCard;
use crate::chain::{ChainProtocol, DappRequest, FeeSuggestion, Registry, SendRequest, SignedTx};
use crate::error::{ConfigError, FortisError, ProtocolError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Unknown chain: {0}")]
    UnknownChain(String),
    #[error(transparent)]
    Card(#[from] FortisError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One derived account as the caller persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub chain: String,
    pub xpub: String,
    pub address_index: u8,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub name: String,
    pub symbol: String,
    pub chain_id: Option<u64>,
    pub use_wallet_connect: bool,
}

/// Accounts are numbered per chain in the order they were added.
pub fn next_address_index(accounts: &[Account], chain: &str) -> Result<u8, FortisError> {
    let count = accounts.iter().filter(|a| a.chain == chain).count();
    u8::try_from(count).map_err(|_| FortisError::InvalidAddressIndex(count as u32))
}

/// Mark exactly one account as selected.
pub fn select_account(accounts: &mut [Account], chain: &str, address_index: u8) -> bool {
    let mut found = false;
    for account in accounts.iter_mut() {
        account.selected = account.chain == chain && account.address_index == address_index;
        found |= account.selected;
    }
    found
}

pub struct Wallet {
    registry: Arc<Registry>,
    card: Arc<FortisCard>,
}

impl Wallet {
    pub fn new(registry: Arc<Registry>, card: Arc<FortisCard>) -> Self {
        Wallet { registry, card }
    }

    /// A wallet over the process wide registry built from the environment.
    pub fn from_env(card: Arc<FortisCard>) -> Result<Self, WalletError> {
        Ok(Wallet::new(Registry::global()?, card))
    }

    pub fn card(&self) -> &FortisCard {
        &self.card
    }

    fn chain(&self, name: &str) -> Result<Arc<dyn ChainProtocol>, WalletError> {
        self.registry
            .get(name)
            .ok_or_else(|| WalletError::UnknownChain(name.to_string()))
    }

    pub fn list_chains(&self) -> Vec<ChainSummary> {
        self.registry
            .chains()
            .iter()
            .map(|chain| ChainSummary {
                name: chain.name().to_string(),
                symbol: chain.static_config().symbol.to_string(),
                chain_id: chain.chain_id(),
                use_wallet_connect: chain.use_wallet_connect(),
            })
            .collect()
    }

    /// Read the account xpub from the card and number it after `existing`.
    pub async fn add_account(
        &self,
        chain: &str,
        pin: &Pin,
        existing: &[Account],
    ) -> Result<Account, WalletError> {
        let protocol = self.chain(chain)?;
        let address_index = next_address_index(existing, chain)?;
        let xpub = self.card.xpub(pin, protocol.static_config()).await?;
        Ok(Account {
            chain: protocol.name().to_string(),
            xpub,
            address_index,
            selected: false,
        })
    }

    pub fn address(&self, account: &Account) -> Result<String, WalletError> {
        let protocol = self.chain(&account.chain)?;
        Ok(protocol.address(&account.xpub, account.address_index.into())?)
    }

    pub async fn balance(&self, account: &Account) -> Result<String, WalletError> {
        let protocol = self.chain(&account.chain)?;
        Ok(protocol
            .balance(&account.xpub, account.address_index.into())
            .await?)
    }

    pub async fn suggested_fees(&self, chain: &str) -> Result<FeeSuggestion, WalletError> {
        Ok(self.chain(chain)?.suggested_fees().await?)
    }

    pub async fn sign_tx(&self, chain: &str, request: &SendRequest) -> Result<SignedTx, WalletError> {
        Ok(self.chain(chain)?.sign_tx(&self.card, request).await?)
    }

    pub async fn broadcast_tx(&self, chain: &str, signed_tx: &str) -> Result<String, WalletError> {
        Ok(self.chain(chain)?.broadcast_tx(signed_tx).await?)
    }

    pub fn explorer_url(&self, chain: &str, tx_hash: &str) -> Result<String, WalletError> {
        Ok(self.chain(chain)?.static_config().explorer_tx_url(tx_hash))
    }

    /// Serve a dapp request with the given account's key.
    pub async fn handle_dapp_request(
        &self,
        account: &Account,
        pin: &Pin,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<String, WalletError> {
        let protocol = self.chain(&account.chain)?;
        let request = DappRequest::parse(method, params)
            .map_err(|e| protocol.error("handle_request", e))?;
        Ok(protocol
            .handle_request(
                &self.card,
                &account.xpub,
                account.address_index.into(),
                pin,
                &request,
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::bitcoin::test::{MockBitcoinBackend, ADDRESS_0 as BTC_ADDRESS_0};
    use crate::chain::evm::test::{MockEvmBackend, ADDRESS_0 as ETH_ADDRESS_0};
    use crate::chain::{BitcoinNativeSegWit, Evm, FeeModel};
    use crate::emulator::test::{emulated_card, pin};
    use crate::error::ChainError;
    use serde_json::json;

    fn wallet() -> Wallet {
        let registry = Registry::with_chains(vec![
            Arc::new(BitcoinNativeSegWit::new(Arc::new(
                MockBitcoinBackend::with_utxos(&[100_000]),
            ))),
            Arc::new(Evm::ethereum(Arc::new(MockEvmBackend::default()))),
            Arc::new(Evm::arbitrum_one(Arc::new(MockEvmBackend::default()))),
        ]);
        let (_, card) = emulated_card();
        Wallet::new(Arc::new(registry), card)
    }

    fn account(chain: &str, address_index: u8) -> Account {
        Account {
            chain: chain.to_string(),
            xpub: String::new(),
            address_index,
            selected: false,
        }
    }

    #[test]
    fn test_next_address_index() {
        let mut accounts = vec![account("Ethereum", 0), account("Bitcoin (Native SegWit)", 0)];
        assert_eq!(next_address_index(&accounts, "Ethereum").unwrap(), 1);
        assert_eq!(next_address_index(&accounts, "Arbitrum One").unwrap(), 0);

        accounts = (0..=255).map(|i| account("Ethereum", i)).collect();
        assert_eq!(
            next_address_index(&accounts, "Ethereum").unwrap_err(),
            FortisError::InvalidAddressIndex(256)
        );
    }

    #[test]
    fn test_select_account() {
        let mut accounts = vec![
            account("Ethereum", 0),
            account("Ethereum", 1),
            account("Arbitrum One", 1),
        ];
        accounts[0].selected = true;
        assert!(select_account(&mut accounts, "Ethereum", 1));
        assert_eq!(
            accounts.iter().map(|a| a.selected).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert!(!select_account(&mut accounts, "Dogecoin", 0));
        assert!(accounts.iter().all(|a| !a.selected));
    }

    #[test]
    fn test_account_json() {
        let account = Account {
            chain: "Ethereum".to_string(),
            xpub: "xpub".to_string(),
            address_index: 3,
            selected: true,
        };
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(
            json,
            json!({"chain": "Ethereum", "xpub": "xpub", "addressIndex": 3, "selected": true})
        );
        // indexes past 255 never deserialize
        assert!(serde_json::from_value::<Account>(
            json!({"chain": "Ethereum", "xpub": "xpub", "addressIndex": 256, "selected": true})
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_add_accounts_and_derive_addresses() {
        let wallet = wallet();
        let mut accounts = Vec::new();
        for chain in ["Bitcoin (Native SegWit)", "Ethereum", "Ethereum"] {
            let account = wallet.add_account(chain, &pin(), &accounts).await.unwrap();
            accounts.push(account);
        }
        assert_eq!(accounts[1].address_index, 0);
        assert_eq!(accounts[2].address_index, 1);
        assert_eq!(accounts[1].xpub, accounts[2].xpub);

        assert_eq!(wallet.address(&accounts[0]).unwrap(), BTC_ADDRESS_0);
        assert_eq!(wallet.address(&accounts[1]).unwrap(), ETH_ADDRESS_0);
        assert_ne!(wallet.address(&accounts[2]).unwrap(), ETH_ADDRESS_0);
        assert_eq!(wallet.balance(&accounts[0]).await.unwrap(), "0.001");
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let wallet = wallet();
        assert!(matches!(
            wallet.add_account("Dogecoin", &pin(), &[]).await,
            Err(WalletError::UnknownChain(_))
        ));
        assert!(wallet.explorer_url("Dogecoin", "00").is_err());
    }

    #[tokio::test]
    async fn test_list_chains_and_explorer() {
        let wallet = wallet();
        let chains = wallet.list_chains();
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[2].chain_id, Some(42161));
        assert!(!chains[0].use_wallet_connect);
        assert_eq!(
            wallet.explorer_url("Ethereum", "0xabc").unwrap(),
            "https://etherscan.io/tx/0xabc"
        );
    }

    #[tokio::test]
    async fn test_sign_and_dapp_requests() {
        let wallet = wallet();
        let btc = wallet
            .add_account("Bitcoin (Native SegWit)", &pin(), &[])
            .await
            .unwrap();
        let request = SendRequest {
            xpub: btc.xpub.clone(),
            to_address: BTC_ADDRESS_0.to_string(),
            address_index: 0,
            amount: "0.0005".to_string(),
            fee: FeeModel::Bitcoin { sats_per_vbyte: 1 },
            use_suggested_fee: false,
            pin: pin(),
            data: None,
        };
        let signed = wallet
            .sign_tx("Bitcoin (Native SegWit)", &request)
            .await
            .unwrap();
        assert!(!signed.signed_tx.is_empty());

        let err = wallet
            .handle_dapp_request(&btc, &pin(), "personal_sign", &json!(["0x68656c6c6f"]))
            .await
            .unwrap_err();
        let WalletError::Protocol(err) = err else {
            panic!("expected a protocol error");
        };
        assert_eq!(err.source, ChainError::UnsupportedMethod("personal_sign".to_string()));

        let eth = wallet.add_account("Ethereum", &pin(), &[]).await.unwrap();
        let signature = wallet
            .handle_dapp_request(&eth, &pin(), "personal_sign", &json!(["0x68656c6c6f"]))
            .await
            .unwrap();
        assert_eq!(signature.len(), 132);

        let err = wallet
            .handle_dapp_request(&eth, &pin(), "wallet_switchEthereumChain", &json!([]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported method"));
    }
}
