// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ether transfers on EVM chains, legacy (EIP-155) or fee market (EIP-1559).

pub mod request;
pub mod rpc;

use self::request::{encode_personal_signature, personal_message_hash, DappRequest};
use crate::apdu::Pin;
use crate::card::FortisCard;
use crate::chain::{ChainProtocol, FeeModel, FeeSuggestion, SendRequest, SignedTx};
use crate::config::{
    ProtocolConfig, ARBITRUM_ONE, ARBITRUM_ONE_CHAIN_ID, ETHEREUM, ETHEREUM_CHAIN_ID,
};
use crate::error::{ChainError, ProtocolError};
use crate::keys::{self, SignatureComponents};
use crate::units;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::hex;
use alloy::primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use std::str::FromStr;
use std::sync::Arc;

/// Fee market estimate, in wei per gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Eip1559Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Network access needed by the EVM builder.
#[async_trait]
pub trait EvmBackend: Send + Sync {
    async fn nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Balance in wei.
    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn fee_estimate(&self) -> Result<Eip1559Fees, ChainError>;

    /// Base fee of the latest block.
    async fn base_fee(&self) -> Result<u128, ChainError>;

    async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, ChainError>;

    /// Submit an EIP-2718 encoded transaction, returns its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, ChainError>;
}

/// Keccak address of an uncompressed secp256k1 key.
pub fn evm_address(public_key: &PublicKey) -> Address {
    Address::from_raw_public_key(&public_key.serialize_uncompressed()[1..])
}

/// Fee market cost: every unit of gas pays `min(max_fee, priority + base_fee)`.
pub fn eip1559_fee(
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    base_fee: u128,
    gas_limit: u64,
) -> Result<u128, ChainError> {
    let effective = max_fee_per_gas.min(max_priority_fee_per_gas.saturating_add(base_fee));
    effective
        .checked_mul(gas_limit as u128)
        .ok_or_else(|| ChainError::InvalidFee("fee overflows".to_string()))
}

pub struct Evm {
    config: ProtocolConfig,
    chain_id: u64,
    backend: Arc<dyn EvmBackend>,
}

impl Evm {
    pub fn new(config: ProtocolConfig, chain_id: u64, backend: Arc<dyn EvmBackend>) -> Self {
        Evm {
            config,
            chain_id,
            backend,
        }
    }

    pub fn ethereum(backend: Arc<dyn EvmBackend>) -> Self {
        Self::new(ETHEREUM, ETHEREUM_CHAIN_ID, backend)
    }

    pub fn arbitrum_one(backend: Arc<dyn EvmBackend>) -> Self {
        Self::new(ARBITRUM_ONE, ARBITRUM_ONE_CHAIN_ID, backend)
    }

    fn sender(&self, xpub: &str, address_index: u32) -> Result<Address, ChainError> {
        let public_key = keys::derive_public_key(xpub, self.config.version_bytes, address_index)?;
        Ok(evm_address(&public_key))
    }

    /// Sign `hash` on the card and make sure the result recovers to `from`.
    async fn sign_hash(
        &self,
        card: &FortisCard,
        pin: &Pin,
        address_index: u32,
        hash: B256,
        from: Address,
    ) -> Result<SignatureComponents, ChainError> {
        let components = card
            .sign_digest(pin, &self.config, 0, address_index, &hash.0)
            .await?
            .canonicalize()?;
        let signer = to_alloy_signature(&components)
            .recover_address_from_prehash(&hash)
            .map_err(|e| ChainError::Transaction(e.to_string()))?;
        if signer != from {
            return Err(ChainError::Transaction(format!(
                "card signature recovers to {signer}, expected {from}"
            )));
        }
        Ok(components)
    }

    async fn build_and_sign(
        &self,
        card: &FortisCard,
        request: &SendRequest,
    ) -> Result<SignedTx, ChainError> {
        let from = self.sender(&request.xpub, request.address_index)?;
        let to = Address::from_str(&request.to_address)
            .map_err(|e| ChainError::InvalidAddress(format!("{}: {e}", request.to_address)))?;
        let value = U256::from(units::parse_amount(&request.amount, self.config.decimals)?);
        let input = Bytes::from(request.data.clone().unwrap_or_default());
        let nonce = self.backend.nonce(from).await?;

        let estimate = TransactionRequest::default()
            .from(from)
            .to(to)
            .value(value)
            .nonce(nonce)
            .input(input.clone().into());

        let (envelope, fee) = match request.fee {
            FeeModel::Legacy {
                gas_price,
                gas_limit,
            } => {
                let (gas_price, gas_limit) = if request.use_suggested_fee {
                    let gas_price = self.backend.gas_price().await?;
                    let gas_limit = self
                        .backend
                        .estimate_gas(estimate.gas_price(gas_price))
                        .await?;
                    (gas_price, gas_limit)
                } else {
                    (gas_price, gas_limit)
                };
                check_gas_limit(gas_limit)?;
                let fee = gas_price
                    .checked_mul(gas_limit as u128)
                    .ok_or_else(|| ChainError::InvalidFee("fee overflows".to_string()))?;

                let tx = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce,
                    gas_price,
                    gas_limit,
                    to: TxKind::Call(to),
                    value,
                    input,
                };
                let hash = tx.signature_hash();
                let signature = self
                    .sign_hash(card, &request.pin, request.address_index, hash, from)
                    .await?;
                let signed = tx.into_signed(to_alloy_signature(&signature));
                (TxEnvelope::from(signed), fee)
            }
            FeeModel::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                gas_limit,
            } => {
                let base_fee = self.backend.base_fee().await?;
                let (max_fee_per_gas, max_priority_fee_per_gas, gas_limit) =
                    if request.use_suggested_fee {
                        let fees = self.backend.fee_estimate().await?;
                        let gas_limit = self
                            .backend
                            .estimate_gas(
                                estimate
                                    .max_fee_per_gas(fees.max_fee_per_gas)
                                    .max_priority_fee_per_gas(fees.max_priority_fee_per_gas),
                            )
                            .await?;
                        (fees.max_fee_per_gas, fees.max_priority_fee_per_gas, gas_limit)
                    } else {
                        (max_fee_per_gas, max_priority_fee_per_gas, gas_limit)
                    };
                check_gas_limit(gas_limit)?;
                if max_priority_fee_per_gas > max_fee_per_gas {
                    return Err(ChainError::InvalidFee(format!(
                        "priority fee {max_priority_fee_per_gas} exceeds max fee {max_fee_per_gas}"
                    )));
                }
                let fee = eip1559_fee(
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    base_fee,
                    gas_limit,
                )?;

                let tx = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: TxKind::Call(to),
                    value,
                    access_list: Default::default(),
                    input,
                };
                let hash = tx.signature_hash();
                let signature = self
                    .sign_hash(card, &request.pin, request.address_index, hash, from)
                    .await?;
                let signed = tx.into_signed(to_alloy_signature(&signature));
                (TxEnvelope::from(signed), fee)
            }
            FeeModel::Bitcoin { .. } => {
                return Err(ChainError::InvalidFee(
                    "expected gasPrice or maxFeePerGas".to_string(),
                ))
            }
        };
        log::info!(
            "signed {} transaction {} from {from}",
            self.config.name,
            envelope.tx_hash()
        );

        Ok(SignedTx {
            signed_tx: hex::encode_prefixed(envelope.encoded_2718()),
            total_fee: units::format_amount(fee, self.config.decimals),
            total_fee_base_units: fee,
        })
    }

    async fn serve(
        &self,
        card: &FortisCard,
        xpub: &str,
        address_index: u32,
        pin: &Pin,
        request: &DappRequest,
    ) -> Result<String, ProtocolError> {
        match request {
            DappRequest::SendTransaction(tx) => {
                let amount = u128::try_from(tx.value)
                    .map(|wei| units::format_amount(wei, self.config.decimals))
                    .map_err(|e| self.error("handle_request", ChainError::InvalidAmount(e.to_string())))?;
                let send = SendRequest {
                    xpub: xpub.to_string(),
                    to_address: tx.to.clone(),
                    address_index,
                    amount,
                    fee: FeeModel::Legacy {
                        gas_price: tx.gas_price,
                        gas_limit: tx.gas_limit,
                    },
                    use_suggested_fee: false,
                    pin: pin.clone(),
                    data: Some(tx.data.clone()),
                };
                let signed = self.sign_tx(card, &send).await?;
                self.broadcast_tx(&signed.signed_tx).await
            }
            DappRequest::EthSign(message) | DappRequest::PersonalSign(message) => {
                let signed = async {
                    let from = self.sender(xpub, address_index)?;
                    let hash = personal_message_hash(message);
                    let signature = self.sign_hash(card, pin, address_index, hash, from).await?;
                    Ok::<_, ChainError>(encode_personal_signature(&signature))
                };
                signed.await.map_err(|e| self.error("handle_request", e))
            }
        }
    }
}

fn check_gas_limit(gas_limit: u64) -> Result<(), ChainError> {
    if gas_limit == 0 {
        return Err(ChainError::InvalidFee("gas limit must be positive".to_string()));
    }
    Ok(())
}

fn to_alloy_signature(signature: &SignatureComponents) -> Signature {
    Signature::new(
        U256::from_be_bytes(signature.r),
        U256::from_be_bytes(signature.s),
        signature.recovery_id & 1 == 1,
    )
}

#[async_trait]
impl ChainProtocol for Evm {
    fn static_config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn address(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError> {
        self.sender(xpub, address_index)
            .map(|address| address.to_checksum(None))
            .map_err(|e| self.error("address", e))
    }

    async fn balance(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError> {
        let balance = async {
            let address = self.sender(xpub, address_index)?;
            let wei = self.backend.balance(address).await?;
            let wei = u128::try_from(wei).map_err(|e| ChainError::Network(e.to_string()))?;
            Ok::<_, ChainError>(units::format_amount(wei, self.config.decimals))
        };
        balance.await.map_err(|e| self.error("balance", e))
    }

    async fn suggested_fees(&self) -> Result<FeeSuggestion, ProtocolError> {
        let fees = async {
            let gas_price = self.backend.gas_price().await?;
            let estimate = self.backend.fee_estimate().await?;
            Ok::<_, ChainError>(FeeSuggestion::Evm {
                gas_price,
                max_fee_per_gas: estimate.max_fee_per_gas,
                max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
            })
        };
        fees.await.map_err(|e| self.error("suggested_fees", e))
    }

    async fn sign_tx(
        &self,
        card: &FortisCard,
        request: &SendRequest,
    ) -> Result<SignedTx, ProtocolError> {
        self.build_and_sign(card, request)
            .await
            .map_err(|e| self.error("sign_tx", e))
    }

    async fn broadcast_tx(&self, signed_tx: &str) -> Result<String, ProtocolError> {
        let hash = async {
            let raw = hex::decode(signed_tx)
                .map_err(|e| ChainError::Transaction(format!("signed transaction: {e}")))?;
            self.backend.send_raw_transaction(&raw).await
        };
        let hash = hash.await.map_err(|e| self.error("broadcast_tx", e))?;
        log::info!("broadcast {}", self.config.explorer_tx_url(&hash));
        Ok(hash)
    }

    fn use_wallet_connect(&self) -> bool {
        true
    }

    fn chain_id(&self) -> Option<u64> {
        Some(self.chain_id)
    }

    async fn handle_request(
        &self,
        card: &FortisCard,
        xpub: &str,
        address_index: u32,
        pin: &Pin,
        request: &DappRequest,
    ) -> Result<String, ProtocolError> {
        log::debug!("{} request on {}", request.method(), self.config.name);
        self.serve(card, xpub, address_index, pin, request).await
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::emulator::test::{emulated_card, pin};
    use crate::emulator::CardEmulator;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::keccak256;
    use serde_json::json;
    use std::sync::Mutex;

    pub const XPUB: &str = "xpub6DCoCpSuQZB2jawqnGMEPS63ePKWkwWPH4TU45Q7LPXWuNd8TMtVxRrgjtEshuqpK3mdhaWHPFsBngh5GFZaM6si3yZdUsT8ddYM3PwnATt";
    pub const ADDRESS_0: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
    const RECIPIENT: &str = "0x000000000000000000000000000000000000dEaD";

    #[derive(Default)]
    pub struct MockEvmBackend {
        pub nonce: u64,
        pub balance: U256,
        pub gas_price: u128,
        pub fees: Eip1559Fees,
        pub base_fee: u128,
        pub gas_estimate: u64,
        pub estimates: Mutex<Vec<TransactionRequest>>,
        pub sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl EvmBackend for MockEvmBackend {
        async fn nonce(&self, _address: Address) -> Result<u64, ChainError> {
            Ok(self.nonce)
        }

        async fn balance(&self, _address: Address) -> Result<U256, ChainError> {
            Ok(self.balance)
        }

        async fn gas_price(&self) -> Result<u128, ChainError> {
            Ok(self.gas_price)
        }

        async fn fee_estimate(&self) -> Result<Eip1559Fees, ChainError> {
            Ok(self.fees)
        }

        async fn base_fee(&self) -> Result<u128, ChainError> {
            Ok(self.base_fee)
        }

        async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, ChainError> {
            self.estimates.lock().unwrap().push(request);
            Ok(self.gas_estimate)
        }

        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, ChainError> {
            self.sent.lock().unwrap().push(raw.to_vec());
            Ok(keccak256(raw).to_string())
        }
    }

    fn request(amount: &str, fee: FeeModel) -> SendRequest {
        SendRequest {
            xpub: XPUB.to_string(),
            to_address: RECIPIENT.to_string(),
            address_index: 0,
            amount: amount.to_string(),
            fee,
            use_suggested_fee: false,
            pin: pin(),
            data: None,
        }
    }

    fn decode(signed: &SignedTx) -> TxEnvelope {
        let raw = hex::decode(&signed.signed_tx).unwrap();
        TxEnvelope::decode_2718(&mut raw.as_slice()).unwrap()
    }

    fn expected_sender() -> Address {
        Address::from_str(ADDRESS_0).unwrap()
    }

    #[test]
    fn test_address() {
        let ethereum = Evm::ethereum(Arc::new(MockEvmBackend::default()));
        assert_eq!(ethereum.address(XPUB, 0).unwrap(), ADDRESS_0);
        assert_ne!(ethereum.address(XPUB, 1).unwrap(), ADDRESS_0);
        let err = ethereum.address(XPUB, 300).unwrap_err();
        assert_eq!(err.operation, "address");
    }

    #[test]
    fn test_eip1559_fee() {
        // priority + base below the cap
        assert_eq!(eip1559_fee(30, 2, 20, 21_000).unwrap(), 22 * 21_000);
        // capped by max fee
        assert_eq!(eip1559_fee(30, 2, 40, 21_000).unwrap(), 30 * 21_000);
        // the cap keeps the per gas price small
        assert_eq!(eip1559_fee(u128::MAX, 1, 1, 2).unwrap(), 4);
        assert!(matches!(
            eip1559_fee(u128::MAX, u128::MAX, 0, 2),
            Err(ChainError::InvalidFee(_))
        ));
    }

    #[tokio::test]
    async fn test_balance() {
        let backend = MockEvmBackend {
            balance: U256::from(1_500_000_000_000_000_000u128),
            ..Default::default()
        };
        let ethereum = Evm::ethereum(Arc::new(backend));
        assert_eq!(ethereum.balance(XPUB, 0).await.unwrap(), "1.5");
    }

    #[tokio::test]
    async fn test_sign_legacy() {
        let (_, card) = emulated_card();
        let backend = MockEvmBackend {
            nonce: 7,
            ..Default::default()
        };
        let ethereum = Evm::ethereum(Arc::new(backend));
        let fee = FeeModel::Legacy {
            gas_price: 20,
            gas_limit: 21_000,
        };
        let signed = ethereum.sign_tx(&card, &request("0.01", fee)).await.unwrap();
        assert_eq!(signed.total_fee, "0.00000000000042");
        assert_eq!(signed.total_fee_base_units, 420_000);
        assert!(signed.signed_tx.starts_with("0x"));

        let TxEnvelope::Legacy(tx) = decode(&signed) else {
            panic!("expected a legacy transaction");
        };
        assert_eq!(tx.tx().chain_id, Some(1));
        assert_eq!(tx.tx().nonce, 7);
        assert_eq!(tx.tx().gas_price, 20);
        assert_eq!(tx.tx().value, U256::from(10_000_000_000_000_000u128));
        assert_eq!(tx.tx().to, TxKind::Call(Address::from_str(RECIPIENT).unwrap()));
        let signer = tx
            .signature()
            .recover_address_from_prehash(&tx.signature_hash())
            .unwrap();
        assert_eq!(signer, expected_sender());
    }

    #[tokio::test]
    async fn test_sign_eip1559_on_arbitrum() {
        let (_, card) = emulated_card();
        let backend = MockEvmBackend {
            base_fee: 20,
            ..Default::default()
        };
        let arbitrum = Evm::arbitrum_one(Arc::new(backend));
        let fee = FeeModel::Eip1559 {
            max_fee_per_gas: 30,
            max_priority_fee_per_gas: 2,
            gas_limit: 21_000,
        };
        let signed = arbitrum.sign_tx(&card, &request("1", fee)).await.unwrap();
        assert_eq!(signed.total_fee_base_units, 22 * 21_000);

        let TxEnvelope::Eip1559(tx) = decode(&signed) else {
            panic!("expected a fee market transaction");
        };
        assert_eq!(tx.tx().chain_id, 42161);
        assert_eq!(tx.tx().max_fee_per_gas, 30);
        assert_eq!(tx.tx().max_priority_fee_per_gas, 2);
        let signer = tx
            .signature()
            .recover_address_from_prehash(&tx.signature_hash())
            .unwrap();
        assert_eq!(signer, expected_sender());
    }

    #[tokio::test]
    async fn test_sign_with_suggested_fees() {
        let (_, card) = emulated_card();
        let backend = Arc::new(MockEvmBackend {
            gas_price: 7,
            gas_estimate: 50_000,
            ..Default::default()
        });
        let ethereum = Evm::ethereum(backend.clone());
        let mut send = request(
            "0.5",
            FeeModel::Legacy {
                gas_price: 1,
                gas_limit: 1,
            },
        );
        send.use_suggested_fee = true;
        send.data = Some(vec![0xa9, 0x05, 0x9c, 0xbb]);
        let signed = ethereum.sign_tx(&card, &send).await.unwrap();
        assert_eq!(signed.total_fee_base_units, 7 * 50_000);

        let estimates = backend.estimates.lock().unwrap();
        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].gas_price, Some(7));
        assert_eq!(estimates[0].from, Some(expected_sender()));
    }

    #[tokio::test]
    async fn test_high_s_card_is_canonicalized() {
        let emulator = Arc::new(CardEmulator::new().unwrap().with_high_s());
        let card = FortisCard::new(emulator);
        let ethereum = Evm::ethereum(Arc::new(MockEvmBackend::default()));
        let fee = FeeModel::Legacy {
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
        };
        let signed = ethereum.sign_tx(&card, &request("0.1", fee)).await.unwrap();
        let TxEnvelope::Legacy(tx) = decode(&signed) else {
            panic!("expected a legacy transaction");
        };
        assert!(tx.signature().normalize_s().is_none());
        let signer = tx
            .signature()
            .recover_address_from_prehash(&tx.signature_hash())
            .unwrap();
        assert_eq!(signer, expected_sender());
    }

    #[tokio::test]
    async fn test_sign_rejects_bad_fees() {
        let (_, card) = emulated_card();
        let ethereum = Evm::ethereum(Arc::new(MockEvmBackend::default()));

        let err = ethereum
            .sign_tx(&card, &request("1", FeeModel::Bitcoin { sats_per_vbyte: 5 }))
            .await
            .unwrap_err();
        assert!(matches!(err.source, ChainError::InvalidFee(_)));

        let fee = FeeModel::Eip1559 {
            max_fee_per_gas: 1,
            max_priority_fee_per_gas: 2,
            gas_limit: 21_000,
        };
        let err = ethereum.sign_tx(&card, &request("1", fee)).await.unwrap_err();
        assert!(matches!(err.source, ChainError::InvalidFee(_)));

        let mut bad = request(
            "1",
            FeeModel::Legacy {
                gas_price: 1,
                gas_limit: 21_000,
            },
        );
        bad.to_address = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".to_string();
        let err = ethereum.sign_tx(&card, &bad).await.unwrap_err();
        assert!(matches!(err.source, ChainError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_broadcast_returns_hash() {
        let (_, card) = emulated_card();
        let backend = Arc::new(MockEvmBackend::default());
        let ethereum = Evm::ethereum(backend.clone());
        let fee = FeeModel::Legacy {
            gas_price: 20,
            gas_limit: 21_000,
        };
        let signed = ethereum.sign_tx(&card, &request("0.01", fee)).await.unwrap();
        let hash = ethereum.broadcast_tx(&signed.signed_tx).await.unwrap();
        assert_eq!(hash, decode(&signed).tx_hash().to_string());
        assert_eq!(backend.sent.lock().unwrap().len(), 1);

        let err = ethereum.broadcast_tx("0xzz").await.unwrap_err();
        assert_eq!(err.operation, "broadcast_tx");
    }

    #[tokio::test]
    async fn test_wrong_pin_broadcasts_nothing() {
        let (_, card) = emulated_card();
        let backend = Arc::new(MockEvmBackend::default());
        let ethereum = Evm::ethereum(backend.clone());
        let request = DappRequest::parse(
            "eth_sendTransaction",
            &json!([{"to": RECIPIENT, "value": "0x1", "gasPrice": "0x14", "gas": "0x5208"}]),
        )
        .unwrap();
        let wrong: Pin = "letmein!".parse().unwrap();
        let err = ethereum
            .handle_request(&card, XPUB, 0, &wrong, &request)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dapp_send_transaction() {
        let (_, card) = emulated_card();
        let backend = Arc::new(MockEvmBackend::default());
        let ethereum = Evm::ethereum(backend.clone());
        let request = DappRequest::parse(
            "eth_sendTransaction",
            &json!([{
                "to": RECIPIENT,
                "value": "0xde0b6b3a7640000",
                "gasPrice": "0x14",
                "gas": "0x5208",
                "data": "0x1234"
            }]),
        )
        .unwrap();
        let hash = ethereum
            .handle_request(&card, XPUB, 0, &pin(), &request)
            .await
            .unwrap();

        let sent = backend.sent.lock().unwrap();
        assert_eq!(hash, keccak256(&sent[0]).to_string());
        let TxEnvelope::Legacy(tx) = TxEnvelope::decode_2718(&mut sent[0].as_slice()).unwrap()
        else {
            panic!("expected a legacy transaction");
        };
        assert_eq!(tx.tx().value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(tx.tx().gas_limit, 21_000);
        assert_eq!(tx.tx().input.as_ref(), &[0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_dapp_personal_sign() {
        let (_, card) = emulated_card();
        let ethereum = Evm::ethereum(Arc::new(MockEvmBackend::default()));
        let request = DappRequest::parse("personal_sign", &json!(["0x68656c6c6f", ADDRESS_0]))
            .unwrap();
        let encoded = ethereum
            .handle_request(&card, XPUB, 0, &pin(), &request)
            .await
            .unwrap();

        let bytes = hex::decode(&encoded).unwrap();
        assert_eq!(bytes.len(), 65);
        assert!(bytes[64] == 27 || bytes[64] == 28);
        let signature = Signature::from_raw(&bytes).unwrap();
        assert_eq!(
            signature.recover_address_from_msg(b"hello").unwrap(),
            expected_sender()
        );
    }

    #[tokio::test]
    async fn test_bitcoin_rejects_dapp_requests() {
        let (_, card) = emulated_card();
        let bitcoin = crate::chain::BitcoinNativeSegWit::new(Arc::new(
            crate::chain::bitcoin::test::MockBitcoinBackend::default(),
        ));
        let request = DappRequest::PersonalSign(b"hello".to_vec());
        let err = bitcoin
            .handle_request(&card, XPUB, 0, &pin(), &request)
            .await
            .unwrap_err();
        assert_eq!(
            err.source,
            ChainError::UnsupportedMethod("personal_sign".to_string())
        );
    }
}
