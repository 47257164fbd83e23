// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-RPC requests forwarded by a connected dapp.

use crate::error::ChainError;
use crate::keys::SignatureComponents;
use alloy::primitives::hex;
use alloy::primitives::{eip191_hash_message, B256, U256};
use serde_json::Value;
use std::str::FromStr;

pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
pub const ETH_SIGN: &str = "eth_sign";
pub const PERSONAL_SIGN: &str = "personal_sign";

/// Methods advertised to dapps when a session is proposed.
pub const SUPPORTED_METHODS: [&str; 3] = [ETH_SEND_TRANSACTION, ETH_SIGN, PERSONAL_SIGN];

/// Transaction fields of an `eth_sendTransaction` request. Quantities are in wei.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DappTransaction {
    pub to: String,
    pub value: U256,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DappRequest {
    SendTransaction(DappTransaction),
    EthSign(Vec<u8>),
    PersonalSign(Vec<u8>),
}

impl DappRequest {
    pub fn parse(method: &str, params: &Value) -> Result<Self, ChainError> {
        let first = || {
            params.get(0).ok_or_else(|| {
                ChainError::Transaction(format!("{method} request has no parameters"))
            })
        };
        match method {
            ETH_SEND_TRANSACTION => {
                let tx = first()?;
                let to = tx
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChainError::InvalidAddress("missing \"to\"".to_string()))?;
                let gas_limit = tx
                    .get("gasLimit")
                    .or_else(|| tx.get("gas"))
                    .ok_or_else(|| ChainError::InvalidFee("missing gas limit".to_string()))?;
                let gas_price = tx
                    .get("gasPrice")
                    .ok_or_else(|| ChainError::InvalidFee("missing gasPrice".to_string()))?;
                let value = match tx.get("value") {
                    Some(value) => quantity(value, "value")?,
                    None => U256::ZERO,
                };
                let data = match tx.get("data").and_then(Value::as_str) {
                    Some(data) => hex_bytes(data, "data")?,
                    None => Vec::new(),
                };
                Ok(DappRequest::SendTransaction(DappTransaction {
                    to: to.to_string(),
                    value,
                    gas_price: u128::try_from(quantity(gas_price, "gasPrice")?)
                        .map_err(|e| ChainError::InvalidFee(e.to_string()))?,
                    gas_limit: u64::try_from(quantity(gas_limit, "gasLimit")?)
                        .map_err(|e| ChainError::InvalidFee(e.to_string()))?,
                    data,
                }))
            }
            ETH_SIGN | PERSONAL_SIGN => {
                let message = first()?.as_str().ok_or_else(|| {
                    ChainError::Transaction(format!("{method} message must be a hex string"))
                })?;
                let message = hex_bytes(message, "message")?;
                if method == ETH_SIGN {
                    Ok(DappRequest::EthSign(message))
                } else {
                    Ok(DappRequest::PersonalSign(message))
                }
            }
            other => Err(ChainError::UnsupportedMethod(other.to_string())),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            DappRequest::SendTransaction(_) => ETH_SEND_TRANSACTION,
            DappRequest::EthSign(_) => ETH_SIGN,
            DappRequest::PersonalSign(_) => PERSONAL_SIGN,
        }
    }
}

/// EIP-191 digest: `keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ message)`.
pub fn personal_message_hash(message: &[u8]) -> B256 {
    eip191_hash_message(message)
}

/// `0x ‖ r ‖ s ‖ v` with `v = 27 + parity`.
pub fn encode_personal_signature(signature: &SignatureComponents) -> String {
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(&signature.r);
    bytes.extend_from_slice(&signature.s);
    bytes.push(27 + (signature.recovery_id & 1));
    hex::encode_prefixed(bytes)
}

/// A JSON-RPC quantity, either a `0x` hex string or a plain number.
fn quantity(value: &Value, field: &str) -> Result<U256, ChainError> {
    let invalid = || ChainError::Transaction(format!("invalid {field}: {value}"));
    match value {
        Value::String(s) => U256::from_str(s).map_err(|_| invalid()),
        Value::Number(n) => n.as_u64().map(U256::from).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn hex_bytes(s: &str, field: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(s).map_err(|e| ChainError::Transaction(format!("invalid {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_send_transaction() {
        let params = json!([{
            "from": "0x9858EfFD232B4033E47d90003D41EC34EcaEda94",
            "to": "0x000000000000000000000000000000000000dEaD",
            "value": "0xde0b6b3a7640000",
            "gasPrice": "0x4a817c800",
            "gas": "0x5208",
            "data": "0x",
            "nonce": "0x0"
        }]);
        let request = DappRequest::parse("eth_sendTransaction", &params).unwrap();
        assert_eq!(request.method(), ETH_SEND_TRANSACTION);
        let DappRequest::SendTransaction(tx) = request else {
            panic!("expected a transaction");
        };
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(tx.gas_price, 20_000_000_000);
        assert_eq!(tx.gas_limit, 21_000);
        assert!(tx.data.is_empty());

        // gasLimit takes precedence over gas
        let params = json!([{"to": "0x000000000000000000000000000000000000dEaD", "gasPrice": 1, "gasLimit": "0x7530", "gas": "0x5208"}]);
        let DappRequest::SendTransaction(tx) =
            DappRequest::parse("eth_sendTransaction", &params).unwrap()
        else {
            panic!("expected a transaction");
        };
        assert_eq!(tx.gas_limit, 30_000);
        assert_eq!(tx.value, U256::ZERO);
    }

    #[test]
    fn test_parse_rejects_incomplete_transaction() {
        let params = json!([{"to": "0x000000000000000000000000000000000000dEaD", "gas": "0x5208"}]);
        assert!(matches!(
            DappRequest::parse("eth_sendTransaction", &params),
            Err(ChainError::InvalidFee(_))
        ));
        assert!(DappRequest::parse("eth_sendTransaction", &json!([])).is_err());
    }

    #[test]
    fn test_parse_sign_requests() {
        let params = json!(["0x68656c6c6f", "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"]);
        assert_eq!(
            DappRequest::parse("personal_sign", &params).unwrap(),
            DappRequest::PersonalSign(b"hello".to_vec())
        );
        assert_eq!(
            DappRequest::parse("eth_sign", &params).unwrap().method(),
            "eth_sign"
        );
    }

    #[test]
    fn test_parse_unsupported_method() {
        let err = DappRequest::parse("eth_signTypedData_v4", &json!([])).unwrap_err();
        assert_eq!(
            err,
            ChainError::UnsupportedMethod("eth_signTypedData_v4".to_string())
        );
    }

    #[test]
    fn test_personal_signature_encoding() {
        let signature = SignatureComponents {
            recovery_id: 1,
            r: [0x11; 32],
            s: [0x22; 32],
        };
        let encoded = encode_personal_signature(&signature);
        assert_eq!(encoded.len(), 2 + 130);
        assert!(encoded.ends_with("1c"));
        assert_eq!(
            personal_message_hash(b"hello"),
            alloy::primitives::b256!(
                "50b2c43fd39106bafbba0da34fc430e1f91e3c96ea2acee2bc34119f92b37750"
            )
        );
    }
}
