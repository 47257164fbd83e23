// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use bitcoin::secp256k1;

/// Maximum wrong PIN entries before the card locks itself.
pub const MAX_PIN_ATTEMPTS: u8 = 3;

/// Errors reported by the card applet through its status word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    #[error("Wrong PIN, {attempts_remaining} attempt(s) remaining")]
    WrongPin { attempts_remaining: u8 },
    #[error("Card is locked")]
    Locked,
    #[error("Invalid response code: {0:#06x}")]
    InvalidResponseCode(u16),
}

impl CardError {
    pub const SW_SUCCESS: u16 = 0x9000;
    pub const SW_WRONG_PIN: u16 = 0x9704;
    pub const SW_LOCKED: u16 = 0x9700;

    /// Classify a status word. `attempts_used` is only read for a wrong PIN.
    pub fn error_from_code(code: u16, attempts_used: u8) -> Option<CardError> {
        match code {
            Self::SW_SUCCESS => None,
            Self::SW_WRONG_PIN => Some(CardError::WrongPin {
                attempts_remaining: MAX_PIN_ATTEMPTS.saturating_sub(attempts_used),
            }),
            Self::SW_LOCKED => Some(CardError::Locked),
            other => Some(CardError::InvalidResponseCode(other)),
        }
    }

    pub fn error_code(&self) -> u16 {
        match self {
            CardError::WrongPin { .. } => Self::SW_WRONG_PIN,
            CardError::Locked => Self::SW_LOCKED,
            CardError::InvalidResponseCode(code) => *code,
        }
    }
}

/// Errors returned by the card, the APDU transport or key material reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FortisError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error("Card communication: {0}")]
    CardCommunication(String),
    #[error("Response too short: {0} byte(s)")]
    ShortResponse(usize),
    #[error("Payload too short: expected {expected} byte(s), got {got}")]
    ShortPayload { expected: usize, got: usize },
    #[error("Invalid address index: {0}, must be 0..=255")]
    InvalidAddressIndex(u32),
    #[error("Key material: {0}")]
    KeyMaterial(String),
    #[error("Command: {0}")]
    Command(String),
}

impl From<secp256k1::Error> for FortisError {
    fn from(e: secp256k1::Error) -> Self {
        FortisError::KeyMaterial(e.to_string())
    }
}

impl From<bitcoin::bip32::Error> for FortisError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        FortisError::KeyMaterial(e.to_string())
    }
}

impl From<bitcoin::base58::Error> for FortisError {
    fn from(e: bitcoin::base58::Error) -> Self {
        FortisError::KeyMaterial(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FortisError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FortisError::CardCommunication("Timed out waiting for card".to_string())
    }
}

#[cfg(feature = "pcsc")]
impl From<pcsc::Error> for FortisError {
    fn from(e: pcsc::Error) -> Self {
        FortisError::CardCommunication(e.to_string())
    }
}

/// Errors raised while building, signing or broadcasting a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Fortis(#[from] FortisError),
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u128, available: u128 },
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid fee: {0}")]
    InvalidFee(String),
    #[error("Transaction: {0}")]
    Transaction(String),
}

impl From<CardError> for ChainError {
    fn from(e: CardError) -> Self {
        ChainError::Fortis(FortisError::Card(e))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::Network(e.to_string())
    }
}

impl From<bitcoin::psbt::Error> for ChainError {
    fn from(e: bitcoin::psbt::Error) -> Self {
        ChainError::Transaction(e.to_string())
    }
}

impl From<bitcoin::psbt::ExtractTxError> for ChainError {
    fn from(e: bitcoin::psbt::ExtractTxError) -> Self {
        ChainError::Transaction(e.to_string())
    }
}

/// A chain failure tagged with the chain name and the operation that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{chain} protocol error ({operation}): {source}")]
pub struct ProtocolError {
    pub chain: String,
    pub operation: String,
    #[source]
    pub source: ChainError,
}

impl ProtocolError {
    pub fn new(chain: &str, operation: &str, source: ChainError) -> Self {
        let err = ProtocolError {
            chain: chain.to_string(),
            operation: operation.to_string(),
            source,
        };
        log::error!("{err}");
        err
    }

    /// Only a wrong PIN is worth retrying with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.source,
            ChainError::Fortis(FortisError::Card(CardError::WrongPin { .. }))
        )
    }

    pub fn card_error(&self) -> Option<CardError> {
        match &self.source {
            ChainError::Fortis(FortisError::Card(e)) => Some(*e),
            _ => None,
        }
    }
}

/// Errors reading runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL in {var}: {msg}")]
    InvalidUrl { var: &'static str, msg: String },
    #[error("Invalid value in {var}: {msg}")]
    InvalidValue { var: &'static str, msg: String },
    #[error("Missing RPC endpoint for {chain}: set {var} or INFURA_API_KEY")]
    MissingRpcUrl { chain: &'static str, var: &'static str },
    #[error("HTTP client: {0}")]
    HttpClient(String),
}

impl From<reqwest::Error> for ConfigError {
    fn from(e: reqwest::Error) -> Self {
        ConfigError::HttpClient(e.to_string())
    }
}
