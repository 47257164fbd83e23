// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Errors reported by the card applet through its status word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error, uniffi::Error)]
pub enum CardError {
    #[error("Wrong PIN, {attempts_remaining} attempt(s) remaining")]
    WrongPin { attempts_remaining: u8 },
    #[error("Card is locked")]
    Locked,
    #[error("Invalid response code: {code:#06x}")]
    InvalidResponseCode { code: u16 },
}

impl From<rust_fortis::CardError> for CardError {
    fn from(value: rust_fortis::CardError) -> Self {
        match value {
            rust_fortis::CardError::WrongPin { attempts_remaining } => {
                CardError::WrongPin { attempts_remaining }
            }
            rust_fortis::CardError::Locked => CardError::Locked,
            rust_fortis::CardError::InvalidResponseCode(code) => {
                CardError::InvalidResponseCode { code }
            }
        }
    }
}

/// Errors returned by the wallet, the card or the NFC transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, uniffi::Error)]
pub enum FortisError {
    #[error(transparent)]
    Card { err: CardError },
    #[error("Card communication error: {msg}")]
    CardCommunication { msg: String },
    #[error("Core error: {msg}")]
    Core { msg: String },
    #[error("Invalid PIN: {msg}")]
    InvalidPin { msg: String },
    #[error("{chain} protocol error ({operation}): {msg}")]
    Protocol {
        chain: String,
        operation: String,
        msg: String,
    },
    #[error("Unknown chain: {name}")]
    UnknownChain { name: String },
    #[error("Configuration error: {msg}")]
    Config { msg: String },
}

impl From<rust_fortis::FortisError> for FortisError {
    fn from(value: rust_fortis::FortisError) -> Self {
        match value {
            rust_fortis::FortisError::Card(err) => FortisError::Card { err: err.into() },
            rust_fortis::FortisError::CardCommunication(msg) => {
                FortisError::CardCommunication { msg }
            }
            other => FortisError::Core {
                msg: other.to_string(),
            },
        }
    }
}

/// Card status errors surface unwrapped so the app can ask for the PIN again.
impl From<rust_fortis::ProtocolError> for FortisError {
    fn from(value: rust_fortis::ProtocolError) -> Self {
        if let Some(err) = value.card_error() {
            return FortisError::Card { err: err.into() };
        }
        FortisError::Protocol {
            chain: value.chain,
            operation: value.operation,
            msg: value.source.to_string(),
        }
    }
}

impl From<rust_fortis::ConfigError> for FortisError {
    fn from(value: rust_fortis::ConfigError) -> Self {
        FortisError::Config {
            msg: value.to_string(),
        }
    }
}

impl From<rust_fortis::WalletError> for FortisError {
    fn from(value: rust_fortis::WalletError) -> Self {
        match value {
            rust_fortis::WalletError::UnknownChain(name) => FortisError::UnknownChain { name },
            rust_fortis::WalletError::Card(err) => err.into(),
            rust_fortis::WalletError::Protocol(err) => err.into(),
            rust_fortis::WalletError::Config(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_pin_surfaces_as_card_error() {
        let err = rust_fortis::ProtocolError::new(
            "Ethereum",
            "sign_tx",
            rust_fortis::CardError::WrongPin {
                attempts_remaining: 2,
            }
            .into(),
        );
        assert_eq!(
            FortisError::from(err),
            FortisError::Card {
                err: CardError::WrongPin {
                    attempts_remaining: 2
                }
            }
        );

        let err = rust_fortis::ProtocolError::new(
            "Bitcoin (Native SegWit)",
            "balance",
            rust_fortis::ChainError::Network("timeout".to_string()),
        );
        assert!(matches!(
            FortisError::from(err),
            FortisError::Protocol { operation, .. } if operation == "balance"
        ));
    }
}
