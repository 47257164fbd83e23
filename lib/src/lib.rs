// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Card protocol and transaction signing core for the FortisCard NFC hardware
//! wallet. Keys never leave the card: chains derive addresses from the account
//! xpub the card reports and ask the card to sign each digest.

pub extern crate bitcoin;

pub mod apdu;
pub mod card;
pub mod chain;
pub mod config;
pub mod error;
pub mod keys;
pub mod psbt;
pub mod transport;
pub mod units;
pub mod wallet;

#[cfg(any(test, feature = "emulator"))]
pub mod emulator;
#[cfg(feature = "pcsc")]
pub mod pcsc;

pub use apdu::Pin;
pub use card::FortisCard;
pub use chain::{
    ChainProtocol, DappRequest, FeeModel, FeeSuggestion, Registry, SendRequest, SignedTx,
};
pub use config::{NetworkConfig, ProtocolConfig};
pub use error::{CardError, ChainError, ConfigError, FortisError, ProtocolError};
pub use transport::{CardChannel, CardTransport};
pub use wallet::{Account, Wallet, WalletError};
