// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::apdu::{self, Pin, HASH_SIZE};
use crate::config::{ProtocolConfig, LATEST_FIRMWARE_VERSION};
use crate::error::FortisError;
use crate::keys::{self, AccountDiscovery, SignatureComponents};
use crate::transport::{CardChannel, CardTransport};
use std::fmt;
use std::sync::Arc;

/// A FortisCard reached through a [`CardTransport`]. Shared by every chain through `Arc`.
pub struct FortisCard {
    transport: CardTransport,
}

impl FortisCard {
    pub fn new(channel: Arc<dyn CardChannel>) -> Self {
        FortisCard {
            transport: CardTransport::new(channel),
        }
    }

    pub fn from_transport(transport: CardTransport) -> Self {
        FortisCard { transport }
    }

    /// Firmware version as `major.minor.patch`.
    pub async fn firmware_version(&self) -> Result<String, FortisError> {
        let response = self.transport.exchange(&apdu::firmware_version()).await?;
        if response.payload.len() < 3 {
            return Err(FortisError::ShortPayload {
                expected: 3,
                got: response.payload.len(),
            });
        }
        Ok(response.payload[..3]
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join("."))
    }

    pub async fn is_firmware_outdated(&self) -> Result<bool, FortisError> {
        let version = self.firmware_version().await?;
        Ok(is_older_version(&version, LATEST_FIRMWARE_VERSION))
    }

    /// Read the account key pieces for `m/purpose'/coin_type'/0'`.
    pub async fn discover_account(
        &self,
        pin: &Pin,
        config: &ProtocolConfig,
    ) -> Result<AccountDiscovery, FortisError> {
        let command = apdu::account_discovery(pin, config.purpose, config.coin_type, config.curve);
        let response = self.transport.exchange(&command).await?;
        AccountDiscovery::from_payload(&response.payload)
    }

    /// The account xpub, encoded with the chain's version bytes.
    pub async fn xpub(&self, pin: &Pin, config: &ProtocolConfig) -> Result<String, FortisError> {
        let discovery = self.discover_account(pin, config).await?;
        let xpub = keys::construct_xpub(&discovery, config.version_bytes);
        log::info!("discovered {} account {xpub}", config.name);
        Ok(xpub)
    }

    /// Sign a 32 byte digest with the key at `m/purpose'/coin_type'/0'/change/address_index`.
    /// The returned signature is exactly what the card produced, it is not canonicalized.
    pub async fn sign_digest(
        &self,
        pin: &Pin,
        config: &ProtocolConfig,
        change: u8,
        address_index: u32,
        digest: &[u8; HASH_SIZE],
    ) -> Result<SignatureComponents, FortisError> {
        let command = apdu::sign(
            pin,
            config.purpose,
            config.coin_type,
            change,
            address_index,
            config.curve,
            digest,
        )?;
        let response = self.transport.exchange(&command).await?;
        SignatureComponents::from_payload(&response.payload)
    }

    /// Load a seed, only development cards accept this.
    #[cfg(any(test, feature = "emulator"))]
    pub async fn store_seed(&self, pin: &Pin, seed: &[u8]) -> Result<(), FortisError> {
        let command = apdu::store_seed(pin, seed)?;
        self.transport.exchange(&command).await?;
        Ok(())
    }
}

impl fmt::Debug for FortisCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FortisCard")
            .field("transport", &self.transport)
            .finish()
    }
}

fn is_older_version(version: &str, latest: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    parse(version) < parse(latest)
}
