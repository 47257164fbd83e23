// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process stand-in for a development FortisCard.
//!
//! Keys come from a BIP-39 seed held in memory, so this is never a substitute
//! for a real card. It speaks the same APDU protocol, including PIN attempt
//! counting and locking.

use crate::apdu::{
    ApduCommand, ApduResponse, EllipticCurve, Instruction, Pin, APPLET_AID, HASH_SIZE, PIN_SIZE,
    SEED_MAX_SIZE, SEED_MIN_SIZE,
};
use crate::error::{CardError, FortisError, MAX_PIN_ATTEMPTS};
use crate::transport::CardChannel;
use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::NetworkKind;
use std::sync::Mutex;
use std::time::Duration;

pub const PIN: &str = "password";
pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

const SW_FILE_NOT_FOUND: u16 = 0x6A82;
const SW_WRONG_DATA: u16 = 0x6A80;
const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

const FIRMWARE_VERSION: [u8; 3] = [1, 0, 0];

#[derive(Debug)]
struct CardState {
    pin: Pin,
    seed: Vec<u8>,
    attempts_used: u8,
    connected: bool,
    selected: bool,
}

pub struct CardEmulator {
    secp: Secp256k1<All>,
    state: Mutex<CardState>,
    high_s: bool,
}

impl CardEmulator {
    /// A card loaded with the well known test mnemonic and [`PIN`].
    pub fn new() -> Result<Self, FortisError> {
        Self::from_mnemonic(MNEMONIC, &PIN.parse()?)
    }

    pub fn from_mnemonic(phrase: &str, pin: &Pin) -> Result<Self, FortisError> {
        let mnemonic = bip39::Mnemonic::parse(phrase)
            .map_err(|e| FortisError::KeyMaterial(e.to_string()))?;
        Ok(Self::from_seed(&mnemonic.to_seed(""), pin))
    }

    pub fn from_seed(seed: &[u8], pin: &Pin) -> Self {
        CardEmulator {
            secp: Secp256k1::new(),
            state: Mutex::new(CardState {
                pin: pin.clone(),
                seed: seed.to_vec(),
                attempts_used: 0,
                connected: false,
                selected: false,
            }),
            high_s: false,
        }
    }

    /// Return signatures with `s` in the upper half of the curve order, like
    /// firmware that does not normalize.
    pub fn with_high_s(mut self) -> Self {
        self.high_s = true;
        self
    }

    pub fn attempts_used(&self) -> u8 {
        self.lock_state().attempts_used
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CardState> {
        // a poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn process(&self, state: &mut CardState, command: &ApduCommand) -> ApduResponse {
        let ins = match Instruction::try_from(command.ins) {
            Ok(ins) => ins,
            Err(_) => return status(SW_INS_NOT_SUPPORTED),
        };
        if ins == Instruction::SelectApplet {
            state.selected = command.data() == APPLET_AID;
            return status(if state.selected {
                CardError::SW_SUCCESS
            } else {
                SW_FILE_NOT_FOUND
            });
        }
        if !state.selected {
            return status(SW_CONDITIONS_NOT_SATISFIED);
        }
        if ins == Instruction::FirmwareVersion {
            return success(FIRMWARE_VERSION.to_vec());
        }

        let data = command.data();
        if data.len() < PIN_SIZE {
            return status(SW_WRONG_DATA);
        }
        if let Err(response) = verify_pin(state, &data[..PIN_SIZE]) {
            return response;
        }
        let data = &data[PIN_SIZE..];

        let result = match ins {
            Instruction::AccountDiscovery => self.discover_account(&state.seed, data),
            Instruction::Sign => self.sign(&state.seed, data),
            Instruction::StoreSeed => {
                if (SEED_MIN_SIZE..=SEED_MAX_SIZE).contains(&data.len()) {
                    state.seed = data.to_vec();
                    Some(Vec::new())
                } else {
                    None
                }
            }
            Instruction::SelectApplet | Instruction::FirmwareVersion => None,
        };
        match result {
            Some(payload) => success(payload),
            None => status(SW_WRONG_DATA),
        }
    }

    /// `purpose(1) ‖ coin_type(4) ‖ curve(1)`
    fn discover_account(&self, seed: &[u8], data: &[u8]) -> Option<Vec<u8>> {
        if data.len() != 6 || data[5] != EllipticCurve::Secp256k1 as u8 {
            return None;
        }
        let purpose = data[0] as u32;
        let coin_type = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

        let parent = self.derive(seed, &[hardened(purpose)?, hardened(coin_type)?])?;
        let account = self.derive(
            seed,
            &[hardened(purpose)?, hardened(coin_type)?, hardened(0)?],
        )?;
        let parent = Xpub::from_priv(&self.secp, &parent);
        let account = Xpub::from_priv(&self.secp, &account);
        let encoded = account.encode();

        let mut payload = Vec::with_capacity(97);
        payload.extend_from_slice(
            sha256::Hash::hash(&parent.public_key.serialize()).as_byte_array(),
        );
        payload.extend_from_slice(&encoded[13..45]);
        payload.extend_from_slice(&account.public_key.serialize());
        Some(payload)
    }

    /// `purpose(1) ‖ coin_type(4) ‖ change(1) ‖ index(1) ‖ curve(1) ‖ hash(32)`
    fn sign(&self, seed: &[u8], data: &[u8]) -> Option<Vec<u8>> {
        if data.len() != 8 + HASH_SIZE || data[7] != EllipticCurve::Secp256k1 as u8 {
            return None;
        }
        let purpose = data[0] as u32;
        let coin_type = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let path = [
            hardened(purpose)?,
            hardened(coin_type)?,
            hardened(0)?,
            ChildNumber::from_normal_idx(data[5] as u32).ok()?,
            ChildNumber::from_normal_idx(data[6] as u32).ok()?,
        ];
        let key = self.derive(seed, &path)?;
        let mut digest = [0u8; HASH_SIZE];
        digest.copy_from_slice(&data[8..]);

        let signature = self
            .secp
            .sign_ecdsa_recoverable(&Message::from_digest(digest), &key.private_key);
        let (recovery_id, compact) = signature.serialize_compact();
        let mut recovery_id = recovery_id.to_i32() as u8;
        let mut s = [0u8; 32];
        s.copy_from_slice(&compact[32..]);
        if self.high_s {
            s = SecretKey::from_slice(&s).ok()?.negate().secret_bytes();
            recovery_id ^= 1;
        }

        let mut payload = Vec::with_capacity(65);
        payload.push(recovery_id);
        payload.extend_from_slice(&compact[..32]);
        payload.extend_from_slice(&s);
        Some(payload)
    }

    fn derive(&self, seed: &[u8], path: &[ChildNumber]) -> Option<Xpriv> {
        Xpriv::new_master(NetworkKind::Main, seed)
            .and_then(|master| master.derive_priv(&self.secp, &path))
            .ok()
    }
}

fn hardened(index: u32) -> Option<ChildNumber> {
    ChildNumber::from_hardened_idx(index).ok()
}

fn status(code: u16) -> ApduResponse {
    ApduResponse {
        payload: Vec::new(),
        status: code,
    }
}

fn success(payload: Vec<u8>) -> ApduResponse {
    ApduResponse {
        payload,
        status: CardError::SW_SUCCESS,
    }
}

fn verify_pin(state: &mut CardState, pin: &[u8]) -> Result<(), ApduResponse> {
    if state.attempts_used >= MAX_PIN_ATTEMPTS {
        return Err(status(CardError::SW_LOCKED));
    }
    if pin != state.pin.as_bytes() {
        state.attempts_used += 1;
        return Err(ApduResponse::wrong_pin(state.attempts_used));
    }
    state.attempts_used = 0;
    Ok(())
}

#[async_trait]
impl CardChannel for CardEmulator {
    async fn connect(&self, _timeout: Duration) -> Result<(), FortisError> {
        let mut state = self.lock_state();
        state.connected = true;
        state.selected = false;
        Ok(())
    }

    async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, FortisError> {
        let mut state = self.lock_state();
        if !state.connected {
            return Err(FortisError::CardCommunication(
                "emulated card is not connected".to_string(),
            ));
        }
        let command = ApduCommand::from_bytes(&command_apdu)?;
        Ok(self.process(&mut state, &command).to_bytes())
    }

    fn release(&self) {
        let mut state = self.lock_state();
        state.connected = false;
        state.selected = false;
    }
}
