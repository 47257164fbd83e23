// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// An Application Protocol Data Unit (APDU) is the unit of communication between a smart card
/// reader and a smart card. This file defines the FortisCard APDU and set of command/responses.
use crate::error::{CardError, FortisError};
use std::fmt;

/// FortisCard applet identifier.
pub const APPLET_AID: [u8; 8] = [0xA0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x01, 0x01];
pub const SELECT_CLA_INS_P1P2: [u8; 4] = [0x00, 0xA4, 0x04, 0x00];
pub const CLA: u8 = 0x00;

pub const PIN_SIZE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const SEED_MIN_SIZE: usize = 16;
pub const SEED_MAX_SIZE: usize = 64;

/// Instruction byte of every command the applet understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    SelectApplet = 0xA4,
    /// Development cards only.
    StoreSeed = 0x10,
    Sign = 0x20,
    AccountDiscovery = 0x30,
    FirmwareVersion = 0x40,
}

impl TryFrom<u8> for Instruction {
    type Error = FortisError;

    fn try_from(ins: u8) -> Result<Self, Self::Error> {
        match ins {
            0xA4 => Ok(Instruction::SelectApplet),
            0x10 => Ok(Instruction::StoreSeed),
            0x20 => Ok(Instruction::Sign),
            0x30 => Ok(Instruction::AccountDiscovery),
            0x40 => Ok(Instruction::FirmwareVersion),
            other => Err(FortisError::Command(format!("unknown instruction {other:#04x}"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum EllipticCurve {
    Secp256k1 = 0x10,
}

/// An 8 byte card PIN. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin([u8; PIN_SIZE]);

impl Pin {
    pub fn new(bytes: &[u8]) -> Result<Self, FortisError> {
        let pin: [u8; PIN_SIZE] = bytes.try_into().map_err(|_| {
            FortisError::Command(format!(
                "PIN must be {PIN_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Pin(pin))
    }

    pub fn as_bytes(&self) -> &[u8; PIN_SIZE] {
        &self.0
    }
}

impl std::str::FromStr for Pin {
    type Err = FortisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pin::new(s.as_bytes())
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(********)")
    }
}

/// A command APDU, `[cla, ins, p1, p2, len, ...data]`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self, FortisError> {
        if data.len() > u8::MAX as usize {
            return Err(FortisError::Command(format!(
                "apdu data too long: {} bytes",
                data.len()
            )));
        }
        Ok(ApduCommand {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        build_apdu(&[self.cla, self.ins, self.p1, self.p2], &self.data)
    }

    /// Parse raw command bytes, used by card stand-ins.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FortisError> {
        if bytes.len() < 5 {
            return Err(FortisError::Command(format!(
                "apdu command too short: {} bytes",
                bytes.len()
            )));
        }
        let len = bytes[4] as usize;
        let data = &bytes[5..];
        if data.len() != len {
            return Err(FortisError::Command(format!(
                "apdu length byte {len} does not match {} data bytes",
                data.len()
            )));
        }
        ApduCommand::new(bytes[0], bytes[1], bytes[2], bytes[3], data.to_vec())
    }
}

impl fmt::Debug for ApduCommand {
    // data carries the PIN, only show the header
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduCommand")
            .field("cla", &self.cla)
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &self.p1)
            .field("p2", &self.p2)
            .field("len", &self.data.len())
            .finish()
    }
}

fn build_apdu(header: &[u8], data: &[u8]) -> Vec<u8> {
    [header, &[data.len() as u8], data].concat()
}

/// A response APDU, `[...payload, sw1, sw2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub payload: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FortisError> {
        if bytes.len() < 2 {
            return Err(FortisError::ShortResponse(bytes.len()));
        }
        let (payload, sw) = bytes.split_at(bytes.len() - 2);
        Ok(ApduResponse {
            payload: payload.to_vec(),
            status: u16::from_be_bytes([sw[0], sw[1]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [self.payload.as_slice(), &self.status.to_be_bytes()].concat()
    }

    /// Build a wrong PIN response the way the applet reports it.
    pub fn wrong_pin(attempts_used: u8) -> Self {
        ApduResponse {
            payload: vec![attempts_used],
            status: CardError::SW_WRONG_PIN,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CardError::SW_SUCCESS
    }

    /// Classify the status word, the attempts counter of a wrong PIN sits
    /// three bytes from the end of the raw response.
    pub fn check(self) -> Result<Self, CardError> {
        let attempts_used = self.payload.last().copied().unwrap_or(0);
        match CardError::error_from_code(self.status, attempts_used) {
            None => Ok(self),
            Some(err) => Err(err),
        }
    }
}

// Command builders

pub fn select_applet() -> ApduCommand {
    ApduCommand {
        cla: SELECT_CLA_INS_P1P2[0],
        ins: SELECT_CLA_INS_P1P2[1],
        p1: SELECT_CLA_INS_P1P2[2],
        p2: SELECT_CLA_INS_P1P2[3],
        data: APPLET_AID.to_vec(),
    }
}

pub fn firmware_version() -> ApduCommand {
    ApduCommand {
        cla: CLA,
        ins: Instruction::FirmwareVersion as u8,
        p1: 0,
        p2: 0,
        data: Vec::new(),
    }
}

/// `pin(8) ‖ purpose(1) ‖ coin_type(4, big endian) ‖ curve(1)`
pub fn account_discovery(
    pin: &Pin,
    purpose: u8,
    coin_type: u32,
    curve: EllipticCurve,
) -> ApduCommand {
    let mut data = Vec::with_capacity(PIN_SIZE + 6);
    data.extend_from_slice(pin.as_bytes());
    data.push(purpose);
    data.extend_from_slice(&coin_type.to_be_bytes());
    data.push(curve as u8);
    ApduCommand {
        cla: CLA,
        ins: Instruction::AccountDiscovery as u8,
        p1: 0,
        p2: 0,
        data,
    }
}

/// `pin(8) ‖ purpose(1) ‖ coin_type(4, big endian) ‖ change(1) ‖ index(1) ‖ curve(1) ‖ hash(32)`
///
/// Fails with [`FortisError::InvalidAddressIndex`] when the index does not fit a byte.
pub fn sign(
    pin: &Pin,
    purpose: u8,
    coin_type: u32,
    change: u8,
    address_index: u32,
    curve: EllipticCurve,
    hash: &[u8; HASH_SIZE],
) -> Result<ApduCommand, FortisError> {
    let address_index =
        u8::try_from(address_index).map_err(|_| FortisError::InvalidAddressIndex(address_index))?;
    let mut data = Vec::with_capacity(PIN_SIZE + 8 + HASH_SIZE);
    data.extend_from_slice(pin.as_bytes());
    data.push(purpose);
    data.extend_from_slice(&coin_type.to_be_bytes());
    data.push(change);
    data.push(address_index);
    data.push(curve as u8);
    data.extend_from_slice(hash);
    Ok(ApduCommand {
        cla: CLA,
        ins: Instruction::Sign as u8,
        p1: 0,
        p2: 0,
        data,
    })
}

/// `pin(8) ‖ seed(16..=64)`, accepted by development cards only.
pub fn store_seed(pin: &Pin, seed: &[u8]) -> Result<ApduCommand, FortisError> {
    if !(SEED_MIN_SIZE..=SEED_MAX_SIZE).contains(&seed.len()) {
        return Err(FortisError::Command(format!(
            "seed must be {SEED_MIN_SIZE} to {SEED_MAX_SIZE} bytes, got {}",
            seed.len()
        )));
    }
    ApduCommand::new(
        CLA,
        Instruction::StoreSeed as u8,
        0,
        0,
        [pin.as_bytes().as_slice(), seed].concat(),
    )
}

/// Lower case hex, used for APDU traces.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bitcoin::hex::DisplayHex::to_lower_hex_string(bytes)
}
