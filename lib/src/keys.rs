// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rebuild extended public keys and signatures from the card's raw responses.
//!
//! The card never exports an xpub. Account discovery returns the pieces of the
//! account-level key (`m/purpose'/coin'/0'`) and the xpub is assembled here.
//! Address keys are then derived locally at `m/0/index` without another card
//! round trip.

use crate::error::FortisError;
use bitcoin::base58;
use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpub};
use bitcoin::hashes::{ripemd160, Hash};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::NetworkKind;

pub const DISCOVERY_RESPONSE_SIZE: usize = 97;
pub const SIGNATURE_RESPONSE_SIZE: usize = 65;
pub const XPUB_SIZE: usize = 78;

/// Account keys are always `m/purpose'/coin_type'/0'`.
pub const ACCOUNT_DEPTH: u8 = 3;
pub const ACCOUNT_CHILD_NUMBER: [u8; 4] = [0x80, 0x00, 0x00, 0x00];

/// Account discovery payload: `sha256(parent pubkey) ‖ chain code ‖ compressed pubkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDiscovery {
    pub parent_pubkey_hash: [u8; 32],
    pub chain_code: [u8; 32],
    pub public_key: PublicKey,
}

impl AccountDiscovery {
    pub fn from_payload(payload: &[u8]) -> Result<Self, FortisError> {
        if payload.len() != DISCOVERY_RESPONSE_SIZE {
            return Err(FortisError::KeyMaterial(format!(
                "account discovery response must be {DISCOVERY_RESPONSE_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        let mut parent_pubkey_hash = [0u8; 32];
        parent_pubkey_hash.copy_from_slice(&payload[0..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[32..64]);
        let public_key = PublicKey::from_slice(&payload[64..97])?;
        Ok(AccountDiscovery {
            parent_pubkey_hash,
            chain_code,
            public_key,
        })
    }

    /// First four bytes of `ripemd160(sha256(parent pubkey))`.
    pub fn parent_fingerprint(&self) -> Fingerprint {
        Fingerprint::from(self.fingerprint_bytes())
    }

    fn fingerprint_bytes(&self) -> [u8; 4] {
        let hash160 = ripemd160::Hash::hash(&self.parent_pubkey_hash).to_byte_array();
        [hash160[0], hash160[1], hash160[2], hash160[3]]
    }
}

/// Serialize the account key as a base58check extended public key with the given version bytes.
pub fn construct_xpub(discovery: &AccountDiscovery, version_bytes: [u8; 4]) -> String {
    let mut data = Vec::with_capacity(XPUB_SIZE);
    data.extend_from_slice(&version_bytes);
    data.push(ACCOUNT_DEPTH);
    data.extend_from_slice(&discovery.fingerprint_bytes());
    data.extend_from_slice(&ACCOUNT_CHILD_NUMBER);
    data.extend_from_slice(&discovery.chain_code);
    data.extend_from_slice(&discovery.public_key.serialize());
    base58::encode_check(&data)
}

/// Parse an extended public key, accepting only the expected version bytes.
pub fn decode_xpub(xpub: &str, version_bytes: [u8; 4]) -> Result<Xpub, FortisError> {
    let data = base58::decode_check(xpub)?;
    if data.len() != XPUB_SIZE {
        return Err(FortisError::KeyMaterial(format!(
            "extended key must be {XPUB_SIZE} bytes, got {}",
            data.len()
        )));
    }
    if data[0..4] != version_bytes {
        return Err(FortisError::KeyMaterial(format!(
            "unexpected version bytes {}",
            crate::apdu::to_hex(&data[0..4])
        )));
    }
    let mut fingerprint = [0u8; 4];
    fingerprint.copy_from_slice(&data[5..9]);
    let mut child_number = [0u8; 4];
    child_number.copy_from_slice(&data[9..13]);
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&data[13..45]);

    Ok(Xpub {
        network: NetworkKind::Main,
        depth: data[4],
        parent_fingerprint: Fingerprint::from(fingerprint),
        child_number: ChildNumber::from(u32::from_be_bytes(child_number)),
        chain_code: ChainCode::from(chain_code),
        public_key: PublicKey::from_slice(&data[45..78])?,
    })
}

/// Derive the address key at `m/0/address_index` below the account xpub.
pub fn derive_public_key(
    xpub: &str,
    version_bytes: [u8; 4],
    address_index: u32,
) -> Result<PublicKey, FortisError> {
    if address_index > u8::MAX as u32 {
        return Err(FortisError::InvalidAddressIndex(address_index));
    }
    let xpub = decode_xpub(xpub, version_bytes)?;
    let secp = Secp256k1::verification_only();
    let path = [
        ChildNumber::from_normal_idx(0)?,
        ChildNumber::from_normal_idx(address_index)?,
    ];
    Ok(xpub.derive_pub(&secp, &path)?.public_key)
}

/// A card signature: `recovery id ‖ r ‖ s`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignatureComponents {
    pub recovery_id: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignatureComponents {
    pub fn from_payload(payload: &[u8]) -> Result<Self, FortisError> {
        if payload.len() != SIGNATURE_RESPONSE_SIZE {
            return Err(FortisError::KeyMaterial(format!(
                "signature response must be {SIGNATURE_RESPONSE_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        let mut r = [0u8; 32];
        r.copy_from_slice(&payload[1..33]);
        let mut s = [0u8; 32];
        s.copy_from_slice(&payload[33..65]);
        Ok(SignatureComponents {
            recovery_id: payload[0],
            r,
            s,
        })
    }

    pub fn compact(&self) -> [u8; 64] {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        compact
    }

    /// Force `s` into the lower half of the curve order. Negating `s` also
    /// negates the recovered point, so the recovery parity flips with it.
    pub fn canonicalize(&self) -> Result<Self, FortisError> {
        let mut signature = Signature::from_compact(&self.compact())?;
        signature.normalize_s();
        let compact = signature.serialize_compact();
        let mut s = [0u8; 32];
        s.copy_from_slice(&compact[32..]);
        if s == self.s {
            return Ok(*self);
        }
        Ok(SignatureComponents {
            recovery_id: self.recovery_id ^ 1,
            r: self.r,
            s,
        })
    }

    pub fn is_low_s(&self) -> bool {
        self.canonicalize().map(|c| c.s == self.s).unwrap_or(false)
    }

    pub fn to_signature(&self) -> Result<Signature, FortisError> {
        Ok(Signature::from_compact(&self.compact())?)
    }

    pub fn to_recoverable(&self) -> Result<RecoverableSignature, FortisError> {
        let recovery_id = RecoveryId::from_i32(self.recovery_id as i32)?;
        Ok(RecoverableSignature::from_compact(
            &self.compact(),
            recovery_id,
        )?)
    }

    /// Check the signature against the key the caller expects the card to have used.
    pub fn verify(&self, digest: &[u8; 32], public_key: &PublicKey) -> Result<(), FortisError> {
        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(*digest);
        secp.verify_ecdsa(&message, &self.to_signature()?, public_key)
            .map_err(|_| FortisError::KeyMaterial("card signature does not verify".to_string()))
    }
}
