// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Native SegWit (P2WPKH) transfers on Bitcoin mainnet.

pub mod mempool;

use crate::apdu::Pin;
use crate::card::FortisCard;
use crate::chain::{ChainProtocol, FeeModel, FeeSuggestion, SendRequest, SignedTx};
use crate::config::{ProtocolConfig, BITCOIN_NATIVE_SEGWIT};
use crate::error::{ChainError, ProtocolError};
use crate::psbt::finalize_psbt;
use crate::{keys, units};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, OutPoint, Psbt, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Fixed transaction overhead, 10.5 vbytes counted in half vbytes.
pub const TX_OVERHEAD_HALF_VBYTES: u64 = 21;
pub const INPUT_VBYTES: u64 = 68;
pub const OUTPUT_VBYTES: u64 = 31;
/// Smallest P2WPKH output worth creating.
pub const DUST_THRESHOLD: u64 = 294;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Satoshis.
    pub value: u64,
}

/// Network access needed by the Bitcoin builder.
#[async_trait]
pub trait BitcoinBackend: Send + Sync {
    /// Unspent outputs of `address`, in the order the backend returns them.
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// Fee rate for next block inclusion, in sat/vB.
    async fn recommended_fee_rate(&self) -> Result<u64, ChainError>;

    /// Submit a hex serialized transaction, returns the txid.
    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError>;
}

/// `ceil((10.5 + 68 * inputs + 31 * outputs) * sats_per_vbyte)`
pub fn estimate_fee(
    inputs: usize,
    outputs: usize,
    sats_per_vbyte: u64,
) -> Result<u64, ChainError> {
    let half_vbytes = TX_OVERHEAD_HALF_VBYTES
        + 2 * INPUT_VBYTES * inputs as u64
        + 2 * OUTPUT_VBYTES * outputs as u64;
    half_vbytes
        .checked_mul(sats_per_vbyte)
        .map(|fee| fee.div_ceil(2))
        .ok_or_else(|| fee_overflow(sats_per_vbyte))
}

fn fee_overflow(sats_per_vbyte: u64) -> ChainError {
    ChainError::InvalidFee(format!("fee overflows at {sats_per_vbyte} sat/vB"))
}

/// Inputs chosen to pay `amount` plus fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub inputs: Vec<Utxo>,
    pub total_input: u64,
    pub fee: u64,
    /// Value of the change output, `None` when the change went to the fee.
    pub change: Option<u64>,
}

/// Pick inputs in backend order until they pay `amount` and their own fee.
///
/// UTXOs are fetched again on every round. Each extra round needs more inputs
/// than the one before, so a fixed UTXO set converges or runs out.
pub async fn select_coins(
    backend: &dyn BitcoinBackend,
    address: &str,
    amount: u64,
    sats_per_vbyte: u64,
) -> Result<CoinSelection, ChainError> {
    let mut target = amount;
    loop {
        let utxos = backend.utxos(address).await?;
        let mut inputs = Vec::new();
        let mut total_input = 0u64;
        for utxo in utxos {
            if total_input >= target {
                break;
            }
            total_input += utxo.value;
            inputs.push(utxo);
        }
        if total_input < target {
            return Err(ChainError::InsufficientFunds {
                needed: target as u128,
                available: total_input as u128,
            });
        }

        let fee = estimate_fee(inputs.len(), 1, sats_per_vbyte)?;
        let needed = amount
            .checked_add(fee)
            .ok_or_else(|| fee_overflow(sats_per_vbyte))?;
        if total_input >= needed {
            return apply_change(inputs, total_input, amount, fee, sats_per_vbyte);
        }
        log::debug!(
            "{} input(s) cover {total_input} sat, short of {amount} + {fee} fee, reselecting",
            inputs.len()
        );
        target = needed;
    }
}

/// A change output is only added when it is worth more than dust plus its own fee.
fn apply_change(
    inputs: Vec<Utxo>,
    total_input: u64,
    amount: u64,
    fee: u64,
    sats_per_vbyte: u64,
) -> Result<CoinSelection, ChainError> {
    let change = total_input - amount - fee;
    let change_output_fee = OUTPUT_VBYTES
        .checked_mul(sats_per_vbyte)
        .ok_or_else(|| fee_overflow(sats_per_vbyte))?;
    Ok(if change > DUST_THRESHOLD.saturating_add(change_output_fee) {
        CoinSelection {
            inputs,
            total_input,
            fee: fee + change_output_fee,
            change: Some(change - change_output_fee),
        }
    } else {
        CoinSelection {
            inputs,
            total_input,
            fee: fee + change,
            change: None,
        }
    })
}

pub struct BitcoinNativeSegWit {
    config: ProtocolConfig,
    backend: Arc<dyn BitcoinBackend>,
}

impl BitcoinNativeSegWit {
    pub fn new(backend: Arc<dyn BitcoinBackend>) -> Self {
        BitcoinNativeSegWit {
            config: BITCOIN_NATIVE_SEGWIT,
            backend,
        }
    }

    fn derive(&self, xpub: &str, address_index: u32) -> Result<(PublicKey, Address), ChainError> {
        let public_key = keys::derive_public_key(xpub, self.config.version_bytes, address_index)?;
        let address = Address::p2wpkh(&CompressedPublicKey(public_key), Network::Bitcoin);
        Ok((public_key, address))
    }

    async fn fee_rate(&self, request: &SendRequest) -> Result<u64, ChainError> {
        let rate = match (&request.fee, request.use_suggested_fee) {
            (_, true) => self.backend.recommended_fee_rate().await?,
            (FeeModel::Bitcoin { sats_per_vbyte }, false) => *sats_per_vbyte,
            (other, false) => {
                return Err(ChainError::InvalidFee(format!(
                    "expected satsPerVByte, got {other:?}"
                )))
            }
        };
        if rate == 0 {
            return Err(ChainError::InvalidFee("fee rate must be positive".to_string()));
        }
        Ok(rate)
    }

    async fn build_and_sign(
        &self,
        card: &FortisCard,
        request: &SendRequest,
    ) -> Result<SignedTx, ChainError> {
        let (public_key, sender) = self.derive(&request.xpub, request.address_index)?;
        let recipient = Address::from_str(&request.to_address)
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?
            .require_network(Network::Bitcoin)
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?;
        let amount = units::parse_amount(&request.amount, self.config.decimals)?;
        let amount = u64::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| ChainError::InvalidAmount(request.amount.clone()))?;
        let sats_per_vbyte = self.fee_rate(request).await?;

        let selection = select_coins(
            self.backend.as_ref(),
            &sender.to_string(),
            amount,
            sats_per_vbyte,
        )
        .await?;
        log::debug!(
            "selected {} input(s) totalling {} sat, fee {} sat",
            selection.inputs.len(),
            selection.total_input,
            selection.fee
        );

        let psbt = build_psbt(&selection, &sender, &recipient, amount)?;
        let psbt = sign_psbt(
            card,
            &request.pin,
            &self.config,
            request.address_index,
            public_key,
            psbt,
        )
        .await?;
        let tx = finalize_psbt(psbt)?.extract_tx()?;
        log::info!("signed bitcoin transaction {}", tx.compute_txid());

        Ok(SignedTx {
            signed_tx: serialize_hex(&tx),
            total_fee: units::format_amount(selection.fee as u128, self.config.decimals),
            total_fee_base_units: selection.fee as u128,
        })
    }
}

/// Recipient output first, then change back to the sender.
fn build_psbt(
    selection: &CoinSelection,
    sender: &Address,
    recipient: &Address,
    amount: u64,
) -> Result<Psbt, ChainError> {
    let input = selection
        .inputs
        .iter()
        .map(|utxo| {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| ChainError::Transaction(format!("utxo txid {}: {e}", utxo.txid)))?;
            Ok(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            })
        })
        .collect::<Result<Vec<_>, ChainError>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: recipient.script_pubkey(),
    }];
    if let Some(change) = selection.change {
        output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: sender.script_pubkey(),
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(&selection.inputs) {
        input.witness_utxo = Some(TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: sender.script_pubkey(),
        });
    }
    Ok(psbt)
}

/// Have the card sign every input's BIP-143 sighash with the sender key.
async fn sign_psbt(
    card: &FortisCard,
    pin: &Pin,
    config: &ProtocolConfig,
    address_index: u32,
    public_key: PublicKey,
    mut psbt: Psbt,
) -> Result<Psbt, ChainError> {
    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut sighash_cache = SighashCache::new(&unsigned_tx);

    for (input_index, input) in psbt.inputs.iter_mut().enumerate() {
        let witness_utxo = input.witness_utxo.as_ref().ok_or_else(|| {
            ChainError::Transaction(format!("input {input_index} is missing its utxo"))
        })?;
        let amount = witness_utxo.value;
        let script = witness_utxo.script_pubkey.as_script();
        if !script.is_p2wpkh() {
            return Err(ChainError::Transaction(format!(
                "input {input_index} is not p2wpkh"
            )));
        }

        let sighash = sighash_cache
            .p2wpkh_signature_hash(input_index, script, amount, EcdsaSighashType::All)
            .map_err(|e| ChainError::Transaction(e.to_string()))?;
        let digest = sighash.to_byte_array();

        let signature = card
            .sign_digest(pin, config, 0, address_index, &digest)
            .await?
            .canonicalize()?;
        signature.verify(&digest, &public_key)?;

        let final_sig = bitcoin::ecdsa::Signature::sighash_all(signature.to_signature()?);
        input
            .partial_sigs
            .insert(bitcoin::PublicKey::new(public_key), final_sig);
    }

    Ok(psbt)
}

#[async_trait]
impl ChainProtocol for BitcoinNativeSegWit {
    fn static_config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn address(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError> {
        self.derive(xpub, address_index)
            .map(|(_, address)| address.to_string())
            .map_err(|e| self.error("address", e))
    }

    async fn balance(&self, xpub: &str, address_index: u32) -> Result<String, ProtocolError> {
        let balance = async {
            let (_, address) = self.derive(xpub, address_index)?;
            let utxos = self.backend.utxos(&address.to_string()).await?;
            let sats: u128 = utxos.iter().map(|u| u.value as u128).sum();
            Ok::<_, ChainError>(units::format_amount(sats, self.config.decimals))
        };
        balance.await.map_err(|e| self.error("balance", e))
    }

    async fn suggested_fees(&self) -> Result<FeeSuggestion, ProtocolError> {
        self.backend
            .recommended_fee_rate()
            .await
            .map(|sats_per_vbyte| FeeSuggestion::Bitcoin { sats_per_vbyte })
            .map_err(|e| self.error("suggested_fees", e))
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
        let txid = self
            .backend
            .broadcast(signed_tx)
            .await
            .map_err(|e| self.error("broadcast_tx", e))?;
        log::info!("broadcast {}", self.config.explorer_tx_url(&txid));
        Ok(txid)
    }
}
