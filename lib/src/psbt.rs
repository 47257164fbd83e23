// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::ChainError;
use bitcoin::Psbt;

/// Move each input's single P2WPKH partial signature into its final witness.
pub fn finalize_psbt(mut psbt: Psbt) -> Result<Psbt, ChainError> {
    use bitcoin::blockdata::witness::Witness;

    for (idx, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let (pubkey, sig) = input.partial_sigs.iter().next().ok_or_else(|| {
            ChainError::Transaction(format!("Input {idx} has no partial signatures"))
        })?;

        // [signature ‖ sighash flag, pubkey]
        let mut final_sig_wit = Witness::new();
        final_sig_wit.push(sig.to_vec());
        final_sig_wit.push(pubkey.to_bytes());
        input.final_script_witness = Some(final_sig_wit);
        input.partial_sigs.clear();
    }

    Ok(psbt)
}
