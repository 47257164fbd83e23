// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use rust_fortis::config::{BITCOIN_NATIVE_SEGWIT, ETHEREUM};
use rust_fortis::{keys, pcsc, FortisCard, FortisError, Pin};
use std::io;
use std::io::Write;

fn get_pin() -> Result<Pin, FortisError> {
    print!("Enter PIN: ");
    io::stdout().flush().unwrap();
    let mut pin: String = String::new();
    let _byte_count = std::io::stdin().read_line(&mut pin).unwrap();
    pin.trim().parse()
}

// Example using pcsc crate
#[tokio::main]
async fn main() -> Result<(), FortisError> {
    let card = FortisCard::new(pcsc::find_first()?);
    dbg!(card.firmware_version().await?);
    dbg!(card.is_firmware_outdated().await?);

    let pin = get_pin()?;

    let zpub = card.xpub(&pin, &BITCOIN_NATIVE_SEGWIT).await?;
    dbg!(&zpub);

    let xpub = card.xpub(&pin, &ETHEREUM).await?;
    let public_key = keys::derive_public_key(&xpub, ETHEREUM.version_bytes, 0)?;
    dbg!(&xpub, public_key);

    // let signature = card.sign_digest(&pin, &ETHEREUM, 0, 0, &[0u8; 32]).await?;
    // dbg!(signature);

    Ok(())
}
