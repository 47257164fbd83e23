// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::FortisError;
use crate::transport::CardChannel;
use async_trait::async_trait;
use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use std::ffi::CString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A FortisCard in a PC/SC reader, connected per exchange.
pub struct PcscChannel {
    ctx: Context,
    reader: CString,
    card: Mutex<Option<Card>>,
}

/// Open a channel to the first connected reader.
pub fn find_first() -> Result<Arc<PcscChannel>, FortisError> {
    // Establish a PC/SC context.
    let ctx = Context::establish(Scope::User)?;

    // List available readers.
    let mut readers_buf = [0; 2048];
    let mut readers = ctx.list_readers(&mut readers_buf)?;

    // Use the first reader.
    let reader = readers
        .next()
        .ok_or_else(|| FortisError::CardCommunication("No readers are connected.".to_string()))?
        .to_owned();
    log::info!("using reader {}", reader.to_string_lossy());

    Ok(Arc::new(PcscChannel {
        ctx,
        reader,
        card: Mutex::new(None),
    }))
}

impl PcscChannel {
    fn card(&self) -> MutexGuard<'_, Option<Card>> {
        self.card.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CardChannel for PcscChannel {
    async fn connect(&self, _timeout: Duration) -> Result<(), FortisError> {
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)?;
        *self.card() = Some(card);
        Ok(())
    }

    async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, FortisError> {
        let guard = self.card();
        let card = guard
            .as_ref()
            .ok_or_else(|| FortisError::CardCommunication("card is not connected".to_string()))?;
        let mut receive_buffer = vec![0; MAX_BUFFER_SIZE];
        let rapdu = card.transmit(command_apdu.as_slice(), &mut receive_buffer)?;
        Ok(rapdu.to_vec())
    }

    fn release(&self) {
        // dropping the handle disconnects and leaves the card powered
        self.card().take();
    }
}
