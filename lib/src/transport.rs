// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::apdu::{self, ApduCommand, ApduResponse};
use crate::error::FortisError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Time allowed for one full card exchange.
pub const CARD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Trait for exchanging APDU data with a FortisCard over NFC or a reader.
#[async_trait]
pub trait CardChannel: Sync + Send {
    /// Acquire the tag technology, applying the exchange timeout.
    async fn connect(&self, timeout: Duration) -> Result<(), FortisError>;

    async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, FortisError>;

    /// Drop the tag technology handle, must be safe to call after a failed connect.
    fn release(&self);
}

/// Helper function to send one command and check the card's status word.
pub(crate) async fn transmit(
    channel: &dyn CardChannel,
    command: &ApduCommand,
) -> Result<ApduResponse, FortisError> {
    log::debug!("apdu >> {command:?}");
    let rapdu = channel.transmit_apdu(command.to_bytes()).await?;
    log::debug!("apdu << {}", apdu::to_hex(&rapdu));
    let response = ApduResponse::from_bytes(&rapdu)?;
    Ok(response.check()?)
}

/// Releases the channel when dropped, including when a timed out exchange is cancelled.
struct Session<'a> {
    channel: &'a dyn CardChannel,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.channel.release();
        log::debug!("card session released");
    }
}

/// The single path to the card. Exchanges from every caller queue on one lock
/// so partial APDU sequences never interleave.
pub struct CardTransport {
    channel: Arc<dyn CardChannel>,
    lock: Mutex<()>,
    timeout: Duration,
}

impl CardTransport {
    pub fn new(channel: Arc<dyn CardChannel>) -> Self {
        CardTransport {
            channel,
            lock: Mutex::new(()),
            timeout: CARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select the applet, then send `command`. The session is released on every exit path.
    pub async fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse, FortisError> {
        let _guard = self.lock.lock().await;
        tokio::time::timeout(self.timeout, self.session(command)).await?
    }

    async fn session(&self, command: &ApduCommand) -> Result<ApduResponse, FortisError> {
        let channel = self.channel.as_ref();
        let _session = Session { channel };
        channel.connect(self.timeout).await?;
        transmit(channel, &apdu::select_applet()).await?;
        transmit(channel, command).await
    }
}

impl fmt::Debug for CardTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

    /// Scriptable channel that counts every call.
    pub struct MockChannel {
        responder: Responder,
        pub delay: Duration,
        pub connects: AtomicUsize,
        pub transmits: AtomicUsize,
        pub releases: AtomicUsize,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl MockChannel {
        pub fn new(responder: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
            MockChannel {
                responder: Box::new(responder),
                delay: Duration::ZERO,
                connects: AtomicUsize::new(0),
                transmits: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Answers the select command with success and everything else with `response`.
        pub fn replying(response: Vec<u8>) -> Self {
            MockChannel::new(move |cmd| {
                if cmd[1] == 0xA4 {
                    vec![0x90, 0x00]
                } else {
                    response.clone()
                }
            })
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CardChannel for MockChannel {
        async fn connect(&self, _timeout: Duration) -> Result<(), FortisError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Ok(())
        }

        async fn transmit_apdu(&self, command_apdu: Vec<u8>) -> Result<Vec<u8>, FortisError> {
            self.transmits.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok((self.responder)(&command_apdu))
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            let _ = self
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }
}
