// Copyright (c) 2025 rust-fortis contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// CLI for rust-fortis
use clap::{Parser, Subcommand};
use rpassword::read_password;
#[cfg(feature = "emulator")]
use rust_fortis::emulator::CardEmulator;
use rust_fortis::{
    pcsc, Account, FeeModel, FortisCard, FortisError, Pin, SendRequest, Wallet, WalletError,
};
use serde::Serialize;
use std::io;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// FortisCard CLI
#[derive(Parser)]
#[command(author, version = option_env ! ("CARGO_PKG_VERSION").unwrap_or("unknown"), about,
long_about = None, propagate_version = true)]
struct FortisCli {
    /// Use an in-memory development card instead of the first PC/SC reader
    #[cfg(feature = "emulator")]
    #[arg(long, global = true)]
    emulator: bool,
    #[command(subcommand)]
    command: FortisCommand,
}

#[derive(Subcommand)]
enum FortisCommand {
    /// List supported chains
    Chains,
    /// Read the card firmware version, PIN not required
    Firmware,
    /// Read the account xpub for a chain, PIN required
    Account {
        chain: String,
        #[arg(long, default_value_t = 0)]
        index: u8,
    },
    /// Show the receive address of an account, PIN required
    Address {
        chain: String,
        #[arg(long, default_value_t = 0)]
        index: u8,
    },
    /// Show the balance of an account, PIN required
    Balance {
        chain: String,
        #[arg(long, default_value_t = 0)]
        index: u8,
    },
    /// Show the current network fee suggestion
    Fees { chain: String },
    /// Build and sign a transfer, PIN required
    Send {
        chain: String,
        to: String,
        /// Amount in whole units, e.g. 0.001
        amount: String,
        #[arg(long, default_value_t = 0)]
        index: u8,
        /// Bitcoin fee rate in sat/vB, the network suggestion when omitted
        #[arg(long)]
        fee_rate: Option<u64>,
        /// EVM legacy gas price in wei, the network suggestion when omitted
        #[arg(long)]
        gas_price: Option<u128>,
        #[arg(long, default_value_t = 21_000)]
        gas_limit: u64,
        /// Broadcast after signing and print the explorer link
        #[arg(long)]
        broadcast: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), WalletError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = FortisCli::parse();
    let wallet = Wallet::from_env(Arc::new(open_card(&cli)?))?;

    match cli.command {
        FortisCommand::Chains => print_json(&wallet.list_chains()),
        FortisCommand::Firmware => {
            let card = wallet.card();
            let version = card.firmware_version().await?;
            if card.is_firmware_outdated().await? {
                println!("{version} (update available)");
            } else {
                println!("{version}");
            }
        }
        FortisCommand::Account { chain, index } => {
            print_json(&account(&wallet, &chain, index).await?)
        }
        FortisCommand::Address { chain, index } => {
            let account = account(&wallet, &chain, index).await?;
            println!("{}", wallet.address(&account)?);
        }
        FortisCommand::Balance { chain, index } => {
            let account = account(&wallet, &chain, index).await?;
            println!("{} {}", wallet.balance(&account).await?, account.chain);
        }
        FortisCommand::Fees { chain } => print_json(&wallet.suggested_fees(&chain).await?),
        FortisCommand::Send {
            chain,
            to,
            amount,
            index,
            fee_rate,
            gas_price,
            gas_limit,
            broadcast,
        } => {
            let pin = pin()?;
            let account = wallet.add_account(&chain, &pin, &[]).await?;
            let is_evm = wallet
                .list_chains()
                .iter()
                .any(|c| c.name == account.chain && c.chain_id.is_some());
            let (fee, use_suggested_fee) = match (fee_rate, gas_price) {
                (Some(sats_per_vbyte), _) => (FeeModel::Bitcoin { sats_per_vbyte }, false),
                (None, Some(gas_price)) => (
                    FeeModel::Legacy {
                        gas_price,
                        gas_limit,
                    },
                    false,
                ),
                (None, None) if !is_evm => {
                    (FeeModel::Bitcoin { sats_per_vbyte: 0 }, true)
                }
                (None, None) => (
                    FeeModel::Legacy {
                        gas_price: 0,
                        gas_limit,
                    },
                    true,
                ),
            };
            let request = SendRequest {
                xpub: account.xpub,
                to_address: to,
                address_index: index.into(),
                amount,
                fee,
                use_suggested_fee,
                pin,
                data: None,
            };
            let signed = wallet.sign_tx(&chain, &request).await?;
            print_json(&signed);
            if broadcast {
                let hash = wallet.broadcast_tx(&chain, &signed.signed_tx).await?;
                println!("{}", wallet.explorer_url(&chain, &hash)?);
            }
        }
    }

    Ok(())
}

// handler functions shared by several commands

#[cfg(feature = "emulator")]
fn open_card(cli: &FortisCli) -> Result<FortisCard, FortisError> {
    if cli.emulator {
        log::warn!("using the development card, its seed is public");
        return Ok(FortisCard::new(Arc::new(CardEmulator::new()?)));
    }
    Ok(FortisCard::new(pcsc::find_first()?))
}

#[cfg(not(feature = "emulator"))]
fn open_card(_cli: &FortisCli) -> Result<FortisCard, FortisError> {
    Ok(FortisCard::new(pcsc::find_first()?))
}

async fn account(wallet: &Wallet, chain: &str, index: u8) -> Result<Account, WalletError> {
    let mut account = wallet.add_account(chain, &pin()?, &[]).await?;
    account.address_index = index;
    Ok(account)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn pin() -> Result<Pin, FortisError> {
    print!("Enter PIN: ");
    io::stdout()
        .flush()
        .and_then(|_| read_password())
        .map_err(|e| FortisError::Command(format!("reading PIN: {e}")))?
        .trim()
        .parse()
}
