// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Host emulation of the ROM bootloader.
//!
//! Flash lives in a file, the crypto accelerator is the software one and the
//! download link is a TCP socket. Each "reset" runs the boot decision, then
//! serves download connections until the host asks for a reboot.

mod flash;
mod io;
mod layout;
mod transport;

use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};

use romboot_common::boot::boot;
use romboot_common::flash_worker::{FlashClient, FlashQueue, FlashWorker};
use romboot_common::header::SignMode;
use romboot_common::hil::efuse::SecureBootLevel;
use romboot_common::ota::OtaSession;
use romboot_common::protocol::{CommandHandler, ProtocolTask};
use romboot_common::soft::SoftCrypto;
use romboot_common::zone::ZoneTable;
use romboot_common::{BoardConfig, ErrorCode};

use crate::flash::FileFlash;
use crate::io::{HostEfuse, HostIO};
use crate::transport::TcpTransport;

pub struct HostBoard;

impl BoardConfig for HostBoard {
    const VENDOR_ID: u32 = 0x0000_1D50;
    const DEVICE_ID: u32 = 0x0000_6018;
    const BOOTLOADER_HEADER_OFFSET: u32 = 0;
    const OTA_ZONE_ID: u8 = 0x0F;
    const AES_IV: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ];
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Level {
    Disabled,
    Enabled,
    Strict,
}

impl From<Level> for SecureBootLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Disabled => SecureBootLevel::Disabled,
            Level::Enabled => SecureBootLevel::Enabled,
            Level::Strict => SecureBootLevel::Strict,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Scheme {
    Crc32,
    Sha256,
    Ecdsa,
    Rsa,
}

impl From<Scheme> for SignMode {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Crc32 => SignMode::Crc32,
            Scheme::Sha256 => SignMode::Sha256,
            Scheme::Ecdsa => SignMode::EcdsaP256,
            Scheme::Rsa => SignMode::Rsa2048,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the ROM bootloader against a file-backed flash")]
struct Args {
    /// Flash image; created erased when missing.
    #[arg(long, default_value = "flash.bin")]
    flash: PathBuf,

    /// Size of the flash image in bytes.
    #[arg(long, default_value_t = 0x40_0000)]
    flash_size: u32,

    /// Address the download protocol listens on.
    #[arg(long, default_value = "127.0.0.1:5555")]
    listen: String,

    /// Zone booted after each reset.
    #[arg(long, default_value_t = layout::APP_ZONE)]
    zone: u8,

    /// Write a fresh bootloader header and zone table before starting.
    #[arg(long)]
    init_layout: bool,

    /// How the zones of a fresh layout are authenticated.
    #[arg(long, value_enum, default_value_t = Scheme::Crc32)]
    layout_sign_mode: Scheme,

    /// Efuse: secure boot level.
    #[arg(long, value_enum, default_value_t = Level::Disabled)]
    secure_boot: Level,

    /// Efuse: refuse raw flash access over the download link.
    #[arg(long)]
    secure_download: bool,

    /// Efuse: hex SHA-256 of the trusted public key material.
    #[arg(long)]
    root_digest: Option<String>,

    /// Efuse: hex AES-256 key for encrypted transfers.
    #[arg(long)]
    aes_key: Option<String>,

    /// Efuse: boot option bits.
    #[arg(long, default_value_t = 0)]
    boot_options: u32,
}

fn parse_key(name: &str, value: Option<&str>) -> Result<Option<[u8; 32]>> {
    value
        .map(|hex_str| {
            let bytes = hex::decode(hex_str).with_context(|| format!("{} is not hex", name))?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| anyhow!("{} must be 32 bytes, got {}", name, bytes.len()))
        })
        .transpose()
}

impl Args {
    fn efuse(&self) -> Result<HostEfuse> {
        Ok(HostEfuse {
            root_digest: parse_key("--root-digest", self.root_digest.as_deref())?,
            level: self.secure_boot.into(),
            secure_download: self.secure_download,
            aes_key: parse_key("--aes-key", self.aes_key.as_deref())?,
            boot_options: self.boot_options,
        })
    }
}

/// Serve one download connection. Returns how it ended and the zone table
/// for the next one.
fn serve(
    flash: &FileFlash,
    crypto: &mut SoftCrypto,
    efuse: &HostEfuse,
    table: ZoneTable,
    transport: TcpTransport,
) -> (Result<(), ErrorCode>, ZoneTable) {
    let queue = FlashQueue::new();
    let client = FlashClient::new(&queue);
    let worker = FlashWorker::new(flash, &queue);
    let session = OtaSession::<HostBoard, _, _, _>::init(flash, &client, crypto, efuse, table);
    let handler = CommandHandler::new(session, flash, &client, efuse);
    let mut task = ProtocolTask::new(transport, handler);

    let result = block_on(async {
        match select(task.run(), worker.run()).await {
            Either::First(result) => result,
            Either::Second(()) => Err(ErrorCode::FAIL),
        }
    });
    let (_, handler) = task.into_parts();
    (result, handler.close())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let efuse = args.efuse()?;
    let flash = FileFlash::open(&args.flash, args.flash_size)?;
    if args.init_layout {
        let table = layout::default_table(args.flash_size, args.layout_sign_mode.into())
            .map_err(|e| anyhow!("no room for the default layout: {:?}", e))?;
        layout::install(&flash, &table).map_err(|e| anyhow!("layout install: {:?}", e))?;
        flash.flush()?;
    }
    let mut table = ZoneTable::load(
        &flash,
        HostBoard::BOOTLOADER_HEADER_OFFSET,
        HostBoard::OTA_ZONE_ID,
    )
    .map_err(|e| anyhow!("zone table unusable ({:?}), try --init-layout", e))?;

    let listener =
        TcpListener::bind(&args.listen).with_context(|| format!("listen on {}", args.listen))?;
    let mut crypto = SoftCrypto::new();
    let io = HostIO;

    loop {
        match boot(&flash, &mut crypto, &efuse, &table, args.zone, &io) {
            Ok(target) => log::info!(
                "would load zone {} version {} at {:#x}, entry {:#x}",
                args.zone,
                target.header.version.version,
                target.load_address,
                target.entry_point
            ),
            Err(e) => log::warn!("nothing to boot ({:?}), waiting for a download", e),
        }
        // Promotion may have changed the flash.
        flash.flush()?;

        loop {
            let (stream, peer) = listener.accept().context("accept")?;
            log::info!("download link from {}", peer);
            let transport = TcpTransport::new(stream).context("configure link")?;
            let (result, returned) = serve(&flash, &mut crypto, &efuse, table, transport);
            table = returned;
            flash.flush()?;
            match result {
                Ok(()) => break,
                Err(e) => log::info!("download link closed: {:?}", e),
            }
        }
        log::info!("reset");
    }
}
