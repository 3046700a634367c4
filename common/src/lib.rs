// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Secure boot and in-field update core for a ROM bootloader.
//!
//! The crate decides at power-up which firmware image may run
//! ([`boot::select_boot_image`]) and accepts new images over a byte transport
//! ([`protocol::ProtocolTask`]) without ever letting a partially written or
//! tampered image become the boot target.
//!
//! ```text
//! +-------------------------------------------------------------+
//! |              protocol (SLIP frames, commands)               |
//! +-------------------------------------------------------------+
//!        |                    |                      |
//! +-------------+   +-------------------+   +------------------+
//! |  ota        |   |  direct flash     |   |  flash_worker    |
//! |  session    |-->|  program path     |-->|  (erase/program) |
//! +-------------+   +-------------------+   +------------------+
//!        |                                           |
//! +-------------+   +----------------------+         |
//! | zone/header |   | signature_verifier   |         |
//! +-------------+   |  + padding codec     |         |
//!        |          +----------------------+         |
//!        |                    |                      |
//! +-------------------------------------------------------------+
//! |   hil: FlashController, CryptoEngine, Efuse, Transport      |
//! +-------------------------------------------------------------+
//! ```
//!
//! Everything below the `hil` line is provided by the board.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod boot;
pub mod error;
pub mod flash_worker;
pub mod header;
pub mod hil;
pub mod ota;
pub mod padding;
pub mod protocol;
pub mod signature_verifier;
pub mod slip;
#[cfg(any(test, feature = "soft-crypto"))]
pub mod soft;
pub mod util;
pub mod zone;

#[cfg(test)]
mod testutil;

pub use error::{BootError, ErrorCode};

/// Compile-time configuration of a board.
pub trait BoardConfig {
    /// Vendor identifier every accepted image must carry.
    const VENDOR_ID: u32;

    /// Device identifier every accepted image must carry.
    const DEVICE_ID: u32;

    /// Flash offset of the bootloader's own partition header. Its first
    /// reserved slot points at the zone table.
    const BOOTLOADER_HEADER_OFFSET: u32;

    /// Zone id of the dedicated OTA staging zone used by overwrite mode.
    const OTA_ZONE_ID: u8;

    /// Fixed IV for AES-CBC encrypted image transfers.
    const AES_IV: [u8; 16];

    /// How long the receive loop waits for a single byte.
    const RECV_TIMEOUT_MS: u32 = 100;

    /// Consecutive receive timeouts tolerated in the middle of a frame.
    const MAX_RECV_RETRIES: u32 = 10;
}

/// Board hooks used to report the outcome of the boot decision.
pub trait BootloaderIO {
    /// Signal that a verified image was selected.
    fn signal_success(&self);

    /// Signal that no image could be booted.
    fn signal_failure(&self);

    /// Print a debug line on the board's console.
    fn debug(&self, msg: &str);
}
