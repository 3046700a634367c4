// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Read-only access to the one-time-programmable efuse fields.

/// Boot option bit: never fall back to an older image when the newest one
/// fails verification.
pub const BOOT_OPT_NO_FALLBACK: u32 = 1 << 0;

/// Boot option bit: leave staged OTA images in place instead of promoting
/// them.
pub const BOOT_OPT_NO_PROMOTION: u32 = 1 << 1;

/// How much verification the boot path demands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecureBootLevel {
    /// Checksum and CRC only, signatures are ignored.
    Disabled,
    /// Zones configured with a sign mode above CRC must carry a valid
    /// signature.
    Enabled,
    /// As `Enabled`, and zones configured CRC-only are not bootable at all.
    Strict,
}

pub trait Efuse {
    /// SHA-256 of the trusted public key, `None` when never programmed.
    fn root_key_digest(&self) -> Option<[u8; 32]>;

    fn secure_boot_level(&self) -> SecureBootLevel;

    /// Secure download mode: only the verified OTA path may write flash.
    fn secure_download(&self) -> bool;

    /// AES-256 key for encrypted image transfers, `None` when never
    /// programmed.
    fn aes_key(&self) -> Option<[u8; 32]>;

    /// `BOOT_OPT_*` bits.
    fn boot_options(&self) -> u32;
}
