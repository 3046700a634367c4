// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! OTA update session.
//!
//! ```text
//!            new_version            start_ota              verify_data
//!   Idle ──────────────> VersionChecked ─────> DataWriting ───────────> DataVerified
//!    ^                                           │   ^  write_data
//!    └──────────── any fatal error ──────────────┘   └──┘
//! ```
//!
//! Nothing written during a session can boot until `verify_data` has checked
//! the CRC (and the signature when the zone is signed) and then programmed the
//! validity flag. That single write is the commit point: the validity word is
//! kept erased while data is written, so a reset before it leaves the
//! previous image in charge.

use core::marker::PhantomData;

use zeroize::Zeroize;

use crate::flash_worker::{FlashClient, FLASH_JOB_LEN};
use crate::header::{
    SignMode, ValidityFlag, VersionRecord, ZoneFlags, FLAGS_OFFSET, VALIDITY_OFFSET,
};
use crate::hil::crypto::{CryptoEngine, AES_BLOCK_LEN};
use crate::hil::efuse::Efuse;
use crate::hil::flash::FlashController;
use crate::signature_verifier::verify_flash_signature;
use crate::util::align_up;
use crate::zone::{
    check_sum, check_zone_crc, find_blank_zone, find_zone, load_image, ZoneEntry, ZoneTable,
    CRC32,
};
use crate::BoardConfig;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    VersionChecked,
    DataWriting,
    DataVerified,
}

/// Result code of an OTA command, sent back to the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaStatus {
    VersionConfirm = 0x00,
    StartConfirm = 0x01,
    DataConfirm = 0x02,
    VerifyConfirm = 0x03,
    InvalidVersion = 0x10,
    InvalidCmd = 0x11,
    InvalidParam = 0x12,
    NoSpace = 0x13,
    EraseError = 0x14,
    WriteError = 0x15,
    VerifyError = 0x16,
    CryptoError = 0x17,
    ZoneNotFound = 0x18,
}

impl OtaStatus {
    pub fn is_confirm(self) -> bool {
        matches!(
            self,
            OtaStatus::VersionConfirm
                | OtaStatus::StartConfirm
                | OtaStatus::DataConfirm
                | OtaStatus::VerifyConfirm
        )
    }
}

#[derive(Copy, Clone, Debug)]
struct PendingVersion {
    record: VersionRecord,
    flags: ZoneFlags,
}

/// Destination chosen by `start_ota`.
#[derive(Copy, Clone, Debug)]
struct Target {
    entry: ZoneEntry,
    total_size: u32,
    staging: bool,
    encrypted: bool,
    /// Next offset an encrypted transfer must continue at.
    next_offset: u32,
}

pub struct OtaSession<'a, B, F, C, E>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    flash: &'a F,
    writer: &'a FlashClient<'a>,
    crypto: &'a mut C,
    efuse: &'a E,
    table: ZoneTable,
    state: OtaState,
    pending: Option<PendingVersion>,
    target: Option<Target>,
    crypto_active: bool,
    _board: PhantomData<B>,
}

impl<'a, B, F, C, E> OtaSession<'a, B, F, C, E>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    pub fn init(
        flash: &'a F,
        writer: &'a FlashClient<'a>,
        crypto: &'a mut C,
        efuse: &'a E,
        table: ZoneTable,
    ) -> Self {
        Self {
            flash,
            writer,
            crypto,
            efuse,
            table,
            state: OtaState::Idle,
            pending: None,
            target: None,
            crypto_active: false,
            _board: PhantomData,
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn table(&self) -> &ZoneTable {
        &self.table
    }

    /// Power the accelerator down, which also wipes the AES key.
    fn release_crypto(&mut self) {
        if self.crypto_active {
            self.crypto.power_off();
            self.crypto_active = false;
        }
    }

    fn reset(&mut self) {
        self.release_crypto();
        self.pending = None;
        self.target = None;
        self.state = OtaState::Idle;
    }

    /// Fatal error: back to `Idle` and report `status`.
    fn fail(&mut self, status: OtaStatus) -> OtaStatus {
        log::error!("ota: {:?}, session reset", status);
        self.reset();
        status
    }

    /// Drop the session after a transport failure. Outstanding flash jobs
    /// are not waited for here; the next session starts with an erase.
    pub fn abort(&mut self) {
        if self.state != OtaState::Idle {
            log::warn!("ota: aborted in {:?}", self.state);
        }
        self.reset();
    }

    /// End the session and hand back the zone table.
    pub fn close(mut self) -> ZoneTable {
        self.reset();
        self.table
    }

    /// Version record of the image zone `zone_id` currently boots.
    pub fn current_version(&self, zone_id: u8) -> Option<VersionRecord> {
        find_zone(self.flash, &self.table, zone_id).map(|image| image.header.version)
    }

    /// Announce the image about to be sent. Any session in progress is
    /// dropped.
    pub fn new_version(&mut self, record: VersionRecord, flags: ZoneFlags) -> OtaStatus {
        self.reset();

        if record.vendor_id != B::VENDOR_ID || record.device_id != B::DEVICE_ID {
            log::warn!(
                "ota: image for {:#x}:{:#x} refused",
                record.vendor_id,
                record.device_id
            );
            return OtaStatus::InvalidVersion;
        }
        let zone_id = match u8::try_from(record.zone_id) {
            Ok(id) if self.table.has_zone(id) => id,
            _ => return OtaStatus::ZoneNotFound,
        };

        if let Some(current) = self.current_version(zone_id) {
            let acceptable = if flags.overwrite() {
                record.version != current.version
            } else {
                record.version > current.version
            };
            if !acceptable {
                log::warn!(
                    "ota: version {} refused, zone {} runs {}",
                    record.version,
                    zone_id,
                    current.version
                );
                return OtaStatus::InvalidVersion;
            }
        }

        self.pending = Some(PendingVersion { record, flags });
        self.state = OtaState::VersionChecked;
        log::info!("ota: zone {} version {} accepted", zone_id, record.version);
        OtaStatus::VersionConfirm
    }

    fn select_target(&self, pending: &PendingVersion, total_size: u32) -> Result<Target, OtaStatus> {
        let zone_id = pending.record.zone_id as u8;
        let (entry, staging) = if pending.flags.overwrite() {
            let staging = *self.table.staging().ok_or(OtaStatus::NoSpace)?;
            // The staged copy is promoted into the executable slot and must
            // be signed the same way.
            let exec = self
                .table
                .slots(zone_id)
                .next()
                .ok_or(OtaStatus::ZoneNotFound)?;
            if exec.sign_mode != staging.sign_mode {
                return Err(OtaStatus::InvalidParam);
            }
            (staging, true)
        } else {
            let entry = find_blank_zone(self.flash, &self.table, zone_id, total_size)
                .ok_or(OtaStatus::NoSpace)?;
            (entry, false)
        };

        let header_len = entry.header_len();
        if total_size > entry.size {
            return Err(OtaStatus::NoSpace);
        }
        if total_size <= header_len {
            return Err(OtaStatus::InvalidParam);
        }
        let encrypted = pending.flags.encrypted();
        Ok(Target {
            entry,
            total_size,
            staging,
            encrypted,
            next_offset: 0,
        })
    }

    /// Pick and erase the destination for an image of `total_size` bytes,
    /// header included.
    pub async fn start_ota(&mut self, total_size: u32) -> OtaStatus {
        let pending = match (self.state, self.pending) {
            (OtaState::VersionChecked, Some(pending)) => pending,
            _ => return OtaStatus::InvalidCmd,
        };

        let target = match self.select_target(&pending, total_size) {
            Ok(target) => target,
            Err(status) => return self.fail(status),
        };

        if target.encrypted {
            let mut key = match self.efuse.aes_key() {
                Some(key) => key,
                None => return self.fail(OtaStatus::CryptoError),
            };
            self.crypto_active = true;
            let configured = self
                .crypto
                .power_on()
                .and_then(|_| self.crypto.aes_configure(&key, &B::AES_IV));
            key.zeroize();
            if configured.is_err() {
                return self.fail(OtaStatus::CryptoError);
            }
        }

        let erase_len = match align_up(total_size, self.flash.sector_size()) {
            Some(len) => len,
            None => return self.fail(OtaStatus::InvalidParam),
        };
        self.writer.reset().await;
        if self.writer.erase(target.entry.address, erase_len).await.is_err() {
            return self.fail(OtaStatus::EraseError);
        }

        log::info!(
            "ota: writing {:#x} bytes to zone at {:#x}{}",
            total_size,
            target.entry.address,
            if target.staging { " (staging)" } else { "" }
        );
        self.target = Some(target);
        self.state = OtaState::DataWriting;
        OtaStatus::StartConfirm
    }

    /// Program one chunk of the image at `offset` from the image start.
    ///
    /// `data` is decrypted in place when the transfer is encrypted. When
    /// `crc` is given the chunk is read back and its CRC-32 compared; a
    /// mismatch is reported but the session stays open for a retry.
    pub async fn write_data(&mut self, offset: u32, crc: Option<u32>, data: &mut [u8]) -> OtaStatus {
        if self.state != OtaState::DataWriting {
            return OtaStatus::InvalidCmd;
        }
        let mut target = match self.target {
            Some(target) => target,
            None => return OtaStatus::InvalidCmd,
        };
        if data.is_empty() || data.len() > FLASH_JOB_LEN || offset >= target.total_size {
            return OtaStatus::InvalidParam;
        }

        if target.encrypted {
            if offset != target.next_offset || data.len() % AES_BLOCK_LEN != 0 {
                return OtaStatus::InvalidParam;
            }
            // The header travels in the clear.
            let header_len = target.entry.header_len();
            let clear = header_len.saturating_sub(offset) as usize;
            if clear < data.len() && self.crypto.aes_decrypt(&mut data[clear..]).is_err() {
                return self.fail(OtaStatus::CryptoError);
            }
            target.next_offset = offset + data.len() as u32;
            self.target = Some(target);
        }

        // Padding past the declared size is dropped. For an encrypted
        // image this is the tail of the last cipher block.
        let len = core::cmp::min(data.len() as u32, target.total_size - offset) as usize;
        let data = &mut data[..len];

        // Keep the validity word erased and store the header as plaintext.
        let mut original = [None; 5];
        let forced = [VALIDITY_OFFSET, 1, 2, 3, FLAGS_OFFSET];
        for (slot, &at) in original.iter_mut().zip(forced.iter()) {
            if let Some(i) = (at as u32).checked_sub(offset).map(|i| i as usize) {
                if i < len {
                    *slot = Some(data[i]);
                    data[i] = if at == FLAGS_OFFSET {
                        data[i] & !(ZoneFlags::ENCRYPT as u8)
                    } else {
                        0xFF
                    };
                }
            }
        }

        let address = target.entry.address + offset;
        let written = match crc {
            Some(_) => self.writer.write(address, data).await,
            None => self.writer.submit_write(address, data).await,
        };
        if let Err(e) = written {
            log::error!("ota: write at {:#x} failed: {:?}", address, e);
            return self.fail(OtaStatus::WriteError);
        }

        if let Some(expected) = crc {
            let mut readback = [0u8; FLASH_JOB_LEN];
            let readback = &mut readback[..len];
            self.flash.invalidate_cache();
            if target
                .entry
                .region()
                .read(self.flash, offset, readback)
                .is_err()
            {
                return self.fail(OtaStatus::WriteError);
            }
            for (value, &at) in original.iter().zip(forced.iter()) {
                if let Some(value) = value {
                    readback[at - offset as usize] = *value;
                }
            }
            if CRC32.checksum(readback) != expected {
                log::warn!("ota: chunk at {:#x} failed its crc check", offset);
                return OtaStatus::VerifyError;
            }
        }
        OtaStatus::DataConfirm
    }

    /// Check the written image and commit it.
    pub async fn verify_data(&mut self) -> OtaStatus {
        if self.state != OtaState::DataWriting {
            return OtaStatus::InvalidCmd;
        }
        let (pending, target) = match (self.pending, self.target) {
            (Some(pending), Some(target)) => (pending, target),
            _ => return OtaStatus::InvalidCmd,
        };
        if self.writer.drain().await.is_err() {
            return self.fail(OtaStatus::WriteError);
        }
        self.flash.invalidate_cache();

        let image = match load_image(self.flash, &target.entry) {
            Ok(image) => image,
            Err(_) => return self.fail(OtaStatus::VerifyError),
        };
        if image.header.version != pending.record
            || image.payload_offset().checked_add(image.header.size) != Some(target.total_size)
        {
            log::error!("ota: written header does not match the announced image");
            return self.fail(OtaStatus::VerifyError);
        }
        if check_sum(self.flash, &image).is_err() || check_zone_crc(self.flash, &image).is_err() {
            return self.fail(OtaStatus::VerifyError);
        }
        if target.entry.sign_mode != SignMode::Crc32 {
            self.crypto_active = true;
            if let Err(e) = verify_flash_signature(self.flash, self.crypto, self.efuse, &image) {
                log::error!("ota: signature check failed: {:?}", e);
                return self.fail(OtaStatus::VerifyError);
            }
        }

        let flag = if target.staging {
            ValidityFlag::STAGED
        } else {
            ValidityFlag::EXECUTABLE
        };
        if self
            .writer
            .write(target.entry.address, &flag.to_le_bytes())
            .await
            .is_err()
        {
            return self.fail(OtaStatus::WriteError);
        }

        log::info!(
            "ota: zone {} version {} committed",
            pending.record.zone_id,
            pending.record.version
        );
        self.release_crypto();
        self.state = OtaState::DataVerified;
        OtaStatus::VerifyConfirm
    }
}
