// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Power-up image selection.
//!
//! Runs before anything else touches the flash. A verified image left in
//! the staging zone by an overwrite-mode update is first promoted into the
//! executable slot, then the executable copies of the zone are tried from
//! the newest version down.

use heapless::Vec;

use crate::error::BootError;
use crate::header::{PartitionHeader, SignMode, ValidityFlag};
use crate::hil::crypto::CryptoEngine;
use crate::hil::efuse::{Efuse, SecureBootLevel, BOOT_OPT_NO_FALLBACK, BOOT_OPT_NO_PROMOTION};
use crate::hil::flash::{erase_unprotected, write_unprotected, FlashController};
use crate::signature_verifier::verify_flash_signature;
use crate::util::align_up;
use crate::zone::{
    check_sum, check_zone_crc, find_zone, load_image, ZoneEntry, ZoneImage, ZoneTable, MAX_ZONES,
};
use crate::BootloaderIO;

const COPY_CHUNK: usize = 4096;

/// The image the board should jump to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootTarget {
    pub zone: ZoneEntry,
    pub header: PartitionHeader,
    pub load_address: u32,
    pub entry_point: u32,
}

/// Checks an image must pass before it may run at `level`.
fn verify_for_boot<F, C, E>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    level: SecureBootLevel,
    image: &ZoneImage,
) -> Result<(), BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    if level == SecureBootLevel::Strict && image.entry.sign_mode == SignMode::Crc32 {
        return Err(BootError::VerificationFailed);
    }
    check_sum(flash, image)?;
    check_zone_crc(flash, image)?;
    if level != SecureBootLevel::Disabled && image.entry.sign_mode.requires_signature() {
        verify_flash_signature(flash, crypto, efuse, image)?;
    }
    Ok(())
}

fn mark_consumed<F: FlashController + ?Sized>(
    flash: &F,
    staging: &ZoneEntry,
) -> Result<(), BootError> {
    write_unprotected(
        flash,
        staging.address,
        &ValidityFlag::CONSUMED.to_le_bytes(),
    )
    .map_err(|_| BootError::FlashOperationFailed)
}

/// Copy a staged image of `zone_id` into its executable slot.
///
/// The destination keeps an erased validity word until the copy has passed
/// its CRC check, and the staging copy is only consumed after the
/// destination is marked executable. A reset at any point either leaves the
/// old image in place or repeats the promotion on the next boot.
///
/// Returns whether an image was copied.
fn promote_staged<F, C, E>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    table: &ZoneTable,
    zone_id: u8,
) -> Result<bool, BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    let staging = match table.staging() {
        Some(entry) => *entry,
        None => return Ok(false),
    };
    let staged = load_image(flash, &staging)?;
    if staged.header.validity != ValidityFlag::Staged
        || staged.header.version.zone_id != zone_id as u32
    {
        return Ok(false);
    }
    verify_for_boot(flash, crypto, efuse, efuse.secure_boot_level(), &staged)?;

    let dest = match find_zone(flash, table, zone_id) {
        Some(current) => current.entry,
        None => *table.slots(zone_id).next().ok_or(BootError::ZoneNotFound)?,
    };
    if dest.sign_mode != staging.sign_mode {
        return Err(BootError::InvalidZoneRegion);
    }
    if let Ok(current) = load_image(flash, &dest) {
        if current.header.validity == ValidityFlag::Executable
            && current.header.version == staged.header.version
            && check_zone_crc(flash, &current).is_ok()
        {
            log::info!("boot: zone {} already promoted", zone_id);
            mark_consumed(flash, &staging)?;
            return Ok(false);
        }
    }

    let len = staged.image_len()?;
    if len > dest.size {
        return Err(BootError::InvalidZoneRegion);
    }
    let erase_len = align_up(len, flash.sector_size()).ok_or(BootError::InvalidZoneRegion)?;
    log::info!(
        "boot: promoting zone {} version {} to {:#x}",
        zone_id,
        staged.header.version.version,
        dest.address
    );
    erase_unprotected(flash, dest.address, erase_len)
        .map_err(|_| BootError::FlashOperationFailed)?;

    let source = staging.region();
    let mut chunk = [0u8; COPY_CHUNK];
    let mut offset = 0;
    while offset < len {
        let n = core::cmp::min(COPY_CHUNK as u32, len - offset) as usize;
        let buf = &mut chunk[..n];
        source
            .read(flash, offset, buf)
            .map_err(|_| BootError::FlashOperationFailed)?;
        if offset == 0 {
            buf[..4].fill(0xFF);
        }
        write_unprotected(flash, dest.address + offset, buf)
            .map_err(|_| BootError::FlashOperationFailed)?;
        offset += n as u32;
    }
    flash.invalidate_cache();

    let copied = load_image(flash, &dest)?;
    check_zone_crc(flash, &copied)?;
    write_unprotected(
        flash,
        dest.address,
        &ValidityFlag::EXECUTABLE.to_le_bytes(),
    )
    .map_err(|_| BootError::FlashOperationFailed)?;
    mark_consumed(flash, &staging)?;
    Ok(true)
}

fn select<F, C, E>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    table: &ZoneTable,
    zone_id: u8,
) -> Result<BootTarget, BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    if !table.has_zone(zone_id) {
        return Err(BootError::ZoneNotFound);
    }
    let options = efuse.boot_options();
    if options & BOOT_OPT_NO_PROMOTION == 0 {
        if let Err(e) = promote_staged(flash, crypto, efuse, table, zone_id) {
            log::error!("boot: staged image rejected: {:?}", e);
        }
    }

    let mut candidates: Vec<ZoneImage, MAX_ZONES> = Vec::new();
    for entry in table.slots(zone_id) {
        if let Ok(image) = load_image(flash, entry) {
            if image.header.validity == ValidityFlag::Executable
                && image.header.version.zone_id == zone_id as u32
            {
                // At most MAX_ZONES slots exist.
                let _ = candidates.push(image);
            }
        }
    }
    candidates.sort_unstable_by(|a, b| b.header.version.version.cmp(&a.header.version.version));

    let level = efuse.secure_boot_level();
    for image in candidates.iter() {
        match verify_for_boot(flash, crypto, efuse, level, image) {
            Ok(()) => {
                log::info!(
                    "boot: zone {} version {} at {:#x}",
                    zone_id,
                    image.header.version.version,
                    image.entry.address
                );
                return Ok(BootTarget {
                    zone: image.entry,
                    header: image.header,
                    load_address: image.header.address,
                    entry_point: image.header.entry_point,
                });
            }
            Err(e) => {
                log::error!(
                    "boot: version {} at {:#x} rejected: {:?}",
                    image.header.version.version,
                    image.entry.address,
                    e
                );
                if options & BOOT_OPT_NO_FALLBACK != 0 {
                    break;
                }
            }
        }
    }
    Err(BootError::NoValidImage)
}

/// Pick the image of `zone_id` to boot, promoting a staged update first.
///
/// The crypto accelerator is powered for the duration of the call only.
pub fn select_boot_image<F, C, E>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    table: &ZoneTable,
    zone_id: u8,
) -> Result<BootTarget, BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    crypto.power_on().map_err(|_| BootError::CryptoFailed)?;
    let result = select(flash, crypto, efuse, table, zone_id);
    crypto.power_off();
    result
}

/// [`select_boot_image`], reporting the outcome through the board's I/O.
pub fn boot<F, C, E, IO>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    table: &ZoneTable,
    zone_id: u8,
    io: &IO,
) -> Result<BootTarget, BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
    IO: BootloaderIO + ?Sized,
{
    match select_boot_image(flash, crypto, efuse, table, zone_id) {
        Ok(target) => {
            io.debug("image verified");
            io.signal_success();
            Ok(target)
        }
        Err(e) => {
            io.debug("no bootable image");
            io.signal_failure();
            Err(e)
        }
    }
}
