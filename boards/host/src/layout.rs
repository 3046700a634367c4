// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Factory layout written by `--init-layout`.
//!
//! ```text
//! 0x00_0000  bootloader header + zone table (one sector)
//! 0x01_0000  application slot A
//!            application slot B
//!            OTA staging zone
//! ```

use romboot_common::header::{PartitionHeader, SignMode, ValidityFlag, VersionRecord, ZoneFlags};
use romboot_common::hil::flash::{erase_unprotected, write_unprotected, FlashController};
use romboot_common::zone::{ZoneEntry, ZoneTable, ZONE_TABLE_MAX_LEN};
use romboot_common::{BoardConfig, BootError, ErrorCode};

use crate::HostBoard;

pub const APP_ZONE: u8 = 1;
pub const ZONE_TABLE_OFFSET: u32 = 0x100;
const FIRST_ZONE: u32 = 0x1_0000;

/// Two application slots and the staging zone, splitting the flash above
/// the bootloader sector evenly.
pub fn default_table(flash_size: u32, sign_mode: SignMode) -> Result<ZoneTable, BootError> {
    let zone_size = (flash_size.saturating_sub(FIRST_ZONE) / 3) & !0xFFFF;
    let zone = |index: u32, id: u8| ZoneEntry {
        id,
        encrypted: false,
        sign_mode,
        address: FIRST_ZONE + index * zone_size,
        size: zone_size,
    };
    ZoneTable::new(
        &[
            zone(0, APP_ZONE),
            zone(1, APP_ZONE),
            zone(2, HostBoard::OTA_ZONE_ID),
        ],
        HostBoard::OTA_ZONE_ID,
    )
}

/// Rewrite the bootloader sector with a header pointing at `table`.
pub fn install<F: FlashController + ?Sized>(flash: &F, table: &ZoneTable) -> Result<(), ErrorCode> {
    let header = PartitionHeader {
        validity: ValidityFlag::Executable,
        version: VersionRecord {
            vendor_id: HostBoard::VENDOR_ID,
            device_id: HostBoard::DEVICE_ID,
            ..Default::default()
        },
        flags: ZoneFlags::default(),
        address: 0,
        size: 0,
        entry_point: 0,
        reserved: [ZONE_TABLE_OFFSET, 0, 0, 0],
        checksum: 0,
        crc32: 0,
    };
    let mut buf = [0u8; ZONE_TABLE_MAX_LEN];
    let len = table.serialize(&mut buf);

    let base = HostBoard::BOOTLOADER_HEADER_OFFSET;
    erase_unprotected(flash, base, flash.sector_size())?;
    write_unprotected(flash, base, &header.to_bytes())?;
    write_unprotected(flash, base + ZONE_TABLE_OFFSET, &buf[..len])?;
    log::info!(
        "layout: {} zones of {:#x} bytes installed",
        table.entries().len(),
        table.entries().first().map_or(0, |e| e.size)
    );
    Ok(())
}
