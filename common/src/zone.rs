// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Zone table and the integrity checks run on the images it points at.
//!
//! The table is embedded behind the bootloader's own partition header and is
//! laid out as:
//!
//! ```text
//! "ZTBL" | count (u32) | count x entry (16 bytes) | crc32 (u32)
//! entry: id u8 | encrypted u8 | sign mode u8 | rsvd u8 | address u32 | size u32 | rsvd u32
//! ```

use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::Vec;

use crate::error::BootError;
use crate::header::{PartitionHeader, SignMode, ValidityFlag, HEADER_FIXED_LEN};
use crate::hil::flash::{FlashController, FlashRegion, Mapping};
use crate::util::{read_u32_le, write_u32_le};

pub const MAX_ZONES: usize = 8;
pub const ZONE_TABLE_MAGIC: [u8; 4] = *b"ZTBL";
pub const ZONE_ENTRY_LEN: usize = 16;
pub const ZONE_TABLE_MAX_LEN: usize = 8 + MAX_ZONES * ZONE_ENTRY_LEN + 4;

/// Distance between two payload words sampled by the sparse checksum.
pub const CHECKSUM_STRIDE: u32 = 1024;
pub const CHECKSUM_SAMPLES: u32 = 32;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ZoneEntry {
    pub id: u8,
    /// Reads go through the on-the-fly decrypting window.
    pub encrypted: bool,
    pub sign_mode: SignMode,
    pub address: u32,
    pub size: u32,
}

impl ZoneEntry {
    pub fn region(&self) -> FlashRegion {
        let mapping = if self.encrypted {
            Mapping::Cipher
        } else {
            Mapping::Plain
        };
        FlashRegion::new(self.address, self.size, mapping)
    }

    pub fn header_len(&self) -> u32 {
        self.sign_mode.header_len()
    }

    fn parse(buf: &[u8]) -> Result<Self, BootError> {
        let sign_mode = SignMode::from_u8(buf[2]).ok_or(BootError::InvalidZoneTable)?;
        Ok(Self {
            id: buf[0],
            encrypted: buf[1] != 0,
            sign_mode,
            address: read_u32_le(buf, 4),
            size: read_u32_le(buf, 8),
        })
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.id;
        buf[1] = self.encrypted as u8;
        buf[2] = self.sign_mode as u8;
        buf[3] = 0;
        write_u32_le(buf, 4, self.address);
        write_u32_le(buf, 8, self.size);
        write_u32_le(buf, 12, 0);
    }
}

/// Zones of this device. Loaded once from the bootloader image and read-only
/// afterwards.
#[derive(Clone, Debug)]
pub struct ZoneTable {
    entries: Vec<ZoneEntry, MAX_ZONES>,
    staging_id: u8,
}

impl ZoneTable {
    pub fn new(entries: &[ZoneEntry], staging_id: u8) -> Result<Self, BootError> {
        let entries = Vec::from_slice(entries).map_err(|_| BootError::InvalidZoneTable)?;
        let table = Self {
            entries,
            staging_id,
        };
        table.check_layout()?;
        Ok(table)
    }

    /// Locate the table through the bootloader header at
    /// `bootloader_header_offset` and validate it.
    pub fn load<F: FlashController + ?Sized>(
        flash: &F,
        bootloader_header_offset: u32,
        staging_id: u8,
    ) -> Result<Self, BootError> {
        let mut raw = [0u8; HEADER_FIXED_LEN];
        flash
            .read(Mapping::Plain, bootloader_header_offset, &mut raw)
            .map_err(|_| BootError::FlashOperationFailed)?;
        let boot_header = PartitionHeader::parse(&raw);
        if boot_header.validity != ValidityFlag::Executable {
            return Err(BootError::InvalidHeader);
        }

        let offset = boot_header.zone_table_offset();
        let mut prefix = [0u8; 8];
        flash
            .read(Mapping::Plain, offset, &mut prefix)
            .map_err(|_| BootError::InvalidZoneTable)?;
        if prefix[..4] != ZONE_TABLE_MAGIC {
            return Err(BootError::InvalidZoneTable);
        }
        let count = read_u32_le(&prefix, 4) as usize;
        if count == 0 || count > MAX_ZONES {
            return Err(BootError::InvalidZoneTable);
        }

        let len = 8 + count * ZONE_ENTRY_LEN + 4;
        let mut buf = [0u8; ZONE_TABLE_MAX_LEN];
        flash
            .read(Mapping::Plain, offset, &mut buf[..len])
            .map_err(|_| BootError::InvalidZoneTable)?;
        let stored_crc = read_u32_le(&buf, len - 4);
        if CRC32.checksum(&buf[..len - 4]) != stored_crc {
            log::error!("zone table crc mismatch at {:#x}", offset);
            return Err(BootError::InvalidZoneTable);
        }

        let mut entries = Vec::new();
        for chunk in buf[8..len - 4].chunks_exact(ZONE_ENTRY_LEN) {
            entries
                .push(ZoneEntry::parse(chunk)?)
                .map_err(|_| BootError::InvalidZoneTable)?;
        }
        let table = Self {
            entries,
            staging_id,
        };
        table.check_layout()?;
        table.check_bounds(flash)?;
        log::info!("zone table: {} zones at {:#x}", table.entries.len(), offset);
        Ok(table)
    }

    /// Encode the table the way `load` expects it. Returns the used length.
    pub fn serialize(&self, buf: &mut [u8; ZONE_TABLE_MAX_LEN]) -> usize {
        let count = self.entries.len();
        buf[..4].copy_from_slice(&ZONE_TABLE_MAGIC);
        write_u32_le(buf, 4, count as u32);
        for (i, entry) in self.entries.iter().enumerate() {
            let start = 8 + i * ZONE_ENTRY_LEN;
            entry.write_to(&mut buf[start..start + ZONE_ENTRY_LEN]);
        }
        let body = 8 + count * ZONE_ENTRY_LEN;
        let crc = CRC32.checksum(&buf[..body]);
        write_u32_le(buf, body, crc);
        body + 4
    }

    pub fn entries(&self) -> &[ZoneEntry] {
        &self.entries
    }

    pub fn staging(&self) -> Option<&ZoneEntry> {
        self.entries.iter().find(|e| e.id == self.staging_id)
    }

    pub fn staging_id(&self) -> u8 {
        self.staging_id
    }

    pub fn has_zone(&self, id: u8) -> bool {
        id != self.staging_id && self.entries.iter().any(|e| e.id == id)
    }

    /// Slots holding zone `id`.
    pub fn slots(&self, id: u8) -> impl Iterator<Item = &ZoneEntry> {
        self.entries.iter().filter(move |e| e.id == id)
    }

    fn check_layout(&self) -> Result<(), BootError> {
        if self.entries.iter().filter(|e| e.id == self.staging_id).count() > 1 {
            return Err(BootError::InvalidZoneTable);
        }
        for (i, a) in self.entries.iter().enumerate() {
            let a_end = a
                .address
                .checked_add(a.size)
                .ok_or(BootError::InvalidZoneRegion)?;
            if a.size <= a.header_len() {
                return Err(BootError::InvalidZoneRegion);
            }
            for b in &self.entries[i + 1..] {
                let b_end = b.address.saturating_add(b.size);
                if a.address < b_end && b.address < a_end {
                    return Err(BootError::InvalidZoneRegion);
                }
            }
        }
        Ok(())
    }

    fn check_bounds<F: FlashController + ?Sized>(&self, flash: &F) -> Result<(), BootError> {
        let sector = flash.sector_size();
        for e in &self.entries {
            if e.address.saturating_add(e.size) > flash.size()
                || e.address % sector != 0
                || e.size % sector != 0
            {
                return Err(BootError::InvalidZoneRegion);
            }
        }
        Ok(())
    }
}

/// A zone slot together with the header currently stored in it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ZoneImage {
    pub entry: ZoneEntry,
    pub header: PartitionHeader,
}

impl ZoneImage {
    /// Offset of the payload within the zone.
    pub fn payload_offset(&self) -> u32 {
        self.entry.header_len()
    }

    /// Header and payload length, provided they fit in the zone.
    pub fn image_len(&self) -> Result<u32, BootError> {
        let len = self
            .payload_offset()
            .checked_add(self.header.size)
            .ok_or(BootError::InvalidZoneRegion)?;
        if len > self.entry.size {
            return Err(BootError::InvalidZoneRegion);
        }
        Ok(len)
    }
}

pub fn read_header<F: FlashController + ?Sized>(
    flash: &F,
    entry: &ZoneEntry,
) -> Result<PartitionHeader, BootError> {
    let mut raw = [0u8; HEADER_FIXED_LEN];
    entry
        .region()
        .read(flash, 0, &mut raw)
        .map_err(|_| BootError::FlashOperationFailed)?;
    Ok(PartitionHeader::parse(&raw))
}

pub fn load_image<F: FlashController + ?Sized>(
    flash: &F,
    entry: &ZoneEntry,
) -> Result<ZoneImage, BootError> {
    Ok(ZoneImage {
        entry: *entry,
        header: read_header(flash, entry)?,
    })
}

/// Offsets, relative to the payload start, of the words sampled by the
/// sparse checksum.
pub fn checksum_samples(payload_size: u32) -> impl Iterator<Item = u32> {
    (0..CHECKSUM_SAMPLES)
        .map(|i| i * CHECKSUM_STRIDE)
        .take_while(move |offset| offset + 4 <= payload_size)
}

/// Sparse checksum of an image held in memory.
pub fn checksum(header: &PartitionHeader, payload: &[u8]) -> u32 {
    checksum_samples(header.size).fold(header.checksum_seed(), |acc, offset| {
        acc ^ read_u32_le(payload, offset as usize)
    })
}

/// Fast pre-filter: compare the stored sparse checksum against the image.
pub fn check_sum<F: FlashController + ?Sized>(
    flash: &F,
    image: &ZoneImage,
) -> Result<(), BootError> {
    image.image_len()?;
    let region = image.entry.region();
    let base = image.payload_offset();
    let mut sum = image.header.checksum_seed();
    for offset in checksum_samples(image.header.size) {
        sum ^= region
            .read_u32(flash, base + offset)
            .map_err(|_| BootError::FlashOperationFailed)?;
    }
    if sum != image.header.checksum {
        return Err(BootError::ChecksumFailed);
    }
    Ok(())
}

/// CRC-32 over the neutralised fixed header followed by `body_len` bytes
/// that `read` supplies, starting right after the fixed header.
pub fn image_crc<E>(
    header: &PartitionHeader,
    body_len: u32,
    mut read: impl FnMut(u32, &mut [u8]) -> Result<(), E>,
) -> Result<u32, E> {
    let mut digest = CRC32.digest();
    digest.update(&header.neutralized_for_crc());
    let mut buf = [0u8; 256];
    let mut offset = 0;
    while offset < body_len {
        let n = core::cmp::min(buf.len() as u32, body_len - offset);
        read(offset, &mut buf[..n as usize])?;
        digest.update(&buf[..n as usize]);
        offset += n;
    }
    Ok(digest.finalize())
}

/// Authoritative integrity gate: CRC over the whole header and payload.
pub fn check_zone_crc<F: FlashController + ?Sized>(
    flash: &F,
    image: &ZoneImage,
) -> Result<(), BootError> {
    let body_len = image.image_len()? - HEADER_FIXED_LEN as u32;
    let region = image.entry.region();
    let crc = image_crc(&image.header, body_len, |offset, buf| {
        region.read(flash, HEADER_FIXED_LEN as u32 + offset, buf)
    })
    .map_err(|_| BootError::FlashOperationFailed)?;
    if crc != image.header.crc32 {
        log::error!(
            "zone {:#x}: crc {:#010x} != {:#010x}",
            image.entry.address,
            crc,
            image.header.crc32
        );
        return Err(BootError::CrcMismatch);
    }
    Ok(())
}

/// Executable image of zone `zone_id` with the strictly greatest version.
///
/// Only the header and the sparse checksum are consulted. Two slots at the
/// same greatest version are ambiguous and yield no zone.
pub fn find_zone<F: FlashController + ?Sized>(
    flash: &F,
    table: &ZoneTable,
    zone_id: u8,
) -> Option<ZoneImage> {
    let mut best: Option<ZoneImage> = None;
    let mut tied = false;
    for entry in table.slots(zone_id) {
        let image = match load_image(flash, entry) {
            Ok(image) => image,
            Err(_) => continue,
        };
        if image.header.validity != ValidityFlag::Executable
            || image.header.version.zone_id != zone_id as u32
            || check_sum(flash, &image).is_err()
        {
            continue;
        }
        match best {
            Some(current) if image.header.version.version == current.header.version.version => {
                tied = true;
            }
            Some(current) if image.header.version.version < current.header.version.version => {}
            _ => {
                best = Some(image);
                tied = false;
            }
        }
    }
    if tied {
        log::warn!("zone {}: two slots at the same version", zone_id);
        return None;
    }
    best
}

/// A header is authentic when its flag marks a live image and its checksum
/// holds.
fn is_authentic<F: FlashController + ?Sized>(flash: &F, image: &ZoneImage) -> bool {
    matches!(
        image.header.validity,
        ValidityFlag::Executable | ValidityFlag::Staged
    ) && check_sum(flash, image).is_ok()
}

/// Slot of zone `zone_id` that a new image of `min_size` bytes (header
/// included) may be written to.
///
/// A slot without an authentic header is taken first. Otherwise the slot
/// holding the lowest version is reused, but never the only valid image.
pub fn find_blank_zone<F: FlashController + ?Sized>(
    flash: &F,
    table: &ZoneTable,
    zone_id: u8,
    min_size: u32,
) -> Option<ZoneEntry> {
    let mut oldest: Option<ZoneImage> = None;
    let mut valid = 0;
    for entry in table.slots(zone_id) {
        let image = match load_image(flash, entry) {
            Ok(image) => image,
            Err(_) => continue,
        };
        if !is_authentic(flash, &image) {
            if entry.size >= min_size {
                return Some(*entry);
            }
            continue;
        }
        valid += 1;
        match oldest {
            Some(current) if current.header.version.version <= image.header.version.version => {}
            _ => oldest = Some(image),
        }
    }
    match oldest {
        Some(image) if valid >= 2 && image.entry.size >= min_size => Some(image.entry),
        _ => None,
    }
}
