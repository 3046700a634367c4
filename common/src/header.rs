// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Partition header found at the start of every zone.
//!
//! All fields are little-endian:
//!
//! ```text
//! 0x00  validity flag
//! 0x04  version record (vendor, device, flash, zone, rom version,
//!       version counter, build date)
//! 0x20  flags
//! 0x24  load address
//! 0x28  payload size
//! 0x2C  entry point
//! 0x30  reserved[4] (reserved[0] points at the zone table)
//! 0x40  checksum
//! 0x44  crc32
//! 0x48  signature block, sized by the zone's sign mode
//! ```
//!
//! The header is padded to a multiple of 16 bytes so the payload starts on
//! an AES block boundary.

use crate::util::{align_up, read_u32_le, write_u32_le};

pub const HEADER_FIXED_LEN: usize = 0x48;
pub const VERSION_RECORD_LEN: usize = 28;

pub const VALIDITY_OFFSET: usize = 0x00;
pub const VERSION_OFFSET: usize = 0x04;
pub const FLAGS_OFFSET: usize = 0x20;
pub const ADDRESS_OFFSET: usize = 0x24;
pub const SIZE_OFFSET: usize = 0x28;
pub const ENTRY_OFFSET: usize = 0x2C;
pub const RESERVED_OFFSET: usize = 0x30;
pub const CHECKSUM_OFFSET: usize = 0x40;
pub const CRC_OFFSET: usize = 0x44;

/// Payload alignment, one AES block.
pub const HEADER_ALIGN: u32 = 16;

/// Lifecycle marker in the first word of a header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidityFlag {
    Erased,
    /// Verified image waiting in the staging zone for promotion.
    Staged,
    Executable,
    /// Staging copy that has already been promoted.
    Consumed,
    Invalid(u32),
}

impl ValidityFlag {
    pub const ERASED: u32 = 0xFFFF_FFFF;
    pub const STAGED: u32 = 0x4F54_4153;
    pub const EXECUTABLE: u32 = 0x5A5A_A5A5;
    pub const CONSUMED: u32 = 0x0000_0000;

    pub fn from_word(word: u32) -> Self {
        match word {
            Self::ERASED => ValidityFlag::Erased,
            Self::STAGED => ValidityFlag::Staged,
            Self::EXECUTABLE => ValidityFlag::Executable,
            Self::CONSUMED => ValidityFlag::Consumed,
            other => ValidityFlag::Invalid(other),
        }
    }

    pub fn word(self) -> u32 {
        match self {
            ValidityFlag::Erased => Self::ERASED,
            ValidityFlag::Staged => Self::STAGED,
            ValidityFlag::Executable => Self::EXECUTABLE,
            ValidityFlag::Consumed => Self::CONSUMED,
            ValidityFlag::Invalid(word) => word,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionRecord {
    pub vendor_id: u32,
    pub device_id: u32,
    pub flash_id: u32,
    pub zone_id: u32,
    pub rom_version: u32,
    /// Monotonic counter compared by the update and boot paths.
    pub version: u32,
    pub build_date: u32,
}

impl VersionRecord {
    pub fn from_bytes(buf: &[u8; VERSION_RECORD_LEN]) -> Self {
        Self {
            vendor_id: read_u32_le(buf, 0),
            device_id: read_u32_le(buf, 4),
            flash_id: read_u32_le(buf, 8),
            zone_id: read_u32_le(buf, 12),
            rom_version: read_u32_le(buf, 16),
            version: read_u32_le(buf, 20),
            build_date: read_u32_le(buf, 24),
        }
    }

    pub fn to_bytes(&self) -> [u8; VERSION_RECORD_LEN] {
        let mut buf = [0u8; VERSION_RECORD_LEN];
        for (i, word) in [
            self.vendor_id,
            self.device_id,
            self.flash_id,
            self.zone_id,
            self.rom_version,
            self.version,
            self.build_date,
        ]
        .iter()
        .enumerate()
        {
            write_u32_le(&mut buf, i * 4, *word);
        }
        buf
    }
}

/// Header flag bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ZoneFlags(u32);

impl ZoneFlags {
    /// Set: replace the image through the staging zone. Clear: switch mode.
    pub const OVERWRITE: u32 = 1 << 0;
    pub const ZIP: u32 = 1 << 1;
    pub const HASH: u32 = 1 << 2;
    pub const SIGN: u32 = 1 << 3;
    /// Image was transferred AES-CBC encrypted.
    pub const ENCRYPT: u32 = 1 << 4;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub const fn without(self, bit: u32) -> Self {
        Self(self.0 & !bit)
    }

    pub const fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }

    pub const fn overwrite(self) -> bool {
        self.contains(Self::OVERWRITE)
    }

    pub const fn encrypted(self) -> bool {
        self.contains(Self::ENCRYPT)
    }
}

/// How an image in a zone is authenticated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SignMode {
    Crc32 = 0,
    Sha256 = 1,
    EcdsaP256 = 2,
    Rsa2048 = 3,
}

impl SignMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SignMode::Crc32),
            1 => Some(SignMode::Sha256),
            2 => Some(SignMode::EcdsaP256),
            3 => Some(SignMode::Rsa2048),
            _ => None,
        }
    }

    /// Size of the signature block that follows the fixed header.
    pub const fn block_len(self) -> usize {
        match self {
            SignMode::Crc32 => 0,
            // digest
            SignMode::Sha256 => 32,
            // x || y, then r || s
            SignMode::EcdsaP256 => 64 + 64,
            // modulus (BE), exponent (LE u32), signature (BE)
            SignMode::Rsa2048 => 256 + 4 + 256,
        }
    }

    /// Bytes of the signature block that are hashed along with the image.
    pub const fn key_material_len(self) -> usize {
        match self {
            SignMode::Crc32 | SignMode::Sha256 => 0,
            SignMode::EcdsaP256 => 64,
            SignMode::Rsa2048 => 256 + 4,
        }
    }

    pub const fn requires_signature(self) -> bool {
        !matches!(self, SignMode::Crc32)
    }

    /// Full header length, signature block and alignment padding included.
    pub fn header_len(self) -> u32 {
        let raw = (HEADER_FIXED_LEN + self.block_len()) as u32;
        // Small constants, cannot overflow.
        align_up(raw, HEADER_ALIGN).unwrap_or(raw)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionHeader {
    pub validity: ValidityFlag,
    pub version: VersionRecord,
    pub flags: ZoneFlags,
    pub address: u32,
    /// Payload size in bytes, not counting the header.
    pub size: u32,
    pub entry_point: u32,
    pub reserved: [u32; 4],
    pub checksum: u32,
    pub crc32: u32,
}

impl PartitionHeader {
    pub fn parse(buf: &[u8; HEADER_FIXED_LEN]) -> Self {
        let mut version = [0u8; VERSION_RECORD_LEN];
        version.copy_from_slice(&buf[VERSION_OFFSET..VERSION_OFFSET + VERSION_RECORD_LEN]);
        let mut reserved = [0u32; 4];
        for (i, slot) in reserved.iter_mut().enumerate() {
            *slot = read_u32_le(buf, RESERVED_OFFSET + i * 4);
        }
        Self {
            validity: ValidityFlag::from_word(read_u32_le(buf, VALIDITY_OFFSET)),
            version: VersionRecord::from_bytes(&version),
            flags: ZoneFlags::from_bits(read_u32_le(buf, FLAGS_OFFSET)),
            address: read_u32_le(buf, ADDRESS_OFFSET),
            size: read_u32_le(buf, SIZE_OFFSET),
            entry_point: read_u32_le(buf, ENTRY_OFFSET),
            reserved,
            checksum: read_u32_le(buf, CHECKSUM_OFFSET),
            crc32: read_u32_le(buf, CRC_OFFSET),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_FIXED_LEN] {
        let mut buf = [0u8; HEADER_FIXED_LEN];
        write_u32_le(&mut buf, VALIDITY_OFFSET, self.validity.word());
        buf[VERSION_OFFSET..VERSION_OFFSET + VERSION_RECORD_LEN]
            .copy_from_slice(&self.version.to_bytes());
        write_u32_le(&mut buf, FLAGS_OFFSET, self.flags.bits());
        write_u32_le(&mut buf, ADDRESS_OFFSET, self.address);
        write_u32_le(&mut buf, SIZE_OFFSET, self.size);
        write_u32_le(&mut buf, ENTRY_OFFSET, self.entry_point);
        for (i, slot) in self.reserved.iter().enumerate() {
            write_u32_le(&mut buf, RESERVED_OFFSET + i * 4, *slot);
        }
        write_u32_le(&mut buf, CHECKSUM_OFFSET, self.checksum);
        write_u32_le(&mut buf, CRC_OFFSET, self.crc32);
        buf
    }

    /// Header image the CRC is computed over: validity all-ones, crc field
    /// zeroed, encrypt bit cleared.
    pub fn neutralized_for_crc(&self) -> [u8; HEADER_FIXED_LEN] {
        let mut neutral = *self;
        neutral.validity = ValidityFlag::Erased;
        neutral.crc32 = 0;
        neutral.flags = neutral.flags.without(ZoneFlags::ENCRYPT);
        neutral.to_bytes()
    }

    /// Header image the signature digest covers: as for the CRC, with the
    /// sign bit cleared as well.
    pub fn neutralized_for_signature(&self) -> [u8; HEADER_FIXED_LEN] {
        let mut neutral = *self;
        neutral.validity = ValidityFlag::Erased;
        neutral.crc32 = 0;
        neutral.flags = neutral
            .flags
            .without(ZoneFlags::ENCRYPT)
            .without(ZoneFlags::SIGN);
        neutral.to_bytes()
    }

    /// Seed of the sparse checksum: XOR of the header words between the
    /// validity flag and the checksum, with the encrypt bit masked off.
    pub fn checksum_seed(&self) -> u32 {
        let bytes = self.to_bytes();
        let mut seed = 0;
        for offset in (VERSION_OFFSET..CHECKSUM_OFFSET).step_by(4) {
            let mut word = read_u32_le(&bytes, offset);
            if offset == FLAGS_OFFSET {
                word &= !ZoneFlags::ENCRYPT;
            }
            seed ^= word;
        }
        seed
    }

    /// The zone table location stored by the bootloader's own header.
    pub fn zone_table_offset(&self) -> u32 {
        self.reserved[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PartitionHeader {
        PartitionHeader {
            validity: ValidityFlag::Executable,
            version: VersionRecord {
                vendor_id: 0x1234,
                device_id: 0x5678,
                flash_id: 1,
                zone_id: 2,
                rom_version: 3,
                version: 7,
                build_date: 0x2025_0101,
            },
            flags: ZoneFlags::from_bits(ZoneFlags::SIGN | ZoneFlags::ENCRYPT),
            address: 0x1000_0000,
            size: 0x2000,
            entry_point: 0x1000_0100,
            reserved: [0x800, 0, 0, 0],
            checksum: 0xAABB_CCDD,
            crc32: 0x1122_3344,
        }
    }

    #[test]
    fn parse_reads_fields_at_their_offsets() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], &[0xA5, 0xA5, 0x5A, 0x5A]);
        assert_eq!(read_u32_le(&bytes, SIZE_OFFSET), 0x2000);
        assert_eq!(read_u32_le(&bytes, VERSION_OFFSET + 20), 7);
        assert_eq!(PartitionHeader::parse(&bytes), sample());
    }

    #[test]
    fn unknown_validity_word_is_invalid() {
        assert_eq!(
            ValidityFlag::from_word(0x1234_5678),
            ValidityFlag::Invalid(0x1234_5678)
        );
        assert_eq!(ValidityFlag::from_word(0), ValidityFlag::Consumed);
    }

    #[test]
    fn neutralized_images_ignore_mutable_fields() {
        let header = sample();
        let mut staged = header;
        staged.validity = ValidityFlag::Staged;
        staged.crc32 = 0;
        staged.flags = staged.flags.without(ZoneFlags::ENCRYPT);
        assert_eq!(header.neutralized_for_crc(), staged.neutralized_for_crc());

        let crc_image = header.neutralized_for_crc();
        assert_eq!(read_u32_le(&crc_image, 0), ValidityFlag::ERASED);
        assert_eq!(read_u32_le(&crc_image, FLAGS_OFFSET), ZoneFlags::SIGN);
        let sig_image = header.neutralized_for_signature();
        assert_eq!(read_u32_le(&sig_image, FLAGS_OFFSET), 0);
    }

    #[test]
    fn header_len_keeps_payload_block_aligned() {
        assert_eq!(SignMode::Crc32.header_len(), 0x50);
        assert_eq!(SignMode::Sha256.header_len(), 0x70);
        assert_eq!(SignMode::EcdsaP256.header_len(), 0xD0);
        assert_eq!(SignMode::Rsa2048.header_len(), 0x250);
        assert_eq!(SignMode::from_u8(4), None);
    }

    #[test]
    fn checksum_seed_masks_encrypt_bit() {
        let header = sample();
        let mut clear = header;
        clear.flags = clear.flags.without(ZoneFlags::ENCRYPT);
        assert_eq!(header.checksum_seed(), clear.checksum_seed());
        let mut other = header;
        other.version.version += 1;
        assert_ne!(header.checksum_seed(), other.checksum_seed());
    }
}
