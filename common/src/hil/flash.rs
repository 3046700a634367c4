// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Interface for reading, writing, and erasing the boot flash.
//!
//! All offsets are relative to the start of the flash device. Reads are a
//! direct view of the memory-mapped flash: either through the plain window or
//! through the cipher window that decrypts on the fly. Writes and erases are
//! always addressed to the physical device.
//!
//! The boiler plate for an implementation will look something like this
//!
//! ```rust
//! use romboot_common::hil::flash::{FlashController, Mapping};
//! use romboot_common::ErrorCode;
//!
//! struct FlashCtrl {}
//!
//! impl FlashController for FlashCtrl {
//!     fn size(&self) -> u32 { 0x40_0000 }
//!     fn sector_size(&self) -> u32 { 0x1000 }
//!     fn read(&self, _mapping: Mapping, _offset: u32, _buf: &mut [u8]) -> Result<(), ErrorCode> {
//!         unimplemented!()
//!     }
//!     fn write(&self, _offset: u32, _buf: &[u8]) -> Result<(), ErrorCode> {
//!         unimplemented!()
//!     }
//!     fn erase(&self, _offset: u32, _len: u32) -> Result<(), ErrorCode> {
//!         unimplemented!()
//!     }
//!     fn set_write_protect(&self, _enabled: bool) -> Result<(), ErrorCode> {
//!         Ok(())
//!     }
//! }
//! ```

use crate::ErrorCode;

/// Which memory-mapped window a read goes through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mapping {
    /// Raw flash contents.
    Plain,
    /// Flash contents decrypted by the on-the-fly cipher block.
    Cipher,
}

/// Implementation required for the flash controller hardware.
///
/// Methods take `&self`: the flash is shared between the protocol task, which
/// reads, and the flash worker, which programs. Implementations use interior
/// mutability where they need it.
pub trait FlashController {
    /// Total size of the device in bytes.
    fn size(&self) -> u32;

    /// Smallest erasable unit in bytes.
    fn sector_size(&self) -> u32;

    /// Fill `buf` with the contents at `offset` as seen through `mapping`.
    fn read(&self, mapping: Mapping, offset: u32, buf: &mut [u8]) -> Result<(), ErrorCode>;

    /// Program `buf` at `offset`. The target must have been erased.
    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), ErrorCode>;

    /// Erase `len` bytes at `offset`. Both must be sector aligned.
    fn erase(&self, offset: u32, len: u32) -> Result<(), ErrorCode>;

    /// Enable or disable the device write protection.
    fn set_write_protect(&self, enabled: bool) -> Result<(), ErrorCode>;

    /// Drop any cached view of flash contents.
    fn invalidate_cache(&self) {}
}

/// Program `buf` with write protection lifted only for the duration of the
/// write. Protection is restored even if the write fails.
pub fn write_unprotected<F: FlashController + ?Sized>(
    flash: &F,
    offset: u32,
    buf: &[u8],
) -> Result<(), ErrorCode> {
    flash.set_write_protect(false)?;
    let result = flash.write(offset, buf);
    let relock = flash.set_write_protect(true);
    result.and(relock)
}

/// Erase with write protection lifted only for the duration of the erase.
pub fn erase_unprotected<F: FlashController + ?Sized>(
    flash: &F,
    offset: u32,
    len: u32,
) -> Result<(), ErrorCode> {
    flash.set_write_protect(false)?;
    let result = flash.erase(offset, len);
    let relock = flash.set_write_protect(true);
    result.and(relock)
}

/// A bounds-checked window onto part of the flash.
///
/// Every zone access goes through one of these so that a corrupted size field
/// can never turn into a read outside the zone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashRegion {
    base: u32,
    size: u32,
    mapping: Mapping,
}

impl FlashRegion {
    pub const fn new(base: u32, size: u32, mapping: Mapping) -> Self {
        Self {
            base,
            size,
            mapping,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    /// Device offset of `offset` within the region, provided `len` bytes
    /// starting there stay inside it.
    pub fn absolute(&self, offset: u32, len: usize) -> Result<u32, ErrorCode> {
        let len = u32::try_from(len).map_err(|_| ErrorCode::SIZE)?;
        let end = offset.checked_add(len).ok_or(ErrorCode::SIZE)?;
        if end > self.size {
            return Err(ErrorCode::SIZE);
        }
        self.base.checked_add(offset).ok_or(ErrorCode::SIZE)
    }

    /// Whether `len` bytes at `offset` fit in the region.
    pub fn contains(&self, offset: u32, len: usize) -> bool {
        self.absolute(offset, len).is_ok()
    }

    pub fn read<F: FlashController + ?Sized>(
        &self,
        flash: &F,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), ErrorCode> {
        let address = self.absolute(offset, buf.len())?;
        flash.read(self.mapping, address, buf)
    }

    pub fn read_u32<F: FlashController + ?Sized>(
        &self,
        flash: &F,
        offset: u32,
    ) -> Result<u32, ErrorCode> {
        let mut word = [0u8; 4];
        self.read(flash, offset, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}
