// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! NOR flash emulated in RAM and persisted to a file.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use romboot_common::hil::flash::{FlashController, Mapping};
use romboot_common::ErrorCode;

pub const SECTOR_SIZE: u32 = 0x1000;

/// Erase sets bytes to 0xFF and programming can only clear bits. The
/// decrypting window is not emulated: both mappings read the same bytes.
pub struct FileFlash {
    path: PathBuf,
    mem: RefCell<Vec<u8>>,
    protected: Cell<bool>,
    dirty: Cell<bool>,
}

impl FileFlash {
    /// Open the image at `path`, or start from an erased part of `size`
    /// bytes when there is none yet.
    pub fn open(path: &Path, size: u32) -> Result<Self> {
        if size == 0 || size % SECTOR_SIZE != 0 {
            bail!("flash size {:#x} is not a multiple of the sector size", size);
        }
        let (mem, dirty) = if path.exists() {
            let mem = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            if mem.len() != size as usize {
                bail!(
                    "{} holds {:#x} bytes, expected {:#x}",
                    path.display(),
                    mem.len(),
                    size
                );
            }
            (mem, false)
        } else {
            log::info!("creating erased flash image {}", path.display());
            (vec![0xFF; size as usize], true)
        };
        Ok(Self {
            path: path.to_path_buf(),
            mem: RefCell::new(mem),
            protected: Cell::new(true),
            dirty: Cell::new(dirty),
        })
    }

    /// Write the contents back to the file if anything changed.
    pub fn flush(&self) -> Result<()> {
        if self.dirty.get() {
            fs::write(&self.path, &*self.mem.borrow())
                .with_context(|| format!("write {}", self.path.display()))?;
            self.dirty.set(false);
        }
        Ok(())
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, ErrorCode> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(ErrorCode::SIZE)?;
        if end > self.mem.borrow().len() {
            return Err(ErrorCode::SIZE);
        }
        Ok(start..end)
    }
}

impl FlashController for FileFlash {
    fn size(&self) -> u32 {
        self.mem.borrow().len() as u32
    }

    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn read(&self, _mapping: Mapping, offset: u32, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.mem.borrow()[range]);
        Ok(())
    }

    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), ErrorCode> {
        if self.protected.get() {
            return Err(ErrorCode::OFF);
        }
        let range = self.range(offset, buf.len())?;
        for (cell, byte) in self.mem.borrow_mut()[range].iter_mut().zip(buf) {
            *cell &= *byte;
        }
        self.dirty.set(true);
        Ok(())
    }

    fn erase(&self, offset: u32, len: u32) -> Result<(), ErrorCode> {
        if self.protected.get() {
            return Err(ErrorCode::OFF);
        }
        if offset % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
            return Err(ErrorCode::INVAL);
        }
        let range = self.range(offset, len as usize)?;
        log::debug!("erase {:#x}+{:#x}", offset, len);
        self.mem.borrow_mut()[range].fill(0xFF);
        self.dirty.set(true);
        Ok(())
    }

    fn set_write_protect(&self, enabled: bool) -> Result<(), ErrorCode> {
        self.protected.set(enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romboot_common::hil::flash::{erase_unprotected, write_unprotected};

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("romboot-{}-{}.bin", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn programming_only_clears_bits() {
        let flash = FileFlash::open(&scratch("nor"), 0x2000).unwrap();
        assert_eq!(flash.write(0, &[0x00]), Err(ErrorCode::OFF));
        write_unprotected(&flash, 0x10, &[0xF0, 0x0F]).unwrap();
        write_unprotected(&flash, 0x10, &[0x3C, 0x3C]).unwrap();
        let mut buf = [0u8; 2];
        flash.read(Mapping::Plain, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [0x30, 0x0C]);

        assert_eq!(erase_unprotected(&flash, 0x10, 0x1000), Err(ErrorCode::INVAL));
        erase_unprotected(&flash, 0, 0x1000).unwrap();
        flash.read(Mapping::Cipher, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xFF]);
        assert_eq!(flash.read(Mapping::Plain, 0x1FFF, &mut buf), Err(ErrorCode::SIZE));
    }

    #[test]
    fn contents_survive_a_reopen() {
        let path = scratch("persist");
        {
            let flash = FileFlash::open(&path, 0x1000).unwrap();
            write_unprotected(&flash, 0x100, b"zone").unwrap();
            flash.flush().unwrap();
        }
        let flash = FileFlash::open(&path, 0x1000).unwrap();
        let mut buf = [0u8; 4];
        flash.read(Mapping::Plain, 0x100, &mut buf).unwrap();
        assert_eq!(&buf, b"zone");
        assert!(FileFlash::open(&path, 0x2000).is_err());
        fs::remove_file(&path).unwrap();
    }
}
