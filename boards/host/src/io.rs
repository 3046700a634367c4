// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Board I/O and efuse values of the host board.

use romboot_common::hil::efuse::{Efuse, SecureBootLevel};
use romboot_common::BootloaderIO;

/// Boot status goes to the log instead of LEDs and a debug UART.
pub struct HostIO;

impl BootloaderIO for HostIO {
    fn signal_success(&self) {
        log::info!("[status] boot ok");
    }

    fn signal_failure(&self) {
        log::error!("[status] boot failed");
    }

    fn debug(&self, msg: &str) {
        log::debug!("[debug] {}", msg);
    }
}

/// One-time programmable values, fixed for the lifetime of the process.
#[derive(Debug)]
pub struct HostEfuse {
    pub root_digest: Option<[u8; 32]>,
    pub level: SecureBootLevel,
    pub secure_download: bool,
    pub aes_key: Option<[u8; 32]>,
    pub boot_options: u32,
}

impl Efuse for HostEfuse {
    fn root_key_digest(&self) -> Option<[u8; 32]> {
        self.root_digest
    }

    fn secure_boot_level(&self) -> SecureBootLevel {
        self.level
    }

    fn secure_download(&self) -> bool {
        self.secure_download
    }

    fn aes_key(&self) -> Option<[u8; 32]> {
        self.aes_key
    }

    fn boot_options(&self) -> u32 {
        self.boot_options
    }
}
