// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Interfaces to the hardware the bootloader core consumes.
//!
//! The core never touches registers. A board provides a flash controller, a
//! crypto accelerator, efuse access and a byte transport, and the core only
//! ever calls through these traits.

pub mod crypto;
pub mod efuse;
pub mod flash;
pub mod transport;

pub use crypto::CryptoEngine;
pub use efuse::{Efuse, SecureBootLevel};
pub use flash::{FlashController, FlashRegion, Mapping};
pub use transport::Transport;
