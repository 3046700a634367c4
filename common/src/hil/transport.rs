// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Byte transport (UART, USB serial, SD host link) used by the protocol task.

use crate::ErrorCode;

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Send one byte, waiting until the transmitter accepts it.
    async fn send_byte(&mut self, byte: u8) -> Result<(), ErrorCode>;

    /// Wait for the next received byte.
    async fn recv_byte(&mut self) -> Result<u8, ErrorCode>;

    /// Wait up to `timeout_ms` for the next received byte. `Ok(None)` means
    /// the timeout expired.
    async fn recv_byte_timeout(&mut self, timeout_ms: u32) -> Result<Option<u8>, ErrorCode>;
}
