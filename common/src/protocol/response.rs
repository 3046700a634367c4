// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Response frames.
//!
//! `0x01 | op | len (LE16) | value (LE32) | payload | status | error`, where
//! `len` counts the payload plus the two trailing status bytes.

use heapless::Vec;

use crate::hil::transport::Transport;
use crate::ota::OtaStatus;
use crate::slip::send_frame;
use crate::ErrorCode;

pub const DIRECTION_RESPONSE: u8 = 0x01;

/// Largest response payload (a version record plus a little slack).
pub const MAX_RESPONSE_PAYLOAD: usize = 32;

/// Transport-level status codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolError {
    BadDataLen = 0xC0,
    BadDataChecksum = 0xC1,
    BadBlocksize = 0xC2,
    InvalidCommand = 0xC3,
    FailedSpiOp = 0xC4,
    NotInFlashMode = 0xC6,
    NotEnoughData = 0xC8,
    TooMuchData = 0xC9,
    CmdNotImplemented = 0xFF,
}

impl From<ErrorCode> for ProtocolError {
    fn from(_: ErrorCode) -> Self {
        ProtocolError::FailedSpiOp
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The host asked for a reboot once the response is out.
    Reboot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub op: u8,
    pub value: u32,
    pub payload: Vec<u8, MAX_RESPONSE_PAYLOAD>,
    pub status: u8,
    pub error: u8,
    pub outcome: Outcome,
}

impl Reply {
    pub fn ok(op: u8) -> Self {
        Self {
            op,
            value: 0,
            payload: Vec::new(),
            status: 0,
            error: 0,
            outcome: Outcome::Continue,
        }
    }

    pub fn error(op: u8, error: ProtocolError) -> Self {
        Self {
            status: 1,
            error: error as u8,
            ..Self::ok(op)
        }
    }

    /// OTA commands report their result in the value field.
    pub fn ota(op: u8, status: OtaStatus) -> Self {
        Self {
            value: status as u32,
            status: if status.is_confirm() { 0 } else { 1 },
            ..Self::ok(op)
        }
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        // Payloads are built from fixed-size records that always fit.
        let _ = self.payload.extend_from_slice(payload);
        self
    }

    pub fn header(&self) -> [u8; 8] {
        let len = (self.payload.len() + 2) as u16;
        let mut head = [0u8; 8];
        head[0] = DIRECTION_RESPONSE;
        head[1] = self.op;
        head[2..4].copy_from_slice(&len.to_le_bytes());
        head[4..8].copy_from_slice(&self.value.to_le_bytes());
        head
    }

    pub async fn send<T: Transport>(&self, transport: &mut T) -> Result<(), ErrorCode> {
        send_frame(
            transport,
            &[&self.header(), &self.payload, &[self.status, self.error]],
        )
        .await
    }
}
