// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Collects decoded SLIP bytes into one command frame.

use crate::flash_worker::FLASH_JOB_LEN;
use crate::protocol::command::{DATA_HEADER_LEN, DIRECTION_COMMAND, FRAME_HEADER_LEN};
use crate::protocol::response::ProtocolError;
use crate::slip::SlipEvent;
use crate::util::read_u16_le;

/// Room for the largest command: a data command carrying one flash block.
pub const FRAME_BUFFER_LEN: usize = FRAME_HEADER_LEN + DATA_HEADER_LEN + FLASH_JOB_LEN;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssemblerEvent {
    Pending,
    /// A frame of this many bytes is ready in the buffer.
    Complete(usize),
    Error(ProtocolError),
}

pub struct FrameAssembler {
    buf: [u8; FRAME_BUFFER_LEN],
    len: usize,
    op: u8,
    /// Drop everything up to the end of the current SLIP frame.
    discarding: bool,
}

impl FrameAssembler {
    pub const fn new() -> Self {
        Self {
            buf: [0; FRAME_BUFFER_LEN],
            len: 0,
            op: 0,
            discarding: false,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.discarding = false;
    }

    /// Part of a frame has arrived and more is expected.
    pub fn receiving(&self) -> bool {
        self.len > 0 && !self.discarding
    }

    /// Opcode of the last frame seen, 0 when unknown. Survives `reset` so
    /// error replies can echo it.
    pub fn op(&self) -> u8 {
        self.op
    }

    pub fn frame_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.buf[..len]
    }

    fn declared_len(&self) -> usize {
        read_u16_le(&self.buf, 2) as usize + FRAME_HEADER_LEN
    }

    fn abandon(&mut self, error: ProtocolError) -> AssemblerEvent {
        self.discarding = true;
        AssemblerEvent::Error(error)
    }

    pub fn push(&mut self, event: SlipEvent) -> AssemblerEvent {
        match event {
            SlipEvent::FrameStart => {
                self.reset();
                self.op = 0;
                AssemblerEvent::Pending
            }
            SlipEvent::FrameEnd => {
                let incomplete = self.receiving();
                self.reset();
                if incomplete {
                    AssemblerEvent::Error(ProtocolError::BadDataLen)
                } else {
                    AssemblerEvent::Pending
                }
            }
            SlipEvent::FramingError => {
                log::warn!("slip: bad escape sequence");
                AssemblerEvent::Pending
            }
            SlipEvent::Byte(b) => {
                if self.discarding {
                    return AssemblerEvent::Pending;
                }
                if self.len == FRAME_BUFFER_LEN {
                    return self.abandon(ProtocolError::TooMuchData);
                }
                self.buf[self.len] = b;
                self.len += 1;
                if self.len == 2 {
                    self.op = b;
                }

                if self.len == 1 && b != DIRECTION_COMMAND {
                    return self.abandon(ProtocolError::InvalidCommand);
                }
                if self.len < 4 {
                    return AssemblerEvent::Pending;
                }
                let declared = self.declared_len();
                if declared > FRAME_BUFFER_LEN {
                    return self.abandon(ProtocolError::TooMuchData);
                }
                if self.len >= declared {
                    // Trailing bytes up to the delimiter are ignored.
                    self.discarding = true;
                    return AssemblerEvent::Complete(self.len);
                }
                AssemblerEvent::Pending
            }
        }
    }
}
