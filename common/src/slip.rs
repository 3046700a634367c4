// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! SLIP framing (RFC 1055) for the command transport.

use crate::hil::transport::Transport;
use crate::ErrorCode;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlipEvent {
    FrameStart,
    Byte(u8),
    FrameEnd,
    /// An escape byte followed by something other than `ESC_END`/`ESC_ESC`.
    /// The byte is dropped and the frame continues.
    FramingError,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DecodeState {
    NoFrame,
    InFrame,
    Escaping,
}

pub struct SlipDecoder {
    state: DecodeState,
    empty: bool,
}

impl SlipDecoder {
    pub const fn new() -> Self {
        Self {
            state: DecodeState::NoFrame,
            empty: true,
        }
    }

    pub fn in_frame(&self) -> bool {
        self.state != DecodeState::NoFrame
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::NoFrame;
        self.empty = true;
    }

    /// Feed one received byte.
    ///
    /// Bytes outside a frame are line noise and are ignored. Back-to-back
    /// delimiters do not produce empty frames.
    pub fn push(&mut self, byte: u8) -> Option<SlipEvent> {
        match self.state {
            DecodeState::NoFrame => {
                if byte == END {
                    self.state = DecodeState::InFrame;
                    self.empty = true;
                    Some(SlipEvent::FrameStart)
                } else {
                    None
                }
            }
            DecodeState::InFrame => match byte {
                END if self.empty => None,
                END => {
                    self.reset();
                    Some(SlipEvent::FrameEnd)
                }
                ESC => {
                    self.state = DecodeState::Escaping;
                    None
                }
                b => {
                    self.empty = false;
                    Some(SlipEvent::Byte(b))
                }
            },
            DecodeState::Escaping => match byte {
                ESC_END => {
                    self.state = DecodeState::InFrame;
                    self.empty = false;
                    Some(SlipEvent::Byte(END))
                }
                ESC_ESC => {
                    self.state = DecodeState::InFrame;
                    self.empty = false;
                    Some(SlipEvent::Byte(ESC))
                }
                END => {
                    self.reset();
                    Some(SlipEvent::FrameEnd)
                }
                _ => {
                    self.state = DecodeState::InFrame;
                    Some(SlipEvent::FramingError)
                }
            },
        }
    }
}

/// Decode a byte stream into events.
pub fn decode(bytes: &[u8]) -> impl Iterator<Item = SlipEvent> + '_ {
    bytes
        .iter()
        .scan(SlipDecoder::new(), |decoder, &b| Some(decoder.push(b)))
        .flatten()
}

/// Bytes `data` occupies once framed.
pub fn encoded_len(data: &[u8]) -> usize {
    2 + data
        .iter()
        .map(|&b| if b == END || b == ESC { 2 } else { 1 })
        .sum::<usize>()
}

/// Frame `data` into `out`, returning the number of bytes written.
pub fn encode_into(data: &[u8], out: &mut [u8]) -> Result<usize, ErrorCode> {
    if encoded_len(data) > out.len() {
        return Err(ErrorCode::SIZE);
    }
    let mut n = 0;
    out[n] = END;
    n += 1;
    for &b in data {
        match b {
            END => {
                out[n] = ESC;
                out[n + 1] = ESC_END;
                n += 2;
            }
            ESC => {
                out[n] = ESC;
                out[n + 1] = ESC_ESC;
                n += 2;
            }
            _ => {
                out[n] = b;
                n += 1;
            }
        }
    }
    out[n] = END;
    Ok(n + 1)
}

/// Send the concatenation of `parts` as one frame.
pub async fn send_frame<T: Transport + ?Sized>(
    transport: &mut T,
    parts: &[&[u8]],
) -> Result<(), ErrorCode> {
    transport.send_byte(END).await?;
    for part in parts {
        for &b in part.iter() {
            match b {
                END => {
                    transport.send_byte(ESC).await?;
                    transport.send_byte(ESC_END).await?;
                }
                ESC => {
                    transport.send_byte(ESC).await?;
                    transport.send_byte(ESC_ESC).await?;
                }
                _ => transport.send_byte(b).await?,
            }
        }
    }
    transport.send_byte(END).await
}
