// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Command frames.
//!
//! `0x00 | op | len (LE16) | checksum (LE32) | payload`. The checksum is only
//! meaningful for data commands: the XOR of the data bytes seeded with 0xEF.

use crate::header::{VersionRecord, ZoneFlags, VERSION_RECORD_LEN};
use crate::protocol::response::ProtocolError;
use crate::util::{read_u16_le, read_u32_le};

pub const DIRECTION_COMMAND: u8 = 0x00;
pub const FRAME_HEADER_LEN: usize = 8;

/// Fixed fields in front of the data of FLASH_DATA and OTA_WRITE_DATA.
pub const DATA_HEADER_LEN: usize = 16;

pub const CHECKSUM_SEED: u8 = 0xEF;

pub const SYNC_PAYLOAD: [u8; 36] = {
    let mut payload = [0x55u8; 36];
    payload[0] = 0x07;
    payload[1] = 0x07;
    payload[2] = 0x12;
    payload[3] = 0x20;
    payload
};

pub mod op {
    pub const FLASH_BEGIN: u8 = 0x02;
    pub const FLASH_DATA: u8 = 0x03;
    pub const FLASH_END: u8 = 0x04;
    pub const SYNC: u8 = 0x08;
    pub const GET_SECURITY_INFO: u8 = 0x14;
    pub const OTA_NEW_VERSION: u8 = 0x40;
    pub const OTA_START: u8 = 0x41;
    pub const OTA_WRITE_DATA: u8 = 0x42;
    pub const OTA_VERIFY: u8 = 0x43;
    pub const OTA_GET_VERSION: u8 = 0x44;
    pub const ERASE_REGION: u8 = 0xD1;
}

/// OTA_WRITE_DATA flag: the CRC field is valid.
pub const WRITE_FLAG_CRC: u32 = 1 << 0;

pub fn data_checksum(data: &[u8]) -> u32 {
    data.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b) as u32
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Sync,
    FlashBegin {
        erase_size: u32,
        num_blocks: u32,
        block_size: u32,
        offset: u32,
    },
    FlashData {
        seq: u32,
        data: &'a [u8],
    },
    FlashEnd {
        reboot: bool,
    },
    EraseRegion {
        offset: u32,
        len: u32,
    },
    GetSecurityInfo,
    OtaNewVersion {
        version: VersionRecord,
        flags: ZoneFlags,
    },
    OtaStart {
        total_size: u32,
    },
    OtaWriteData {
        offset: u32,
        crc: Option<u32>,
        data: &'a mut [u8],
    },
    OtaVerify,
    OtaGetVersion {
        zone_id: u8,
    },
}

fn need(payload: &[u8], len: usize) -> Result<(), ProtocolError> {
    if payload.len() < len {
        return Err(ProtocolError::BadDataLen);
    }
    Ok(())
}

/// Split a data command payload into its header fields and data, checking
/// the declared length and the frame checksum.
fn split_data(
    payload: &mut [u8],
    checksum: u32,
) -> Result<([u32; 4], &mut [u8]), ProtocolError> {
    need(payload, DATA_HEADER_LEN)?;
    let fields = [
        read_u32_le(payload, 0),
        read_u32_le(payload, 4),
        read_u32_le(payload, 8),
        read_u32_le(payload, 12),
    ];
    let data = &mut payload[DATA_HEADER_LEN..];
    if data.len() != fields[0] as usize {
        return Err(ProtocolError::BadDataLen);
    }
    if data_checksum(data) != checksum {
        return Err(ProtocolError::BadDataChecksum);
    }
    Ok((fields, data))
}

impl<'a> Command<'a> {
    /// Parse a complete frame. The frame is borrowed mutably so that
    /// encrypted OTA data can be decrypted in place.
    pub fn parse(frame: &'a mut [u8]) -> Result<Self, ProtocolError> {
        if frame.len() < FRAME_HEADER_LEN || frame[0] != DIRECTION_COMMAND {
            return Err(ProtocolError::InvalidCommand);
        }
        let op = frame[1];
        let len = read_u16_le(frame, 2) as usize;
        let checksum = read_u32_le(frame, 4);
        if frame.len() < FRAME_HEADER_LEN + len {
            return Err(ProtocolError::BadDataLen);
        }
        let payload = &mut frame[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];

        let command = match op {
            op::SYNC => {
                if payload[..] != SYNC_PAYLOAD[..] {
                    return Err(ProtocolError::InvalidCommand);
                }
                Command::Sync
            }
            op::FLASH_BEGIN => {
                need(payload, 16)?;
                Command::FlashBegin {
                    erase_size: read_u32_le(payload, 0),
                    num_blocks: read_u32_le(payload, 4),
                    block_size: read_u32_le(payload, 8),
                    offset: read_u32_le(payload, 12),
                }
            }
            op::FLASH_DATA => {
                // data_len | seq | reserved | reserved | data
                let (fields, data) = split_data(payload, checksum)?;
                Command::FlashData {
                    seq: fields[1],
                    data,
                }
            }
            op::FLASH_END => {
                need(payload, 4)?;
                Command::FlashEnd {
                    reboot: read_u32_le(payload, 0) != 0,
                }
            }
            op::ERASE_REGION => {
                need(payload, 8)?;
                Command::EraseRegion {
                    offset: read_u32_le(payload, 0),
                    len: read_u32_le(payload, 4),
                }
            }
            op::GET_SECURITY_INFO => Command::GetSecurityInfo,
            op::OTA_NEW_VERSION => {
                need(payload, VERSION_RECORD_LEN + 4)?;
                let mut record = [0u8; VERSION_RECORD_LEN];
                record.copy_from_slice(&payload[..VERSION_RECORD_LEN]);
                Command::OtaNewVersion {
                    version: VersionRecord::from_bytes(&record),
                    flags: ZoneFlags::from_bits(read_u32_le(payload, VERSION_RECORD_LEN)),
                }
            }
            op::OTA_START => {
                need(payload, 4)?;
                Command::OtaStart {
                    total_size: read_u32_le(payload, 0),
                }
            }
            op::OTA_WRITE_DATA => {
                // data_len | offset | flags | crc | data
                let (fields, data) = split_data(payload, checksum)?;
                Command::OtaWriteData {
                    offset: fields[1],
                    crc: if fields[2] & WRITE_FLAG_CRC != 0 {
                        Some(fields[3])
                    } else {
                        None
                    },
                    data,
                }
            }
            op::OTA_VERIFY => Command::OtaVerify,
            op::OTA_GET_VERSION => {
                need(payload, 4)?;
                Command::OtaGetVersion {
                    zone_id: payload[0],
                }
            }
            _ => return Err(ProtocolError::CmdNotImplemented),
        };
        Ok(command)
    }
}
