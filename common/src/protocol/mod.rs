// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Streaming command protocol.
//!
//! [`ProtocolTask`] owns the transport. It feeds received bytes through the
//! SLIP decoder and the [`FrameAssembler`], hands complete frames to the
//! [`CommandHandler`] and sends exactly one response per command or
//! per framing error.
//!
//! ```text
//! transport ─> SlipDecoder ─> FrameAssembler ─> Command::parse ─> CommandHandler
//!     ^                                                               │
//!     └─────────────────────────── Reply::send <──────────────────────┘
//! ```

pub mod assembler;
pub mod command;
pub mod response;

use crate::flash_worker::{FlashClient, FLASH_JOB_LEN};
use crate::hil::crypto::CryptoEngine;
use crate::hil::efuse::{Efuse, SecureBootLevel};
use crate::hil::flash::FlashController;
use crate::hil::transport::Transport;
use crate::ota::{OtaSession, OtaState, OtaStatus};
use crate::slip::SlipDecoder;
use crate::util::{align_up, write_u32_le};
use crate::zone::ZoneTable;
use crate::{BoardConfig, ErrorCode};

use assembler::{AssemblerEvent, FrameAssembler};
use command::Command;
use response::{Outcome, ProtocolError, Reply};

/// GET_SECURITY_INFO flag bits.
pub const SECURITY_FLAG_SECURE_BOOT: u32 = 1 << 0;
pub const SECURITY_FLAG_SECURE_DOWNLOAD: u32 = 1 << 1;
pub const SECURITY_FLAG_ROOT_KEY: u32 = 1 << 2;
pub const SECURITY_FLAG_AES_KEY: u32 = 1 << 3;

/// Length of the GET_SECURITY_INFO payload: flags, level, boot options.
pub const SECURITY_INFO_LEN: usize = 9;

/// Direct flash programming started by FLASH_BEGIN.
#[derive(Copy, Clone, Debug)]
struct FlashMode {
    offset: u32,
    erase_len: u32,
    block_size: u32,
    num_blocks: u32,
    next_seq: u32,
}

/// Executes parsed commands against the OTA session and the flash.
pub struct CommandHandler<'a, B, F, C, E>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    session: OtaSession<'a, B, F, C, E>,
    flash: &'a F,
    writer: &'a FlashClient<'a>,
    efuse: &'a E,
    flash_mode: Option<FlashMode>,
}

impl<'a, B, F, C, E> CommandHandler<'a, B, F, C, E>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    pub fn new(
        session: OtaSession<'a, B, F, C, E>,
        flash: &'a F,
        writer: &'a FlashClient<'a>,
        efuse: &'a E,
    ) -> Self {
        Self {
            session,
            flash,
            writer,
            efuse,
            flash_mode: None,
        }
    }

    pub fn session(&self) -> &OtaSession<'a, B, F, C, E> {
        &self.session
    }

    /// Drop every multi-step operation in progress.
    pub fn abort(&mut self) {
        if self.flash_mode.take().is_some() {
            log::warn!("flash mode aborted");
        }
        self.session.abort();
    }

    /// Tear the handler down and hand back the zone table.
    pub fn close(self) -> ZoneTable {
        self.session.close()
    }

    pub async fn execute(&mut self, op: u8, command: Command<'_>) -> Reply {
        let result = match command {
            Command::Sync => Ok(Reply::ok(op)),
            Command::FlashBegin {
                erase_size,
                num_blocks,
                block_size,
                offset,
            } => {
                self.flash_begin(op, erase_size, num_blocks, block_size, offset)
                    .await
            }
            Command::FlashData { seq, data } => self.flash_data(op, seq, data).await,
            Command::FlashEnd { reboot } => self.flash_end(op, reboot).await,
            Command::EraseRegion { offset, len } => self.erase_region(op, offset, len).await,
            Command::GetSecurityInfo => Ok(self.security_info(op)),
            Command::OtaNewVersion { version, flags } => self
                .ota_allowed()
                .map(|_| Reply::ota(op, self.session.new_version(version, flags))),
            Command::OtaStart { total_size } => match self.ota_allowed() {
                Ok(()) => Ok(Reply::ota(op, self.session.start_ota(total_size).await)),
                Err(e) => Err(e),
            },
            Command::OtaWriteData { offset, crc, data } => match self.ota_allowed() {
                Ok(()) => Ok(Reply::ota(
                    op,
                    self.session.write_data(offset, crc, data).await,
                )),
                Err(e) => Err(e),
            },
            Command::OtaVerify => match self.ota_allowed() {
                Ok(()) => Ok(Reply::ota(op, self.session.verify_data().await)),
                Err(e) => Err(e),
            },
            Command::OtaGetVersion { zone_id } => Ok(match self.session.current_version(zone_id) {
                Some(record) => {
                    Reply::ota(op, OtaStatus::VersionConfirm).with_payload(&record.to_bytes())
                }
                None => Reply::ota(op, OtaStatus::ZoneNotFound),
            }),
        };
        result.unwrap_or_else(|e| {
            log::warn!("command {:#04x} refused: {:?}", op, e);
            Reply::error(op, e)
        })
    }

    /// OTA and direct programming never interleave.
    fn ota_allowed(&self) -> Result<(), ProtocolError> {
        if self.flash_mode.is_some() {
            return Err(ProtocolError::InvalidCommand);
        }
        Ok(())
    }

    /// Raw flash access bypasses every image check, so it is refused in
    /// secure download mode and while an OTA transfer owns the flash.
    fn direct_flash_allowed(&self) -> Result<(), ProtocolError> {
        if self.efuse.secure_download() {
            return Err(ProtocolError::InvalidCommand);
        }
        if self.session.state() == OtaState::DataWriting {
            return Err(ProtocolError::InvalidCommand);
        }
        Ok(())
    }

    /// Sector aligned `[offset, offset + len)` rounded up, inside the device.
    fn erase_span(&self, offset: u32, len: u32) -> Result<u32, ProtocolError> {
        let sector = self.flash.sector_size();
        if offset % sector != 0 {
            return Err(ProtocolError::FailedSpiOp);
        }
        let erase_len = align_up(len, sector).ok_or(ProtocolError::FailedSpiOp)?;
        match offset.checked_add(erase_len) {
            Some(end) if end <= self.flash.size() => Ok(erase_len),
            _ => Err(ProtocolError::FailedSpiOp),
        }
    }

    async fn flash_begin(
        &mut self,
        op: u8,
        erase_size: u32,
        num_blocks: u32,
        block_size: u32,
        offset: u32,
    ) -> Result<Reply, ProtocolError> {
        self.direct_flash_allowed()?;
        if block_size == 0 || block_size as usize > FLASH_JOB_LEN {
            return Err(ProtocolError::BadBlocksize);
        }
        let erase_len = self.erase_span(offset, erase_size)?;
        let data_len = num_blocks
            .checked_mul(block_size)
            .ok_or(ProtocolError::BadBlocksize)?;
        if data_len > erase_len {
            return Err(ProtocolError::TooMuchData);
        }

        self.flash_mode = None;
        self.writer.reset().await;
        self.writer.erase(offset, erase_len).await?;
        log::info!(
            "flash mode: {} blocks of {:#x} at {:#x}",
            num_blocks,
            block_size,
            offset
        );
        self.flash_mode = Some(FlashMode {
            offset,
            erase_len,
            block_size,
            num_blocks,
            next_seq: 0,
        });
        Ok(Reply::ok(op))
    }

    async fn flash_data(&mut self, op: u8, seq: u32, data: &[u8]) -> Result<Reply, ProtocolError> {
        let mode = self.flash_mode.as_mut().ok_or(ProtocolError::NotInFlashMode)?;
        if seq != mode.next_seq || seq >= mode.num_blocks {
            return Err(ProtocolError::InvalidCommand);
        }
        if data.len() > mode.block_size as usize {
            return Err(ProtocolError::BadBlocksize);
        }
        let start = seq * mode.block_size;
        if start + data.len() as u32 > mode.erase_len {
            return Err(ProtocolError::TooMuchData);
        }
        // A short last block leaves the rest of it erased.
        self.writer.submit_write(mode.offset + start, data).await?;
        mode.next_seq += 1;
        Ok(Reply::ok(op))
    }

    async fn flash_end(&mut self, op: u8, reboot: bool) -> Result<Reply, ProtocolError> {
        let mode = self.flash_mode.take().ok_or(ProtocolError::NotInFlashMode)?;
        self.writer.drain().await?;
        self.flash.invalidate_cache();
        if mode.next_seq != mode.num_blocks {
            log::warn!(
                "flash mode ended after {} of {} blocks",
                mode.next_seq,
                mode.num_blocks
            );
        }
        let reply = Reply::ok(op);
        Ok(if reboot {
            Reply {
                outcome: Outcome::Reboot,
                ..reply
            }
        } else {
            reply
        })
    }

    async fn erase_region(&mut self, op: u8, offset: u32, len: u32) -> Result<Reply, ProtocolError> {
        self.direct_flash_allowed()?;
        if self.flash_mode.is_some() {
            return Err(ProtocolError::InvalidCommand);
        }
        if len % self.flash.sector_size() != 0 {
            return Err(ProtocolError::FailedSpiOp);
        }
        let erase_len = self.erase_span(offset, len)?;
        self.writer.erase(offset, erase_len).await?;
        Ok(Reply::ok(op))
    }

    fn security_info(&self, op: u8) -> Reply {
        let level = self.efuse.secure_boot_level();
        let mut flags = 0;
        if level != SecureBootLevel::Disabled {
            flags |= SECURITY_FLAG_SECURE_BOOT;
        }
        if self.efuse.secure_download() {
            flags |= SECURITY_FLAG_SECURE_DOWNLOAD;
        }
        if self.efuse.root_key_digest().is_some() {
            flags |= SECURITY_FLAG_ROOT_KEY;
        }
        if self.efuse.aes_key().is_some() {
            flags |= SECURITY_FLAG_AES_KEY;
        }

        let mut payload = [0u8; SECURITY_INFO_LEN];
        write_u32_le(&mut payload, 0, flags);
        payload[4] = level as u8;
        write_u32_le(&mut payload, 5, self.efuse.boot_options());
        Reply::ok(op).with_payload(&payload)
    }
}

/// Owns the transport and runs the receive/dispatch/respond loop.
pub struct ProtocolTask<'a, B, F, C, E, T>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
    T: Transport,
{
    transport: T,
    decoder: SlipDecoder,
    assembler: FrameAssembler,
    handler: CommandHandler<'a, B, F, C, E>,
}

impl<'a, B, F, C, E, T> ProtocolTask<'a, B, F, C, E, T>
where
    B: BoardConfig,
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
    T: Transport,
{
    pub fn new(transport: T, handler: CommandHandler<'a, B, F, C, E>) -> Self {
        Self {
            transport,
            decoder: SlipDecoder::new(),
            assembler: FrameAssembler::new(),
            handler,
        }
    }

    pub fn handler(&self) -> &CommandHandler<'a, B, F, C, E> {
        &self.handler
    }

    pub fn into_parts(self) -> (T, CommandHandler<'a, B, F, C, E>) {
        (self.transport, self.handler)
    }

    fn reset_receiver(&mut self) {
        self.decoder.reset();
        self.assembler.reset();
    }

    /// Receive until one response has been sent.
    ///
    /// Idle time between frames is unbounded. Once a frame has started,
    /// more than `B::MAX_RECV_RETRIES` consecutive receive timeouts abandon
    /// it with a NOT_ENOUGH_DATA response.
    pub async fn process_next(&mut self) -> Result<Outcome, ErrorCode> {
        let mut misses = 0u32;
        loop {
            let byte = match self.transport.recv_byte_timeout(B::RECV_TIMEOUT_MS).await? {
                Some(byte) => {
                    misses = 0;
                    byte
                }
                None => {
                    if !self.assembler.receiving() {
                        continue;
                    }
                    misses += 1;
                    if misses <= B::MAX_RECV_RETRIES {
                        continue;
                    }
                    log::warn!("frame stalled after {} timeouts", misses);
                    let op = self.assembler.op();
                    self.reset_receiver();
                    Reply::error(op, ProtocolError::NotEnoughData)
                        .send(&mut self.transport)
                        .await?;
                    return Ok(Outcome::Continue);
                }
            };

            let event = match self.decoder.push(byte) {
                Some(event) => event,
                None => continue,
            };
            match self.assembler.push(event) {
                AssemblerEvent::Pending => {}
                AssemblerEvent::Error(error) => {
                    let op = self.assembler.op();
                    log::warn!("frame for {:#04x} dropped: {:?}", op, error);
                    // The rest of the frame is line noise; the next END
                    // opens a fresh frame.
                    self.reset_receiver();
                    Reply::error(op, error).send(&mut self.transport).await?;
                    return Ok(Outcome::Continue);
                }
                AssemblerEvent::Complete(len) => {
                    self.decoder.reset();
                    let frame = self.assembler.frame_mut(len);
                    let op = frame[1];
                    let reply = match Command::parse(frame) {
                        Ok(command) => {
                            log::debug!("command {:#04x}", op);
                            self.handler.execute(op, command).await
                        }
                        Err(error) => {
                            log::warn!("command {:#04x} malformed: {:?}", op, error);
                            Reply::error(op, error)
                        }
                    };
                    reply.send(&mut self.transport).await?;
                    return Ok(reply.outcome);
                }
            }
        }
    }

    /// Serve commands until the host asks for a reboot. A transport failure
    /// aborts any operation in progress and is returned.
    pub async fn run(&mut self) -> Result<(), ErrorCode> {
        loop {
            match self.process_next().await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Reboot) => {
                    log::info!("reboot requested");
                    return Ok(());
                }
                Err(e) => {
                    log::error!("transport failed: {:?}", e);
                    self.handler.abort();
                    self.reset_receiver();
                    return Err(e);
                }
            }
        }
    }
}
