// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Download link over a TCP connection, standing in for the UART.

use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use romboot_common::hil::transport::Transport;
use romboot_common::ErrorCode;

pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    /// Response bytes not yet handed to the socket.
    pending: Vec<u8>,
    timeout_ms: Option<u32>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            pending: Vec::new(),
            timeout_ms: None,
        })
    }

    /// Responses go out in one piece before the next read.
    fn flush(&mut self) -> Result<(), ErrorCode> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.writer
            .write_all(&self.pending)
            .map_err(|_| ErrorCode::FAIL)?;
        self.pending.clear();
        Ok(())
    }

    fn set_timeout(&mut self, timeout_ms: Option<u32>) -> Result<(), ErrorCode> {
        if self.timeout_ms != timeout_ms {
            // A zero duration is rejected by the socket layer.
            let timeout = timeout_ms.map(|ms| Duration::from_millis(u64::from(ms.max(1))));
            self.reader
                .get_ref()
                .set_read_timeout(timeout)
                .map_err(|_| ErrorCode::FAIL)?;
            self.timeout_ms = timeout_ms;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ErrorCode> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(0) => {
                log::info!("host closed the connection");
                Err(ErrorCode::OFF)
            }
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                log::error!("link read failed: {}", e);
                Err(ErrorCode::FAIL)
            }
        }
    }
}

impl Transport for TcpTransport {
    async fn send_byte(&mut self, byte: u8) -> Result<(), ErrorCode> {
        self.pending.push(byte);
        Ok(())
    }

    async fn recv_byte(&mut self) -> Result<u8, ErrorCode> {
        self.flush()?;
        self.set_timeout(None)?;
        loop {
            // Let the flash worker run between bytes.
            embassy_futures::yield_now().await;
            if let Some(byte) = self.read_byte()? {
                return Ok(byte);
            }
        }
    }

    async fn recv_byte_timeout(&mut self, timeout_ms: u32) -> Result<Option<u8>, ErrorCode> {
        self.flush()?;
        self.set_timeout(Some(timeout_ms))?;
        embassy_futures::yield_now().await;
        self.read_byte()
    }
}
