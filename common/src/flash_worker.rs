// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Flash erase/program task.
//!
//! Erasing a zone can take seconds. The worker runs as its own task so the
//! protocol task stays free to answer the host while the flash is busy. Jobs
//! travel over a two-slot channel, which doubles as the write double buffer:
//! one block programs while the next one is received.
//!
//! ```text
//!  protocol task                      flash worker
//!  FlashClient::submit_write ──jobs──> FlashWorker::run
//!  FlashClient::drain       <──done──  (erase per sector, yield)
//! ```
//!
//! Both tasks run on one executor, so the channels use `NoopRawMutex`.

use core::cell::Cell;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::hil::flash::{erase_unprotected, write_unprotected, FlashController};
use crate::ErrorCode;

/// Largest block a single write job carries.
pub const FLASH_JOB_LEN: usize = 4096;

/// Jobs that may be in flight at once.
pub const FLASH_QUEUE_DEPTH: usize = 2;

pub enum FlashJob {
    Erase { offset: u32, len: u32 },
    Write { offset: u32, data: Vec<u8, FLASH_JOB_LEN> },
}

/// Channels shared by a [`FlashClient`] and its [`FlashWorker`].
pub struct FlashQueue {
    jobs: Channel<NoopRawMutex, FlashJob, FLASH_QUEUE_DEPTH>,
    done: Channel<NoopRawMutex, Result<(), ErrorCode>, FLASH_QUEUE_DEPTH>,
}

impl FlashQueue {
    pub const fn new() -> Self {
        Self {
            jobs: Channel::new(),
            done: Channel::new(),
        }
    }
}

pub struct FlashWorker<'a, F: FlashController + ?Sized> {
    flash: &'a F,
    queue: &'a FlashQueue,
}

impl<'a, F: FlashController + ?Sized> FlashWorker<'a, F> {
    pub fn new(flash: &'a F, queue: &'a FlashQueue) -> Self {
        Self { flash, queue }
    }

    /// Execute jobs forever.
    pub async fn run(&self) {
        loop {
            let job = self.queue.jobs.receive().await;
            let result = self.execute(job).await;
            self.queue.done.send(result).await;
        }
    }

    async fn execute(&self, job: FlashJob) -> Result<(), ErrorCode> {
        match job {
            FlashJob::Erase { offset, len } => {
                let sector = self.flash.sector_size();
                if offset % sector != 0 || len % sector != 0 {
                    return Err(ErrorCode::INVAL);
                }
                log::debug!("erase {:#x}+{:#x}", offset, len);
                let mut at = offset;
                let end = offset.checked_add(len).ok_or(ErrorCode::SIZE)?;
                while at < end {
                    erase_unprotected(self.flash, at, sector)?;
                    at += sector;
                    yield_now().await;
                }
                Ok(())
            }
            FlashJob::Write { offset, data } => write_unprotected(self.flash, offset, &data),
        }
    }
}

/// Protocol-side handle on the flash worker.
pub struct FlashClient<'a> {
    queue: &'a FlashQueue,
    pending: Cell<usize>,
    error: Cell<Option<ErrorCode>>,
}

impl<'a> FlashClient<'a> {
    pub fn new(queue: &'a FlashQueue) -> Self {
        Self {
            queue,
            pending: Cell::new(0),
            error: Cell::new(None),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    async fn collect_one(&self) {
        let result = self.queue.done.receive().await;
        self.pending.set(self.pending.get() - 1);
        if let Err(e) = result {
            log::error!("flash job failed: {:?}", e);
            if self.error.get().is_none() {
                self.error.set(Some(e));
            }
        }
    }

    /// Wait for every outstanding job. The first failure since the last
    /// drain is returned.
    pub async fn drain(&self) -> Result<(), ErrorCode> {
        while self.pending.get() > 0 {
            self.collect_one().await;
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forget any failure that has not been reported yet.
    pub async fn reset(&self) {
        // Results still in flight are dropped along with the error.
        let _ = self.drain().await;
    }

    /// Erase `len` bytes at `offset` and wait for completion.
    pub async fn erase(&self, offset: u32, len: u32) -> Result<(), ErrorCode> {
        self.drain().await?;
        self.queue.jobs.send(FlashJob::Erase { offset, len }).await;
        self.pending.set(self.pending.get() + 1);
        self.drain().await
    }

    /// Queue a block for programming without waiting for it.
    ///
    /// When both slots are busy this waits for the oldest job. A failure of
    /// an earlier job is reported here or at the next [`Self::drain`].
    pub async fn submit_write(&self, offset: u32, data: &[u8]) -> Result<(), ErrorCode> {
        let data = Vec::from_slice(data).map_err(|_| ErrorCode::SIZE)?;
        if self.pending.get() >= FLASH_QUEUE_DEPTH {
            self.collect_one().await;
        }
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.queue.jobs.send(FlashJob::Write { offset, data }).await;
        self.pending.set(self.pending.get() + 1);
        Ok(())
    }

    /// Program a block and wait for completion.
    pub async fn write(&self, offset: u32, data: &[u8]) -> Result<(), ErrorCode> {
        self.submit_write(offset, data).await?;
        self.drain().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{run_with_worker, FakeFlash, SECTOR_SIZE};

    #[test]
    fn erase_runs_sector_by_sector() {
        let flash = FakeFlash::new();
        flash.load(0x2000, &[0u8; 0x3000]);
        let queue = FlashQueue::new();
        let result = run_with_worker(&flash, &queue, |client| async move {
            client.erase(0x2000, 0x3000).await
        });
        assert_eq!(result, Ok(()));
        assert_eq!(flash.erase_count(), 3);
        assert!(flash.peek(0x2000, 0x3000).iter().all(|&b| b == 0xFF));
        assert!(flash.is_write_protected());
    }

    #[test]
    fn misaligned_erase_fails() {
        let flash = FakeFlash::new();
        let queue = FlashQueue::new();
        let result = run_with_worker(&flash, &queue, |client| async move {
            client.erase(0x2000 + 1, SECTOR_SIZE).await
        });
        assert_eq!(result, Err(ErrorCode::INVAL));
    }

    #[test]
    fn queued_writes_all_land() {
        let flash = FakeFlash::new();
        let queue = FlashQueue::new();
        let result = run_with_worker(&flash, &queue, |client| async move {
            for i in 0..5u32 {
                client.submit_write(0x1000 * i, &[i as u8; 16]).await?;
                assert!(client.pending() <= FLASH_QUEUE_DEPTH);
            }
            client.drain().await
        });
        assert_eq!(result, Ok(()));
        for i in 0..5u32 {
            assert_eq!(flash.peek(0x1000 * i, 16), [i as u8; 16]);
        }
    }

    #[test]
    fn write_failure_surfaces_on_drain() {
        let flash = FakeFlash::new();
        flash.fail_writes_at(0x3000);
        let queue = FlashQueue::new();
        let result = run_with_worker(&flash, &queue, |client| async move {
            client.submit_write(0x3000, &[1; 4]).await?;
            client.drain().await
        });
        assert_eq!(result, Err(ErrorCode::FAIL));
        assert!(flash.is_write_protected());
    }

    #[test]
    fn oversized_block_is_refused() {
        let flash = FakeFlash::new();
        let queue = FlashQueue::new();
        let result = run_with_worker(&flash, &queue, |client| async move {
            client.submit_write(0, &[0u8; FLASH_JOB_LEN + 1]).await
        });
        assert_eq!(result, Err(ErrorCode::SIZE));
    }
}
