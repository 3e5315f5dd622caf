/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Capture orchestration: arm a stub-side interrupt trap, wait for the
//! targeted service call, then single-step the target while snapshotting
//! registers and a memory window into a trace file.

use std::cmp;
use std::io::Write;
use std::time::Duration;

use retrace_gdb::Session;
use retrace_gdb::MAX_PAYLOAD;
use retrace_trace::diff_words;
use retrace_trace::TraceWriter;
use retrace_trace::WORD_SIZE;

use crate::error::Error;

/// Stop notification the armed trap raises (SIGTRAP).
const TRAP_STOP: &[u8] = b"S05";

/// The stub installs interrupt hooks from its own emulation loop; give
/// it a beat before resuming.
const HOOK_SETTLE: Duration = Duration::from_millis(200);

/// Parameters of one capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Bytes of target memory snapshotted each step, starting at
    /// address 0. Must be a non-zero multiple of the word size.
    pub memory_size: u32,
    /// Interrupt vector the trap is armed on.
    pub interrupt: u8,
    /// Service selector (AH at the interrupt) that starts the capture.
    pub service: u8,
}

impl Default for CaptureConfig {
    /// The classic capture point: DOS `INT 21h`, `AH=3Dh` (open file),
    /// over the first megabyte of the address space.
    fn default() -> Self {
        CaptureConfig {
            memory_size: 0x10_0000,
            interrupt: 0x21,
            service: 0x3d,
        }
    }
}

/// Drives one capture run over an established session. The session is
/// consumed for the lifetime of the recorder; [`Recorder::shutdown`]
/// releases the target and tears the connection down.
pub struct Recorder {
    session: Session,
    config: CaptureConfig,
}

impl Recorder {
    /// Wrap an established session.
    pub fn new(session: Session, config: CaptureConfig) -> Self {
        Recorder { session, config }
    }

    /// Run the capture: wait for the configured trap, snapshot the
    /// baseline, then record `steps` single-steps into `out`.
    ///
    /// Any session failure aborts the run; whatever was already written
    /// to `out` is not a readable trace and is the caller's to discard.
    pub async fn record<W: Write>(&mut self, steps: u32, out: W) -> Result<(), Error> {
        if self.config.memory_size == 0 || self.config.memory_size % WORD_SIZE as u32 != 0 {
            return Err(Error::UnalignedWindow(self.config.memory_size));
        }

        self.arm().await?;
        self.wait_for_trap().await?;
        tracing::info!(
            window = self.config.memory_size,
            "trap hit, reading baseline"
        );

        let baseline = self.read_window().await?;
        let mut writer = TraceWriter::new(out, &baseline)?;

        let mut snapshot = baseline;
        for step in 0..steps {
            let regs = self.session.read_registers().await?;
            let memory = self.read_window().await?;
            let diffs = diff_words(&snapshot, &memory);
            writer.write_step(&regs.to_words(), &diffs)?;
            tracing::debug!(step, diffs = diffs.len(), "step recorded");
            snapshot = memory;
            self.session.step().await?;
        }

        writer.finish()?;
        tracing::info!(steps, "capture complete");
        Ok(())
    }

    /// Release the target: disarm the trap hook, resume execution and
    /// drop the connection. Safe to call at any point, any number of
    /// times; every part is best-effort.
    pub async fn shutdown(&mut self) {
        let _ = self
            .session
            .monitor(&format!("int_bp {:#x} 0", self.config.interrupt))
            .await;
        self.session.disconnect().await;
    }

    /// Arm the interrupt trap and resume the target.
    async fn arm(&self) -> Result<(), Error> {
        self.session
            .monitor(&format!("int_bp {:#x} 1", self.config.interrupt))
            .await?;
        tokio::time::sleep(HOOK_SETTLE).await;
        self.session.resume().await?;
        Ok(())
    }

    /// Poll stop notifications until the armed trap fires for the
    /// configured service code. Other stops resume the target; other
    /// notifications are skipped.
    async fn wait_for_trap(&self) -> Result<(), Error> {
        loop {
            let stop = self.session.recv_stop().await?;
            if stop.as_ref() != TRAP_STOP {
                continue;
            }
            let regs = self.session.read_registers().await?;
            if regs.ah() == self.config.service {
                return Ok(());
            }
            self.session.resume().await?;
        }
    }

    /// Read the whole memory window, splitting the request into
    /// packet-sized chunks and concatenating the replies.
    async fn read_window(&self) -> Result<Vec<u8>, Error> {
        let size = self.config.memory_size;
        let mut buffer = Vec::with_capacity(size as usize);
        let mut offset = 0u32;
        while offset < size {
            let length = cmp::min((size - offset) as usize, MAX_PAYLOAD) as u32;
            let chunk = self.session.read_memory(offset, length).await?;
            if chunk.is_empty() {
                return Err(Error::MemoryReadStalled { offset });
            }
            buffer.extend_from_slice(&chunk);
            offset += chunk.len() as u32;
        }
        Ok(buffer)
    }
}
