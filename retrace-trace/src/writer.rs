/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;

use bytes::BufMut;
use bytes::BytesMut;

use crate::error::Error;
use crate::format::MemoryDiff;
use crate::format::STEP_REGS;
use crate::format::TRACE_HEADER_SIZE;
use crate::format::TRACE_MAGIC;
use crate::format::TRACE_VERSION;
use crate::format::WORD_SIZE;

/// Streaming encoder for one capture run. The trace is written once,
/// front to back: header and baseline at construction, then one record
/// per step. Nothing is buffered across records, so an aborted capture
/// simply leaves a short artifact behind.
pub struct TraceWriter<W> {
    out: W,
    base_size: u32,
    steps: u32,
    buf: BytesMut,
}

impl<W: Write> TraceWriter<W> {
    /// Write the header and baseline image into `out`.
    pub fn new(mut out: W, baseline: &[u8]) -> Result<Self, Error> {
        if baseline.is_empty() || baseline.len() % WORD_SIZE != 0 {
            return Err(Error::UnalignedImage(baseline.len()));
        }

        let mut header = BytesMut::with_capacity(TRACE_HEADER_SIZE);
        header.put_slice(&TRACE_MAGIC);
        header.put_u32_le(TRACE_VERSION);
        header.put_u32_le(baseline.len() as u32);
        out.write_all(&header)?;
        out.write_all(baseline)?;

        Ok(TraceWriter {
            out,
            base_size: baseline.len() as u32,
            steps: 0,
            buf: BytesMut::new(),
        })
    }

    /// Append one step record. Diff addresses must lie inside the
    /// baseline window on word boundaries.
    pub fn write_step(
        &mut self,
        registers: &[u32; STEP_REGS],
        diffs: &[MemoryDiff],
    ) -> Result<(), Error> {
        self.buf.clear();
        for reg in registers {
            self.buf.put_u32_le(*reg);
        }
        self.buf.put_u32_le(diffs.len() as u32);
        for diff in diffs {
            // base_size is word-aligned, so an aligned address below it
            // leaves room for the whole word.
            if diff.address % WORD_SIZE as u32 != 0 || diff.address >= self.base_size {
                return Err(Error::DiffOutOfRange {
                    address: diff.address,
                    size: self.base_size as usize,
                });
            }
            self.buf.put_u32_le(diff.address);
            self.buf.put_u32_le(diff.value);
        }
        self.out.write_all(&self.buf)?;
        self.steps += 1;
        Ok(())
    }

    /// Step records written so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Flush and hand the sink back.
    pub fn finish(mut self) -> Result<W, Error> {
        self.out.flush()?;
        tracing::debug!(steps = self.steps, base_size = self.base_size, "trace complete");
        Ok(self.out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_then_baseline_then_records() {
        let baseline = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut writer = TraceWriter::new(Vec::new(), &baseline).unwrap();
        writer
            .write_step(
                &[0u32; STEP_REGS],
                &[MemoryDiff {
                    address: 4,
                    value: 0xaabbccdd,
                }],
            )
            .unwrap();
        assert_eq!(writer.steps(), 1);
        let out = writer.finish().unwrap();

        assert_eq!(&out[0..4], b"GDBR");
        assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(out[8..12].try_into().unwrap()), 8);
        assert_eq!(&out[12..20], &baseline);
        // one record: 64 register bytes, diff count, one diff
        assert_eq!(out.len(), 20 + 64 + 4 + 8);
        assert_eq!(u32::from_le_bytes(out[84..88].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(out[88..92].try_into().unwrap()), 4);
        assert_eq!(
            u32::from_le_bytes(out[92..96].try_into().unwrap()),
            0xaabbccdd
        );
    }

    #[test]
    fn rejects_unaligned_baseline() {
        assert!(matches!(
            TraceWriter::new(Vec::new(), &[0u8; 7]),
            Err(Error::UnalignedImage(7))
        ));
        assert!(matches!(
            TraceWriter::new(Vec::new(), &[]),
            Err(Error::UnalignedImage(0))
        ));
    }

    #[test]
    fn rejects_diffs_outside_the_window() {
        let mut writer = TraceWriter::new(Vec::new(), &[0u8; 8]).unwrap();
        let bad = MemoryDiff {
            address: 8,
            value: 0,
        };
        assert!(matches!(
            writer.write_step(&[0u32; STEP_REGS], &[bad]),
            Err(Error::DiffOutOfRange { .. })
        ));
    }
}
