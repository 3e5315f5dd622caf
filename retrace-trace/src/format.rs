/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! On-disk trace layout (all fields little-endian):
//!
//! | offset | field          | size                          |
//! |--------|----------------|-------------------------------|
//! | 0      | magic `GDBR`   | 4                             |
//! | 4      | version        | 4                             |
//! | 8      | baseSize       | 4                             |
//! | 12     | baseline image | baseSize                      |
//! | …      | step records   | 64 + 4 + diffCount × 8 each   |
//!
//! A step record is the 16 register words captured before the step, a
//! diff count, and one `(address, value)` word overwrite per changed
//! word relative to the previous step's image.

use crate::error::Error;

/// First four bytes of every trace file.
pub const TRACE_MAGIC: [u8; 4] = *b"GDBR";

/// Current format revision: word-granularity diffs, explicit diff
/// counts. Older revisions are not readable.
pub const TRACE_VERSION: u32 = 1;

/// Bytes before the baseline image.
pub const TRACE_HEADER_SIZE: usize = 12;

/// Diff granularity in bytes.
pub const WORD_SIZE: usize = 4;

/// Register words in every step record.
pub const STEP_REGS: usize = 16;

/// Byte size of the register block of a step record.
pub const REGS_SIZE: usize = STEP_REGS * WORD_SIZE;

/// Steps between materialized memory images during replay.
pub const DEFAULT_KEYFRAME_INTERVAL: usize = 300;

/// One word overwrite: `value` replaces the four bytes at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDiff {
    /// Word-aligned byte offset into the memory image.
    pub address: u32,
    /// Little-endian replacement word.
    pub value: u32,
}

impl MemoryDiff {
    /// Apply the overwrite to `image`.
    pub fn apply(&self, image: &mut [u8]) -> Result<(), Error> {
        let address = self.address as usize;
        if address % WORD_SIZE != 0 || address + WORD_SIZE > image.len() {
            return Err(Error::DiffOutOfRange {
                address: self.address,
                size: image.len(),
            });
        }
        image[address..address + WORD_SIZE].copy_from_slice(&self.value.to_le_bytes());
        Ok(())
    }
}

/// One decoded step record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Register words in dump order, captured before the step ran.
    pub registers: [u32; STEP_REGS],
    /// Word overwrites relative to the previous step's image.
    pub diffs: Vec<MemoryDiff>,
}

/// Word-level diff of two equally sized memory images. A word differs
/// iff any of its four bytes differ; there are no partial diffs.
pub fn diff_words(prev: &[u8], next: &[u8]) -> Vec<MemoryDiff> {
    assert_eq!(prev.len(), next.len(), "snapshot sizes must match");

    prev.chunks_exact(WORD_SIZE)
        .zip(next.chunks_exact(WORD_SIZE))
        .enumerate()
        .filter(|(_, (old, new))| old != new)
        .map(|(i, (_, new))| MemoryDiff {
            address: (i * WORD_SIZE) as u32,
            value: u32::from_le_bytes([new[0], new[1], new[2], new[3]]),
        })
        .collect()
}
