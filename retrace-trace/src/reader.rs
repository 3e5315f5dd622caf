/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::error::Error;
use crate::format::MemoryDiff;
use crate::format::Step;
use crate::format::DEFAULT_KEYFRAME_INTERVAL;
use crate::format::REGS_SIZE;
use crate::format::STEP_REGS;
use crate::format::TRACE_HEADER_SIZE;
use crate::format::TRACE_MAGIC;
use crate::format::TRACE_VERSION;
use crate::format::WORD_SIZE;

/// Byte offset and shape of one step record, noted during the initial
/// scan. Full records are decoded on demand.
struct StepIndex {
    offset: usize,
    diff_count: usize,
}

/// Random-access decoder for one trace file.
///
/// Construction validates the header and indexes every step record in a
/// single forward scan; no memory image beyond the baseline is
/// materialized until queried. [`TraceReader::get_memory`] replays
/// diffs from the nearest cached keyframe and caches a new keyframe
/// each time replay crosses an interval boundary for the first time,
/// which bounds replay work for any query to one interval and makes
/// nearby queries cheap once the surrounding keyframes exist.
///
/// The keyframe cache is private to the instance; separate readers over
/// the same bytes share nothing.
pub struct TraceReader {
    data: Vec<u8>,
    version: u32,
    base_size: usize,
    index: Vec<StepIndex>,
    keyframes: Vec<Vec<u8>>,
    interval: usize,
}

impl TraceReader {
    /// Decode `data` with the default keyframe interval.
    pub fn new(data: Vec<u8>) -> Result<Self, Error> {
        Self::with_interval(data, DEFAULT_KEYFRAME_INTERVAL)
    }

    /// Decode `data`, materializing a keyframe every `interval` steps
    /// during replay.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn with_interval(data: Vec<u8>, interval: usize) -> Result<Self, Error> {
        assert!(interval > 0, "keyframe interval must be positive");

        if data.len() < TRACE_HEADER_SIZE {
            return Err(Error::Truncated { offset: data.len() });
        }
        let magic = [data[0], data[1], data[2], data[3]];
        if magic != TRACE_MAGIC {
            return Err(Error::BadMagic { found: magic });
        }
        let version = read_u32_le(&data, 4);
        if version != TRACE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let base_size = read_u32_le(&data, 8) as usize;
        if base_size == 0 || base_size % WORD_SIZE != 0 {
            return Err(Error::UnalignedImage(base_size));
        }
        let base_end = TRACE_HEADER_SIZE + base_size;
        if data.len() < base_end {
            return Err(Error::Truncated { offset: data.len() });
        }

        let mut index = Vec::new();
        let mut offset = base_end;
        while offset < data.len() {
            let count_at = offset + REGS_SIZE;
            if count_at + WORD_SIZE > data.len() {
                return Err(Error::Truncated { offset });
            }
            let diff_count = read_u32_le(&data, count_at) as usize;
            let record_len = REGS_SIZE + WORD_SIZE + diff_count * 2 * WORD_SIZE;
            let end = offset
                .checked_add(record_len)
                .filter(|end| *end <= data.len())
                .ok_or(Error::Truncated { offset })?;
            index.push(StepIndex { offset, diff_count });
            offset = end;
        }

        let keyframes = vec![data[TRACE_HEADER_SIZE..base_end].to_vec()];

        Ok(TraceReader {
            data,
            version,
            base_size,
            index,
            keyframes,
            interval,
        })
    }

    /// Format revision the trace was written with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Size of the recorded memory window in bytes.
    pub fn base_size(&self) -> usize {
        self.base_size
    }

    /// Number of step records in the trace.
    pub fn step_count(&self) -> usize {
        self.index.len()
    }

    /// Decode the registers and diffs of step `index`.
    pub fn get_step(&self, index: usize) -> Result<Step, Error> {
        let entry = self.index.get(index).ok_or(Error::StepOutOfBounds {
            index,
            count: self.index.len(),
        })?;

        let mut registers = [0u32; STEP_REGS];
        for (i, reg) in registers.iter_mut().enumerate() {
            *reg = read_u32_le(&self.data, entry.offset + i * WORD_SIZE);
        }

        let mut diffs = Vec::with_capacity(entry.diff_count);
        let diffs_at = entry.offset + REGS_SIZE + WORD_SIZE;
        for i in 0..entry.diff_count {
            let at = diffs_at + i * 2 * WORD_SIZE;
            diffs.push(MemoryDiff {
                address: read_u32_le(&self.data, at),
                value: read_u32_le(&self.data, at + WORD_SIZE),
            });
        }

        Ok(Step { registers, diffs })
    }

    /// Reconstruct the full memory image as of step `index`.
    ///
    /// Starts from the nearest already-cached keyframe at or below the
    /// step, replays every step's diffs up to and including `index`,
    /// and caches a copy of the image at each interval boundary crossed
    /// for the first time. Cached keyframes are never mutated.
    pub fn get_memory(&mut self, index: usize) -> Result<Vec<u8>, Error> {
        if index >= self.index.len() {
            return Err(Error::StepOutOfBounds {
                index,
                count: self.index.len(),
            });
        }

        let nearest = (index / self.interval).min(self.keyframes.len() - 1);
        let mut image = self.keyframes[nearest].clone();

        for i in (nearest * self.interval)..=index {
            let step = self.get_step(i)?;
            for diff in &step.diffs {
                diff.apply(&mut image)?;
            }
            if i % self.interval == 0 && i / self.interval == self.keyframes.len() {
                tracing::trace!(step = i, "materialized keyframe");
                self.keyframes.push(image.clone());
            }
        }

        Ok(image)
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::writer::TraceWriter;

    /// Capture of a tiny synthetic target: each step pokes one word, so
    /// step `i` leaves `memory[4*(i % words)] == i + 1`.
    fn synthetic_trace(words: usize, steps: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
        let baseline = vec![0u8; words * WORD_SIZE];
        let mut writer = TraceWriter::new(Vec::new(), &baseline).unwrap();

        let mut images = Vec::with_capacity(steps);
        let mut snapshot = baseline;
        for step in 0..steps {
            let mut next = snapshot.clone();
            let at = (step % words) * WORD_SIZE;
            next[at..at + WORD_SIZE].copy_from_slice(&(step as u32 + 1).to_le_bytes());

            let mut registers = [0u32; STEP_REGS];
            registers[8] = step as u32; // eip
            let diffs = crate::format::diff_words(&snapshot, &next);
            writer.write_step(&registers, &diffs).unwrap();

            images.push(next.clone());
            snapshot = next;
        }

        (writer.finish().unwrap(), images)
    }

    #[test]
    fn round_trip_reproduces_every_image() {
        let (data, images) = synthetic_trace(8, 25);
        let mut reader = TraceReader::with_interval(data, 10).unwrap();
        assert_eq!(reader.step_count(), 25);
        assert_eq!(reader.base_size(), 32);
        for i in 0..reader.step_count() {
            assert_eq!(reader.get_memory(i).unwrap(), images[i], "step {}", i);
        }
    }

    #[test]
    fn baseline_only_step_replays_to_baseline() {
        let baseline = vec![9u8; 16];
        let mut writer = TraceWriter::new(Vec::new(), &baseline).unwrap();
        writer.write_step(&[0u32; STEP_REGS], &[]).unwrap();
        let mut reader = TraceReader::new(writer.finish().unwrap()).unwrap();
        assert_eq!(reader.step_count(), 1);
        let step = reader.get_step(0).unwrap();
        assert!(step.diffs.is_empty());
        assert_eq!(reader.get_memory(0).unwrap(), baseline);
    }

    #[test]
    fn cold_and_warm_queries_agree() {
        let (data, _) = synthetic_trace(4, 37);
        let mut cold = TraceReader::with_interval(data.clone(), 10).unwrap();
        let cold_at_36 = cold.get_memory(36).unwrap();

        let mut warm = TraceReader::with_interval(data, 10).unwrap();
        // walk forward so every keyframe up to 30 is cached first
        for i in 0..=36 {
            warm.get_memory(i).unwrap();
        }
        assert_eq!(warm.get_memory(36).unwrap(), cold_at_36);
        // and a backwards scrub lands on cached keyframes
        assert_eq!(warm.get_memory(12).unwrap(), cold.get_memory(12).unwrap());
    }

    #[test]
    fn registers_come_back_per_step() {
        let (data, _) = synthetic_trace(4, 5);
        let reader = TraceReader::new(data).unwrap();
        for i in 0..5 {
            assert_eq!(reader.get_step(i).unwrap().registers[8], i as u32);
        }
    }

    #[test]
    fn step_index_is_bounds_checked() {
        let (data, _) = synthetic_trace(4, 3);
        let mut reader = TraceReader::new(data).unwrap();
        assert!(matches!(
            reader.get_step(3),
            Err(Error::StepOutOfBounds { index: 3, count: 3 })
        ));
        assert!(matches!(
            reader.get_memory(usize::MAX),
            Err(Error::StepOutOfBounds { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let (mut data, _) = synthetic_trace(4, 1);
        data[0] = b'X';
        assert!(matches!(
            TraceReader::new(data),
            Err(Error::BadMagic { found }) if &found == b"XDBR"
        ));
    }

    #[test]
    fn legacy_versions_are_rejected() {
        let (mut data, _) = synthetic_trace(4, 1);
        data[4..8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            TraceReader::new(data),
            Err(Error::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn truncated_records_are_rejected() {
        let (data, _) = synthetic_trace(4, 2);
        for cut in [2, 14, data.len() - 1] {
            let short = data[..cut].to_vec();
            assert!(matches!(
                TraceReader::new(short),
                Err(Error::Truncated { .. })
            ));
        }
    }
}
