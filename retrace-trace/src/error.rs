/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use thiserror::Error;

/// Trace encode/decode error.
#[derive(Debug, Error)]
pub enum Error {
    /// The file does not start with the trace magic.
    #[error("bad magic {found:?}, not a trace file")]
    BadMagic {
        /// First four bytes of the file.
        found: [u8; 4],
    },
    /// The trace was written by an unsupported format revision. Earlier
    /// revisions (byte-addressed diffs, sentinel terminators, side
    /// tables) are rejected here rather than guessed at.
    #[error("unsupported trace version {0}")]
    UnsupportedVersion(u32),
    /// The file ends in the middle of a header, image or step record.
    #[error("trace truncated at byte {offset}")]
    Truncated {
        /// Byte offset past which data is missing.
        offset: usize,
    },
    /// A step index outside `[0, step_count)`.
    #[error("step {index} out of bounds, trace has {count} steps")]
    StepOutOfBounds {
        /// Requested step.
        index: usize,
        /// Steps in the trace.
        count: usize,
    },
    /// A diff record points outside the memory image, or at an
    /// unaligned address.
    #[error("diff address {address:#x} invalid for an image of {size} bytes")]
    DiffOutOfRange {
        /// Offending word address.
        address: u32,
        /// Image size in bytes.
        size: usize,
    },
    /// A memory image whose size is not a whole number of words.
    #[error("memory image of {0} bytes is not word-aligned")]
    UnalignedImage(usize),
    /// Writing the trace artifact failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
