/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use thiserror::Error;

/// Capture error. Session and trace failures propagate unmodified; any
/// of them is fatal to the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote session failure.
    #[error(transparent)]
    Gdb(#[from] retrace_gdb::Error),
    /// Trace encoding failure.
    #[error(transparent)]
    Trace(#[from] retrace_trace::Error),
    /// The configured memory window cannot be diffed in words.
    #[error("memory window of {0:#x} bytes is empty or not word-aligned")]
    UnalignedWindow(u32),
    /// The stub answered a memory read with no data.
    #[error("stub returned no data for memory read at {offset:#x}")]
    MemoryReadStalled {
        /// Window offset of the stalled read.
        offset: u32,
    },
}
