/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Binary single-step trace container: a baseline memory image followed
//! by per-step register dumps and word-granularity memory diffs.
//!
//! [`TraceWriter`] streams a capture run out; [`TraceReader`] answers
//! point queries (`get_step`) and reconstructs full memory at any step
//! (`get_memory`) by replaying diffs from cached keyframes. The two
//! never share state: a trace file is written once and read-only
//! afterwards.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod format;
mod reader;
mod writer;

pub use error::Error;
pub use format::diff_words;
pub use format::MemoryDiff;
pub use format::Step;
pub use format::DEFAULT_KEYFRAME_INTERVAL;
pub use format::REGS_SIZE;
pub use format::STEP_REGS;
pub use format::TRACE_HEADER_SIZE;
pub use format::TRACE_MAGIC;
pub use format::TRACE_VERSION;
pub use format::WORD_SIZE;
pub use reader::TraceReader;
pub use writer::TraceWriter;
