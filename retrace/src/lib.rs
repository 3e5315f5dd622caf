/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Execution trace capture over a remote debug stub.
//!
//! A capture run drives a stub-controlled target one instruction at a
//! time and persists its register and memory state per step as a
//! compact diff-compressed trace, replayable at any step:
//!
//! - [`Session`] (from `retrace-gdb`) speaks the remote serial protocol
//!   to the stub;
//! - [`Recorder`] orchestrates the run: arm a trap, wait for the
//!   targeted service call, snapshot, single-step, repeat;
//! - [`TraceReader`] (from `retrace-trace`) decodes the artifact and
//!   reconstructs memory at any recorded step via keyframed replay.
//!
//! The capture loop is strictly sequential: each step's snapshot
//! depends on the previous step having completed, and the wire protocol
//! allows one outstanding request at a time anyway.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod recorder;

pub use error::Error;
pub use recorder::CaptureConfig;
pub use recorder::Recorder;

pub use retrace_gdb::CommandError;
pub use retrace_gdb::HexError;
pub use retrace_gdb::I386CoreRegs;
pub use retrace_gdb::ProtocolError;
pub use retrace_gdb::RegWidth;
pub use retrace_gdb::Session;
pub use retrace_gdb::CORE_REGS;
pub use retrace_gdb::MAX_PAYLOAD;

pub use retrace_trace::MemoryDiff;
pub use retrace_trace::Step;
pub use retrace_trace::TraceReader;
pub use retrace_trace::TraceWriter;
pub use retrace_trace::DEFAULT_KEYFRAME_INTERVAL;
