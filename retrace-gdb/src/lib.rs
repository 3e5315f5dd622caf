/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client side of a GDB-style remote serial protocol, as spoken by
//! emulator debug stubs.
//!
//! [`Session`] drives one stub connection: `$…#xx` framing with `+`/`-`
//! acks, one outstanding request at a time, chunk-sized memory access,
//! register and execution control commands, and a monitor channel for
//! stub-specific commands. The [`hex`] module holds the stateless codec
//! underneath.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
pub mod hex;
mod logger;
mod packet;
mod regs;
mod session;

pub use error::CommandError;
pub use error::Error;
pub use error::ProtocolError;
pub use hex::HexError;
pub use packet::checksum;
pub use packet::frame;
pub use packet::MAX_PAYLOAD;
pub use regs::I386CoreRegs;
pub use regs::CORE_REGS;
pub use session::RegWidth;
pub use session::Session;
