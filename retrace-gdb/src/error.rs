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

use crate::hex::HexError;

/// Ack and framing violations in the stub's byte stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The stub rejected our frame with `-`.
    #[error("negative ack from stub")]
    Nack,
    /// An ack was owed but something else arrived first.
    #[error("no ack from stub, got {0:#04x}")]
    NoAck(u8),
    /// A reply started with a byte that opens no frame.
    #[error("invalid response from stub, got {0:#04x}")]
    InvalidResponse(u8),
}

/// Reply-shape violations for commands expecting a fixed reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A command requiring `OK` got something else.
    #[error("expected OK reply to {command}, got {body:?}")]
    NotOk {
        /// Command that was sent.
        command: &'static str,
        /// Reply body, lossily decoded.
        body: String,
    },
    /// A single-step reply carried no stop-reason marker.
    #[error("reply {body:?} is not a stop reason")]
    NotAStopReason {
        /// Reply body, lossily decoded.
        body: String,
    },
    /// A register dump did not decode into the full register set.
    #[error("malformed register dump")]
    MalformedRegisters,
}

/// Session error.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening the connection to the stub failed.
    #[error("failed to connect to the stub")]
    Connect {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The stub closed the connection.
    #[error("connection closed by the stub")]
    ConnectionClosed,
    /// The stub greeted us with something other than `+`.
    #[error("handshake expected ack, got {0:#04x}")]
    HandshakeAck(u8),
    /// Reading from the stub failed.
    #[error("read from the stub failed")]
    Read {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Writing to the stub failed.
    #[error("write to the stub failed")]
    Write {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// A request was issued while another was still outstanding.
    #[error("a request is already outstanding on this session")]
    SessionBusy,
    /// The session was torn down while the operation was pending.
    #[error("session is disconnected")]
    Disconnected,
    /// Ack or framing violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Reply-shape violation.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Malformed hex in a reply body.
    #[error(transparent)]
    Hex(#[from] HexError),
}
