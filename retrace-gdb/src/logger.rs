/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::ascii;
use std::fmt;
use std::fmt::Debug;

enum Direction {
    ToStub,
    FromStub,
}

const MAX_BYTES_DISPLAY: usize = 64;

/// Printable dump of one wire frame body, for trace-level logging.
pub struct PacketDump<'a> {
    direction: Direction,
    body: &'a [u8],
    checksum: u8,
}

impl<'a> PacketDump<'a> {
    pub fn incoming<T: 'a + AsRef<[u8]> + ?Sized>(body: &'a T, checksum: u8) -> Self {
        Self {
            direction: Direction::FromStub,
            body: body.as_ref(),
            checksum,
        }
    }

    pub fn outgoing<T: 'a + AsRef<[u8]> + ?Sized>(body: &'a T, checksum: u8) -> Self {
        Self {
            direction: Direction::ToStub,
            body: body.as_ref(),
            checksum,
        }
    }
}

impl<'a> Debug for PacketDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.direction {
            Direction::FromStub => write!(f, "<-- ")?,
            Direction::ToStub => write!(f, "--> ")?,
        }

        write!(f, "b\"")?;
        for &b in self.body.iter().take(MAX_BYTES_DISPLAY) {
            write!(f, "{}", ascii::escape_default(b))?;
        }
        if self.body.len() > MAX_BYTES_DISPLAY {
            write!(f, "[{} bytes omitted]", self.body.len() - MAX_BYTES_DISPLAY)?;
        }
        write!(f, "#{:02x}\"", self.checksum)
    }
}
