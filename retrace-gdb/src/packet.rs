/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Framing for the remote serial protocol: `$<payload>#<checksum>`.

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::hex::decode_hex;
use crate::hex::encode_hex_byte;
use crate::logger::PacketDump;

/// Largest command payload the stub accepts in one packet. The stub's
/// receive buffer is 2048 bytes; the rest is framing overhead.
pub const MAX_PAYLOAD: usize = 2048 - 5;

/// Payload checksum: byte sum modulo 256.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrap a payload as a wire frame `$payload#xx`.
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_u8(b'$');
    buf.put_slice(payload);
    buf.put_u8(b'#');
    buf.put_slice(&encode_hex_byte(checksum(payload)));
    buf.freeze()
}

/// Index of `#` when a complete frame (both trailing checksum digits
/// included) sits at the head of `buf`.
pub(crate) fn frame_end(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'$') {
        return None;
    }
    let hash = buf.iter().position(|b| *b == b'#')?;
    if buf.len() < hash + 3 {
        return None;
    }
    Some(hash)
}

/// Split a complete frame off the head of `buf` and return its body.
/// The trailing checksum digits are consumed but not verified against
/// the body; the stub is trusted not to corrupt its own replies.
pub(crate) fn take_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let hash = frame_end(buf)?;
    let mut pkt = buf.split_to(hash + 3);
    let checksum = decode_hex::<u8>(&pkt[hash + 1..]).unwrap_or(0);
    let body = pkt.split_to(hash).split_off(1);
    tracing::trace!("{:?}", PacketDump::incoming(&body, checksum));
    Some(body.freeze())
}

/// Whether a frame body is unsolicited stub console output (`O` followed
/// by hex text). A plain `OK` reply is not: its second byte is not a hex
/// digit.
pub(crate) fn is_console_output(body: &[u8]) -> bool {
    body.len() > 1 && body[0] == b'O' && body[1..].iter().all(|b| b.is_ascii_hexdigit())
}
