/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client session over a single connection to a remote debug stub.
//!
//! The wire protocol is half-duplex: the session holds one pending-reply
//! slot and rejects a second request while one is outstanding. A
//! dedicated read task accumulates stream bytes and resolves the pending
//! slot when a complete frame arrives, acking every received frame and
//! dropping unsolicited console-output frames on the way.
//!
//! There are no per-operation timeouts: a stub that never replies blocks
//! the pending operation until [`Session::disconnect`] is called.

use std::cmp;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::CommandError;
use crate::error::Error;
use crate::error::ProtocolError;
use crate::hex::decode_hex_buf;
use crate::hex::decode_hex_u32_le;
use crate::hex::encode_hex;
use crate::hex::encode_hex_u32_be;
use crate::hex::encode_hex_u32_le;
use crate::logger::PacketDump;
use crate::packet::checksum;
use crate::packet::frame;
use crate::packet::frame_end;
use crate::packet::is_console_output;
use crate::packet::take_frame;
use crate::regs::I386CoreRegs;
use crate::regs::CORE_REGS;

type BoxReader = Box<dyn AsyncRead + Send + Unpin + 'static>;
type BoxWriter = Box<dyn AsyncWrite + Send + Sync + Unpin + 'static>;

const RX_BUFFER_CAPACITY: usize = 0x8000;

/// Width of a targeted register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWidth {
    /// 8-bit write.
    U8,
    /// 32-bit write.
    U32,
}

struct Pending {
    reply_tx: oneshot::Sender<Result<Bytes, Error>>,
    /// The stub still owes a `+` for the command this reply answers.
    ack_owed: bool,
}

/// Client session over one stub connection.
pub struct Session {
    writer: Arc<Mutex<BoxWriter>>,
    pending_tx: mpsc::Sender<Pending>,
    /// Held for the duration of one request; `try_lock` failure is the
    /// session-busy rejection.
    in_flight: Mutex<()>,
    read_task: JoinHandle<()>,
    connected: AtomicBool,
}

impl Session {
    /// Connect to a stub listening at `addr` and wait for its initial
    /// single-byte ack.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| Error::Connect { source })?;
        let (reader, writer) = stream.into_split();
        Self::from_transport(Box::new(reader), Box::new(writer)).await
    }

    /// Build a session over an already-open transport. The stub must
    /// greet with its single-byte `+` ack before anything else.
    pub async fn from_transport(mut reader: BoxReader, writer: BoxWriter) -> Result<Self, Error> {
        let mut ack = [0u8; 1];
        let n = reader
            .read(&mut ack)
            .await
            .map_err(|source| Error::Read { source })?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        if ack[0] != b'+' {
            return Err(Error::HandshakeAck(ack[0]));
        }
        tracing::debug!("stub handshake complete");

        let writer = Arc::new(Mutex::new(writer));
        let (pending_tx, pending_rx) = mpsc::channel(1);
        let read_task = tokio::task::spawn(read_loop(reader, Arc::clone(&writer), pending_rx));

        Ok(Session {
            writer,
            pending_tx,
            in_flight: Mutex::new(()),
            read_task,
            connected: AtomicBool::new(true),
        })
    }

    /// Run a stub-side monitor command. The stub must answer `OK`.
    pub async fn monitor(&self, cmd: &str) -> Result<(), Error> {
        let payload = format!("qRcmd,{}", encode_hex(cmd.as_bytes()));
        let body = self.transact(payload.as_bytes()).await?;
        expect_ok("qRcmd", &body)?;
        Ok(())
    }

    /// Query why the target last stopped (`?`). Returns the raw reply
    /// body.
    pub async fn query_stop_reason(&self) -> Result<Bytes, Error> {
        self.transact(b"?").await
    }

    /// Read the full core register set (`g`).
    pub async fn read_registers(&self) -> Result<I386CoreRegs, Error> {
        let body = self.transact(b"g").await?;
        // The stub may append registers beyond the core set; only the
        // first 16 words are ours.
        let core = &body[..cmp::min(body.len(), CORE_REGS * 8)];
        let dump = decode_hex_buf(core)?;
        Ok(I386CoreRegs::from_wire(&dump)?)
    }

    /// Read a single register (`p`). 2-digit replies decode as one
    /// byte, full-width replies as one little-endian word.
    pub async fn read_register(&self, index: u8) -> Result<u32, Error> {
        let payload = format!("p{}", encode_hex(&[index]));
        let body = self.transact(payload.as_bytes()).await?;
        if body.len() == 2 {
            Ok(decode_hex_buf(&body)?[0] as u32)
        } else {
            Ok(decode_hex_u32_le(&body)?)
        }
    }

    /// Write a single register (`P`). The stub must answer `OK`.
    pub async fn write_register(&self, index: u8, value: u32, width: RegWidth) -> Result<(), Error> {
        let value = match width {
            RegWidth::U32 => encode_hex_u32_le(value),
            RegWidth::U8 => encode_hex(&[value as u8]),
        };
        let payload = format!("P{}={}", encode_hex(&[index]), value);
        let body = self.transact(payload.as_bytes()).await?;
        expect_ok("P", &body)?;
        Ok(())
    }

    /// Resume execution (`c`). The stub replies only with a later stop
    /// notification; pair with [`Session::recv_stop`].
    pub async fn resume(&self) -> Result<(), Error> {
        let _turn = self.in_flight.try_lock().map_err(|_| Error::SessionBusy)?;
        self.send_frame(b"c").await
    }

    /// Await the next stop notification. The stub still owes the ack
    /// for the resume command that preceded it.
    pub async fn recv_stop(&self) -> Result<Bytes, Error> {
        let _turn = self.in_flight.try_lock().map_err(|_| Error::SessionBusy)?;
        let reply_rx = self.install_pending(true).await?;
        reply_rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Execute one instruction (`s`). The reply must carry a stop-reason
    /// marker (`S` or `T`) and is returned for inspection.
    pub async fn step(&self) -> Result<Bytes, Error> {
        let body = self.transact(b"s").await?;
        match body.first() {
            Some(b'S') | Some(b'T') => Ok(body),
            _ => Err(CommandError::NotAStopReason {
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into()),
        }
    }

    /// Read `length` bytes of target memory at `address` (`m`) in one
    /// packet exchange. Requests larger than the stub's packet payload
    /// ceiling must be split by the caller.
    pub async fn read_memory(&self, address: u32, length: u32) -> Result<Vec<u8>, Error> {
        let payload = format!(
            "m {},{}",
            encode_hex_u32_be(address),
            encode_hex_u32_be(length)
        );
        let body = self.transact(payload.as_bytes()).await?;
        Ok(decode_hex_buf(&body)?)
    }

    /// Write `data` to target memory at `address` (`M`) in one packet
    /// exchange. The stub must answer `OK`.
    pub async fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), Error> {
        let payload = format!(
            "M {},{}:{}",
            encode_hex_u32_be(address),
            encode_hex_u32_be(data.len() as u32),
            encode_hex(data)
        );
        let body = self.transact(payload.as_bytes()).await?;
        expect_ok("M", &body)?;
        Ok(())
    }

    /// Tear the session down: best-effort resume so the target keeps
    /// running, fail any pending reply, close the transport. Calling it
    /// again is a no-op.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        // The stub may already be gone; nothing below is load-bearing.
        let pkt = frame(b"c");
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(&pkt).await;
        let _ = writer.shutdown().await;
        drop(writer);

        // Dropping the read task drops the pending slot, resolving any
        // in-flight reply future with `Disconnected`.
        self.read_task.abort();
        tracing::debug!("session disconnected");
    }

    /// Send `payload` as a frame and await the framed reply body.
    async fn transact(&self, payload: &[u8]) -> Result<Bytes, Error> {
        let _turn = self.in_flight.try_lock().map_err(|_| Error::SessionBusy)?;
        let reply_rx = self.install_pending(true).await?;
        self.send_frame(payload).await?;
        reply_rx.await.map_err(|_| Error::Disconnected)?
    }

    async fn install_pending(
        &self,
        ack_owed: bool,
    ) -> Result<oneshot::Receiver<Result<Bytes, Error>>, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_tx
            .send(Pending { reply_tx, ack_owed })
            .await
            .map_err(|_| Error::Disconnected)?;
        Ok(reply_rx)
    }

    async fn send_frame(&self, payload: &[u8]) -> Result<(), Error> {
        tracing::trace!("{:?}", PacketDump::outgoing(payload, checksum(payload)));
        let pkt = frame(payload);
        self.writer
            .lock()
            .await
            .write_all(&pkt)
            .await
            .map_err(|source| Error::Write { source })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

fn expect_ok(command: &'static str, body: &[u8]) -> Result<(), CommandError> {
    if body == b"OK" {
        Ok(())
    } else {
        Err(CommandError::NotOk {
            command,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// Serve pending replies one at a time until the session goes away.
async fn read_loop(
    mut reader: BoxReader,
    writer: Arc<Mutex<BoxWriter>>,
    mut pending_rx: mpsc::Receiver<Pending>,
) {
    let mut buf = BytesMut::with_capacity(RX_BUFFER_CAPACITY);
    while let Some(pending) = pending_rx.recv().await {
        let reply = serve_pending(&mut reader, &writer, &mut buf, pending.ack_owed).await;
        let _ = pending.reply_tx.send(reply);
    }
}

async fn serve_pending(
    reader: &mut BoxReader,
    writer: &Arc<Mutex<BoxWriter>>,
    buf: &mut BytesMut,
    mut ack_owed: bool,
) -> Result<Bytes, Error> {
    loop {
        // Unsolicited console-output frames may arrive at any point,
        // even before the ack we are owed. Ack and drop them.
        if let Some(body) = take_console_frame(buf) {
            send_ack(writer).await?;
            if let Ok(text) = decode_hex_buf(&body[1..]) {
                tracing::debug!("stub console: {}", String::from_utf8_lossy(&text).trim_end());
            }
            continue;
        }

        if !buf.is_empty() {
            if ack_owed {
                match buf[0] {
                    b'+' => {
                        buf.advance(1);
                        ack_owed = false;
                        continue;
                    }
                    b'-' => return Err(ProtocolError::Nack.into()),
                    other => return Err(ProtocolError::NoAck(other).into()),
                }
            }
            if buf[0] != b'$' {
                return Err(ProtocolError::InvalidResponse(buf[0]).into());
            }
            if let Some(body) = take_frame(buf) {
                send_ack(writer).await?;
                return Ok(body);
            }
        }

        let n = reader
            .read_buf(buf)
            .await
            .map_err(|source| Error::Read { source })?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

/// Split a complete console-output frame off the head of `buf`, if one
/// is there.
fn take_console_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let hash = frame_end(buf)?;
    if !is_console_output(&buf[1..hash]) {
        return None;
    }
    take_frame(buf)
}

async fn send_ack(writer: &Arc<Mutex<BoxWriter>>) -> Result<(), Error> {
    writer
        .lock()
        .await
        .write_all(b"+")
        .await
        .map_err(|source| Error::Write { source })
}

#[cfg(test)]
mod test {
    use super::*;

    use tokio::io::AsyncWriteExt;
    use tokio::io::DuplexStream;

    /// Split our end of a duplex pipe into the session's transport
    /// halves; the other end plays the stub.
    async fn pipe() -> (Session, DuplexStream) {
        let (client, mut stub) = tokio::io::duplex(0x4000);
        stub.write_all(b"+").await.unwrap();
        let (reader, writer) = tokio::io::split(client);
        let session = Session::from_transport(Box::new(reader), Box::new(writer))
            .await
            .unwrap();
        (session, stub)
    }

    /// Drain stub-bound bytes until `stop` is seen, then push `reply`.
    async fn stub_reply(stub: &mut DuplexStream, stop: u8, reply: &[u8]) {
        let mut byte = [0u8; 1];
        loop {
            stub.read_exact(&mut byte).await.unwrap();
            if byte[0] == stop {
                break;
            }
        }
        // skip the two checksum digits of the request
        if stop == b'#' {
            let mut digits = [0u8; 2];
            stub.read_exact(&mut digits).await.unwrap();
        }
        stub.write_all(reply).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_requires_plus() {
        let (client, mut stub) = tokio::io::duplex(64);
        stub.write_all(b"-").await.unwrap();
        let (reader, writer) = tokio::io::split(client);
        let err = Session::from_transport(Box::new(reader), Box::new(writer))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::HandshakeAck(b'-')));
    }

    #[tokio::test]
    async fn handshake_fails_on_close() {
        let (client, stub) = tokio::io::duplex(64);
        drop(stub);
        let (reader, writer) = tokio::io::split(client);
        let err = Session::from_transport(Box::new(reader), Box::new(writer))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn monitor_requires_ok() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"+$OK#9a").await;
            stub_reply(&mut stub, b'#', b"+$E01#a6").await;
            stub
        });
        session.monitor("int_bp 0x21 1").await.unwrap();
        let err = session.monitor("bogus").await.err().unwrap();
        assert!(matches!(
            err,
            Error::Command(CommandError::NotOk { command: "qRcmd", .. })
        ));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn read_registers_decodes_dump() {
        let (session, mut stub) = pipe().await;
        let mut dump = String::new();
        for i in 0..CORE_REGS as u32 {
            dump.push_str(&encode_hex_u32_le(i + 1));
        }
        let reply = frame(dump.as_bytes());
        let stub_task = tokio::spawn(async move {
            stub.write_all(b"+").await.unwrap();
            stub_reply(&mut stub, b'#', &reply).await;
            stub
        });
        let regs = session.read_registers().await.unwrap();
        assert_eq!(regs.eax, 1);
        assert_eq!(regs.gs, 16);
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn console_output_never_resolves_a_command() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            // console frame ("hi" in hex), then the real reply
            stub_reply(&mut stub, b'#', b"+$O6869#2c$OK#9a").await;
            stub
        });
        session.monitor("hook").await.unwrap();
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_ack_is_a_protocol_error() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"$OK#9a").await;
            stub
        });
        let err = session.monitor("hook").await.err().unwrap();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::NoAck(b'$'))
        ));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn nack_fails_the_pending_command() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"-").await;
            stub
        });
        let err = session.monitor("hook").await.err().unwrap();
        assert!(matches!(err, Error::Protocol(ProtocolError::Nack)));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn second_request_is_rejected_while_one_is_outstanding() {
        let (session, _stub) = pipe().await;
        let stop = session.recv_stop();
        tokio::pin!(stop);
        // Poll once so the pending slot is taken.
        assert!(futures::poll!(stop.as_mut()).is_pending());
        let err = session.monitor("hook").await.err().unwrap();
        assert!(matches!(err, Error::SessionBusy));
    }

    #[tokio::test]
    async fn step_requires_stop_reason() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"+$T05thread:01;#07").await;
            stub_reply(&mut stub, b'#', b"+$W00#b7").await;
            stub
        });
        let body = session.step().await.unwrap();
        assert!(body.starts_with(b"T05"));
        let err = session.step().await.err().unwrap();
        assert!(matches!(
            err,
            Error::Command(CommandError::NotAStopReason { .. })
        ));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn resume_then_recv_stop() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            // wait for the `c' frame, ack it, then report the stop
            stub_reply(&mut stub, b'#', b"+$S05#b8").await;
            stub
        });
        session.resume().await.unwrap();
        let stop = session.recv_stop().await.unwrap();
        assert_eq!(stop.as_ref(), b"S05");
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn read_memory_single_packet() {
        let (session, mut stub) = pipe().await;
        let reply = frame(encode_hex(&[1, 2, 3, 4]).as_bytes());
        let stub_task = tokio::spawn(async move {
            let mut req = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                stub.read_exact(&mut byte).await.unwrap();
                req.push(byte[0]);
                if byte[0] == b'#' {
                    break;
                }
            }
            let mut digits = [0u8; 2];
            stub.read_exact(&mut digits).await.unwrap();
            assert_eq!(&req[..], b"$m 00000010,00000004#");
            stub.write_all(b"+").await.unwrap();
            stub.write_all(&reply).await.unwrap();
            stub
        });
        let mem = session.read_memory(0x10, 4).await.unwrap();
        assert_eq!(mem, vec![1, 2, 3, 4]);
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn read_register_handles_both_reply_widths() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"+$0a#91").await;
            let mut wide = vec![b'+'];
            wide.extend_from_slice(&frame(encode_hex_u32_le(0xdead_beef).as_bytes()));
            stub_reply(&mut stub, b'#', &wide).await;
            stub
        });
        assert_eq!(session.read_register(0).await.unwrap(), 0x0a);
        assert_eq!(session.read_register(1).await.unwrap(), 0xdead_beef);
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn register_and_memory_writes_require_ok() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"+$OK#9a").await;
            stub_reply(&mut stub, b'#', b"+$E02#a7").await;
            stub
        });
        session
            .write_register(8, 0x100, RegWidth::U32)
            .await
            .unwrap();
        let err = session.write_memory(0, &[1, 2, 3, 4]).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Command(CommandError::NotOk { command: "M", .. })
        ));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_reason_query_returns_raw_body() {
        let (session, mut stub) = pipe().await;
        let stub_task = tokio::spawn(async move {
            stub_reply(&mut stub, b'#', b"+$S05#b8").await;
            stub
        });
        assert_eq!(session.query_stop_reason().await.unwrap().as_ref(), b"S05");
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_fails_pending_and_is_idempotent() {
        let (session, _stub) = pipe().await;
        let stop = session.recv_stop();
        tokio::pin!(stop);
        assert!(futures::poll!(stop.as_mut()).is_pending());
        session.disconnect().await;
        let err = stop.await.err().unwrap();
        assert!(matches!(err, Error::Disconnected));
        session.disconnect().await;
        let err = session.monitor("hook").await.err().unwrap();
        assert!(matches!(err, Error::Disconnected | Error::Write { .. }));
    }
}
