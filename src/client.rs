//! Target-side file handle client.
//!
//! [`FileSession`] is the API surface used by target code. Each call
//! translates into one protocol request, blocks the caller until the
//! matching response arrives (synchronous RPC over the async transport,
//! with a single in-flight slot), and returns POSIX-stream-like results:
//! byte counts for read/write, offsets for seek/tell, and a distinguished
//! invalid handle instead of a fault when an open fails.
//!
//! # Example
//!
//! ```ignore
//! use filewire::{FileSession, SessionConfig};
//! use filewire::protocol::OpenMode;
//!
//! let stream = /* connect transport */;
//! let mut session = FileSession::connect(stream, SessionConfig::default()).await?;
//!
//! let fh = session.open("a.bin", OpenMode::Write).await?;
//! session.write(fh, b"hello").await?;
//! session.close_all().await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::timeout;

use crate::control::{clamp_max_payload, negotiate, Hello};
use crate::error::{FilewireError, Result};
use crate::protocol::{
    decode_error, decode_u64, encode_open, encode_seek, encode_u64, flags, ErrorCode, Frame,
    FrameParser, Header, Opcode, OpenMode, DEFAULT_MAX_PAYLOAD, INVALID_HANDLE_ID,
};
use crate::writer::{FrameWriter, OutboundFrame};

/// Default bounded wait for a response frame.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a target-side session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest frame payload this side is willing to receive. The effective
    /// limit is negotiated down to the minimum of both sides during the
    /// hello handshake.
    pub max_payload: u32,
    /// Bound on each wait for a response frame. Expiry surfaces as
    /// [`FilewireError::ReplyTimeout`] rather than an infinite wait.
    pub reply_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Opaque identifier for an open remote stream.
///
/// `FileHandle::INVALID` is the sentinel returned when an open fails;
/// operations against it are zero-effect (read/write return 0, close is a
/// no-op) and never touch the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    id: u8,
}

impl FileHandle {
    /// The invalid-handle sentinel.
    pub const INVALID: FileHandle = FileHandle {
        id: INVALID_HANDLE_ID,
    };

    /// Check whether this handle came from a successful open.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.id != INVALID_HANDLE_ID
    }

    /// The raw wire id.
    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }
}

/// Client-side mirror of one open stream. Advisory only; the host is
/// authoritative for offsets.
#[derive(Debug)]
struct Mirror {
    mode: OpenMode,
    offset: u64,
}

/// A connected target-side session.
pub struct FileSession<S> {
    reader: ReadHalf<S>,
    writer: FrameWriter<WriteHalf<S>>,
    parser: FrameParser,
    /// Frames parsed but not yet consumed (a read reply spans several).
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
    reply_timeout: Duration,
    /// Negotiated frame payload limit.
    max_payload: u32,
    /// Locally-visible handles, keyed by wire id.
    mirrors: HashMap<u8, Mirror>,
}

impl<S> FileSession<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Connect over an established transport stream.
    ///
    /// Performs the one-time hello handshake (version check + payload limit
    /// negotiation) before returning.
    pub async fn connect(stream: S, config: SessionConfig) -> Result<Self> {
        let (reader, write_half) = tokio::io::split(stream);

        let mut session = Self {
            reader,
            writer: FrameWriter::new(write_half),
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            read_buf: vec![0u8; 16 * 1024],
            reply_timeout: config.reply_timeout,
            max_payload: clamp_max_payload(config.max_payload),
            mirrors: HashMap::new(),
        };

        session.handshake().await?;
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<()> {
        let hello = Hello::new(self.max_payload);
        let payload = Bytes::from(hello.encode()?);
        let header = Header::new(
            Opcode::Hello,
            flags::REQUEST,
            INVALID_HANDLE_ID,
            payload.len() as u32,
        );
        self.writer.send(&header, payload).await?;

        let frame = self.recv_frame().await?;
        if frame.op()? != Opcode::Hello || !frame.is_response() {
            return Err(FilewireError::Protocol(
                "Expected hello response".to_string(),
            ));
        }
        if frame.is_error() {
            let (_, message) = decode_error(frame.payload())?;
            return Err(FilewireError::HandshakeRejected(message));
        }

        let peer = Hello::decode(frame.payload())?;
        peer.check_version()?;

        self.max_payload = negotiate(self.max_payload, peer.max_payload);
        self.parser.set_max_payload(self.max_payload);
        tracing::debug!(max_payload = self.max_payload, "Session established");
        Ok(())
    }

    /// The negotiated frame payload limit for this session.
    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// Number of handles this session believes are open.
    pub fn open_handles(&self) -> usize {
        self.mirrors.len()
    }

    /// Advisory mirrored offset for a handle, if it is open.
    pub fn mirrored_offset(&self, handle: FileHandle) -> Option<u64> {
        self.mirrors.get(&handle.id).map(|m| m.offset)
    }

    /// Access mode a handle was opened with, if it is open.
    pub fn handle_mode(&self, handle: FileHandle) -> Option<OpenMode> {
        self.mirrors.get(&handle.id).map(|m| m.mode)
    }

    /// Open a named file stream on the host.
    ///
    /// Any host-side failure (missing file for read mode, permission
    /// failure, table exhaustion) degrades to `Ok(FileHandle::INVALID)`;
    /// only transport-level problems return `Err`.
    pub async fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let payload = encode_open(mode, path);
        let header = Header::new(
            Opcode::Open,
            flags::REQUEST,
            INVALID_HANDLE_ID,
            payload.len() as u32,
        );
        self.writer.send(&header, payload).await?;

        let frame = self.expect_response(Opcode::Open).await?;
        if frame.is_error() {
            let (code, message) = decode_error(frame.payload())?;
            if code == ErrorCode::Protocol {
                return Err(FilewireError::Remote { code, message });
            }
            tracing::warn!(path, ?code, message, "Open failed");
            return Ok(FileHandle::INVALID);
        }

        if frame.payload_len() != 1 {
            return Err(FilewireError::Protocol(
                "Open response must carry one handle byte".to_string(),
            ));
        }
        let id = frame.payload()[0];
        if id == INVALID_HANDLE_ID {
            return Err(FilewireError::Protocol(
                "Host assigned the invalid-handle sentinel".to_string(),
            ));
        }

        self.mirrors.insert(id, Mirror { mode, offset: 0 });
        Ok(FileHandle { id })
    }

    /// Read up to `buf.len()` bytes at the current offset.
    ///
    /// Returns the number of bytes actually delivered; 0 means end of
    /// stream, a zero-length buffer, or an invalid handle. A short count is
    /// the loop-termination condition for bulk copies, not an error.
    pub async fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        if !self.is_live(handle) || buf.is_empty() {
            return Ok(0);
        }

        let header = Header::new(Opcode::Read, flags::REQUEST, handle.id, 8);
        self.writer.send(&header, encode_u64(buf.len() as u64)).await?;

        let mut total = 0usize;
        loop {
            let frame = self.response_frame(Opcode::Read).await?;
            if frame.is_error() {
                let (code, message) = decode_error(frame.payload())?;
                if code == ErrorCode::InvalidHandle {
                    self.mirrors.remove(&handle.id);
                    return Ok(0);
                }
                return Err(FilewireError::Remote { code, message });
            }
            if !frame.is_chunk() {
                return Err(FilewireError::Protocol(
                    "Read response must be chunked".to_string(),
                ));
            }

            let data = frame.payload();
            if total + data.len() > buf.len() {
                return Err(FilewireError::Protocol(
                    "Host delivered more bytes than requested".to_string(),
                ));
            }
            buf[total..total + data.len()].copy_from_slice(data);
            total += data.len();

            if frame.is_final() {
                break;
            }
        }

        if let Some(mirror) = self.mirrors.get_mut(&handle.id) {
            mirror.offset += total as u64;
        }
        Ok(total)
    }

    /// Write `buf` at the current offset.
    ///
    /// The buffer is split into chunks no larger than the negotiated frame
    /// payload; the host replies with the total bytes accepted. A short
    /// write (host out of space) is a legitimate result.
    pub async fn write(&mut self, handle: FileHandle, buf: &[u8]) -> Result<usize> {
        if !self.is_live(handle) {
            return Ok(0);
        }

        let max = self.max_payload as usize;
        let mut frames = Vec::new();
        if buf.is_empty() {
            let header = Header::new(Opcode::Write, flags::REQUEST_CHUNK_FINAL, handle.id, 0);
            frames.push(OutboundFrame::empty(&header));
        } else {
            let chunks: Vec<&[u8]> = buf.chunks(max).collect();
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let chunk_flags = if i == last {
                    flags::REQUEST_CHUNK_FINAL
                } else {
                    flags::REQUEST_CHUNK
                };
                let header = Header::new(Opcode::Write, chunk_flags, handle.id, chunk.len() as u32);
                frames.push(OutboundFrame::new(&header, Bytes::copy_from_slice(chunk)));
            }
        }
        self.writer.send_all(&frames).await?;

        let frame = self.expect_response(Opcode::Write).await?;
        if frame.is_error() {
            let (code, message) = decode_error(frame.payload())?;
            if code == ErrorCode::InvalidHandle {
                self.mirrors.remove(&handle.id);
                return Ok(0);
            }
            return Err(FilewireError::Remote { code, message });
        }

        let written = decode_u64(frame.payload())? as usize;
        if let Some(mirror) = self.mirrors.get_mut(&handle.id) {
            mirror.offset += written as u64;
        }
        Ok(written)
    }

    /// Reposition the host-authoritative offset.
    ///
    /// Returns the resulting absolute offset; the client's mirrored offset
    /// is reconciled from the reply so the two never diverge.
    pub async fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> Result<u64> {
        if !self.is_live(handle) {
            return Ok(0);
        }

        let payload = encode_seek(pos)?;
        let header = Header::new(Opcode::Seek, flags::REQUEST, handle.id, payload.len() as u32);
        self.writer.send(&header, payload).await?;

        let offset = match self.offset_reply(Opcode::Seek, handle).await? {
            Some(offset) => offset,
            None => return Ok(0),
        };
        if let Some(mirror) = self.mirrors.get_mut(&handle.id) {
            mirror.offset = offset;
        }
        Ok(offset)
    }

    /// Read back the host-authoritative offset.
    pub async fn tell(&mut self, handle: FileHandle) -> Result<u64> {
        if !self.is_live(handle) {
            return Ok(0);
        }

        let header = Header::new(Opcode::Tell, flags::REQUEST, handle.id, 0);
        self.writer.send_empty(&header).await?;

        let offset = match self.offset_reply(Opcode::Tell, handle).await? {
            Some(offset) => offset,
            None => return Ok(0),
        };
        if let Some(mirror) = self.mirrors.get_mut(&handle.id) {
            mirror.offset = offset;
        }
        Ok(offset)
    }

    /// Release one handle on both sides.
    ///
    /// Idempotent: closing an invalid or already-closed handle is a no-op.
    pub async fn close(&mut self, handle: FileHandle) -> Result<()> {
        if !self.is_live(handle) {
            return Ok(());
        }

        let header = Header::new(Opcode::Close, flags::REQUEST, handle.id, 0);
        self.writer.send_empty(&header).await?;

        let frame = self.expect_response(Opcode::Close).await?;
        self.mirrors.remove(&handle.id);
        if frame.is_error() {
            let (code, message) = decode_error(frame.payload())?;
            // Already closed on the host is still a successful close here.
            if code != ErrorCode::InvalidHandle {
                return Err(FilewireError::Remote { code, message });
            }
        }
        Ok(())
    }

    /// Bulk-release every handle still open for this session.
    ///
    /// The mandatory cleanup step before a run ends; fine with zero or many
    /// handles open.
    pub async fn close_all(&mut self) -> Result<()> {
        let header = Header::new(Opcode::CloseAll, flags::REQUEST, INVALID_HANDLE_ID, 0);
        self.writer.send_empty(&header).await?;

        let frame = self.expect_response(Opcode::CloseAll).await?;
        self.mirrors.clear();
        if frame.is_error() {
            let (code, message) = decode_error(frame.payload())?;
            return Err(FilewireError::Remote { code, message });
        }
        Ok(())
    }

    /// Tear down the session, signalling EOF to the host.
    ///
    /// The host sweeps any handles left open, so this is safe to skip on
    /// abnormal exit; calling it just makes the shutdown orderly.
    pub async fn shutdown(mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn is_live(&self, handle: FileHandle) -> bool {
        handle.is_valid() && self.mirrors.contains_key(&handle.id)
    }

    /// Await a non-chunk response for `op`.
    async fn expect_response(&mut self, op: Opcode) -> Result<Frame> {
        let frame = self.response_frame(op).await?;
        if frame.is_chunk() && !frame.is_error() {
            return Err(FilewireError::Protocol(format!(
                "Unexpected chunk frame for {:?} response",
                op
            )));
        }
        Ok(frame)
    }

    /// Await the next response frame and check it matches `op`.
    async fn response_frame(&mut self, op: Opcode) -> Result<Frame> {
        let frame = self.recv_frame().await?;
        if !frame.is_response() {
            return Err(FilewireError::Protocol(
                "Expected a response frame".to_string(),
            ));
        }
        let got = frame.op()?;
        if got != op {
            return Err(FilewireError::Protocol(format!(
                "Response opcode mismatch: expected {:?}, got {:?}",
                op, got
            )));
        }
        Ok(frame)
    }

    /// Decode a u64 offset reply; `None` means the handle was stale.
    async fn offset_reply(&mut self, op: Opcode, handle: FileHandle) -> Result<Option<u64>> {
        let frame = self.expect_response(op).await?;
        if frame.is_error() {
            let (code, message) = decode_error(frame.payload())?;
            if code == ErrorCode::InvalidHandle {
                self.mirrors.remove(&handle.id);
                return Ok(None);
            }
            return Err(FilewireError::Remote { code, message });
        }
        Ok(Some(decode_u64(frame.payload())?))
    }

    /// Await the next frame, bounded by the reply timeout.
    async fn recv_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let n = timeout(self.reply_timeout, self.reader.read(&mut self.read_buf))
                .await
                .map_err(|_| FilewireError::ReplyTimeout)??;
            if n == 0 {
                return Err(FilewireError::ConnectionClosed);
            }

            let frames = self.parser.push(&self.read_buf[..n])?;
            self.pending.extend(frames);
        }
    }
}
