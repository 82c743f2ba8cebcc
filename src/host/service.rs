//! Host-side file service.
//!
//! One [`HostSession`] per connected transport stream. The session is a
//! request/response loop: await a request frame, execute it against the
//! open-file table, send exactly one logical response, repeat. Failures
//! that belong to a single request become error responses on the wire;
//! the loop itself keeps running so a misbehaving caller can never wedge
//! the service.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::control::{clamp_max_payload, negotiate, Hello};
use crate::error::{FilewireError, Result};
use crate::host::open_files::{OpenFileEntry, OpenFileTable, DEFAULT_MAX_OPEN_FILES};
use crate::protocol::{
    decode_open, decode_seek, decode_u64, encode_error, encode_u64, flags, ErrorCode, Frame,
    FrameParser, Header, Opcode, OpenMode, DEFAULT_MAX_PAYLOAD, INVALID_HANDLE_ID,
};
use crate::transport::PipeListener;
use crate::writer::FrameWriter;

use std::collections::VecDeque;

/// Host service tuning.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Advertised frame payload limit (clamped during the handshake).
    pub max_payload: u32,
    /// Directory that caller-supplied paths resolve against.
    pub root: PathBuf,
    /// Open-stream limit per session.
    pub max_open_files: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            root: PathBuf::from("."),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

/// Accept loop bound to a local pipe path.
pub struct FileService {
    listener: PipeListener,
    config: ServiceConfig,
}

impl FileService {
    /// Bind the service to a pipe path.
    pub async fn bind(path: &str, config: ServiceConfig) -> Result<Self> {
        let listener = PipeListener::bind(path).await?;
        Ok(Self { listener, config })
    }

    /// The pipe path this service listens on.
    pub fn local_path(&self) -> &str {
        self.listener.path()
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn run(self) -> Result<()> {
        loop {
            let stream = self.listener.accept().await?;
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(error) = serve_stream(stream, config).await {
                    tracing::warn!(%error, "Session ended with error");
                }
            });
        }
    }

    /// Accept and serve exactly one connection, then return.
    pub async fn serve_one(&self) -> Result<()> {
        let stream = self.listener.accept().await?;
        serve_stream(stream, self.config.clone()).await
    }
}

/// Serve a single session over an established stream.
///
/// Runs the handshake, then the request loop, until the peer disconnects.
/// Any file still open at disconnect is swept closed.
pub async fn serve_stream<S>(stream: S, config: ServiceConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, write_half) = tokio::io::split(stream);

    let mut session = HostSession {
        reader,
        writer: FrameWriter::new(write_half),
        parser: FrameParser::new(),
        pending: VecDeque::new(),
        read_buf: vec![0u8; 16 * 1024],
        max_payload: clamp_max_payload(config.max_payload),
        files: OpenFileTable::new(config.max_open_files),
        root: config.root,
    };

    session.run().await
}

struct HostSession<S> {
    reader: ReadHalf<S>,
    writer: FrameWriter<WriteHalf<S>>,
    parser: FrameParser,
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
    max_payload: u32,
    files: OpenFileTable,
    root: PathBuf,
}

impl<S> HostSession<S>
where
    S: AsyncRead + AsyncWrite,
{
    async fn run(&mut self) -> Result<()> {
        if !self.handshake().await? {
            return Ok(());
        }

        loop {
            let frame = match self.next_request().await? {
                Some(frame) => frame,
                None => break,
            };
            self.dispatch(frame).await?;
        }

        let swept = self.files.clear();
        if swept > 0 {
            tracing::warn!(swept, "Peer disconnected with open handles");
        }
        self.writer.shutdown().await.ok();
        Ok(())
    }

    /// Await the hello request and answer it.
    ///
    /// Returns `false` when the handshake was refused (version mismatch or
    /// a non-hello first frame); the session ends without serving.
    async fn handshake(&mut self) -> Result<bool> {
        let frame = match self.next_frame().await? {
            Some(frame) => frame,
            None => return Ok(false),
        };

        if frame.op()? != Opcode::Hello || frame.is_response() {
            self.send_error(
                Opcode::Hello,
                INVALID_HANDLE_ID,
                ErrorCode::Protocol,
                "Expected hello request",
            )
            .await?;
            return Ok(false);
        }

        let peer = Hello::decode(frame.payload())?;
        if let Err(error) = peer.check_version() {
            self.send_error(
                Opcode::Hello,
                INVALID_HANDLE_ID,
                ErrorCode::Protocol,
                &error.to_string(),
            )
            .await?;
            return Ok(false);
        }

        let ours = Hello::new(self.max_payload);
        let payload = Bytes::from(ours.encode()?);
        let header = Header::new(
            Opcode::Hello,
            flags::RESPONSE,
            INVALID_HANDLE_ID,
            payload.len() as u32,
        );
        self.writer.send(&header, payload).await?;

        self.max_payload = negotiate(self.max_payload, peer.max_payload);
        self.parser.set_max_payload(self.max_payload);
        tracing::debug!(max_payload = self.max_payload, "Session established");
        Ok(true)
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let op = frame.op()?;
        if frame.is_response() {
            return self
                .send_error(
                    op,
                    frame.handle(),
                    ErrorCode::Protocol,
                    "Unexpected response frame",
                )
                .await;
        }

        match op {
            Opcode::Hello => {
                self.send_error(
                    op,
                    frame.handle(),
                    ErrorCode::Protocol,
                    "Handshake already complete",
                )
                .await
            }
            Opcode::Open => self.handle_open(frame).await,
            Opcode::Read => self.handle_read(frame).await,
            Opcode::Write => self.handle_write(frame).await,
            Opcode::Seek => self.handle_seek(frame).await,
            Opcode::Tell => self.handle_tell(frame).await,
            Opcode::Close => self.handle_close(frame).await,
            Opcode::CloseAll => self.handle_close_all(frame).await,
        }
    }

    async fn handle_open(&mut self, frame: Frame) -> Result<()> {
        let (mode, rel_path) = match decode_open(frame.payload()) {
            Ok(decoded) => decoded,
            Err(error) => {
                return self
                    .send_error(
                        Opcode::Open,
                        INVALID_HANDLE_ID,
                        ErrorCode::Protocol,
                        &error.to_string(),
                    )
                    .await;
            }
        };

        let path = self.root.join(rel_path);
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };

        let file = match options.open(&path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Open refused, no such file");
                return self
                    .send_error(
                        Opcode::Open,
                        INVALID_HANDLE_ID,
                        ErrorCode::NotFound,
                        &format!("No such file: {rel_path}"),
                    )
                    .await;
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Open failed");
                return self
                    .send_error(
                        Opcode::Open,
                        INVALID_HANDLE_ID,
                        ErrorCode::Io,
                        &error.to_string(),
                    )
                    .await;
            }
        };

        let entry = OpenFileEntry { file, mode, path };
        let id = match self.files.allocate(entry) {
            Some(id) => id,
            None => {
                return self
                    .send_error(
                        Opcode::Open,
                        INVALID_HANDLE_ID,
                        ErrorCode::Io,
                        "Open file table is full",
                    )
                    .await;
            }
        };

        tracing::debug!(id, ?mode, "Opened stream");
        let header = Header::new(Opcode::Open, flags::RESPONSE, id, 1);
        self.writer.send(&header, Bytes::from(vec![id])).await
    }

    /// Stream file data back as a chunk sequence.
    ///
    /// Zero or more data chunks, then one empty final chunk. A short read
    /// (EOF before the requested count) just ends the sequence early; the
    /// caller measures delivery by the bytes it received.
    async fn handle_read(&mut self, frame: Frame) -> Result<()> {
        let id = frame.handle();
        let requested = match decode_u64(frame.payload()) {
            Ok(value) => value,
            Err(error) => {
                return self
                    .send_error(Opcode::Read, id, ErrorCode::Protocol, &error.to_string())
                    .await;
            }
        };

        if self.files.get_mut(id).is_none() {
            return self
                .send_error(Opcode::Read, id, ErrorCode::InvalidHandle, "Unknown handle")
                .await;
        }

        let chunk_cap = self.max_payload as usize;
        let mut chunk_buf = vec![0u8; requested.min(chunk_cap as u64) as usize];
        let mut remaining = requested;

        while remaining > 0 {
            let want = remaining.min(chunk_cap as u64) as usize;
            let Some(entry) = self.files.get_mut(id) else {
                break;
            };
            let read = match entry.file.read(&mut chunk_buf[..want]).await {
                Ok(read) => read,
                Err(error) => {
                    // Truncate the transfer; the final chunk still closes it.
                    tracing::warn!(id, %error, "Read failed mid-transfer");
                    break;
                }
            };
            if read == 0 {
                break;
            }

            let header = Header::new(Opcode::Read, flags::RESPONSE_CHUNK, id, read as u32);
            self.writer
                .send(&header, Bytes::copy_from_slice(&chunk_buf[..read]))
                .await?;
            remaining -= read as u64;
        }

        let fin = Header::new(Opcode::Read, flags::RESPONSE_CHUNK_FINAL, id, 0);
        self.writer.send_empty(&fin).await
    }

    /// Drain a write chunk sequence and apply it.
    ///
    /// The sequence is always consumed through its final chunk, even when
    /// the handle is unknown or the file errors partway, so frame framing
    /// never desynchronizes. The response carries the byte count actually
    /// written; a short count is a legitimate outcome, not a fault.
    async fn handle_write(&mut self, first: Frame) -> Result<()> {
        let id = first.handle();
        let mut written: u64 = 0;
        let mut stalled = false;
        let mut current = first;

        loop {
            if current.op()? != Opcode::Write || !current.is_chunk() || current.is_response() {
                return self
                    .send_error(
                        Opcode::Write,
                        id,
                        ErrorCode::Protocol,
                        "Malformed write chunk sequence",
                    )
                    .await;
            }

            if !stalled {
                if let Some(entry) = self.files.get_mut(id) {
                    let data = current.payload();
                    let mut offset = 0;
                    while offset < data.len() {
                        match entry.file.write(&data[offset..]).await {
                            Ok(0) => {
                                stalled = true;
                                break;
                            }
                            Ok(count) => offset += count,
                            Err(error) => {
                                tracing::warn!(id, %error, "Write failed mid-transfer");
                                stalled = true;
                                break;
                            }
                        }
                    }
                    written += offset as u64;
                } else {
                    stalled = true;
                }
            }

            if current.is_final() {
                break;
            }
            current = match Self::read_frame(
                &mut self.reader,
                &mut self.parser,
                &mut self.pending,
                &mut self.read_buf,
            )
            .await?
            {
                Some(frame) => frame,
                None => return Err(FilewireError::ConnectionClosed),
            };
        }

        if self.files.get_mut(id).is_none() {
            return self
                .send_error(Opcode::Write, id, ErrorCode::InvalidHandle, "Unknown handle")
                .await;
        }

        let header = Header::new(Opcode::Write, flags::RESPONSE, id, 8);
        self.writer.send(&header, encode_u64(written)).await
    }

    async fn handle_seek(&mut self, frame: Frame) -> Result<()> {
        let id = frame.handle();
        let pos = match decode_seek(frame.payload()) {
            Ok(pos) => pos,
            Err(error) => {
                return self
                    .send_error(Opcode::Seek, id, ErrorCode::Protocol, &error.to_string())
                    .await;
            }
        };

        let Some(entry) = self.files.get_mut(id) else {
            return self
                .send_error(Opcode::Seek, id, ErrorCode::InvalidHandle, "Unknown handle")
                .await;
        };

        match entry.file.seek(pos).await {
            Ok(offset) => {
                let header = Header::new(Opcode::Seek, flags::RESPONSE, id, 8);
                self.writer.send(&header, encode_u64(offset)).await
            }
            Err(error) => {
                self.send_error(Opcode::Seek, id, ErrorCode::Io, &error.to_string())
                    .await
            }
        }
    }

    async fn handle_tell(&mut self, frame: Frame) -> Result<()> {
        let id = frame.handle();
        let Some(entry) = self.files.get_mut(id) else {
            return self
                .send_error(Opcode::Tell, id, ErrorCode::InvalidHandle, "Unknown handle")
                .await;
        };

        match entry.file.stream_position().await {
            Ok(offset) => {
                let header = Header::new(Opcode::Tell, flags::RESPONSE, id, 8);
                self.writer.send(&header, encode_u64(offset)).await
            }
            Err(error) => {
                self.send_error(Opcode::Tell, id, ErrorCode::Io, &error.to_string())
                    .await
            }
        }
    }

    /// Close is idempotent: releasing an already-free id still acks.
    async fn handle_close(&mut self, frame: Frame) -> Result<()> {
        let id = frame.handle();
        match self.files.release(id) {
            Some(entry) => tracing::debug!(id, path = %entry.path.display(), "Closed stream"),
            None => tracing::debug!(id, "Close of already-free handle"),
        }

        let header = Header::new(Opcode::Close, flags::RESPONSE, id, 0);
        self.writer.send_empty(&header).await
    }

    async fn handle_close_all(&mut self, _frame: Frame) -> Result<()> {
        let released = self.files.clear();
        tracing::debug!(released, "Closed all streams");

        let header = Header::new(Opcode::CloseAll, flags::RESPONSE, INVALID_HANDLE_ID, 0);
        self.writer.send_empty(&header).await
    }

    /// Await the next request frame, or `None` at orderly disconnect.
    ///
    /// An unparseable byte stream cannot be resynchronized, so a parser
    /// failure answers with a protocol error and then ends the session.
    async fn next_request(&mut self) -> Result<Option<Frame>> {
        match self.next_frame().await {
            Ok(frame) => Ok(frame),
            Err(error @ FilewireError::Protocol(_)) => {
                tracing::warn!(%error, "Unparseable frame, ending session");
                // No request opcode exists for an unparseable frame; the
                // session-level hello opcode tags the error.
                self.send_error(
                    Opcode::Hello,
                    INVALID_HANDLE_ID,
                    ErrorCode::Protocol,
                    &error.to_string(),
                )
                .await
                .ok();
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Self::read_frame(
            &mut self.reader,
            &mut self.parser,
            &mut self.pending,
            &mut self.read_buf,
        )
        .await
    }

    async fn read_frame(
        reader: &mut ReadHalf<S>,
        parser: &mut FrameParser,
        pending: &mut VecDeque<Frame>,
        read_buf: &mut [u8],
    ) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = pending.pop_front() {
                return Ok(Some(frame));
            }

            let count = reader.read(read_buf).await?;
            if count == 0 {
                return Ok(None);
            }
            pending.extend(parser.push(&read_buf[..count])?);
        }
    }

    async fn send_error(
        &mut self,
        op: Opcode,
        handle: u8,
        code: ErrorCode,
        message: &str,
    ) -> Result<()> {
        let payload = encode_error(code, message);
        let header = Header::new(op, flags::ERROR_RESPONSE, handle, payload.len() as u32);
        self.writer.send(&header, payload).await
    }
}
