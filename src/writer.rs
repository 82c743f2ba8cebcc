//! Frame writer with vectored (scatter/gather) I/O.
//!
//! Both sides of the bridge write frames through [`FrameWriter`]. A chunked
//! transfer produces several frames for one logical call; batching them into
//! a single `write_vectored` keeps the syscall count low without buffering
//! the payload twice.
//!
//! Only one logical request is ever in flight per channel, so no writer task
//! or queue sits between callers and the transport; the writer owns the
//! write half directly.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{FilewireError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (7 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (can be empty for acks and final chunks).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a new outbound frame with empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Writes frames to the transport's write half.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a write half.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a single frame and flush.
    pub async fn send(&mut self, header: &Header, payload: Bytes) -> Result<()> {
        self.send_all(&[OutboundFrame::new(header, payload)]).await
    }

    /// Write a frame with empty payload and flush.
    pub async fn send_empty(&mut self, header: &Header) -> Result<()> {
        self.send_all(&[OutboundFrame::empty(header)]).await
    }

    /// Write a batch of frames using scatter/gather I/O and flush.
    ///
    /// The fast path is a single `write_vectored` covering every header and
    /// payload slice; on a partial write the remaining slices are rebuilt
    /// and retried until the batch is fully consumed.
    pub async fn send_all(&mut self, batch: &[OutboundFrame]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
        for frame in batch {
            slices.push(IoSlice::new(&frame.header));
            if !frame.payload.is_empty() {
                slices.push(IoSlice::new(&frame.payload));
            }
        }

        let total_size: usize = batch.iter().map(|f| f.size()).sum();

        let written = self.inner.write_vectored(&slices).await?;
        if written == total_size {
            self.inner.flush().await?;
            return Ok(());
        }
        if written == 0 {
            return Err(FilewireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        // Partial write: continue with the remaining bytes.
        let mut total_written = written;
        while total_written < total_size {
            let remaining = build_remaining_slices(batch, total_written);
            if remaining.is_empty() {
                break;
            }

            let written = self.inner.write_vectored(&remaining).await?;
            if written == 0 {
                return Err(FilewireError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write_vectored returned 0",
                )));
            }
            total_written += written;
        }

        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half (signals EOF to the peer).
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
