//! Incremental frame parser for accumulating partial reads.
//!
//! The transport delivers byte streams, not frames; a read from the socket
//! may contain a fraction of a frame or several frames back to back. The
//! parser buffers bytes in a `BytesMut` and runs a two-state machine:
//! - `WaitingForHeader`: need at least 7 bytes
//! - `WaitingForPayload`: header parsed, need N more payload bytes
//!
//! Frame boundaries are fully determined by the self-describing header, so
//! neither end ever has to rely on timing to delimit messages.

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, ABSOLUTE_MAX_PAYLOAD, HEADER_SIZE};
use super::Frame;
use crate::error::{FilewireError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 7 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer to minimize allocations;
/// payloads are handed out as zero-copy `Bytes` slices.
pub struct FrameParser {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload: u32,
}

impl FrameParser {
    /// Create a new parser with the absolute payload cap.
    ///
    /// Sessions tighten the cap to the negotiated limit via
    /// [`FrameParser::set_max_payload`] after the hello handshake.
    pub fn new() -> Self {
        Self::with_max_payload(ABSOLUTE_MAX_PAYLOAD)
    }

    /// Create a new parser with a custom max payload size.
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            max_payload,
        }
    }

    /// Tighten the payload cap after negotiation.
    ///
    /// Hello frames still need headroom for the JSON payload, so the cap is
    /// never lowered below [`super::MIN_MAX_PAYLOAD`].
    pub fn set_max_payload(&mut self, max_payload: u32) {
        self.max_payload = max_payload.max(super::MIN_MAX_PAYLOAD);
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the complete frames found so far; partial data is buffered
    /// internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a header declares a payload larger than
    /// the cap or fails validation. The stream cannot be resynchronized
    /// after that, so callers should report the error and drop the session.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = Header::decode(&self.buffer[..HEADER_SIZE])
                    .ok_or_else(|| FilewireError::Protocol("Header decode failed".to_string()))?;
                header.validate(self.max_payload)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForPayload {
                    header,
                    remaining: header.payload_length,
                };

                // Payload may already be buffered.
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                // Zero-copy freeze of the payload bytes.
                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;

                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
