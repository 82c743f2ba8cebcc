//! Wire format encoding and decoding.
//!
//! Implements the 7-byte header format:
//! ```text
//! ┌────────┬───────┬────────┬──────────┐
//! │ Opcode │ Flags │ Handle │ Length   │
//! │ 1 byte │ 1 byte│ 1 byte │ 4 bytes  │
//! │        │       │        │ uint32 BE│
//! └────────┴───────┴────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian, since target and host may differ
//! in native endianness and word width.

use crate::error::{FilewireError, Result};

/// Header size in bytes (fixed, exactly 7).
pub const HEADER_SIZE: usize = 7;

/// Default maximum frame payload size (4 KB).
///
/// The effective limit for a session is negotiated down to the minimum of
/// both peers' configured values during the hello handshake.
pub const DEFAULT_MAX_PAYLOAD: u32 = 4096;

/// Smallest negotiable frame payload size.
pub const MIN_MAX_PAYLOAD: u32 = 64;

/// Absolute maximum frame payload size (1 MB).
pub const ABSOLUTE_MAX_PAYLOAD: u32 = 1_048_576;

/// Sentinel handle id meaning "no handle" / "invalid handle".
///
/// Used in the handle byte of frames that carry no handle (hello, open
/// request, close-all) and returned to callers when an open fails.
pub const INVALID_HANDLE_ID: u8 = 0xFF;

/// Highest assignable handle id (the sentinel is never assigned).
pub const MAX_HANDLE_ID: u8 = 0xFE;

/// Operation kind carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Session handshake (JSON payload, once per session).
    ///
    /// Also tags the error response sent for a frame that never parsed:
    /// no request opcode exists for such a frame, so hello stands in as
    /// the session-level opcode.
    Hello = 1,
    /// Open a named file stream.
    Open = 2,
    /// Read bytes at the current offset.
    Read = 3,
    /// Write bytes at the current offset.
    Write = 4,
    /// Reposition the stream offset.
    Seek = 5,
    /// Report the current stream offset.
    Tell = 6,
    /// Release one handle.
    Close = 7,
    /// Release every handle owned by the session.
    CloseAll = 8,
}

impl Opcode {
    /// Decode an opcode byte. Opcode 0 is reserved.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Opcode::Hello),
            2 => Ok(Opcode::Open),
            3 => Ok(Opcode::Read),
            4 => Ok(Opcode::Write),
            5 => Ok(Opcode::Seek),
            6 => Ok(Opcode::Tell),
            7 => Ok(Opcode::Close),
            8 => Ok(Opcode::CloseAll),
            other => Err(FilewireError::Protocol(format!(
                "Unknown opcode: {}",
                other
            ))),
        }
    }
}

/// Error codes carried in the first byte of an error response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Open for reading against a nonexistent path.
    NotFound = 1,
    /// Operation against a closed or never-assigned handle id.
    InvalidHandle = 2,
    /// Malformed or unexpected frame.
    Protocol = 3,
    /// Host-side filesystem failure.
    Io = 4,
}

impl ErrorCode {
    /// Decode an error code byte.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(ErrorCode::NotFound),
            2 => Ok(ErrorCode::InvalidHandle),
            3 => Ok(ErrorCode::Protocol),
            4 => Ok(ErrorCode::Io),
            other => Err(FilewireError::Protocol(format!(
                "Unknown error code: {}",
                other
            ))),
        }
    }
}

/// Flag constants for the protocol.
pub mod flags {
    /// Message type: response (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0001;
    /// Error flag: error response (1) or ok (0).
    pub const IS_ERROR: u8 = 0b0000_0010;
    /// Chunk flag: part of a chunked transfer (1) or single message (0).
    pub const IS_CHUNK: u8 = 0b0000_0100;
    /// Final flag: last chunk of a transfer (1) or more coming (0).
    pub const FINAL: u8 = 0b0000_1000;

    /// Reserved bits mask (bits 4-7).
    pub const RESERVED_MASK: u8 = 0b1111_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    // Common flag combinations

    /// Plain request: 0x00
    pub const REQUEST: u8 = 0;
    /// Plain response: 0x01
    pub const RESPONSE: u8 = IS_RESPONSE;
    /// Error response: 0x03
    pub const ERROR_RESPONSE: u8 = IS_RESPONSE | IS_ERROR;
    /// Data chunk of a read response: 0x05
    pub const RESPONSE_CHUNK: u8 = IS_RESPONSE | IS_CHUNK;
    /// Final (empty) chunk of a read response: 0x0D
    pub const RESPONSE_CHUNK_FINAL: u8 = IS_RESPONSE | IS_CHUNK | FINAL;
    /// Data chunk of a write request: 0x04
    pub const REQUEST_CHUNK: u8 = IS_CHUNK;
    /// Last data chunk of a write request: 0x0C
    pub const REQUEST_CHUNK_FINAL: u8 = IS_CHUNK | FINAL;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Operation kind byte (see [`Opcode`]; kept raw so garbled frames can
    /// be reported instead of dropped).
    pub opcode: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Handle id, or [`INVALID_HANDLE_ID`] where not applicable.
    pub handle: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(opcode: Opcode, flags: u8, handle: u8, payload_length: u32) -> Self {
        Self {
            opcode: opcode as u8,
            flags,
            handle,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (7 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.opcode;
        buf[1] = self.flags;
        buf[2] = self.handle;
        buf[3..7].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: buf[0],
            flags: buf[1],
            handle: buf[2],
            payload_length: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Opcode is known (0 is reserved)
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_payload: u32) -> Result<()> {
        Opcode::from_wire(self.opcode)?;

        if self.payload_length > max_payload {
            return Err(FilewireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(FilewireError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Decode the opcode byte.
    #[inline]
    pub fn op(&self) -> Result<Opcode> {
        Opcode::from_wire(self.opcode)
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ERROR)
    }

    /// Check if this frame is part of a chunked transfer.
    #[inline]
    pub fn is_chunk(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_CHUNK)
    }

    /// Check if this is the final chunk of a transfer.
    #[inline]
    pub fn is_final(&self) -> bool {
        flags::has_flag(self.flags, flags::FINAL)
    }
}
