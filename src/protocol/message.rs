//! Request/response payload codec.
//!
//! Frame payloads are flat binary with fixed-width big-endian numerics, so
//! target and host never disagree on width or byte order:
//!
//! - open request: 1 mode byte + UTF-8 path
//! - open response: 1 handle byte
//! - read request: u64 requested length
//! - write response: u64 bytes accepted
//! - seek request: 1 origin byte + i64 offset
//! - seek/tell response: u64 resulting offset
//! - error response: 1 error-code byte + UTF-8 message
//!
//! Read data and write data travel as raw chunk frames and need no codec.

use std::io::SeekFrom;

use bytes::Bytes;

use super::wire_format::ErrorCode;
use crate::error::{FilewireError, Result};

/// Access mode for an open stream. Always binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpenMode {
    /// Read-only ("rb"). Fails if the path does not exist.
    Read = 0,
    /// Write, create/truncate ("wb").
    Write = 1,
    /// Append, create if missing ("ab").
    Append = 2,
}

impl OpenMode {
    /// Decode a mode byte.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(OpenMode::Read),
            1 => Ok(OpenMode::Write),
            2 => Ok(OpenMode::Append),
            other => Err(FilewireError::Protocol(format!(
                "Unknown open mode: {}",
                other
            ))),
        }
    }
}

/// Encode an open request payload (mode byte + UTF-8 path).
pub fn encode_open(mode: OpenMode, path: &str) -> Bytes {
    let mut buf = Vec::with_capacity(1 + path.len());
    buf.push(mode as u8);
    buf.extend_from_slice(path.as_bytes());
    Bytes::from(buf)
}

/// Decode an open request payload.
pub fn decode_open(payload: &[u8]) -> Result<(OpenMode, &str)> {
    let (&mode_byte, path_bytes) = payload
        .split_first()
        .ok_or_else(|| FilewireError::Protocol("Open request payload is empty".to_string()))?;
    let mode = OpenMode::from_wire(mode_byte)?;
    let path = std::str::from_utf8(path_bytes)
        .map_err(|_| FilewireError::Protocol("Open path is not valid UTF-8".to_string()))?;
    if path.is_empty() {
        return Err(FilewireError::Protocol("Open path is empty".to_string()));
    }
    Ok((mode, path))
}

/// Encode a u64 field (read length, write count, offsets).
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Decode a u64 field.
pub fn decode_u64(payload: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| FilewireError::Protocol(format!("Expected 8-byte field, got {}", payload.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Seek origin bytes mirroring start/current/end.
const ORIGIN_START: u8 = 0;
const ORIGIN_CURRENT: u8 = 1;
const ORIGIN_END: u8 = 2;

/// Encode a seek request payload (origin byte + i64 offset).
///
/// `SeekFrom::Start` offsets beyond `i64::MAX` cannot be represented on the
/// wire and are rejected.
pub fn encode_seek(pos: SeekFrom) -> Result<Bytes> {
    let (origin, offset) = match pos {
        SeekFrom::Start(n) => {
            let n = i64::try_from(n).map_err(|_| {
                FilewireError::Protocol("Seek offset exceeds i64 range".to_string())
            })?;
            (ORIGIN_START, n)
        }
        SeekFrom::Current(n) => (ORIGIN_CURRENT, n),
        SeekFrom::End(n) => (ORIGIN_END, n),
    };

    let mut buf = Vec::with_capacity(9);
    buf.push(origin);
    buf.extend_from_slice(&offset.to_be_bytes());
    Ok(Bytes::from(buf))
}

/// Decode a seek request payload.
pub fn decode_seek(payload: &[u8]) -> Result<SeekFrom> {
    if payload.len() != 9 {
        return Err(FilewireError::Protocol(format!(
            "Expected 9-byte seek payload, got {}",
            payload.len()
        )));
    }
    let offset = i64::from_be_bytes(payload[1..9].try_into().expect("length checked"));
    match payload[0] {
        ORIGIN_START => {
            let n = u64::try_from(offset).map_err(|_| {
                FilewireError::Protocol("Negative offset with start origin".to_string())
            })?;
            Ok(SeekFrom::Start(n))
        }
        ORIGIN_CURRENT => Ok(SeekFrom::Current(offset)),
        ORIGIN_END => Ok(SeekFrom::End(offset)),
        other => Err(FilewireError::Protocol(format!(
            "Unknown seek origin: {}",
            other
        ))),
    }
}

/// Encode an error response payload (code byte + UTF-8 message).
pub fn encode_error(code: ErrorCode, message: &str) -> Bytes {
    let mut buf = Vec::with_capacity(1 + message.len());
    buf.push(code as u8);
    buf.extend_from_slice(message.as_bytes());
    Bytes::from(buf)
}

/// Decode an error response payload.
pub fn decode_error(payload: &[u8]) -> Result<(ErrorCode, String)> {
    let (&code_byte, msg_bytes) = payload
        .split_first()
        .ok_or_else(|| FilewireError::Protocol("Error payload is empty".to_string()))?;
    let code = ErrorCode::from_wire(code_byte)?;
    let message = String::from_utf8_lossy(msg_bytes).into_owned();
    Ok((code, message))
}
