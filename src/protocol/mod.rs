//! Protocol module - wire format, framing, and payload codec.
//!
//! This module implements the binary protocol between target and host:
//! - 7-byte header encoding/decoding
//! - Incremental frame parser for accumulating partial reads
//! - Frame struct with typed accessors
//! - Payload codec for the per-operation request/response fields

mod frame;
mod frame_parser;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_parser::FrameParser;
pub use message::{
    decode_error, decode_open, decode_seek, decode_u64, encode_error, encode_open, encode_seek,
    encode_u64, OpenMode,
};
pub use wire_format::{
    flags, ErrorCode, Header, Opcode, ABSOLUTE_MAX_PAYLOAD, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    INVALID_HANDLE_ID, MAX_HANDLE_ID, MIN_MAX_PAYLOAD,
};
