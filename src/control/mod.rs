//! Control module - session handshake.
//!
//! A session begins with one `HELLO` exchange before any file operation:
//!
//! 1. Target connects and sends `HELLO { version, maxPayload }`
//! 2. Host validates the version and replies with its own `HELLO`
//! 3. Both sides adopt `min(target.maxPayload, host.maxPayload)`
//!
//! After the handshake the channel carries only binary file-operation
//! frames.

mod hello;

pub use hello::{clamp_max_payload, negotiate, Hello, PROTOCOL_VERSION};
