//! Transport module - platform pipe/socket streams.
//!
//! The channel between target and host is any ordered, bidirectional byte
//! stream. Production deployments use a Unix domain socket or Windows named
//! pipe; tests run both ends over `tokio::io::duplex`.

mod pipe;

pub use pipe::{generate_pipe_path, PipeListener, PipeStream};
