//! # filewire
//!
//! Remote file I/O bridge for targets without a filesystem of their own.
//!
//! A target process opens, reads, writes, seeks, and closes files that
//! physically live on a host, over a narrow framed byte channel. The host
//! runs a small service that executes each operation against its real
//! filesystem and streams results back.
//!
//! ## Architecture
//!
//! - **Wire format**: 7-byte binary headers, big-endian, with chunked
//!   transfers for payloads beyond the negotiated frame limit
//! - **Target side**: [`FileSession`] with blocking-style file calls
//! - **Host side**: [`FileService`] accept loop, one session per stream
//!
//! ## Example
//!
//! ```ignore
//! use filewire::{FileSession, OpenMode, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let stream = filewire::transport::PipeStream::connect("/tmp/fw.sock")
//!         .await
//!         .unwrap();
//!     let mut session = FileSession::connect(stream, SessionConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let handle = session.open("log.bin", OpenMode::Write).await.unwrap();
//!     session.write(handle, b"hello").await.unwrap();
//!     session.close(handle).await.unwrap();
//! }
//! ```

pub mod control;
pub mod error;
pub mod host;
pub mod protocol;
pub mod transport;

mod client;
mod writer;

pub use client::{FileHandle, FileSession, SessionConfig, DEFAULT_REPLY_TIMEOUT};
pub use error::{FilewireError, Result};
pub use host::{FileService, ServiceConfig};
pub use protocol::OpenMode;
pub use writer::{FrameWriter, OutboundFrame};
