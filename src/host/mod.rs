//! Host side of the bridge: the process that owns a real filesystem and
//! executes file operations on behalf of connected targets.

mod open_files;
mod service;

pub use open_files::{OpenFileEntry, OpenFileTable, DEFAULT_MAX_OPEN_FILES};
pub use service::{serve_stream, FileService, ServiceConfig};
