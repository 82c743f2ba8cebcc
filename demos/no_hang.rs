//! Regression demo: opening a file that does not exist on the host must
//! degrade to an invalid handle and a zero-byte read. The run completes
//! and exits; it never hangs waiting for data that will not come.
//!
//! Run with: `cargo run --example no_hang`

use filewire::transport::{generate_pipe_path, PipeStream};
use filewire::{FileService, FileSession, OpenMode, ServiceConfig, SessionConfig};

#[tokio::main]
async fn main() -> filewire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let service = FileService::bind(&generate_pipe_path(), ServiceConfig::default()).await?;
    let addr = service.local_path().to_string();
    let host = tokio::spawn(async move { service.serve_one().await });

    let stream = PipeStream::connect(&addr).await?;
    let mut session = FileSession::connect(stream, SessionConfig::default()).await?;

    let handle = session
        .open("this_file_does_not_exist.bin", OpenMode::Read)
        .await?;
    println!("open: handle valid = {}", handle.is_valid());

    let mut buf = vec![0u8; 1024];
    let read = session.read(handle, &mut buf).await?;
    println!("read: {read} bytes");
    assert_eq!(read, 0, "a failed open must read zero bytes");

    session.close_all().await?;
    session.shutdown().await?;
    host.await.expect("host task panicked")?;

    println!("done: no hang, clean shutdown");
    Ok(())
}
