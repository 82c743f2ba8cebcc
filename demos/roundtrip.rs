//! Throughput demo: push a buffer to the host, read it back, verify the
//! bytes, and report elapsed time per direction.
//!
//! Run with: `cargo run --release --example roundtrip`

use std::io::SeekFrom;
use std::time::Instant;

use filewire::transport::{generate_pipe_path, PipeStream};
use filewire::{FileService, FileSession, OpenMode, ServiceConfig, SessionConfig};

const TOTAL_BYTES: usize = 4 * 1024 * 1024;

#[tokio::main]
async fn main() -> filewire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = std::env::temp_dir();
    let config = ServiceConfig {
        root: dir,
        ..ServiceConfig::default()
    };
    let service = FileService::bind(&generate_pipe_path(), config).await?;
    let addr = service.local_path().to_string();
    let host = tokio::spawn(async move { service.serve_one().await });

    let stream = PipeStream::connect(&addr).await?;
    let mut session = FileSession::connect(stream, SessionConfig::default()).await?;
    println!("negotiated payload limit: {} bytes", session.max_payload());

    let data: Vec<u8> = (0..TOTAL_BYTES).map(|i| (i % 256) as u8).collect();

    let handle = session.open("filewire_roundtrip.bin", OpenMode::Write).await?;
    let start = Instant::now();
    let written = session.write(handle, &data).await?;
    let write_time = start.elapsed();
    session.close(handle).await?;
    println!(
        "wrote {written} bytes in {:?} ({:.1} MiB/s)",
        write_time,
        written as f64 / (1024.0 * 1024.0) / write_time.as_secs_f64()
    );

    let handle = session.open("filewire_roundtrip.bin", OpenMode::Read).await?;
    let size = session.seek(handle, SeekFrom::End(0)).await?;
    println!("host reports file size: {size} bytes");
    session.seek(handle, SeekFrom::Start(0)).await?;

    let mut buf = vec![0u8; TOTAL_BYTES];
    let start = Instant::now();
    let mut total = 0;
    loop {
        let read = session.read(handle, &mut buf[total..]).await?;
        if read == 0 {
            break;
        }
        total += read;
    }
    let read_time = start.elapsed();
    println!(
        "read {total} bytes in {:?} ({:.1} MiB/s)",
        read_time,
        total as f64 / (1024.0 * 1024.0) / read_time.as_secs_f64()
    );

    assert_eq!(total, written, "read back the same number of bytes");
    assert_eq!(&buf[..total], &data[..], "content must match");

    session.close_all().await?;
    session.shutdown().await?;
    host.await.expect("host task panicked")?;

    println!("done: roundtrip verified");
    Ok(())
}
