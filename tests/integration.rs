//! End-to-end tests: a real host session served over an in-memory duplex
//! stream, exercised through the target-side `FileSession` API against
//! files in a temporary directory.

use std::io::SeekFrom;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use filewire::{
    FileHandle, FileSession, OpenMode, Result, ServiceConfig, SessionConfig,
};

fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Spin up a host session task and a connected target session.
async fn connect_pair(
    session_config: SessionConfig,
    service_config: ServiceConfig,
) -> (FileSession<DuplexStream>, JoinHandle<Result<()>>) {
    let (client_end, host_end) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(filewire::host::serve_stream(host_end, service_config));
    let session = FileSession::connect(client_end, session_config)
        .await
        .expect("handshake should succeed");
    (session, server)
}

fn service_in(dir: &tempfile::TempDir) -> ServiceConfig {
    ServiceConfig {
        root: dir.path().to_path_buf(),
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn test_open_missing_file_returns_invalid_handle_and_reads_zero() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    // The canonical regression: a failed open must degrade to an invalid
    // handle whose reads return zero bytes, with no hang anywhere.
    let outcome = timeout(Duration::from_secs(10), async {
        let handle = session.open("does_not_exist.bin", OpenMode::Read).await?;
        assert_eq!(handle, FileHandle::INVALID);
        assert!(!handle.is_valid());

        let mut buf = vec![0u8; 512];
        let read = session.read(handle, &mut buf).await?;
        assert_eq!(read, 0);

        session.close(handle).await?;
        session.close_all().await
    })
    .await;

    outcome.expect("must not hang").expect("no transport error");
}

#[tokio::test]
async fn test_write_then_read_back_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        max_payload: 1024,
        ..SessionConfig::default()
    };
    let (mut session, _server) = connect_pair(config, service_in(&dir)).await;
    assert_eq!(session.max_payload(), 1024);

    let data = test_pattern(2048);
    let handle = session.open("roundtrip.bin", OpenMode::Write).await.unwrap();
    assert!(handle.is_valid());
    let written = session.write(handle, &data).await.unwrap();
    assert_eq!(written, data.len());
    session.close(handle).await.unwrap();

    let handle = session.open("roundtrip.bin", OpenMode::Read).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let read = session.read(handle, &mut buf).await.unwrap();
    assert_eq!(read, data.len());
    assert_eq!(&buf[..read], &data[..]);

    // A second read sits at EOF.
    assert_eq!(session.read(handle, &mut buf).await.unwrap(), 0);
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_transfers_across_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        max_payload: 1024,
        ..SessionConfig::default()
    };
    let (mut session, _server) = connect_pair(config, service_in(&dir)).await;

    // Exactly one chunk, several full chunks, and a sub-chunk tail.
    for (name, len) in [("a.bin", 1024usize), ("b.bin", 3072), ("c.bin", 100), ("d.bin", 2500)] {
        let data = test_pattern(len);
        let handle = session.open(name, OpenMode::Write).await.unwrap();
        assert_eq!(session.write(handle, &data).await.unwrap(), len);
        session.close(handle).await.unwrap();

        let handle = session.open(name, OpenMode::Read).await.unwrap();
        let mut buf = vec![0u8; len + 64];
        let read = session.read(handle, &mut buf).await.unwrap();
        assert_eq!(read, len, "length mismatch for {name}");
        assert_eq!(&buf[..read], &data[..], "data mismatch for {name}");
        session.close(handle).await.unwrap();
    }
}

#[tokio::test]
async fn test_zero_length_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let handle = session.open("empty.bin", OpenMode::Write).await.unwrap();
    assert_eq!(session.write(handle, &[]).await.unwrap(), 0);
    session.close(handle).await.unwrap();

    let handle = session.open("empty.bin", OpenMode::Read).await.unwrap();
    let mut buf = vec![0u8; 64];
    assert_eq!(session.read(handle, &mut buf).await.unwrap(), 0);
    assert_eq!(session.read(handle, &mut []).await.unwrap(), 0);
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_seek_and_tell_report_host_positions() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let data = test_pattern(1000);
    let handle = session.open("seek.bin", OpenMode::Write).await.unwrap();
    session.write(handle, &data).await.unwrap();
    session.close(handle).await.unwrap();

    let handle = session.open("seek.bin", OpenMode::Read).await.unwrap();
    assert_eq!(session.tell(handle).await.unwrap(), 0);

    assert_eq!(session.seek(handle, SeekFrom::Start(100)).await.unwrap(), 100);
    assert_eq!(session.tell(handle).await.unwrap(), 100);
    assert_eq!(session.mirrored_offset(handle), Some(100));

    assert_eq!(session.seek(handle, SeekFrom::Current(50)).await.unwrap(), 150);
    assert_eq!(session.seek(handle, SeekFrom::End(-10)).await.unwrap(), 990);

    let mut tail = vec![0u8; 64];
    let read = session.read(handle, &mut tail).await.unwrap();
    assert_eq!(read, 10);
    assert_eq!(&tail[..read], &data[990..]);
    assert_eq!(session.tell(handle).await.unwrap(), 1000);

    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_read_advances_mirrored_offset() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let handle = session.open("adv.bin", OpenMode::Write).await.unwrap();
    session.write(handle, &test_pattern(300)).await.unwrap();
    assert_eq!(session.mirrored_offset(handle), Some(300));
    session.close(handle).await.unwrap();

    let handle = session.open("adv.bin", OpenMode::Read).await.unwrap();
    let mut buf = vec![0u8; 120];
    session.read(handle, &mut buf).await.unwrap();
    assert_eq!(session.mirrored_offset(handle), Some(120));
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_append_mode_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    for chunk in [b"first-".as_slice(), b"second".as_slice()] {
        let handle = session.open("log.txt", OpenMode::Append).await.unwrap();
        assert_eq!(session.handle_mode(handle), Some(OpenMode::Append));
        session.write(handle, chunk).await.unwrap();
        session.close(handle).await.unwrap();
    }

    let handle = session.open("log.txt", OpenMode::Read).await.unwrap();
    let mut buf = vec![0u8; 64];
    let read = session.read(handle, &mut buf).await.unwrap();
    assert_eq!(&buf[..read], b"first-second");
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_write_mode_truncates_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let handle = session.open("trunc.bin", OpenMode::Write).await.unwrap();
    session.write(handle, &test_pattern(500)).await.unwrap();
    session.close(handle).await.unwrap();

    let handle = session.open("trunc.bin", OpenMode::Write).await.unwrap();
    session.write(handle, b"tiny").await.unwrap();
    session.close(handle).await.unwrap();

    let handle = session.open("trunc.bin", OpenMode::Read).await.unwrap();
    let mut buf = vec![0u8; 64];
    let read = session.read(handle, &mut buf).await.unwrap();
    assert_eq!(&buf[..read], b"tiny");
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_stale_handles_degrade() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let handle = session.open("once.bin", OpenMode::Write).await.unwrap();
    session.close(handle).await.unwrap();
    session.close(handle).await.unwrap();

    // Every operation against the stale handle degrades without error.
    assert_eq!(session.write(handle, b"data").await.unwrap(), 0);
    let mut buf = [0u8; 8];
    assert_eq!(session.read(handle, &mut buf).await.unwrap(), 0);
    assert_eq!(session.seek(handle, SeekFrom::Start(4)).await.unwrap(), 0);
    assert_eq!(session.tell(handle).await.unwrap(), 0);
}

#[tokio::test]
async fn test_close_all_with_zero_one_and_many_handles() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    // Zero open handles.
    session.close_all().await.unwrap();
    assert_eq!(session.open_handles(), 0);

    // One.
    let handle = session.open("one.bin", OpenMode::Write).await.unwrap();
    assert_eq!(session.open_handles(), 1);
    session.close_all().await.unwrap();
    assert_eq!(session.open_handles(), 0);
    assert_eq!(session.write(handle, b"x").await.unwrap(), 0);

    // Many.
    for i in 0..5 {
        session
            .open(&format!("many{i}.bin"), OpenMode::Write)
            .await
            .unwrap();
    }
    assert_eq!(session.open_handles(), 5);
    session.close_all().await.unwrap();
    assert_eq!(session.open_handles(), 0);
}

#[tokio::test]
async fn test_handle_ids_are_recycled_lowest_first() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, _server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let a = session.open("a.bin", OpenMode::Write).await.unwrap();
    let b = session.open("b.bin", OpenMode::Write).await.unwrap();
    let c = session.open("c.bin", OpenMode::Write).await.unwrap();
    assert!(a.id() < b.id() && b.id() < c.id());

    session.close(b).await.unwrap();
    let d = session.open("d.bin", OpenMode::Write).await.unwrap();
    assert_eq!(d.id(), b.id());

    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_open_table_exhaustion_degrades_to_invalid_handle() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        max_open_files: 2,
        ..service_in(&dir)
    };
    let (mut session, _server) = connect_pair(SessionConfig::default(), config).await;

    let a = session.open("a.bin", OpenMode::Write).await.unwrap();
    let b = session.open("b.bin", OpenMode::Write).await.unwrap();
    assert!(a.is_valid() && b.is_valid());

    let c = session.open("c.bin", OpenMode::Write).await.unwrap();
    assert_eq!(c, FileHandle::INVALID);

    // Releasing a slot makes open work again.
    session.close(a).await.unwrap();
    let d = session.open("d.bin", OpenMode::Write).await.unwrap();
    assert!(d.is_valid());
    session.close_all().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_host_sweep_open_handles() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, server) =
        connect_pair(SessionConfig::default(), service_in(&dir)).await;

    let handle = session.open("left_open.bin", OpenMode::Write).await.unwrap();
    session.write(handle, b"abandoned").await.unwrap();

    // Disconnect without closing; the host sweeps and exits cleanly.
    session.shutdown().await.unwrap();
    let outcome = timeout(Duration::from_secs(5), server).await;
    outcome
        .expect("host must notice disconnect")
        .expect("host task must not panic")
        .expect("sweep is not an error");
}

#[tokio::test]
async fn test_payload_limit_negotiation_picks_minimum() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        max_payload: 8192,
        ..SessionConfig::default()
    };
    let service = ServiceConfig {
        max_payload: 512,
        ..service_in(&dir)
    };
    let (session, _server) = connect_pair(config, service).await;
    assert_eq!(session.max_payload(), 512);
}

mod raw_wire {
    //! Tests that speak the wire protocol by hand to poke at host behavior
    //! the session API never produces.

    use super::*;
    use filewire::control::Hello;
    use filewire::protocol::{
        build_frame, flags, Frame, FrameParser, Header, Opcode, INVALID_HANDLE_ID,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_one_frame(stream: &mut DuplexStream, parser: &mut FrameParser) -> Option<Frame> {
        let mut buf = [0u8; 4096];
        loop {
            let count = stream.read(&mut buf).await.ok()?;
            if count == 0 {
                return None;
            }
            let mut frames = parser.push(&buf[..count]).ok()?;
            if let Some(frame) = frames.pop() {
                return Some(frame);
            }
        }
    }

    async fn raw_handshake(stream: &mut DuplexStream, parser: &mut FrameParser) {
        let hello = Hello::new(4096).encode().unwrap();
        let header = Header::new(
            Opcode::Hello,
            flags::REQUEST,
            INVALID_HANDLE_ID,
            hello.len() as u32,
        );
        stream.write_all(&build_frame(&header, &hello)).await.unwrap();

        let reply = read_one_frame(stream, parser).await.expect("hello reply");
        assert!(reply.is_response());
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn test_garbled_frame_gets_error_response_then_session_ends() {
        let dir = tempfile::tempdir().unwrap();
        let (mut raw, host_end) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(filewire::host::serve_stream(
            host_end,
            super::service_in(&dir),
        ));

        let mut parser = FrameParser::new();
        raw_handshake(&mut raw, &mut parser).await;

        // An unknown opcode is unrecoverable garbage to the parser.
        raw.write_all(&[0xAB, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04])
            .await
            .unwrap();

        let outcome = timeout(Duration::from_secs(5), async {
            let reply = read_one_frame(&mut raw, &mut parser).await.expect("error reply");
            assert!(reply.is_error());
            // The host hangs up after an unparseable stream.
            let mut buf = [0u8; 16];
            assert_eq!(raw.read(&mut buf).await.unwrap(), 0);
        })
        .await;
        outcome.expect("must not hang");

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_payload_gets_error_and_session_survives() {
        use filewire::protocol::{decode_error, encode_open, ErrorCode};

        let dir = tempfile::tempdir().unwrap();
        let (mut raw, host_end) = tokio::io::duplex(16 * 1024);
        let _server = tokio::spawn(filewire::host::serve_stream(
            host_end,
            super::service_in(&dir),
        ));

        let mut parser = FrameParser::new();
        raw_handshake(&mut raw, &mut parser).await;

        // A seek payload is 9 bytes; this frame parses but its payload
        // does not decode as a request.
        let header = Header::new(Opcode::Seek, flags::REQUEST, 0, 3);
        raw.write_all(&build_frame(&header, &[1, 2, 3])).await.unwrap();

        let reply = read_one_frame(&mut raw, &mut parser).await.expect("error reply");
        assert!(reply.is_error());
        let (code, _) = decode_error(reply.payload()).unwrap();
        assert_eq!(code, ErrorCode::Protocol);

        // The session keeps serving: a well-formed open still succeeds.
        let open = encode_open(OpenMode::Write, "still_alive.bin");
        let header = Header::new(
            Opcode::Open,
            flags::REQUEST,
            INVALID_HANDLE_ID,
            open.len() as u32,
        );
        raw.write_all(&build_frame(&header, &open)).await.unwrap();

        let reply = read_one_frame(&mut raw, &mut parser).await.expect("open reply");
        assert!(reply.is_response());
        assert!(!reply.is_error());
        assert_eq!(reply.payload_len(), 1);
    }

    #[tokio::test]
    async fn test_operation_on_unknown_handle_gets_invalid_handle_error() {
        use filewire::protocol::{decode_error, encode_u64, ErrorCode};

        let dir = tempfile::tempdir().unwrap();
        let (mut raw, host_end) = tokio::io::duplex(16 * 1024);
        let _server = tokio::spawn(filewire::host::serve_stream(
            host_end,
            super::service_in(&dir),
        ));

        let mut parser = FrameParser::new();
        raw_handshake(&mut raw, &mut parser).await;

        // Read against a handle that was never opened.
        let payload = encode_u64(64);
        let header = Header::new(Opcode::Read, flags::REQUEST, 7, payload.len() as u32);
        raw.write_all(&build_frame(&header, &payload)).await.unwrap();

        let reply = read_one_frame(&mut raw, &mut parser).await.expect("reply");
        assert!(reply.is_error());
        let (code, _) = decode_error(reply.payload()).unwrap();
        assert_eq!(code, ErrorCode::InvalidHandle);
    }
}
