//! End-to-end client tests against a scripted in-memory server.
//!
//! The server side of a duplex pipe speaks the real frame format via the
//! public codec, so these tests cover startup ordering, correlation under
//! concurrency, and error routing without spawning processes.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use mortar_client::codec::{FrameReader, FrameWriter};
use mortar_client::{ProtocolClient, StartParams};
use mortar_types::{ClientError, ClientEvent};

type ServerReader = FrameReader<ReadHalf<DuplexStream>>;
type ServerWriter = FrameWriter<WriteHalf<DuplexStream>>;

fn split(stream: DuplexStream) -> (ServerReader, ServerWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

fn params() -> StartParams {
    let mut params = StartParams::new("/usr/bin/cmake", "/tmp/build");
    params.source_dir = Some("/tmp/src".into());
    params
}

async fn send_hello(writer: &mut ServerWriter) {
    writer
        .write_frame(&json!({
            "type": "hello",
            "supportedProtocolVersions": [{"major": 1, "minor": 2}]
        }))
        .await
        .unwrap();
}

/// Read one request frame and return (type, cookie, full payload).
async fn read_request(reader: &mut ServerReader) -> (String, String, Value) {
    let frame = reader.read_frame().await.unwrap().expect("request frame");
    let kind = frame["type"].as_str().unwrap().to_string();
    let cookie = frame["cookie"].as_str().unwrap().to_string();
    (kind, cookie, frame)
}

async fn reply_ok(writer: &mut ServerWriter, kind: &str, cookie: &str, extra: Value) {
    let mut reply = json!({
        "type": "reply",
        "cookie": cookie,
        "inReplyTo": kind
    });
    if let (Some(reply_map), Value::Object(extra_map)) = (reply.as_object_mut(), extra) {
        reply_map.extend(extra_map);
    }
    writer.write_frame(&reply).await.unwrap();
}

/// Complete the hello/handshake sequence, asserting the client stays
/// silent until hello arrives.
async fn serve_startup(reader: &mut ServerReader, writer: &mut ServerWriter) {
    // Nothing may be sent before hello.
    let premature = tokio::time::timeout(Duration::from_millis(200), reader.read_frame()).await;
    assert!(premature.is_err(), "client sent a request before hello");

    send_hello(writer).await;

    let (kind, cookie, frame) = read_request(reader).await;
    assert_eq!(kind, "handshake");
    assert_eq!(frame["protocolVersion"]["major"], 1);
    assert_eq!(frame["protocolVersion"]["minor"], 2);
    assert_eq!(frame["buildDirectory"], "/tmp/build");
    assert_eq!(frame["sourceDirectory"], "/tmp/src");
    reply_ok(writer, "handshake", &cookie, json!({})).await;
}

#[tokio::test]
async fn test_startup_handshake_sequence() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;
        (reader, writer)
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();
    assert_eq!(client.protocol_version().minor, 2);
    server.await.unwrap();
}

#[tokio::test]
async fn test_handshake_error_fails_start() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        send_hello(&mut writer).await;
        let (_, cookie, _) = read_request(&mut reader).await;
        writer
            .write_frame(&json!({
                "type": "error",
                "cookie": cookie,
                "inReplyTo": "handshake",
                "errorMessage": "source directory mismatch"
            }))
            .await
            .unwrap();
        // Hold the pipe open until the client gives up on its own.
        let _ = reader.read_frame().await;
    });

    let err = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap_err();
    match err {
        ClientError::Server(server_error) => {
            assert_eq!(server_error.error_message, "source directory mismatch");
            assert_eq!(server_error.in_reply_to, "handshake");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_closed_before_hello_fails_start() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);
    drop(server_side);

    let err = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap_err();
    match err {
        ClientError::Startup(startup) => {
            assert!(startup.message.contains("before hello"));
            assert!(startup.exit_code.is_none());
        }
        other => panic!("expected startup error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_requests_resolve_by_cookie() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        // Two concurrent requests, replies delivered in reversed order.
        let first = read_request(&mut reader).await;
        let second = read_request(&mut reader).await;
        for (kind, cookie, _) in [second, first] {
            match kind.as_str() {
                "globalSettings" => {
                    reply_ok(
                        &mut writer,
                        &kind,
                        &cookie,
                        json!({"generator": "Ninja", "sourceDirectory": "/tmp/src"}),
                    )
                    .await;
                }
                "cache" => {
                    reply_ok(
                        &mut writer,
                        &kind,
                        &cookie,
                        json!({"cache": [{"key": "K", "type": "STRING", "value": "v"}]}),
                    )
                    .await;
                }
                other => panic!("unexpected request {other}"),
            }
        }
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    let (settings, cache) = tokio::join!(client.global_settings(), client.cache());
    assert_eq!(settings.unwrap().generator, "Ninja");
    let entries = cache.unwrap().into_entries();
    assert_eq!(entries["K"].value, "v");
}

#[tokio::test]
async fn test_progress_observed_then_reply_settles() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        let (kind, cookie, frame) = read_request(&mut reader).await;
        assert_eq!(kind, "configure");
        assert_eq!(frame["cacheArguments"][0], "-DFOO=1");
        writer
            .write_frame(&json!({
                "type": "progress",
                "cookie": cookie,
                "inReplyTo": "configure",
                "progressMessage": "Configuring",
                "progressMinimum": 0,
                "progressMaximum": 1000,
                "progressCurrent": 500
            }))
            .await
            .unwrap();
        reply_ok(&mut writer, "configure", &cookie, json!({})).await;
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    client
        .configure(
            &["-DFOO=1".to_string()],
            mortar_client::RequestObservers {
                progress: Some(progress_tx),
                messages: None,
            },
        )
        .await
        .unwrap();

    let update = progress_rx.recv().await.unwrap();
    assert_eq!(update.message, "Configuring");
    assert!((update.fraction().unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_dirty_signal_emits_event() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, mut event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;
        writer
            .write_frame(&json!({"type": "signal", "cookie": "", "name": "dirty"}))
            .await
            .unwrap();
        // Keep the connection open so only the signal is observed.
        let _ = reader.read_frame().await;
    });

    let _client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    match event_rx.recv().await.unwrap() {
        ClientEvent::Dirty => {}
        other => panic!("expected dirty event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_close_fails_outstanding_request() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;
        // Read the request, then drop the connection without answering.
        let _ = read_request(&mut reader).await;
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    let err = client.code_model().await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test]
async fn test_malformed_reply_aborts_connection() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, mut event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        // A reply with no cookie can never settle its request; the
        // connection must come down rather than leave the caller pending.
        let _ = read_request(&mut reader).await;
        writer
            .write_frame(&json!({"type": "reply", "inReplyTo": "codemodel"}))
            .await
            .unwrap();
        let _ = reader.read_frame().await;
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), client.code_model())
        .await
        .expect("request must settle, not hang")
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    match event_rx.recv().await.unwrap() {
        ClientEvent::Closed { reason } => assert!(reason.contains("malformed reply")),
        other => panic!("expected closed event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_message_type_is_ignored() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        let (kind, cookie, _) = read_request(&mut reader).await;
        writer
            .write_frame(&json!({"type": "telemetry", "payload": {"n": 1}}))
            .await
            .unwrap();
        reply_ok(
            &mut writer,
            &kind,
            &cookie,
            json!({"generator": "Ninja", "sourceDirectory": "/tmp/src"}),
        )
        .await;
    });

    let client = ProtocolClient::start_over_stream(client_side, &params(), event_tx)
        .await
        .unwrap();

    // The unrecognized frame is skipped and the real reply still lands.
    let settings = client.global_settings().await.unwrap();
    assert_eq!(settings.generator, "Ninja");
}

#[cfg(unix)]
#[tokio::test]
async fn test_crash_before_hello_rejects_start_with_exit_code() {
    let (event_tx, _event_rx) = mpsc::channel(16);
    // `false` exits 1 without ever creating the pipe.
    let err = ProtocolClient::start(StartParams::new("false", "/tmp/build"), event_tx)
        .await
        .unwrap_err();
    match err {
        ClientError::Startup(startup) => assert_eq!(startup.exit_code, Some(1)),
        other => panic!("expected startup error, got {other:?}"),
    }
}
