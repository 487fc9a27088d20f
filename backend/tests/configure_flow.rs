//! Backend tests against a scripted in-memory server: configure/compute
//! ordering, derived-state replacement, and the target/compile-info
//! projections.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mortar_backend::Backend;
use mortar_client::codec::{FrameReader, FrameWriter};
use mortar_client::{ProtocolClient, StartParams};
use mortar_types::{BackendEvent, TargetType};

type ServerReader = FrameReader<ReadHalf<DuplexStream>>;
type ServerWriter = FrameWriter<WriteHalf<DuplexStream>>;

fn split(stream: DuplexStream) -> (ServerReader, ServerWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

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

async fn serve_startup(reader: &mut ServerReader, writer: &mut ServerWriter) {
    writer
        .write_frame(&json!({
            "type": "hello",
            "supportedProtocolVersions": [{"major": 1, "minor": 2}]
        }))
        .await
        .unwrap();
    let (kind, cookie, _) = read_request(reader).await;
    assert_eq!(kind, "handshake");
    reply_ok(writer, "handshake", &cookie, json!({})).await;
}

/// Answer `cache` and `codemodel`, which the backend issues concurrently
/// in either order.
async fn serve_state_refresh(reader: &mut ServerReader, writer: &mut ServerWriter, model: Value) {
    for _ in 0..2 {
        let (kind, cookie, _) = read_request(reader).await;
        match kind.as_str() {
            "cache" => {
                reply_ok(
                    writer,
                    &kind,
                    &cookie,
                    json!({"cache": [
                        {"key": "CMAKE_BUILD_TYPE", "type": "STRING", "value": "Debug"}
                    ]}),
                )
                .await;
            }
            "codemodel" => reply_ok(writer, &kind, &cookie, model.clone()).await,
            other => panic!("unexpected request {other}"),
        }
    }
}

fn sample_model() -> Value {
    let project = json!({
        "name": "demo",
        "sourceDirectory": "/tmp/src",
        "targets": [
            {
                "name": "app",
                "type": "EXECUTABLE",
                "buildDirectory": "/tmp/build",
                "artifacts": ["/tmp/build/app"],
                "fileGroups": [{
                    "language": "CXX",
                    "compileFlags": "-Wall -O2",
                    "defines": ["FOO=1", "BAR"],
                    "includePath": [{"path": "/usr/include", "isSystem": true}],
                    "sources": ["main.cpp"]
                }]
            },
            {
                "name": "headers",
                "type": "INTERFACE_LIBRARY"
            }
        ]
    });
    // Two configurations with the same target, to exercise deduplication.
    json!({
        "configurations": [
            {"name": "Debug", "projects": [project.clone()]},
            {"name": "Release", "projects": [project]}
        ]
    })
}

async fn start_backend(
    stream: DuplexStream,
    event_tx: mpsc::Sender<BackendEvent>,
) -> Backend {
    let mut params = StartParams::new("/usr/bin/cmake", "/tmp/build");
    params.source_dir = Some("/tmp/src".into());
    let (client_tx, client_rx) = mpsc::channel(16);
    let client = ProtocolClient::start_over_stream(stream, &params, client_tx)
        .await
        .unwrap();
    Backend::new(
        client,
        client_rx,
        event_tx,
        "/usr/bin/cmake".into(),
        "/tmp/src".into(),
        "/tmp/build".into(),
        "Ninja".to_string(),
        false,
    )
}

#[tokio::test]
async fn test_configure_then_compute_then_refresh() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, mut event_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        let (kind, cookie, frame) = read_request(&mut reader).await;
        assert_eq!(kind, "configure");
        assert_eq!(frame["cacheArguments"][0], "-DCMAKE_BUILD_TYPE=Debug");
        reply_ok(&mut writer, "configure", &cookie, json!({})).await;

        let (kind, cookie, _) = read_request(&mut reader).await;
        assert_eq!(kind, "compute");
        reply_ok(&mut writer, "compute", &cookie, json!({})).await;

        serve_state_refresh(&mut reader, &mut writer, sample_model()).await;
        let _ = reader.read_frame().await;
    });

    let mut backend = start_backend(client_side, event_tx).await;
    let ok = backend
        .configure(&["-DCMAKE_BUILD_TYPE=Debug".to_string()], &CancellationToken::new())
        .await
        .unwrap();
    assert!(ok);
    assert!(!backend.is_dirty());
    assert_eq!(backend.cache_entries()["CMAKE_BUILD_TYPE"].value, "Debug");

    // Synthetic all-target first, then real targets with artifacts;
    // interface targets and duplicates across configurations drop out.
    let targets = backend.targets();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].name, "all");
    assert!(targets[0].target_type.is_none());
    assert_eq!(targets[1].name, "app");
    assert_eq!(targets[1].target_type, Some(TargetType::Executable));

    match event_rx.recv().await.unwrap() {
        BackendEvent::Reconfigured => {}
        other => panic!("expected reconfigured event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_compilation_info_projection() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;
        let (_, cookie, _) = read_request(&mut reader).await;
        reply_ok(&mut writer, "configure", &cookie, json!({})).await;
        let (_, cookie, _) = read_request(&mut reader).await;
        reply_ok(&mut writer, "compute", &cookie, json!({})).await;
        serve_state_refresh(&mut reader, &mut writer, sample_model()).await;
        let _ = reader.read_frame().await;
    });

    let mut backend = start_backend(client_side, event_tx).await;
    backend
        .configure(&[], &CancellationToken::new())
        .await
        .unwrap();

    // Relative sources resolve against the project source directory.
    let info = backend
        .compilation_info_for_file(Path::new("/tmp/src/main.cpp"))
        .expect("compile info for known source");
    assert_eq!(info.language, "CXX");
    assert_eq!(info.compile_flags, vec!["-Wall", "-O2"]);
    assert_eq!(info.defines[0].name, "FOO");
    assert_eq!(info.defines[0].value.as_deref(), Some("1"));
    assert_eq!(info.defines[1].name, "BAR");
    assert!(info.defines[1].value.is_none());
    assert!(info.include_dirs[0].is_system);

    assert!(
        backend
            .compilation_info_for_file(Path::new("/tmp/src/other.cpp"))
            .is_none()
    );
}

#[tokio::test]
async fn test_configure_error_suppresses_compute() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, _event_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;

        let (_, cookie, _) = read_request(&mut reader).await;
        writer
            .write_frame(&json!({
                "type": "error",
                "cookie": cookie,
                "inReplyTo": "configure",
                "errorMessage": "CMakeLists.txt is broken"
            }))
            .await
            .unwrap();

        // No compute (or anything else) may follow a failed configure.
        let next = tokio::time::timeout(Duration::from_millis(200), reader.read_frame()).await;
        assert!(next.is_err(), "request sent after configure failed");
    });

    let mut backend = start_backend(client_side, event_tx).await;
    let ok = backend
        .configure(&[], &CancellationToken::new())
        .await
        .unwrap();
    assert!(!ok);
    assert!(backend.code_model().is_none());
}

#[tokio::test]
async fn test_dirty_signal_marks_backend() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (event_tx, mut event_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let (mut reader, mut writer) = split(server_side);
        serve_startup(&mut reader, &mut writer).await;
        writer
            .write_frame(&json!({"type": "signal", "cookie": "", "name": "dirty"}))
            .await
            .unwrap();
        let _ = reader.read_frame().await;
    });

    let mut backend = start_backend(client_side, event_tx).await;
    for _ in 0..100 {
        backend.poll_events(16);
        if backend.is_dirty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(backend.is_dirty());
    match event_rx.recv().await.unwrap() {
        BackendEvent::Dirty => {}
        other => panic!("expected dirty event, got {other:?}"),
    }
}
