//! End-to-end provisioning and supervision scenarios against local fixture
//! servers: a fresh install through to a running server, refusal to spawn
//! with a missing root filesystem, and recovery from a truncated download.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use modelbox::runtime::layout::SandboxLayout;
use modelbox::{
    FailureCode, LocalRuntime, ModelboxError, Prerequisite, RuntimeOptions, ServerStatus, Strategy,
};

fn gz_tar(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn script(body: &str) -> Vec<u8> {
    format!("#!/bin/sh\n{body}\n").into_bytes()
}

/// Serves fixture artifacts by request path. `truncate_once` cuts the body
/// of the named path at the given byte count on its first request only,
/// while still declaring the full content length.
async fn serve_artifacts(
    routes: Vec<(&'static str, Vec<u8>)>,
    truncate_once: Vec<(&'static str, usize)>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, body)| (path.to_string(), body))
            .collect(),
    );
    let truncate: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(
        truncate_once
            .into_iter()
            .map(|(path, cut)| (path.to_string(), cut))
            .collect(),
    ));

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = Arc::clone(&routes);
            let truncate = Arc::clone(&truncate);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                match routes.get(&path) {
                    Some(body) => {
                        let cut = truncate.lock().unwrap().remove(&path);
                        let header = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(header.as_bytes()).await;
                        let sent = cut.unwrap_or(body.len());
                        let _ = stream.write_all(&body[..sent]).await;
                        let _ = stream.shutdown().await;
                    }
                    None => {
                        let _ = stream
                            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                            .await;
                    }
                }
            });
        }
    });
    format!("http://{addr}")
}

/// Stands in for the running server's HTTP endpoint: answers every request
/// on its own loopback port with an empty model list.
async fn serve_tags() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let body = b"{\"models\":[]}";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.write_all(body).await;
        }
    });
    addr.to_string()
}

fn base_options(home: std::path::PathBuf, artifacts: &str) -> RuntimeOptions {
    let mut options = RuntimeOptions::default()
        .with_home_dir(home)
        .with_strategy(Strategy::Interposition);
    options.interposition_url = format!("{artifacts}/interposer");
    options.rootfs_url = format!("{artifacts}/rootfs.tar.gz");
    options.server_url = format!("{artifacts}/server.tgz");
    options.install_compat_shim = false;
    options
}

fn good_routes() -> Vec<(&'static str, Vec<u8>)> {
    // The stand-in interposer ignores its argv and stays alive; readiness is
    // answered by the fixture endpoint bound at the configured listen_addr.
    vec![
        ("/interposer", script("sleep 30")),
        (
            "/rootfs.tar.gz",
            gz_tar(&[
                ("bin/sh", &script("true"), 0o755),
                ("etc/hosts", b"127.0.0.1 localhost\n", 0o644),
            ]),
        ),
        (
            "/server.tgz",
            gz_tar(&[("bin/ollama", &script("sleep 30"), 0o644)]),
        ),
    ]
}

#[tokio::test]
async fn test_fresh_install_reaches_running() {
    let tmp = tempfile::tempdir().unwrap();
    let artifacts = serve_artifacts(good_routes(), vec![]).await;
    let mut options = base_options(tmp.path().join("sandbox"), &artifacts);
    options.listen_addr = serve_tags().await;

    let runtime = LocalRuntime::new(options).unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    runtime.setup(Some(tx)).await.unwrap();

    // The event stream is monotonic and ends at 100.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    for pair in events.windows(2) {
        assert!(pair[0].percent <= pair[1].percent);
    }
    assert_eq!(events.last().unwrap().percent, 100);

    let state = runtime.state();
    assert!(state.is_provisioned);
    assert!(state.is_runtime_installed);

    runtime.start().await.unwrap();
    assert!(matches!(runtime.status().await, ServerStatus::Running));
    assert!(runtime.last_error().is_none());

    runtime.stop().await;
}

#[tokio::test]
async fn test_corrupt_rootfs_is_classified_archive_failure() {
    let tmp = tempfile::tempdir().unwrap();
    // Rootfs image extracts but carries no shell at the marker path.
    let artifacts = serve_artifacts(
        vec![
            ("/interposer", script("sleep 30")),
            ("/rootfs.tar.gz", gz_tar(&[("etc/hosts", b"x", 0o644)])),
            (
                "/server.tgz",
                gz_tar(&[("bin/ollama", &script("sleep 30"), 0o644)]),
            ),
        ],
        vec![],
    )
    .await;
    let options = base_options(tmp.path().join("sandbox"), &artifacts);
    let runtime = LocalRuntime::new(options).unwrap();

    let err = runtime.setup(None).await.unwrap_err();
    assert!(matches!(err, ModelboxError::Archive(_)));

    let record = runtime.last_error().unwrap();
    assert_eq!(record.code, FailureCode::ArchiveInvalid);
    assert!(!runtime.state().is_provisioned);
}

#[tokio::test]
async fn test_start_without_rootfs_marker_refuses_to_spawn() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = SandboxLayout::new(tmp.path().join("sandbox"));
    layout.prepare().unwrap();

    // Binaries present, marker absent: a half-provisioned sandbox.
    std::fs::write(layout.interposition_bin(), script("sleep 30")).unwrap();
    std::fs::write(layout.server_bin(), script("sleep 30")).unwrap();

    let mut options = RuntimeOptions::default()
        .with_home_dir(tmp.path().join("sandbox"))
        .with_strategy(Strategy::Interposition);
    options.listen_addr = "127.0.0.1:1".to_string();
    let runtime = LocalRuntime::new(options).unwrap();

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(
        err,
        ModelboxError::MissingPrerequisite(Prerequisite::RootFilesystem)
    ));
    let record = runtime.last_error().unwrap();
    assert_eq!(record.code, FailureCode::RootfsMissing);
    assert!(record.code.remediation().contains("retry setup"));

    assert!(matches!(runtime.status().await, ServerStatus::NotInstalled));
}

#[tokio::test]
async fn test_truncated_download_recovers_on_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let routes = good_routes();
    let rootfs_len = routes
        .iter()
        .find(|(path, _)| *path == "/rootfs.tar.gz")
        .map(|(_, body)| body.len())
        .unwrap();
    // First rootfs request is cut at ~42% of the declared length.
    let artifacts = serve_artifacts(routes, vec![("/rootfs.tar.gz", rootfs_len * 42 / 100)]).await;
    let mut options = base_options(tmp.path().join("sandbox"), &artifacts);
    options.listen_addr = serve_tags().await;
    let runtime = LocalRuntime::new(options.clone()).unwrap();

    let err = runtime.setup(None).await.unwrap_err();
    assert!(err.is_network());
    let record = runtime.last_error().unwrap();
    assert_eq!(record.code, FailureCode::DownloadFailed);

    // The truncated transfer never took the final name; the partial stays.
    let layout = SandboxLayout::new(options.home_dir.clone());
    assert!(!layout.tmp_dir().join("rootfs.tar.gz").exists());
    assert!(layout.tmp_dir().join("rootfs.tar.gz.part").exists());

    // Plain re-invocation completes and clears the failure record.
    runtime.setup(None).await.unwrap();
    assert!(runtime.last_error().is_none());
    assert!(runtime.state().is_runtime_installed);

    runtime.start().await.unwrap();
    assert!(matches!(runtime.status().await, ServerStatus::Running));
    runtime.stop().await;
}

#[tokio::test]
async fn test_early_exit_carries_stderr_into_record() {
    let tmp = tempfile::tempdir().unwrap();
    // DirectBinary so the spawned process is the server script itself.
    let artifacts = serve_artifacts(
        vec![(
            "/server.tgz",
            gz_tar(&[(
                "bin/ollama",
                &script("echo address already in use >&2; sleep 0.2; exit 1"),
                0o644,
            )]),
        )],
        vec![],
    )
    .await;
    let mut options = base_options(tmp.path().join("sandbox"), &artifacts);
    options.strategy = Strategy::DirectBinary;
    // Nothing listens here; readiness can only end via the exit probe.
    options.listen_addr = "127.0.0.1:1".to_string();
    let runtime = LocalRuntime::new(options).unwrap();

    runtime.setup(None).await.unwrap();
    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, ModelboxError::ProcessExited { .. }));

    let record = runtime.last_error().unwrap();
    assert_eq!(record.code, FailureCode::ProcessExited);
    assert!(record.message.contains("address already in use"));
}
