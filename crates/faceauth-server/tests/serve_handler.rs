use std::time::Duration;

use faceauth_config::{ResolvedConfig, ResolvedConfigWithSource};
use faceauth_core::faces::encoder::FaceExtractionSummary;
use faceauth_core::faces::store::{CaptureMetadata, SqliteVectorStore, VectorStore};
use faceauth_server::commands::prepare_server;
use faceauth_server::protocol::{Response, Status};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

fn local_config(dir: &std::path::Path) -> ResolvedConfigWithSource {
    let resolved = ResolvedConfig {
        database_path: dir.join("gallery.sqlite3"),
        spool_dir: dir.join("spool"),
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        capture_timeout: Duration::from_secs(2),
        frame_interval: Duration::from_millis(10),
        ..ResolvedConfig::default()
    };
    ResolvedConfigWithSource {
        resolved,
        source: None,
    }
}

fn seed_gallery(config: &ResolvedConfigWithSource) {
    let store = SqliteVectorStore::open(
        &config.resolved.database_path,
        config.resolved.store_busy_timeout,
    )
    .unwrap();
    let metadata = CaptureMetadata {
        captures: 5,
        dimension: 3,
        source: "spool".into(),
    };
    store.put("alice", &[0.2, 0.4, 0.6], &metadata).unwrap();
}

async fn roundtrip(stream: &mut BufReader<TcpStream>, request: &str) -> Response {
    stream
        .get_mut()
        .write_all(format!("{request}\n").as_bytes())
        .await
        .unwrap();
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn prepared_server_loads_gallery_and_binds_ephemeral_port() {
    let dir = tempdir().unwrap();
    let config = local_config(dir.path());
    seed_gallery(&config);

    let (server, summary) = prepare_server(&config).await.unwrap();
    assert_eq!(summary.identities, 1);
    assert!(summary.address.starts_with("127.0.0.1:"));
    assert_ne!(server.local_addr().unwrap().port(), 0);
    assert_eq!(
        summary.database,
        config.resolved.database_path.display().to_string()
    );
}

#[tokio::test]
async fn spooled_frame_authenticates_enrolled_identity() {
    let dir = tempdir().unwrap();
    let config = local_config(dir.path());
    seed_gallery(&config);

    let (server, _summary) = prepare_server(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run());

    std::fs::create_dir_all(&config.resolved.spool_dir).unwrap();
    let frame = FaceExtractionSummary::from_embeddings(vec![vec![0.2, 0.4, 0.6]])
        .to_sample("test")
        .unwrap();
    std::fs::write(config.resolved.spool_dir.join("frame-0001.json"), frame.payload).unwrap();

    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let response = roundtrip(&mut stream, r#"{"command":"authenticate"}"#).await;
    assert_eq!(response.status, Status::Success, "{response:?}");
    assert_eq!(response.user.as_deref(), Some("alice"));
    assert!(!config.resolved.spool_dir.join("frame-0001.json").exists());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn occupied_port_is_reported_as_bind_error() {
    let dir = tempdir().unwrap();
    let mut config = local_config(dir.path());
    let (first, _summary) = prepare_server(&config).await.unwrap();
    config.resolved.listen_port = first.local_addr().unwrap().port();

    let err = match prepare_server(&config).await {
        Ok(_) => panic!("second bind on the same port should fail"),
        Err(err) => err,
    };
    assert!(err.to_string().starts_with("failed to bind listener"), "{err}");
}
