use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use faceauth_core::faces::enrollment::EnrollmentSettings;
use faceauth_core::faces::gallery::Gallery;
use faceauth_core::faces::scripted::ScriptedEncoder;
use faceauth_core::faces::store::{SqliteVectorStore, VectorStore};
use faceauth_core::service::FaceAuthService;
use faceauth_server::errors::AppResult;
use faceauth_server::protocol::{Response, Status};
use faceauth_server::server::{ConnectionServer, ServerSettings};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    service: Arc<FaceAuthService>,
    shutdown: CancellationToken,
    handle: JoinHandle<AppResult<()>>,
}

async fn start_server(encoder: ScriptedEncoder, settings: EnrollmentSettings) -> TestServer {
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    let gallery = Arc::new(Gallery::new(store, None));
    let service = Arc::new(FaceAuthService::new(
        gallery,
        Arc::new(encoder),
        settings,
        0.6,
    ));
    let server = ConnectionServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::clone(&service),
        ServerSettings {
            max_request_bytes: 1024,
        },
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run());
    TestServer {
        addr,
        service,
        shutdown,
        handle,
    }
}

fn settings(min_captures: usize, capture_timeout: Duration) -> EnrollmentSettings {
    EnrollmentSettings {
        min_captures,
        max_attempts: min_captures * 4,
        capture_timeout,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// True once the server has closed its side; a reset counts as closed.
    async fn closed(&mut self) -> bool {
        let mut line = String::new();
        match tokio::time::timeout(IO_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(read)) => read == 0,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }

    async fn recv(&mut self) -> Option<Response> {
        let mut line = String::new();
        let read = tokio::time::timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("response within timeout")
            .unwrap();
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn request(&mut self, line: &str) -> Response {
        self.send(line).await;
        self.recv().await.expect("connection closed unexpectedly")
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(IO_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn register_then_authenticate_over_tcp() {
    let encoder = ScriptedEncoder::repeating(vec![vec![0.11, 0.22, 0.33, 0.44]]);
    let server = start_server(encoder, settings(5, Duration::from_millis(500))).await;
    let mut client = Client::connect(server.addr).await;

    let pong = client.request(r#"{"command":"ping"}"#).await;
    assert_eq!(pong, Response::pong());

    let registered = client
        .request(r#"{"command":"register","name":"alice"}"#)
        .await;
    assert_eq!(registered.status, Status::Success);
    assert_eq!(registered.message, "registration successful for alice");

    let authenticated = client.request(r#"{"command":"authenticate"}"#).await;
    assert_eq!(authenticated.status, Status::Success);
    assert_eq!(authenticated.message, "authentication successful");
    assert_eq!(authenticated.user.as_deref(), Some("alice"));
    assert!((authenticated.confidence.unwrap() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_requests_keep_connection_open() {
    let server = start_server(ScriptedEncoder::new(), settings(5, Duration::from_millis(200))).await;
    let mut client = Client::connect(server.addr).await;

    let invalid = client.request("{bad json").await;
    assert_eq!(invalid, Response::error("Invalid JSON format"));

    let missing = client.request("{}").await;
    assert_eq!(missing.message, "Missing command");

    let unknown = client.request(r#"{"command":"dance"}"#).await;
    assert_eq!(unknown.message, "Unknown command: dance");

    let nameless = client.request(r#"{"command":"register"}"#).await;
    assert_eq!(nameless.message, "Name is required");

    let bad_name = client
        .request(r#"{"command":"register","name":"not valid!"}"#)
        .await;
    assert_eq!(bad_name.status, Status::Error);
    assert!(bad_name.message.contains("invalid identity name"));

    client.send("").await;
    let pong = client.request(r#"{"command":"ping"}"#).await;
    assert_eq!(pong.message, "pong");
}

#[tokio::test]
async fn authentication_against_empty_gallery_fails_cleanly() {
    let encoder = ScriptedEncoder::repeating(vec![vec![0.5, 0.5]]);
    let server = start_server(encoder, settings(5, Duration::from_millis(200))).await;
    let mut client = Client::connect(server.addr).await;

    let response = client.request(r#"{"command":"authenticate"}"#).await;
    assert_eq!(response, Response::error("authentication failed"));
}

#[tokio::test]
async fn capture_timeout_is_reported_as_failed_authentication() {
    let server = start_server(ScriptedEncoder::new(), settings(5, Duration::from_millis(50))).await;
    let mut client = Client::connect(server.addr).await;

    let response = client.request(r#"{"command":"authenticate"}"#).await;
    assert_eq!(response.status, Status::Error);
    assert!(response
        .message
        .starts_with("authentication failed: capture timed out"));
}

#[tokio::test]
async fn oversized_request_closes_connection() {
    let server = start_server(ScriptedEncoder::new(), settings(5, Duration::from_millis(200))).await;
    let mut client = Client::connect(server.addr).await;

    let huge = format!(r#"{{"command":"ping","pad":"{}"}}"#, "x".repeat(2000));
    client.send(&huge).await;
    let response = client.recv().await.expect("final error response");
    assert_eq!(response, Response::error("Request too large"));
    assert!(client.closed().await);

    let mut other = Client::connect(server.addr).await;
    assert_eq!(other.request(r#"{"command":"ping"}"#).await.message, "pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_register_different_names() {
    let encoder = ScriptedEncoder::repeating(vec![vec![0.3, 0.6, 0.9]]);
    let server = start_server(encoder, settings(3, Duration::from_millis(500))).await;

    let mut tasks = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client
                .request(&format!(r#"{{"command":"register","name":"{name}"}}"#))
                .await
        }));
    }
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status, Status::Success, "{response:?}");
    }

    let snapshot = server.service.gallery().snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(server.service.gallery().store().get_all().unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_registration_for_same_name_is_rejected() {
    let encoder = ScriptedEncoder::with_frames(vec![vec![vec![0.2, 0.8]]]);
    let server = start_server(encoder.clone(), settings(2, Duration::from_secs(2))).await;

    let mut first = Client::connect(server.addr).await;
    first.send(r#"{"command":"register","name":"alice"}"#).await;
    let locks = server.service.pipeline().locks().clone();
    wait_until(|| locks.is_held("alice") && encoder.remaining() == 0).await;

    let mut second = Client::connect(server.addr).await;
    let rejected = second
        .request(r#"{"command":"register","name":"alice"}"#)
        .await;
    assert_eq!(
        rejected,
        Response::error("registration already in progress for alice")
    );

    encoder.push_face(vec![0.4, 0.6]);
    let committed = first.recv().await.unwrap();
    assert_eq!(committed.message, "registration successful for alice");

    let entry = server
        .service
        .gallery()
        .snapshot()
        .get("alice")
        .cloned()
        .unwrap();
    assert!((entry.vector[0] - 0.3).abs() < 1e-9);
    assert!((entry.vector[1] - 0.7).abs() < 1e-9);
    assert_eq!(server.service.gallery().store().history("alice").unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_cancels_inflight_registration() {
    let encoder = ScriptedEncoder::new();
    let server = start_server(encoder.clone(), settings(5, Duration::from_secs(30))).await;

    let mut client = Client::connect(server.addr).await;
    client.send(r#"{"command":"register","name":"carol"}"#).await;
    wait_until(|| encoder.active_sessions() == 1).await;

    drop(client);
    wait_until(|| encoder.active_sessions() == 0).await;
    let locks = server.service.pipeline().locks().clone();
    wait_until(|| !locks.is_held("carol")).await;
    assert!(server.service.gallery().snapshot().is_empty());
}

#[tokio::test]
async fn disconnect_with_full_request_queue_cancels_registration() {
    let encoder = ScriptedEncoder::new();
    let server = start_server(encoder.clone(), settings(5, Duration::from_secs(30))).await;

    let mut client = Client::connect(server.addr).await;
    client.send(r#"{"command":"register","name":"carol"}"#).await;
    wait_until(|| encoder.active_sessions() == 1).await;
    for _ in 0..12 {
        client.send(r#"{"command":"ping"}"#).await;
    }

    drop(client);
    wait_until(|| encoder.active_sessions() == 0).await;
    let locks = server.service.pipeline().locks().clone();
    wait_until(|| !locks.is_held("carol")).await;
    assert!(server.service.gallery().snapshot().is_empty());
}

#[tokio::test]
async fn unterminated_json_object_is_answered() {
    let server = start_server(ScriptedEncoder::new(), settings(5, Duration::from_millis(200))).await;
    let mut client = Client::connect(server.addr).await;

    client
        .writer
        .write_all(br#"{"command":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(client.recv().await, Some(Response::pong()));

    client
        .writer
        .write_all(br#"{"command":"dance"}"#)
        .await
        .unwrap();
    let unknown = client.recv().await.unwrap();
    assert_eq!(unknown.message, "Unknown command: dance");
}

#[tokio::test]
async fn half_close_after_register_cancels_it() {
    let encoder = ScriptedEncoder::new();
    let server = start_server(encoder.clone(), settings(5, Duration::from_secs(30))).await;

    let mut client = Client::connect(server.addr).await;
    client.send(r#"{"command":"register","name":"dave"}"#).await;
    client.writer.shutdown().await.unwrap();

    let response = client.recv().await.expect("cancellation reported");
    assert_eq!(response, Response::error("operation cancelled"));
    assert!(client.closed().await);

    wait_until(|| encoder.active_sessions() == 0).await;
    let locks = server.service.pipeline().locks().clone();
    wait_until(|| !locks.is_held("dave")).await;
    assert!(server.service.gallery().snapshot().is_empty());
}

#[tokio::test]
async fn shutdown_stops_server_and_closes_sessions() {
    let server = start_server(ScriptedEncoder::new(), settings(5, Duration::from_millis(200))).await;
    let mut client = Client::connect(server.addr).await;
    assert_eq!(client.request(r#"{"command":"ping"}"#).await.message, "pong");

    server.shutdown.cancel();
    tokio::time::timeout(IO_TIMEOUT, server.handle)
        .await
        .expect("server stops")
        .unwrap()
        .unwrap();
    assert!(client.closed().await);
}
