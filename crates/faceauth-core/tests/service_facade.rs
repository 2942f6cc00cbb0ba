use std::sync::Arc;
use std::time::Duration;

use faceauth_core::errors::AppError;
use faceauth_core::faces::enrollment::EnrollmentSettings;
use faceauth_core::faces::gallery::Gallery;
use faceauth_core::faces::matcher::MatchOutcome;
use faceauth_core::faces::scripted::ScriptedEncoder;
use faceauth_core::faces::store::{SqliteVectorStore, VectorStore};
use faceauth_core::service::FaceAuthService;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn settings(min_captures: usize, capture_timeout: Duration) -> EnrollmentSettings {
    EnrollmentSettings {
        min_captures,
        max_attempts: min_captures * 4,
        capture_timeout,
    }
}

fn file_service(
    tmp: &TempDir,
    encoder: ScriptedEncoder,
    settings: EnrollmentSettings,
) -> FaceAuthService {
    let store: Arc<dyn VectorStore> = Arc::new(
        SqliteVectorStore::open(&tmp.path().join("gallery.sqlite3"), Duration::from_secs(5))
            .unwrap(),
    );
    let gallery = Arc::new(Gallery::new(store, None));
    gallery.load().unwrap();
    FaceAuthService::new(gallery, Arc::new(encoder), settings, 0.6)
}

#[tokio::test]
async fn enrolled_identity_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let face = vec![0.12, 0.34, 0.56, 0.78];
    let encoder = ScriptedEncoder::repeating(vec![face.clone()]);

    {
        let service = file_service(&tmp, encoder.clone(), settings(5, Duration::from_millis(200)));
        service
            .register("alice", &CancellationToken::new())
            .await
            .unwrap();
    }

    let service = file_service(&tmp, encoder, settings(5, Duration::from_millis(200)));
    assert_eq!(service.gallery().snapshot().len(), 1);
    let outcome = service.authenticate(&CancellationToken::new()).await.unwrap();
    let score = outcome.matched().expect("alice should match after reload");
    assert_eq!(score.name, "alice");
    assert!(score.confidence > 0.999);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_for_different_names_all_commit() {
    let tmp = TempDir::new().unwrap();
    let encoder = ScriptedEncoder::repeating(vec![vec![0.2, 0.4, 0.6]]);
    let service = Arc::new(file_service(
        &tmp,
        encoder,
        settings(3, Duration::from_millis(200)),
    ));

    let mut handles = Vec::new();
    for name in ["alice", "bob", "carol", "dave"] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.register(name, &CancellationToken::new()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = service.gallery().snapshot();
    let mut names: Vec<&str> = snapshot.entries().iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(service.gallery().store().get_all().unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_for_same_name_commit_once() {
    let tmp = TempDir::new().unwrap();
    // one good frame, then the camera freezes so the first enrollment keeps
    // holding the name while the second one arrives
    let encoder = ScriptedEncoder::with_frames(vec![vec![vec![0.5, 0.5]]]);
    let service = Arc::new(file_service(
        &tmp,
        encoder.clone(),
        settings(2, Duration::from_millis(300)),
    ));

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.register("alice", &CancellationToken::new()).await })
    };
    while !service.pipeline().locks().is_held("alice") {
        tokio::task::yield_now().await;
    }

    let second = service
        .register("alice", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(second.to_string(), "registration already in progress for alice");

    encoder.push_face(vec![0.7, 0.3]);
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.captures, 2);

    let history = service.gallery().store().history("alice").unwrap();
    assert_eq!(history.len(), 1);
    let entry = service.gallery().snapshot().get("alice").cloned().unwrap();
    assert!((entry.vector[0] - 0.6).abs() < 1e-9);
    assert!((entry.vector[1] - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn distant_probe_is_not_accepted() {
    let tmp = TempDir::new().unwrap();
    let encoder = ScriptedEncoder::with_frames(vec![vec![vec![0.1, 0.0, 0.0]]; 3]);
    let service = file_service(&tmp, encoder.clone(), settings(3, Duration::from_millis(200)));
    service
        .register("alice", &CancellationToken::new())
        .await
        .unwrap();

    encoder.push_face(vec![1.0, 0.0, 0.0]);
    match service.authenticate(&CancellationToken::new()).await.unwrap() {
        MatchOutcome::NoMatch { best: Some(best) } => {
            assert_eq!(best.name, "alice");
            assert!((best.distance - 0.9).abs() < 1e-9);
        }
        other => panic!("expected no match, got {other:?}"),
    }
}

#[tokio::test]
async fn probe_with_several_faces_is_a_capture_error() {
    let tmp = TempDir::new().unwrap();
    let encoder = ScriptedEncoder::with_frames(vec![vec![vec![0.1, 0.2], vec![0.3, 0.4]]]);
    let service = file_service(&tmp, encoder, settings(3, Duration::from_millis(200)));

    let err = service
        .authenticate(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MultipleFaces { count: 2 }));
}
