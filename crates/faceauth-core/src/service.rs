use std::sync::Arc;
use std::time::Duration;

use faceauth_config::ResolvedConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::AppResult;
use crate::faces::encoder::{
    capture_with_deadline, encode_single_face, open_session_with_deadline, FaceEncoder,
};
use crate::faces::enrollment::{EnrollmentOutcome, EnrollmentPipeline, EnrollmentSettings};
use crate::faces::gallery::Gallery;
use crate::faces::matcher::{MatchEngine, MatchOutcome};

/// Everything a connection needs to register and authenticate faces,
/// shared by all sessions.
pub struct FaceAuthService {
    gallery: Arc<Gallery>,
    engine: MatchEngine,
    pipeline: EnrollmentPipeline,
    encoder: Arc<dyn FaceEncoder>,
    capture_timeout: Duration,
}

impl FaceAuthService {
    pub fn new(
        gallery: Arc<Gallery>,
        encoder: Arc<dyn FaceEncoder>,
        settings: EnrollmentSettings,
        threshold: f64,
    ) -> Self {
        let capture_timeout = settings.capture_timeout;
        Self {
            engine: MatchEngine::new(Arc::clone(&gallery), threshold),
            pipeline: EnrollmentPipeline::new(Arc::clone(&gallery), settings),
            gallery,
            encoder,
            capture_timeout,
        }
    }

    pub fn from_config(
        gallery: Arc<Gallery>,
        encoder: Arc<dyn FaceEncoder>,
        config: &ResolvedConfig,
    ) -> Self {
        Self::new(
            gallery,
            encoder,
            EnrollmentSettings::from_config(config),
            config.similarity_threshold,
        )
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn pipeline(&self) -> &EnrollmentPipeline {
        &self.pipeline
    }

    pub fn encoder(&self) -> &Arc<dyn FaceEncoder> {
        &self.encoder
    }

    pub async fn register(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> AppResult<EnrollmentOutcome> {
        self.pipeline
            .enroll(name, self.encoder.as_ref(), cancel)
            .await
    }

    /// Captures a single probe and matches it against the current gallery.
    pub async fn authenticate(&self, cancel: &CancellationToken) -> AppResult<MatchOutcome> {
        let sample = {
            let mut session =
                open_session_with_deadline(self.encoder.as_ref(), self.capture_timeout, cancel)
                    .await?;
            capture_with_deadline(&mut *session, self.capture_timeout, cancel).await?
        };
        let probe = encode_single_face(self.encoder.as_ref(), &sample, self.gallery.dimension())?;
        debug!(dimension = probe.len(), "probe encoded");

        let outcome = self.engine.authenticate(&probe)?;
        match &outcome {
            MatchOutcome::Matched(score) => {
                info!(user = %score.name, confidence = score.confidence, "authentication matched")
            }
            MatchOutcome::NoMatch { best } => info!(
                best = best.as_ref().map(|score| score.name.as_str()),
                confidence = best.as_ref().map(|score| score.confidence),
                "authentication rejected"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::faces::scripted::ScriptedEncoder;
    use crate::faces::store::{SqliteVectorStore, VectorStore};

    fn service_with(encoder: ScriptedEncoder, min_captures: usize) -> FaceAuthService {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let gallery = Arc::new(Gallery::new(store, None));
        FaceAuthService::new(
            gallery,
            Arc::new(encoder),
            EnrollmentSettings {
                min_captures,
                max_attempts: min_captures * 4,
                capture_timeout: Duration::from_millis(50),
            },
            0.6,
        )
    }

    #[tokio::test]
    async fn registered_face_authenticates() {
        let encoder = ScriptedEncoder::repeating(vec![vec![0.3, 0.4, 0.5]]);
        let service = service_with(encoder.clone(), 3);
        let cancel = CancellationToken::new();

        service.register("alice", &cancel).await.unwrap();
        let outcome = service.authenticate(&cancel).await.unwrap();
        let score = outcome.matched().unwrap();
        assert_eq!(score.name, "alice");
        assert!((score.confidence - 1.0).abs() < 1e-9);
        assert_eq!(encoder.active_sessions(), 0);
    }

    #[tokio::test]
    async fn empty_gallery_rejects_without_error() {
        let service = service_with(ScriptedEncoder::repeating(vec![vec![0.3, 0.4]]), 3);
        let outcome = service.authenticate(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch { best: None });
    }

    #[tokio::test]
    async fn frozen_camera_times_out_authentication() {
        let service = service_with(ScriptedEncoder::new(), 3);
        let err = service
            .authenticate(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CaptureTimeout { .. }));
    }
}
