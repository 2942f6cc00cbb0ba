use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// One unprocessed sample handed out by a capture session.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceEmbeddingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    pub embedding: Vec<f64>,
}

/// Wire format of a sample payload: the faces an extractor found in one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceExtractionSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub faces: Vec<FaceEmbeddingRecord>,
}

impl FaceExtractionSummary {
    pub fn from_embeddings(embeddings: Vec<Vec<f64>>) -> Self {
        Self {
            image_path: None,
            faces: embeddings
                .into_iter()
                .map(|embedding| FaceEmbeddingRecord {
                    bounding_box: None,
                    embedding,
                })
                .collect(),
        }
    }

    pub fn parse(sample: &RawSample) -> AppResult<Self> {
        serde_json::from_slice(&sample.payload).map_err(|err| {
            AppError::EncodingFailed(format!(
                "sample from {} is not a face extraction summary: {err}",
                sample.source
            ))
        })
    }

    pub fn to_sample(&self, source: &str) -> AppResult<RawSample> {
        Ok(RawSample {
            source: source.to_string(),
            captured_at: Utc::now(),
            payload: serde_json::to_vec(self)?,
        })
    }

    pub fn into_embeddings(self) -> Vec<Vec<f64>> {
        self.faces.into_iter().map(|face| face.embedding).collect()
    }
}

/// A scoped hold on a capture device. The device is released when the
/// session is dropped.
#[async_trait]
pub trait CaptureSession: Send {
    async fn capture_sample(&mut self) -> AppResult<RawSample>;
}

#[async_trait]
pub trait FaceEncoder: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(&self) -> AppResult<Box<dyn CaptureSession>>;

    /// Returns one embedding per face found in the sample.
    fn detect_and_encode(&self, sample: &RawSample) -> AppResult<Vec<Vec<f64>>>;
}

/// Runs detection on `sample` and insists on exactly one usable face.
pub fn encode_single_face(
    encoder: &dyn FaceEncoder,
    sample: &RawSample,
    expected_dim: Option<usize>,
) -> AppResult<Vec<f64>> {
    let mut faces = encoder.detect_and_encode(sample)?;
    match faces.len() {
        0 => Err(AppError::NoFaceDetected),
        1 => {
            let embedding = faces.remove(0);
            validate_embedding(&embedding, expected_dim)?;
            Ok(embedding)
        }
        count => Err(AppError::MultipleFaces { count }),
    }
}

pub fn validate_embedding(embedding: &[f64], expected_dim: Option<usize>) -> AppResult<usize> {
    if embedding.is_empty() {
        return Err(AppError::EncodingFailed("embedding vector is empty".into()));
    }

    if let Some(expected) = expected_dim {
        if embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                found: embedding.len(),
            });
        }
    }

    if let Some(idx) = embedding.iter().position(|value| !value.is_finite()) {
        return Err(AppError::EncodingFailed(format!(
            "embedding component {idx} is not a finite number"
        )));
    }

    let magnitude = embedding
        .iter()
        .map(|value| value * value)
        .sum::<f64>()
        .sqrt();
    if magnitude <= f64::EPSILON {
        return Err(AppError::EncodingFailed(
            "embedding has zero magnitude".into(),
        ));
    }

    Ok(embedding.len())
}

pub async fn open_session_with_deadline(
    encoder: &dyn FaceEncoder,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<Box<dyn CaptureSession>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        opened = tokio::time::timeout(timeout, encoder.open_session()) => match opened {
            Ok(session) => session,
            Err(_) => Err(AppError::CaptureTimeout { timeout }),
        },
    }
}

/// Waits for one sample, bounded by `timeout` and aborted by `cancel`.
pub async fn capture_with_deadline(
    session: &mut dyn CaptureSession,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<RawSample> {
    let captured = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        captured = tokio::time::timeout(timeout, session.capture_sample()) => captured,
    };

    match captured {
        Ok(sample) => {
            let sample = sample?;
            debug!(source = %sample.source, bytes = sample.payload.len(), "captured sample");
            Ok(sample)
        }
        Err(_) => Err(AppError::CaptureTimeout { timeout }),
    }
}
