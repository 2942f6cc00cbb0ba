use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use faceauth_config::ResolvedConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult, ErrorKind};
use crate::faces::encoder::{
    capture_with_deadline, encode_single_face, open_session_with_deadline, FaceEncoder, RawSample,
};
use crate::faces::gallery::Gallery;
use crate::faces::store::CaptureMetadata;

pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentSettings {
    pub min_captures: usize,
    pub max_attempts: usize,
    pub capture_timeout: Duration,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self::from_config(&ResolvedConfig::default())
    }
}

impl EnrollmentSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            min_captures: config.min_captures,
            max_attempts: config.max_capture_attempts,
            capture_timeout: config.capture_timeout,
        }
    }
}

/// Names with an enrollment in flight.
#[derive(Debug, Default, Clone)]
pub struct NameLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl NameLocks {
    pub fn try_acquire(&self, name: &str) -> AppResult<NameLease> {
        let mut held = self.held.lock();
        if !held.insert(name.to_string()) {
            return Err(AppError::EnrollmentInProgress {
                name: name.to_string(),
            });
        }
        Ok(NameLease {
            name: name.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }
}

/// Exclusive claim on a name; released on drop.
#[derive(Debug)]
pub struct NameLease {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl NameLease {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.name);
    }
}

/// Captures accepted so far for one enrollment. Nothing here is visible to
/// other sessions until it is committed.
#[derive(Debug)]
pub struct PendingEnrollment {
    lease: NameLease,
    captures: Vec<Vec<f64>>,
    attempts: usize,
    source: Option<String>,
    started_at: DateTime<Utc>,
}

impl PendingEnrollment {
    pub fn name(&self) -> &str {
        self.lease.name()
    }

    pub fn accepted(&self) -> usize {
        self.captures.len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn dimension(&self) -> Option<usize> {
        self.captures.first().map(Vec::len)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnrollmentOutcome {
    pub name: String,
    pub captures: usize,
    pub attempts: usize,
    pub dimension: usize,
    pub committed_at: DateTime<Utc>,
}

pub struct EnrollmentPipeline {
    gallery: Arc<Gallery>,
    settings: EnrollmentSettings,
    locks: NameLocks,
}

impl EnrollmentPipeline {
    pub fn new(gallery: Arc<Gallery>, settings: EnrollmentSettings) -> Self {
        Self {
            gallery,
            settings,
            locks: NameLocks::default(),
        }
    }

    pub fn settings(&self) -> &EnrollmentSettings {
        &self.settings
    }

    pub fn locks(&self) -> &NameLocks {
        &self.locks
    }

    pub fn begin_capture(&self, name: &str) -> AppResult<PendingEnrollment> {
        validate_name(name)?;
        let lease = self.locks.try_acquire(name)?;
        debug!(name = %name, "enrollment started");
        Ok(PendingEnrollment {
            lease,
            captures: Vec::with_capacity(self.settings.min_captures),
            attempts: 0,
            source: None,
            started_at: Utc::now(),
        })
    }

    /// Encodes `sample` and keeps the vector when it holds exactly one valid
    /// face. Returns the number of accepted captures.
    pub fn add_capture(
        &self,
        pending: &mut PendingEnrollment,
        sample: &RawSample,
        encoder: &dyn FaceEncoder,
    ) -> AppResult<usize> {
        pending.attempts += 1;
        let expected = pending.dimension().or_else(|| self.gallery.dimension());
        let embedding = encode_single_face(encoder, sample, expected).map_err(|err| match err {
            AppError::DimensionMismatch { expected, found } => AppError::EncodingFailed(format!(
                "encoder produced {found} values, expected {expected}"
            )),
            other => other,
        })?;

        pending.captures.push(embedding);
        if pending.source.is_none() {
            pending.source = Some(encoder.name().to_string());
        }
        Ok(pending.captures.len())
    }

    pub async fn commit(&self, pending: PendingEnrollment) -> AppResult<EnrollmentOutcome> {
        let required = self.settings.min_captures;
        if pending.captures.len() < required {
            return Err(AppError::InsufficientCaptures {
                captured: pending.captures.len(),
                required,
            });
        }

        let vector = mean_vector(&pending.captures)?;
        let dimension = vector.len();
        let metadata = CaptureMetadata {
            captures: pending.captures.len(),
            dimension,
            source: pending
                .source
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };
        let entry = self.gallery.upsert(pending.name(), vector, metadata).await?;

        let outcome = EnrollmentOutcome {
            name: entry.name,
            captures: pending.captures.len(),
            attempts: pending.attempts,
            dimension,
            committed_at: entry.created_at,
        };
        info!(
            name = %outcome.name,
            captures = outcome.captures,
            attempts = outcome.attempts,
            elapsed_ms = (outcome.committed_at - pending.started_at).num_milliseconds(),
            "enrollment committed"
        );
        Ok(outcome)
    }

    /// Runs a complete enrollment: holds one capture session until enough
    /// good samples are collected or attempts run out, then commits.
    pub async fn enroll(
        &self,
        name: &str,
        encoder: &dyn FaceEncoder,
        cancel: &CancellationToken,
    ) -> AppResult<EnrollmentOutcome> {
        let mut pending = self.begin_capture(name)?;
        let timeout = self.settings.capture_timeout;

        let mut session = open_session_with_deadline(encoder, timeout, cancel).await?;
        info!(
            name = %name,
            encoder = encoder.name(),
            required = self.settings.min_captures,
            max_attempts = self.settings.max_attempts,
            "capturing enrollment samples"
        );

        while pending.accepted() < self.settings.min_captures
            && pending.attempts < self.settings.max_attempts
        {
            match capture_with_deadline(&mut *session, timeout, cancel).await {
                Ok(sample) => match self.add_capture(&mut pending, &sample, encoder) {
                    Ok(accepted) => debug!(name = %name, accepted, "capture accepted"),
                    Err(err) if err.kind() == ErrorKind::CaptureQuality => {
                        warn!(name = %name, attempt = pending.attempts, reason = %err, "capture rejected");
                    }
                    Err(err) => return Err(err),
                },
                Err(err @ AppError::CaptureTimeout { .. }) => {
                    pending.attempts += 1;
                    warn!(name = %name, attempt = pending.attempts, reason = %err, "capture attempt timed out");
                }
                Err(err) => return Err(err),
            }
        }
        drop(session);

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.commit(pending).await
    }
}

pub fn validate_name(name: &str) -> AppResult<()> {
    let invalid = |message: &str| AppError::InvalidName {
        name: name.to_string(),
        message: message.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 64 characters"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(invalid(
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}

/// Component-wise arithmetic mean of equally sized vectors.
pub fn mean_vector(vectors: &[Vec<f64>]) -> AppResult<Vec<f64>> {
    let Some(first) = vectors.first() else {
        return Err(AppError::InsufficientCaptures {
            captured: 0,
            required: 1,
        });
    };

    let mut sum = vec![0.0; first.len()];
    for vector in vectors {
        if vector.len() != sum.len() {
            return Err(AppError::DimensionMismatch {
                expected: sum.len(),
                found: vector.len(),
            });
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
    }

    let count = vectors.len() as f64;
    Ok(sum.into_iter().map(|value| value / count).collect())
}
