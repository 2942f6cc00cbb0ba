use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::errors::{AppError, AppResult};
use crate::faces::encoder::{CaptureSession, FaceEncoder, FaceExtractionSummary, RawSample};

const SPOOL_EXTENSION: &str = "json";

/// Encoder fed by an external extractor that drops one face extraction
/// summary per captured frame into a spool directory.
///
/// The extractor must write each file under a dot-prefixed name and rename
/// it into place once complete; dot files are never picked up. Each capture
/// consumes the oldest summary. Only one session may hold the spool at a time.
pub struct SpoolEncoder {
    dir: PathBuf,
    poll_interval: Duration,
    device: Arc<Mutex<()>>,
}

impl SpoolEncoder {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: poll_interval.max(Duration::from_millis(10)),
            device: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FaceEncoder for SpoolEncoder {
    fn name(&self) -> &str {
        "spool"
    }

    async fn open_session(&self) -> AppResult<Box<dyn CaptureSession>> {
        let guard = Arc::clone(&self.device).try_lock_owned().map_err(|_| {
            AppError::DeviceBusy(format!(
                "spool {} is held by another session",
                self.dir.display()
            ))
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| {
                AppError::Capture(format!(
                    "failed to prepare spool {}: {err}",
                    self.dir.display()
                ))
            })?;
        debug!(dir = %self.dir.display(), "acquired capture spool");

        Ok(Box::new(SpoolSession {
            dir: self.dir.clone(),
            poll_interval: self.poll_interval,
            _guard: guard,
        }))
    }

    fn detect_and_encode(&self, sample: &RawSample) -> AppResult<Vec<Vec<f64>>> {
        Ok(FaceExtractionSummary::parse(sample)?.into_embeddings())
    }
}

struct SpoolSession {
    dir: PathBuf,
    poll_interval: Duration,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl CaptureSession for SpoolSession {
    async fn capture_sample(&mut self) -> AppResult<RawSample> {
        loop {
            if let Some(path) = oldest_spool_entry(&self.dir).await? {
                let payload = tokio::fs::read(&path).await.map_err(|err| {
                    AppError::Capture(format!("failed to read {}: {err}", path.display()))
                })?;
                tokio::fs::remove_file(&path).await.map_err(|err| {
                    AppError::Capture(format!("failed to consume {}: {err}", path.display()))
                })?;
                return Ok(RawSample {
                    source: path.display().to_string(),
                    captured_at: Utc::now(),
                    payload,
                });
            }
            trace!(dir = %self.dir.display(), "spool empty; waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Drop for SpoolSession {
    fn drop(&mut self) {
        debug!(dir = %self.dir.display(), "released capture spool");
    }
}

async fn oldest_spool_entry(dir: &Path) -> AppResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| {
        AppError::Capture(format!("failed to list spool {}: {err}", dir.display()))
    })?;

    let mut oldest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let visible = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| !name.starts_with('.'))
            .unwrap_or(false);
        let is_summary = path
            .extension()
            .map(|ext| ext == SPOOL_EXTENSION)
            .unwrap_or(false);
        if !visible || !is_summary {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let replace = match &oldest {
            Some((time, current)) => (modified, &path) < (*time, current),
            None => true,
        };
        if replace {
            oldest = Some((modified, path));
        }
    }

    Ok(oldest.map(|(_, path)| path))
}
