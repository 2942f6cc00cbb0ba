use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::errors::AppResult;
use crate::faces::encoder::{CaptureSession, FaceEncoder, FaceExtractionSummary, RawSample};

const SCRIPTED_SOURCE: &str = "scripted";

/// Deterministic in-process encoder that replays queued frames.
///
/// Each frame is the list of face embeddings the "camera" sees. When the
/// queue is drained and no repeating frame is set, captures stall until a
/// frame is pushed, like a frozen camera.
#[derive(Clone, Default)]
pub struct ScriptedEncoder {
    inner: Arc<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    frames: Mutex<VecDeque<Vec<Vec<f64>>>>,
    repeat: Mutex<Option<Vec<Vec<f64>>>>,
    arrived: Notify,
    opened: AtomicUsize,
    active: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(frames: impl IntoIterator<Item = Vec<Vec<f64>>>) -> Self {
        let encoder = Self::new();
        encoder.inner.frames.lock().extend(frames);
        encoder
    }

    /// Serves `frame` whenever the queue is empty.
    pub fn repeating(frame: Vec<Vec<f64>>) -> Self {
        let encoder = Self::new();
        *encoder.inner.repeat.lock() = Some(frame);
        encoder.inner.arrived.notify_waiters();
        encoder
    }

    pub fn push_frame(&self, faces: Vec<Vec<f64>>) {
        self.inner.frames.lock().push_back(faces);
        self.inner.arrived.notify_waiters();
    }

    pub fn push_face(&self, embedding: Vec<f64>) {
        self.push_frame(vec![embedding]);
    }

    pub fn remaining(&self) -> usize {
        self.inner.frames.lock().len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl ScriptedState {
    fn next_frame(&self) -> Option<Vec<Vec<f64>>> {
        if let Some(frame) = self.frames.lock().pop_front() {
            return Some(frame);
        }
        self.repeat.lock().clone()
    }
}

#[async_trait]
impl FaceEncoder for ScriptedEncoder {
    fn name(&self) -> &str {
        SCRIPTED_SOURCE
    }

    async fn open_session(&self) -> AppResult<Box<dyn CaptureSession>> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.inner),
        }))
    }

    fn detect_and_encode(&self, sample: &RawSample) -> AppResult<Vec<Vec<f64>>> {
        Ok(FaceExtractionSummary::parse(sample)?.into_embeddings())
    }
}

struct ScriptedSession {
    state: Arc<ScriptedState>,
}

#[async_trait]
impl CaptureSession for ScriptedSession {
    async fn capture_sample(&mut self) -> AppResult<RawSample> {
        loop {
            let arrived = self.state.arrived.notified();
            if let Some(frame) = self.state.next_frame() {
                return FaceExtractionSummary::from_embeddings(frame).to_sample(SCRIPTED_SOURCE);
            }
            arrived.await;
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}
