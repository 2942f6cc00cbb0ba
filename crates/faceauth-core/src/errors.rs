use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use faceauth_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid identity name '{name}': {message}")]
    InvalidName { name: String, message: String },

    #[error("registration already in progress for {name}")]
    EnrollmentInProgress { name: String },

    #[error("insufficient captures: {captured} of {required} required")]
    InsufficientCaptures { captured: usize, required: usize },

    #[error("vector dimension mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("no identity named {name}")]
    IdentityNotFound { name: String },

    #[error("stored vector for {name} is corrupt: {message}")]
    CorruptVector { name: String, message: String },

    #[error("no face detected")]
    NoFaceDetected,

    #[error("multiple faces detected ({count}); exactly one face is required")]
    MultipleFaces { count: usize },

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("capture device busy: {0}")]
    DeviceBusy(String),

    #[error("capture timed out after {}s", timeout.as_secs_f64())]
    CaptureTimeout { timeout: Duration },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("vector store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to prepare store location {path}: {source}")]
    StorePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid listen address '{0}'")]
    ListenAddress(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Validation,
    CaptureQuality,
    Cancelled,
    Fatal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidName { .. }
            | AppError::EnrollmentInProgress { .. }
            | AppError::InsufficientCaptures { .. }
            | AppError::DimensionMismatch { .. }
            | AppError::IdentityNotFound { .. }
            | AppError::CorruptVector { .. } => ErrorKind::Validation,
            AppError::NoFaceDetected
            | AppError::MultipleFaces { .. }
            | AppError::EncodingFailed(_) => ErrorKind::CaptureQuality,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Bind { .. } | AppError::ListenAddress(_) | AppError::Config(_) => {
                ErrorKind::Fatal
            }
            _ => ErrorKind::Transient,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) => ExitCode::from(2),
            AppError::ListenAddress(_) => ExitCode::from(2),
            AppError::InvalidName { .. } => ExitCode::from(2),
            AppError::IdentityNotFound { .. } => ExitCode::from(2),
            AppError::Store(_) => ExitCode::from(3),
            AppError::StorePath { .. } => ExitCode::from(3),
            AppError::CorruptVector { .. } => ExitCode::from(3),
            AppError::DimensionMismatch { .. } => ExitCode::from(3),
            AppError::Bind { .. } => ExitCode::from(4),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::TaskFailed(err.to_string())
    }
}
