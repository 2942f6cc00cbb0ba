use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/faceauth/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/faceauth/config.toml";
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;
pub const DEFAULT_MIN_CAPTURES: usize = 5;
pub const DEFAULT_ATTEMPTS_PER_CAPTURE: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_INTERVAL_MILLIS: u64 = 500;
pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/faceauth/gallery.sqlite3";
pub const DEFAULT_STORE_BUSY_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_SPOOL_DIR: &str = "/var/lib/faceauth/spool";
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub similarity_threshold: Option<f64>,
    pub min_captures: Option<usize>,
    pub max_capture_attempts: Option<usize>,
    pub capture_timeout_secs: Option<u64>,
    pub frame_interval_millis: Option<u64>,
    pub database_path: Option<PathBuf>,
    pub store_busy_timeout_millis: Option<u64>,
    pub spool_dir: Option<PathBuf>,
    pub embedding_dimension: Option<usize>,
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub max_request_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub similarity_threshold: f64,
    pub min_captures: usize,
    pub max_capture_attempts: usize,
    pub capture_timeout: Duration,
    pub frame_interval: Duration,
    pub database_path: PathBuf,
    pub store_busy_timeout: Duration,
    pub spool_dir: PathBuf,
    pub embedding_dimension: Option<usize>,
    pub listen_host: String,
    pub listen_port: u16,
    pub max_request_bytes: usize,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let min_captures = raw.min_captures.unwrap_or(DEFAULT_MIN_CAPTURES).max(1);
        Self {
            similarity_threshold: raw
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD)
                .clamp(0.0, 1.0),
            min_captures,
            max_capture_attempts: raw
                .max_capture_attempts
                .unwrap_or(min_captures * DEFAULT_ATTEMPTS_PER_CAPTURE)
                .max(min_captures),
            capture_timeout: Duration::from_secs(
                raw.capture_timeout_secs
                    .unwrap_or(DEFAULT_TIMEOUT_SECS)
                    .max(1),
            ),
            frame_interval: Duration::from_millis(
                raw.frame_interval_millis.unwrap_or(DEFAULT_INTERVAL_MILLIS),
            ),
            database_path: raw
                .database_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            store_busy_timeout: Duration::from_millis(
                raw.store_busy_timeout_millis
                    .unwrap_or(DEFAULT_STORE_BUSY_TIMEOUT_MILLIS),
            ),
            spool_dir: raw
                .spool_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOOL_DIR)),
            embedding_dimension: raw.embedding_dimension.filter(|dim| *dim > 0),
            listen_host: raw
                .listen_host
                .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string()),
            listen_port: raw.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
            max_request_bytes: raw
                .max_request_bytes
                .unwrap_or(DEFAULT_MAX_REQUEST_BYTES)
                .max(64),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

/// Raw file contents together with the path they were read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

impl From<LoadedConfig> for ResolvedConfigWithSource {
    fn from(loaded: LoadedConfig) -> Self {
        Self {
            resolved: ResolvedConfig::from_raw(loaded.contents),
            source: Some(loaded.source),
        }
    }
}

impl ResolvedConfigWithSource {
    /// Built-in defaults, used when no config file exists.
    pub fn builtin() -> Self {
        Self {
            resolved: ResolvedConfig::default(),
            source: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub fn default_config_paths() -> Vec<PathBuf> {
    [PRIMARY_CONFIG_PATH, SECONDARY_CONFIG_PATH]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

/// An explicit path must exist; the default search paths may all be absent.
pub fn load_resolved_from_explicit(path: &Path) -> Result<ResolvedConfigWithSource, ConfigError> {
    match read_if_present(path)? {
        Some(contents) => Ok(LoadedConfig {
            contents: parse_config(path, &contents)?,
            source: path.to_path_buf(),
        }
        .into()),
        None => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "config file not found"),
        }),
    }
}

/// First existing file in `paths` wins; later candidates are not read.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        if let Some(contents) = read_if_present(path)? {
            return Ok(Some(LoadedConfig {
                contents: parse_config(path, &contents)?,
                source: path.clone(),
            }));
        }
    }
    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    Ok(load_from_paths(paths)?
        .map(ResolvedConfigWithSource::from)
        .unwrap_or_else(ResolvedConfigWithSource::builtin))
}

fn read_if_present(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_config(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str::<ConfigFile>(contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
