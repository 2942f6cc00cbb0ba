use std::net::IpAddr;
use std::path::PathBuf;

use faceauth_config::{
    default_config_paths, load_from_paths, load_resolved_from_explicit, ConfigError,
    ResolvedConfig, ResolvedConfigWithSource,
};
use faceauth_core::errors::AppResult;
use faceauth_core::faces::store::{SqliteVectorStore, VectorStore};
use serde::Serialize;

use crate::cli::ConfigArgs;

const CHECK_CONFIG: &str = "config";
const CHECK_GALLERY_STORE: &str = "gallery_store";
const CHECK_SPOOL_DIR: &str = "spool_dir";
const CHECK_LISTEN_ADDRESS: &str = "listen_address";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorOutcome {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

#[derive(Debug, Clone)]
pub struct DoctorContext {
    pub config_paths: Vec<PathBuf>,
    pub options: ConfigArgs,
}

impl DoctorContext {
    pub fn new(options: ConfigArgs) -> Self {
        Self {
            config_paths: default_config_paths(),
            options,
        }
    }
}

pub fn run_doctor(options: &ConfigArgs) -> AppResult<DoctorOutcome> {
    run_doctor_with(&DoctorContext::new(options.clone()))
}

pub fn run_doctor_with(ctx: &DoctorContext) -> AppResult<DoctorOutcome> {
    let (config_check, mut resolved) = check_config(ctx);
    if let Some(database) = &ctx.options.database {
        resolved.resolved.database_path = database.clone();
    }

    let checks = vec![
        config_check,
        check_gallery_store(&resolved.resolved),
        check_spool_dir(&resolved.resolved),
        check_listen_address(&resolved.resolved),
    ];
    let ok = checks.iter().all(|c| c.status != CheckStatus::Fail);

    Ok(DoctorOutcome { ok, checks })
}

fn check_config(ctx: &DoctorContext) -> (DoctorCheck, ResolvedConfigWithSource) {
    let failed = |err: ConfigError| {
        let path = err.path().to_path_buf();
        (
            check(CHECK_CONFIG, CheckStatus::Fail, err.to_string(), Some(path)),
            ResolvedConfigWithSource::builtin(),
        )
    };

    if let Some(explicit) = &ctx.options.config {
        return match load_resolved_from_explicit(explicit) {
            Ok(resolved) => (
                check(
                    CHECK_CONFIG,
                    CheckStatus::Pass,
                    format!("Loaded config from {}", explicit.display()),
                    Some(explicit.clone()),
                ),
                resolved,
            ),
            Err(err) => failed(err),
        };
    }

    let existing = ctx.config_paths.iter().filter(|p| p.exists()).count();
    match load_from_paths(&ctx.config_paths) {
        Ok(Some(entry)) => {
            let status = if existing > 1 {
                CheckStatus::Warn
            } else {
                CheckStatus::Pass
            };
            let message = if existing > 1 {
                format!(
                    "Several config files exist; using {}",
                    entry.source.display()
                )
            } else {
                format!("Loaded config from {}", entry.source.display())
            };
            (
                check(CHECK_CONFIG, status, message, Some(entry.source.clone())),
                ResolvedConfigWithSource::from(entry),
            )
        }
        Ok(None) => (
            check(
                CHECK_CONFIG,
                CheckStatus::Warn,
                format!(
                    "No config file found (tried {}); using built-in defaults",
                    display_paths(&ctx.config_paths)
                ),
                None,
            ),
            ResolvedConfigWithSource::builtin(),
        ),
        Err(err) => failed(err),
    }
}

fn check_gallery_store(config: &ResolvedConfig) -> DoctorCheck {
    let path = config.database_path.clone();
    if !path.exists() {
        return check(
            CHECK_GALLERY_STORE,
            CheckStatus::Warn,
            "Gallery database does not exist yet; it will be created on first start".into(),
            Some(path),
        );
    }

    let health = SqliteVectorStore::open(&path, config.store_busy_timeout)
        .and_then(|store| store.health());
    match health {
        Ok(health) if health.identities_table && health.vectors_table => check(
            CHECK_GALLERY_STORE,
            CheckStatus::Pass,
            format!(
                "SQLite {}; {} identities, {} vectors",
                health.sqlite_version, health.identities, health.vectors
            ),
            Some(path),
        ),
        Ok(_) => check(
            CHECK_GALLERY_STORE,
            CheckStatus::Fail,
            "Gallery schema is incomplete".into(),
            Some(path),
        ),
        Err(err) => check(
            CHECK_GALLERY_STORE,
            CheckStatus::Fail,
            format!("Failed to open gallery: {}", err.human_message()),
            Some(path),
        ),
    }
}

fn check_spool_dir(config: &ResolvedConfig) -> DoctorCheck {
    let path = config.spool_dir.clone();
    if path.is_dir() {
        check(
            CHECK_SPOOL_DIR,
            CheckStatus::Pass,
            "Capture spool directory is present".into(),
            Some(path),
        )
    } else if path.exists() {
        check(
            CHECK_SPOOL_DIR,
            CheckStatus::Fail,
            "Capture spool path is not a directory".into(),
            Some(path),
        )
    } else {
        check(
            CHECK_SPOOL_DIR,
            CheckStatus::Warn,
            "Capture spool directory is missing; it will be created on first capture".into(),
            Some(path),
        )
    }
}

fn check_listen_address(config: &ResolvedConfig) -> DoctorCheck {
    let display = format!("{}:{}", config.listen_host, config.listen_port);
    match config.listen_host.parse::<IpAddr>() {
        Ok(_) => check(
            CHECK_LISTEN_ADDRESS,
            CheckStatus::Pass,
            format!("Will listen on {display}"),
            None,
        ),
        Err(_) => check(
            CHECK_LISTEN_ADDRESS,
            CheckStatus::Warn,
            format!("{display} is not an IP literal; it is resolved at startup"),
            None,
        ),
    }
}

fn check(name: &str, status: CheckStatus, message: String, path: Option<PathBuf>) -> DoctorCheck {
    DoctorCheck {
        name: name.into(),
        status,
        message,
        path: path.map(|p| p.display().to_string()),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
