use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use faceauth_config::{
    default_config_paths, load_resolved_from_explicit, load_resolved_from_paths,
    ResolvedConfigWithSource,
};
use faceauth_core::errors::{AppError, AppResult};
use faceauth_core::faces::store::{SqliteVectorStore, VectorStore};
use tracing::{debug, info};

use crate::cli::{ConfigArgs, ServeArgs};

/// Loads the config file and applies command line overrides on top.
pub fn resolve_config(options: &ConfigArgs) -> AppResult<ResolvedConfigWithSource> {
    let paths = default_config_paths();
    resolve_config_with_sources(options, &paths)
}

pub fn resolve_config_with_sources(
    options: &ConfigArgs,
    sources: &[PathBuf],
) -> AppResult<ResolvedConfigWithSource> {
    let mut loaded = match &options.config {
        Some(path) => load_resolved_from_explicit(path)?,
        None => load_resolved_from_paths(sources)?,
    };
    match &loaded.source {
        Some(source) => debug!(path = %source.display(), "loaded config"),
        None => debug!("no config file found; using built-in defaults"),
    }

    if let Some(database) = &options.database {
        loaded.resolved.database_path = database.clone();
    }
    Ok(loaded)
}

pub fn apply_serve_overrides(config: &mut ResolvedConfigWithSource, args: &ServeArgs) {
    if let Some(port) = args.port {
        config.resolved.listen_port = port;
    }
    if let Some(host) = &args.host {
        config.resolved.listen_host = host.clone();
    }
    if let Some(spool_dir) = &args.spool_dir {
        config.resolved.spool_dir = spool_dir.clone();
    }
}

pub async fn resolve_listen_addr(host: &str, port: u16) -> AppResult<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| AppError::ListenAddress(format!("{host}:{port}")))?;
    addrs
        .next()
        .ok_or_else(|| AppError::ListenAddress(format!("{host}:{port}")))
}

pub fn open_store(config: &ResolvedConfigWithSource) -> AppResult<Arc<dyn VectorStore>> {
    let store = SqliteVectorStore::open(
        &config.resolved.database_path,
        config.resolved.store_busy_timeout,
    )?;
    info!(path = %store.location(), "gallery store ready");
    Ok(Arc::new(store))
}
