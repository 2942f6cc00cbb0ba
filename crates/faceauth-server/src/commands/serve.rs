use std::any::Any;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use faceauth_config::ResolvedConfigWithSource;
use faceauth_core::faces::encoder::FaceEncoder;
use faceauth_core::faces::gallery::Gallery;
use faceauth_core::faces::spool::SpoolEncoder;
use faceauth_core::service::FaceAuthService;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{ConfigArgs, OutputMode, ServeArgs};
use crate::commands::CommandHandler;
use crate::config::{apply_serve_overrides, open_store, resolve_config, resolve_listen_addr};
use crate::errors::AppResult;
use crate::output::render_serve_started;
use crate::server::{ConnectionServer, ServerSettings};

#[derive(Debug, Clone, Serialize)]
pub struct ServeSummary {
    pub address: String,
    pub database: String,
    pub spool_dir: String,
    pub identities: usize,
}

pub struct ServeHandler {
    args: ServeArgs,
    options: ConfigArgs,
}

impl ServeHandler {
    pub fn new(args: ServeArgs, options: ConfigArgs) -> Self {
        Self { args, options }
    }

    pub fn args(&self) -> &ServeArgs {
        &self.args
    }
}

/// Opens the gallery, loads it, and binds the listener. Nothing is accepted
/// until the returned server is run.
pub async fn prepare_server(
    config: &ResolvedConfigWithSource,
) -> AppResult<(ConnectionServer, ServeSummary)> {
    let resolved = &config.resolved;
    let store = open_store(config)?;
    let gallery = Arc::new(Gallery::new(store, resolved.embedding_dimension));
    let identities = gallery.load()?;

    let encoder: Arc<dyn FaceEncoder> = Arc::new(SpoolEncoder::new(
        resolved.spool_dir.clone(),
        resolved.frame_interval,
    ));
    let service = Arc::new(FaceAuthService::from_config(gallery, encoder, resolved));

    let addr = resolve_listen_addr(&resolved.listen_host, resolved.listen_port).await?;
    let server = ConnectionServer::bind(
        addr,
        service,
        ServerSettings {
            max_request_bytes: resolved.max_request_bytes,
        },
    )
    .await?;

    let summary = ServeSummary {
        address: server.local_addr()?.to_string(),
        database: resolved.database_path.display().to_string(),
        spool_dir: resolved.spool_dir.display().to_string(),
        identities,
    };
    Ok((server, summary))
}

#[async_trait]
impl CommandHandler for ServeHandler {
    async fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let mut config = resolve_config(&self.options)?;
        apply_serve_overrides(&mut config, &self.args);

        let (server, summary) = prepare_server(&config).await?;
        render_serve_started(&summary, mode)?;

        let shutdown = server.shutdown_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received shutdown signal");
                    shutdown.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
            }
        });

        server.run().await?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
