use std::any::Any;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use faceauth_core::faces::store::VectorStore;

use crate::cli::{ConfigArgs, GalleryCommands, OutputMode};
use crate::commands::CommandHandler;
use crate::config;
use crate::errors::AppResult;
use crate::gallery::{self, IdentityHistory, IdentitySummary, RemovalOutcome};
use crate::output::{render_gallery_history, render_gallery_list, render_gallery_remove};

pub struct GalleryHandler {
    command: GalleryCommands,
    options: ConfigArgs,
    deps: GalleryHandlerDeps,
}

type StoreOpener = dyn Fn(&ConfigArgs) -> AppResult<Arc<dyn VectorStore>> + Send + Sync;

pub struct GalleryHandlerDeps {
    pub open_store: Box<StoreOpener>,
    pub render_list: Box<dyn Fn(&[IdentitySummary], OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_history: Box<dyn Fn(&IdentityHistory, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_remove: Box<dyn Fn(&RemovalOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl GalleryHandlerDeps {
    pub fn new(
        open_store: impl Fn(&ConfigArgs) -> AppResult<Arc<dyn VectorStore>> + Send + Sync + 'static,
        render_list: impl Fn(&[IdentitySummary], OutputMode) -> AppResult<()> + Send + Sync + 'static,
        render_history: impl Fn(&IdentityHistory, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
        render_remove: impl Fn(&RemovalOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            open_store: Box::new(open_store),
            render_list: Box::new(render_list),
            render_history: Box::new(render_history),
            render_remove: Box::new(render_remove),
        }
    }
}

impl Default for GalleryHandlerDeps {
    fn default() -> Self {
        Self::new(
            open_configured_store,
            render_gallery_list,
            render_gallery_history,
            render_gallery_remove,
        )
    }
}

fn open_configured_store(options: &ConfigArgs) -> AppResult<Arc<dyn VectorStore>> {
    let resolved = config::resolve_config(options)?;
    config::open_store(&resolved)
}

impl GalleryHandler {
    pub fn new(command: GalleryCommands, options: ConfigArgs) -> Self {
        Self::with_dependencies(command, options, GalleryHandlerDeps::default())
    }

    pub fn with_dependencies(
        command: GalleryCommands,
        options: ConfigArgs,
        deps: GalleryHandlerDeps,
    ) -> Self {
        Self {
            command,
            options,
            deps,
        }
    }
}

#[async_trait]
impl CommandHandler for GalleryHandler {
    async fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let store = (self.deps.open_store)(&self.options)?;
        match &self.command {
            GalleryCommands::List => {
                let identities = gallery::list_identities(store.as_ref())?;
                (self.deps.render_list)(&identities, mode)?;
            }
            GalleryCommands::History(args) => {
                let history = gallery::identity_history(store.as_ref(), &args.name)?;
                (self.deps.render_history)(&history, mode)?;
            }
            GalleryCommands::Remove(args) => {
                let outcome = gallery::remove_identity(store.as_ref(), &args.name)?;
                (self.deps.render_remove)(&outcome, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
