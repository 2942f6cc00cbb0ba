use std::any::Any;
use std::process::ExitCode;

use async_trait::async_trait;

use crate::cli::{Commands, ConfigArgs, OutputMode};
use crate::errors::AppResult;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod doctor;
mod gallery;
mod serve;

pub use doctor::DoctorHandler;
pub use gallery::{GalleryHandler, GalleryHandlerDeps};
pub use serve::{prepare_server, ServeHandler, ServeSummary};

pub fn handler_for(command: Commands, options: ConfigArgs) -> Box<dyn CommandHandler> {
    match command {
        Commands::Serve(args) => Box::new(ServeHandler::new(args, options)),
        Commands::Gallery(cmd) => Box::new(GalleryHandler::new(cmd, options)),
        Commands::Doctor => Box::new(DoctorHandler::new(options)),
    }
}

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        handler_for(command, ConfigArgs::default())
    }
}
