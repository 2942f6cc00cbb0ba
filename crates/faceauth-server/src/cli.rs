use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "faceauth",
    about = "Face registration and authentication service over TCP",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub options: ConfigArgs,

    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Explicit config file (defaults to /etc/faceauth/config.toml, then /usr/local/etc/faceauth/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite gallery database (overrides config database_path)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// TCP port to listen on (overrides config listen_port, default 8080)
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface to bind (overrides config listen_host, default 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Directory the face extractor spools capture summaries into
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run the registration/authentication service (default)
    Serve(ServeArgs),
    /// Inspect or administer enrolled identities
    #[command(subcommand)]
    Gallery(GalleryCommands),
    /// Check configuration, gallery store, and capture spool
    Doctor,
}

#[derive(Debug, Clone, Subcommand)]
pub enum GalleryCommands {
    /// List enrolled identities
    List,
    /// Show every stored vector of one identity
    History(IdentityArgs),
    /// Remove an identity and all of its vectors
    Remove(IdentityArgs),
}

#[derive(Debug, Clone, Args)]
pub struct IdentityArgs {
    /// Identity name
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }

    /// The requested subcommand. Serve is the default; top-level serve flags
    /// fill in whatever an explicit `serve` leaves unset.
    pub fn command(&self) -> Commands {
        match &self.command {
            None => Commands::Serve(self.serve.clone()),
            Some(Commands::Serve(args)) => Commands::Serve(args.merged_with(&self.serve)),
            Some(other) => other.clone(),
        }
    }
}

impl ServeArgs {
    fn merged_with(&self, fallback: &ServeArgs) -> ServeArgs {
        ServeArgs {
            port: self.port.or(fallback.port),
            host: self.host.clone().or_else(|| fallback.host.clone()),
            spool_dir: self.spool_dir.clone().or_else(|| fallback.spool_dir.clone()),
        }
    }
}
