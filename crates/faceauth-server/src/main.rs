use std::process::ExitCode;

use clap::Parser;
use faceauth_server::cli::Cli;
use faceauth_server::commands::handler_for;
use faceauth_server::output::render_error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = cli.output_mode();
    init_tracing(cli.verbose);

    let handler = handler_for(cli.command(), cli.options.clone());
    match handler.execute(mode, cli.verbose > 0).await {
        Ok(code) => code,
        Err(err) => {
            render_error(&err, mode);
            err.exit_code()
        }
    }
}

/// Logs always go to stderr so `--json` output on stdout stays machine-readable.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_target(verbose > 0)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(fmt_layer);
    if tracing::subscriber::set_global_default(registry).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}
