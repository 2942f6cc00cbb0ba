use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::commands::ServeSummary;
use crate::doctor::{CheckStatus, DoctorOutcome};
use crate::errors::{AppError, AppResult};
use crate::gallery::{IdentityHistory, IdentitySummary, RemovalOutcome};

fn write_json_line<T: Serialize + ?Sized>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_serve_started(summary: &ServeSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Listening on {} ({} enrolled identities, gallery {})",
                summary.address, summary.identities, summary.database
            );
            println!("Capture spool: {}", summary.spool_dir);
        }
        OutputMode::Json => write_json_line(summary)?,
    }
    Ok(())
}

pub fn render_gallery_list(identities: &[IdentitySummary], mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if identities.is_empty() {
                println!("No enrolled identities");
            }
            for identity in identities {
                let captures = identity
                    .captures
                    .map(|count| format!(", {count} captures"))
                    .unwrap_or_default();
                println!(
                    "{} (dimension {}{}) enrolled {}",
                    identity.name, identity.dimension, captures, identity.created_at
                );
            }
        }
        OutputMode::Json => write_json_line(identities)?,
    }
    Ok(())
}

pub fn render_gallery_history(history: &IdentityHistory, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("{}: {} stored vector(s)", history.name, history.vectors.len());
            for entry in &history.vectors {
                println!(
                    "  #{} dimension {} at {}{}",
                    entry.id,
                    entry.dimension,
                    entry.created_at,
                    entry
                        .source
                        .as_ref()
                        .map(|source| format!(" from {source}"))
                        .unwrap_or_default()
                );
            }
        }
        OutputMode::Json => write_json_line(history)?,
    }
    Ok(())
}

pub fn render_gallery_remove(outcome: &RemovalOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Removed {} ({} stored vector(s))",
                outcome.name, outcome.removed_vectors
            );
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_doctor(outcome: &DoctorOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for check in &outcome.checks {
                let label = match check.status {
                    CheckStatus::Pass => "PASS",
                    CheckStatus::Warn => "WARN",
                    CheckStatus::Fail => "FAIL",
                };
                match &check.path {
                    Some(path) => println!("[{label}] {}: {} ({path})", check.name, check.message),
                    None => println!("[{label}] {}: {}", check.name, check.message),
                }
            }
            if outcome.ok {
                println!("All checks passed or only produced warnings");
            } else {
                println!("One or more checks failed");
            }
        }
        OutputMode::Json => write_json_line(outcome)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}
