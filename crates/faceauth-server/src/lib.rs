pub mod cli;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod gallery;
pub mod output;
pub mod protocol;
pub mod server;
pub mod session;

pub use faceauth_core::errors;
