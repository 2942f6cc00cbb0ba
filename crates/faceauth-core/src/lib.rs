pub mod errors;
pub mod faces;
pub mod service;

pub use errors::{AppError, AppResult, ErrorKind};
pub use service::FaceAuthService;
