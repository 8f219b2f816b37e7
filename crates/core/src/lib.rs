pub mod canonical;
pub mod classify;
pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{ApiError, CrawlError};
pub use types::*;
