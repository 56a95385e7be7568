#![forbid(unsafe_code)]

pub mod config;
pub mod config_store;
pub mod diagnostics;
pub mod errors;
pub mod mcp;
pub mod models;
pub mod platform;
pub mod process;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
