pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use app::AppState;
pub use config::ProxyConfig;
pub use crate::core::{Forwarder, RetryPolicy};
pub use utils::error::{ProxyError, Result};
