//! Core types, configuration, and utilities for the RBS client.

mod config;
mod error;
mod logging;
mod paths;
mod region;

pub use config::{Config, ReconnectConfig, DEFAULT_LOG_LEVEL, DEFAULT_REFRESH_SKEW_SECS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with_config, LogConfig};
pub use paths::Paths;
pub use region::{Endpoints, Region};
