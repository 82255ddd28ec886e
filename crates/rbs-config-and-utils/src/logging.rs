//! Logging initialization for the client.
//!
//! Hosts call [`init_logging`] once at startup and use `tracing` macros
//! everywhere else. Library crates never install a subscriber themselves.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level filter. `RUST_LOG` takes precedence.
    pub default_level: String,
    /// Emit compact human-readable lines on stderr.
    pub also_stderr: bool,
    /// Append JSON lines to this file when set.
    pub json_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".into(),
            also_stderr: true,
            json_file: None,
        }
    }
}

/// Initialize stderr logging at the given default level.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("client started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_with_config(LogConfig {
        default_level: level.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_logging_with_config(config: LogConfig) {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
    } else {
        None
    };

    let json_layer = config.json_file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("failed to create log directory {:?}: {}", parent, e);
                return None;
            }
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter()),
            ),
            Err(e) => {
                eprintln!("failed to open log file {:?}: {}", path, e);
                None
            }
        }
    });

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();
}
