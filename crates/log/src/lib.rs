#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Log
//!
//! Installs the global `tracing` subscriber for Stratus binaries and tests.
//!
//! ```rust,no_run
//! use stratus_log::{LogConfig, init};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init(&LogConfig::from_env())?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

mod config;
mod error;

pub use config::{Format, LogConfig, Writer};
pub use error::LogError;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Installs a global subscriber built from `config`.
///
/// # Errors
///
/// Returns [`LogError::Filter`] for unparsable directives and
/// [`LogError::AlreadyInitialized`] when a global subscriber already exists.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LogError::Filter {
        directives: config.level.clone(),
        message: e.to_string(),
    })?;

    let writer = match config.writer {
        Writer::Stdout => BoxMakeWriter::new(std::io::stdout),
        Writer::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.ansi)
        .with_target(config.target);

    let result = match config.format {
        Format::Pretty => builder.pretty().try_init(),
        Format::Compact => builder.compact().try_init(),
        Format::Json => builder.json().try_init(),
    };
    result.map_err(|e| LogError::AlreadyInitialized(e.to_string()))
}

/// Installs the test subscriber, writing through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test() {
    let config = LogConfig::test().with_env_overrides();
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_test_writer()
        .compact()
        .try_init();
}
