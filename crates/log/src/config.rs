//! Logger configuration and presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented.
    Pretty,
    /// Single line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Stream the log lines go to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error, keeping stdout free for command output.
    Stderr,
}

/// Logger configuration.
///
/// `level` is an `EnvFilter` directive string such as `"info"` or
/// `"stratus_engine=debug,info"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives.
    pub level: String,
    /// Output format.
    pub format: Format,
    /// Colored output.
    pub ansi: bool,
    /// Print the event target (module path).
    pub target: bool,
    /// Output stream.
    pub writer: Writer,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            ansi: true,
            target: true,
            writer: Writer::Stdout,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads `STRATUS_LOG` (falling back to `RUST_LOG`) for the level and
    /// `STRATUS_LOG_FORMAT` for the format. Unknown formats are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `STRATUS_LOG`, `RUST_LOG` and `STRATUS_LOG_FORMAT` on top of `self`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("STRATUS_LOG") {
            self.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.level = level;
        }
        if let Some(format) = std::env::var("STRATUS_LOG_FORMAT")
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }
        self
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            ansi: false,
            ..Self::default()
        }
    }

    /// Test configuration (compact, no colors, everything from stratus crates)
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "stratus=trace,warn".to_string(),
            format: Format::Compact,
            ansi: false,
            target: true,
            writer: Writer::Stdout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("pretty", Format::Pretty)]
    #[case("COMPACT", Format::Compact)]
    #[case("Json", Format::Json)]
    fn format_parses_case_insensitively(#[case] input: &str, #[case] expected: Format) {
        assert_eq!(input.parse::<Format>().unwrap(), expected);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!("logfmt".parse::<Format>().is_err());
    }

    #[test]
    fn presets() {
        assert_eq!(LogConfig::development().format, Format::Pretty);
        assert_eq!(LogConfig::production().format, Format::Json);
        assert!(!LogConfig::production().ansi);
        assert!(!LogConfig::test().ansi);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(
            config,
            LogConfig {
                format: Format::Json,
                ..LogConfig::default()
            }
        );
    }

    #[test]
    fn writer_reads_lowercase() {
        let config: LogConfig = serde_json::from_str(r#"{"writer":"stderr"}"#).unwrap();
        assert_eq!(config.writer, Writer::Stderr);
        assert_eq!(LogConfig::default().writer, Writer::Stdout);
    }
}
