//! Layered CLI configuration.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults, with the `STRATUS_LOG*` and `STRATUS_ENGINE_*`
//!    variables the library crates read themselves;
//! 2. the TOML file given with `--config`;
//! 3. `STRATUS_<SECTION>__<FIELD>` variables, e.g.
//!    `STRATUS_ENGINE__EVENT_BUS_CAPACITY=64` or `STRATUS_LOG__FORMAT=json`.
//!
//! ```toml
//! [engine]
//! default_timeout = 30000
//! max_adviser_fallback_depth = 4
//!
//! [log]
//! level = "stratus=debug,info"
//! format = "pretty"
//! ```

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use stratus_engine::EngineConfig;
use stratus_log::{LogConfig, Writer};

/// Everything the `stratus` binary can be configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine tunables.
    pub engine: EngineConfig,
    /// Logger setup. Logs go to stderr so stdout stays machine readable.
    pub log: LogConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log: LogConfig {
                level: "warn".to_string(),
                writer: Writer::Stderr,
                ..LogConfig::default()
            },
        }
    }
}

impl Settings {
    /// Defaults with the library-level environment overrides applied.
    fn base() -> Self {
        let defaults = Self::default();
        Self {
            engine: EngineConfig::from_env(),
            log: defaults.log.with_env_overrides(),
        }
    }

    /// The figment behind [`Settings::load`].
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::base()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        // Only nested keys: `STRATUS_LOG` and `STRATUS_CONFIG` mean something else.
        figment.merge(
            Env::prefixed("STRATUS_")
                .filter(|key| key.as_str().contains("__"))
                .split("__"),
        )
    }

    /// Loads the layered configuration.
    ///
    /// # Errors
    ///
    /// A missing configuration file, unparsable TOML, or values of the wrong
    /// type.
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        if let Some(path) = file
            && !path.is_file()
        {
            return Err(figment::Error::from(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }
        let settings: Self = Self::figment(file).extract()?;
        tracing::debug!(?settings, "configuration loaded");
        Ok(settings)
    }
}
