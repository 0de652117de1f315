//! Session configuration.
//!
//! Values are merged from, lowest priority first:
//! 1. built-in defaults
//! 2. `tether.config.json` in the project root (when present)
//! 3. `TETHER_*` environment variables

use crate::error::{ConfigError, Result};
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tether_runtime::BuildDefaults;

pub const CONFIG_FILE: &str = "tether.config.json";

/// Dev session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address of the stream and control server
    pub addr: SocketAddr,
    /// Per-subscriber queue capacity on the event bus
    pub subscriber_capacity: usize,
    pub build_concurrency: Option<usize>,
    /// Takes precedence over `build_concurrency` for function builds
    pub build_concurrency_function: Option<usize>,
    pub build: BuildDefaults,
    /// Extra watcher ignore patterns (`node_modules`, `*.log`)
    pub watch_ignore: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 13557)),
            subscriber_capacity: tether_bus::DEFAULT_CAPACITY,
            build_concurrency: None,
            build_concurrency_function: None,
            build: BuildDefaults::default(),
            watch_ignore: vec!["node_modules".to_string()],
            debounce_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Loads configuration for the project at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(root.join(CONFIG_FILE))
    }

    /// Loads configuration from an explicit file path. A missing file is not an
    /// error; defaults and environment still apply.
    #[allow(clippy::disallowed_methods)] // runs before the session starts
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if path.is_file() {
            figment = figment.merge(Json::file(&path));
        }

        // TETHER_BUILD_CONCURRENCY, TETHER_ADDR, ...
        figment = figment.merge(Env::prefixed("TETHER_"));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "subscriber_capacity".to_string(),
                value: "0".to_string(),
                hint: "Use a capacity of at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Effective build concurrency; zero overrides are ignored.
    pub fn concurrency_limit(&self) -> usize {
        tether_runtime::concurrency_limit(self.build_concurrency_function, self.build_concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.addr.port(), 13557);
        assert_eq!(config.subscriber_capacity, 256);
        assert_eq!(config.concurrency_limit(), 4);
        assert_eq!(config.debounce_ms, 100);
    }

    #[test]
    fn test_file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"{
                    "build_concurrency": 8,
                    "subscriber_capacity": 32,
                    "build": {"target": "es2022", "conditions": ["node"]}
                }"#,
            )?;
            jail.set_env("TETHER_BUILD_CONCURRENCY_FUNCTION", "2");

            let config = SessionConfig::load(jail.directory()).expect("config loads");
            assert_eq!(config.subscriber_capacity, 32);
            assert_eq!(config.build_concurrency, Some(8));
            assert_eq!(config.build_concurrency_function, Some(2));
            assert_eq!(config.concurrency_limit(), 2);
            assert_eq!(config.build.target, tether_runtime::Target::Es2022);
            assert_eq!(config.build.conditions, vec!["node"]);
            assert!(config.build.keep_names);
            Ok(())
        });
    }

    #[test]
    fn test_env_only() {
        Jail::expect_with(|jail| {
            jail.set_env("TETHER_BUILD_CONCURRENCY", "6");
            jail.set_env("TETHER_ADDR", "127.0.0.1:4000");

            let config = SessionConfig::load(jail.directory()).expect("config loads");
            assert_eq!(config.concurrency_limit(), 6);
            assert_eq!(config.addr.port(), 4000);
            Ok(())
        });
    }

    #[test]
    fn test_zero_capacity_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"{"subscriber_capacity": 0}"#)?;
            let err = SessionConfig::load(jail.directory()).unwrap_err();
            assert!(err.to_string().contains("subscriber_capacity"));
            Ok(())
        });
    }

    #[test]
    fn test_zero_concurrency_override_ignored() {
        let config = SessionConfig {
            build_concurrency: Some(3),
            build_concurrency_function: Some(0),
            ..Default::default()
        };
        assert_eq!(config.concurrency_limit(), 3);
    }
}
