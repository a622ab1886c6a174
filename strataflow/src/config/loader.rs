//! Layered configuration loading.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables (`STRATAFLOW_` prefix, `__` between sections)

use super::EngineConfig;
use crate::errors::ConfigError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::path::Path;
use tracing::debug;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "STRATAFLOW_";

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads defaults, then `path` if given, then the environment, and
    /// validates the result.
    ///
    /// `STRATAFLOW_EXECUTOR__POLL_INTERVAL_MS=500` sets
    /// `executor.poll_interval_ms`.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`Self::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<EngineConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Loading config file");
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(prefix).split("__"));

        let config: EngineConfig = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string over the defaults, without the environment.
    pub fn from_toml_str(toml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BackoffStrategy;
    use std::io::Write;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = ConfigLoader::load_with_prefix(None, "STRATAFLOW_TEST_NONE_").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = ConfigLoader::from_toml_str(
            r#"
            [executor]
            poll_interval_ms = 500
            stage_timeout_secs = 120

            [executor.transport_retry]
            backoff_strategy = "linear"

            [assistant.assistant_ids]
            BLOC1 = "asst_pestel"
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.poll_interval_ms, 500);
        assert_eq!(config.executor.stage_timeout_secs, 120);
        assert_eq!(config.executor.post_tool_poll_interval_ms, 3000);
        assert_eq!(config.executor.transport_retry.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.assistant.assistant_for("BLOC1"), Some("asst_pestel"));
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[concurrency]\nmax_concurrent_per_session = 2\nmax_concurrent_global = 8").unwrap();

        std::env::set_var("STRATAFLOW_TEST_ENV_CONCURRENCY__MAX_CONCURRENT_GLOBAL", "3");
        std::env::set_var("STRATAFLOW_TEST_ENV_ASSISTANT__ASSISTANT_IDS__BLOC3", "asst_marche");
        let config = ConfigLoader::load_with_prefix(Some(file.path()), "STRATAFLOW_TEST_ENV_").unwrap();
        std::env::remove_var("STRATAFLOW_TEST_ENV_CONCURRENCY__MAX_CONCURRENT_GLOBAL");
        std::env::remove_var("STRATAFLOW_TEST_ENV_ASSISTANT__ASSISTANT_IDS__BLOC3");

        assert_eq!(config.concurrency.max_concurrent_per_session, 2);
        assert_eq!(config.concurrency.max_concurrent_global, 3);
        assert_eq!(config.assistant.assistant_for("BLOC3"), Some("asst_marche"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = ConfigLoader::load_with_prefix(
            Some(Path::new("/nonexistent/strataflow.toml")),
            "STRATAFLOW_TEST_MISSING_",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ConfigLoader::from_toml_str("[executor]\nsubmit_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
