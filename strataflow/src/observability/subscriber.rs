//! Global `tracing` subscriber installation.

use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Builds the log filter: `RUST_LOG` when set, the configured level otherwise.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::invalid("logging.level", e.to_string()))
}

/// Installs the global subscriber.
///
/// Fails if the level is not a valid filter directive or if a subscriber
/// was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };
    installed.map_err(|e| ConfigError::Load(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "strataflow=[".to_string(),
            json: false,
        };
        assert!(matches!(build_filter(&config), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_level_directive_accepted() {
        let config = LoggingConfig {
            level: "strataflow=debug,warn".to_string(),
            json: true,
        };
        assert!(build_filter(&config).is_ok());
    }
}
