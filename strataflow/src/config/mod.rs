//! Engine configuration.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration. See [`ConfigLoader`] for how sources are layered.

mod loader;

pub use loader::{ConfigLoader, ENV_PREFIX};

use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stage execution and polling.
    pub executor: ExecutorConfig,
    /// Concurrency limits for remote calls.
    pub concurrency: ConcurrencyConfig,
    /// Remote agent service.
    pub assistant: AssistantConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Checks value ranges across all sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        self.concurrency.validate()?;
        self.assistant.validate()?;
        Ok(())
    }
}

/// Polling cadence, budgets and transport retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Delay between status polls.
    pub poll_interval_ms: u64,
    /// Delay before the first poll after a tool output submission.
    pub post_tool_poll_interval_ms: u64,
    /// Budget of one stage inside a session.
    pub stage_timeout_secs: u64,
    /// Budget of a stage run on its own.
    pub single_stage_timeout_secs: u64,
    /// Backoff after transport failures.
    pub transport_retry: RetryConfig,
    /// Attempts for thread, message and run creation.
    pub submit_attempts: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            post_tool_poll_interval_ms: 3000,
            stage_timeout_secs: 300,
            single_stage_timeout_secs: 900,
            transport_retry: RetryConfig::default(),
            submit_attempts: 3,
        }
    }
}

impl ExecutorConfig {
    /// Returns the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the poll interval used right after a tool submission.
    #[must_use]
    pub fn post_tool_poll_interval(&self) -> Duration {
        Duration::from_millis(self.post_tool_poll_interval_ms)
    }

    /// Returns the per-stage budget inside a session.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Returns the budget of a single stage run.
    #[must_use]
    pub fn single_stage_timeout(&self) -> Duration {
        Duration::from_secs(self.single_stage_timeout_secs)
    }

    /// Returns the retry policy for one-shot submission calls.
    #[must_use]
    pub fn submit_retry(&self) -> RetryConfig {
        self.transport_retry.clone().with_max_attempts(self.submit_attempts)
    }

    /// Sets both poll intervals, mostly for tests.
    #[must_use]
    pub fn with_poll_intervals(mut self, poll: Duration, post_tool: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX);
        self.post_tool_poll_interval_ms = u64::try_from(post_tool.as_millis()).unwrap_or(u64::MAX);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("executor.poll_interval_ms", "must be greater than 0"));
        }
        if self.post_tool_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "executor.post_tool_poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::invalid("executor.stage_timeout_secs", "must be greater than 0"));
        }
        if self.single_stage_timeout_secs < self.stage_timeout_secs {
            return Err(ConfigError::invalid(
                "executor.single_stage_timeout_secs",
                format!("must be at least stage_timeout_secs ({})", self.stage_timeout_secs),
            ));
        }
        if self.submit_attempts == 0 {
            return Err(ConfigError::invalid("executor.submit_attempts", "must be at least 1"));
        }
        if self.transport_retry.max_delay_ms < self.transport_retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "executor.transport_retry.max_delay_ms",
                "must not be below base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Limits on concurrent remote stage executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Stages of one session running at once.
    pub max_concurrent_per_session: usize,
    /// Stages running at once across all sessions.
    pub max_concurrent_global: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_session: 4,
            max_concurrent_global: 16,
        }
    }
}

impl ConcurrencyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_per_session == 0 {
            return Err(ConfigError::invalid(
                "concurrency.max_concurrent_per_session",
                "must be greater than 0",
            ));
        }
        if self.max_concurrent_global == 0 {
            return Err(ConfigError::invalid(
                "concurrency.max_concurrent_global",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Remote agent service settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// API base URL.
    pub api_base: String,
    /// API key. Never logged.
    pub api_key: Option<String>,
    /// Timeout of one HTTP request.
    pub request_timeout_secs: u64,
    /// Timeout of connection establishment.
    pub connect_timeout_secs: u64,
    /// Remote agent id per stage id.
    pub assistant_ids: BTreeMap<String, String>,
    /// Agent used for stages without their own.
    pub default_assistant_id: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout_secs: 900,
            connect_timeout_secs: 30,
            assistant_ids: BTreeMap::new(),
            default_assistant_id: None,
        }
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("assistant_ids", &self.assistant_ids)
            .field("default_assistant_id", &self.default_assistant_id)
            .finish()
    }
}

impl AssistantConfig {
    /// Maps a stage to its remote agent.
    #[must_use]
    pub fn with_assistant(mut self, stage_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        self.assistant_ids.insert(stage_id.into(), assistant_id.into());
        self
    }

    /// Sets the fallback agent.
    #[must_use]
    pub fn with_default_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.default_assistant_id = Some(assistant_id.into());
        self
    }

    /// Returns the agent for a stage.
    ///
    /// Stage ids are matched case-insensitively, since environment variables
    /// arrive lowercased.
    #[must_use]
    pub fn assistant_for(&self, stage_id: &str) -> Option<&str> {
        self.assistant_ids
            .get(stage_id)
            .or_else(|| {
                self.assistant_ids
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(stage_id))
                    .map(|(_, v)| v)
            })
            .or(self.default_assistant_id.as_ref())
            .map(String::as_str)
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::invalid("assistant.api_base", "must not be empty"));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("assistant.request_timeout_secs", "timeouts must be greater than 0"));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
