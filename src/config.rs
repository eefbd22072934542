//! Configuration management for the task engine.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required by the binary. Your OpenRouter API key.
//! - `DEFAULT_MODEL` - Optional. The model used for every completion. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `TASK_MAX_DEPTH` - Optional. Deepest allowed subtask level (root is 0). Defaults to `5`.
//! - `TASK_CORRECTIVE_CYCLES` - Optional. Remediation rounds after an incomplete verdict. Defaults to `1`.
//! - `TASK_HISTORY_CHARS` - Optional. History budget for completion evaluation prompts. Defaults to `8000`.
//! - `TASK_LLM_RETRIES` - Optional. Retries of transient completion errors; `0` disables retrying. Defaults to `3`.

use thiserror::Error;

use crate::llm::RetryConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Knobs of the execution control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tasks deeper than this fail with "max recursion depth exceeded"
    pub max_depth: usize,

    /// How many remediation plans a COMPLEX task may run after its
    /// completion evaluation reports `complete: false`
    pub corrective_cycles: usize,

    /// Character budget for the history embedded in completion evaluation
    pub history_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            corrective_cycles: 1,
            history_chars: 8000,
        }
    }
}

impl EngineConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_corrective_cycles(mut self, corrective_cycles: usize) -> Self {
        self.corrective_cycles = corrective_cycles;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_chars == 0 {
            return Err(ConfigError::InvalidValue(
                "TASK_HISTORY_CHARS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// Model identifier (OpenRouter format)
    pub default_model: String,

    pub engine: EngineConfig,

    /// Retry policy of the completion client
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENROUTER_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            max_depth: parse_or(&lookup, "TASK_MAX_DEPTH", defaults.max_depth)?,
            corrective_cycles: parse_or(&lookup, "TASK_CORRECTIVE_CYCLES", defaults.corrective_cycles)?,
            history_chars: parse_or(&lookup, "TASK_HISTORY_CHARS", defaults.history_chars)?,
        };
        engine.validate()?;

        let default_retries = RetryConfig::default().max_retries as usize;
        let retry = match parse_or(&lookup, "TASK_LLM_RETRIES", default_retries)? {
            0 => RetryConfig::disabled(),
            n => RetryConfig {
                max_retries: u32::try_from(n).unwrap_or(u32::MAX),
                ..RetryConfig::default()
            },
        };

        Ok(Self {
            api_key,
            default_model,
            engine,
            retry,
        })
    }
}

fn parse_or<F>(lookup: &F, key: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}
