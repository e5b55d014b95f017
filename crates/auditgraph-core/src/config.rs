use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Run-level policy. Every section falls back to its defaults when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunConfig {
    /// Conflict-resolution constants
    #[serde(default)]
    pub synthesis: SynthesisPolicy,

    /// Short-circuit behaviour of the router
    #[serde(default)]
    pub routing: RoutingPolicy,

    /// Bounds for the resilient external-call wrapper
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPolicy {
    /// Dissent when max - min of the judges' scores exceeds this
    #[serde(default = "default_dissent_threshold")]
    pub dissent_threshold: u8,

    /// Ceiling for the aggregate score once a security veto fires
    #[serde(default = "default_security_veto_ceiling")]
    pub security_veto_ceiling: f64,

    /// Upper bound on the dissent summary, in characters
    #[serde(default = "default_dissent_summary_max_chars")]
    pub dissent_summary_max_chars: usize,

    /// Score assumed for a judge whose opinion never arrived
    #[serde(default = "default_missing_opinion_score")]
    pub missing_opinion_score: u8,

    /// Cap applied when an opinion cites a hallucinated path; disabled when unset
    #[serde(default)]
    pub hallucination_penalty_cap: Option<u8>,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            dissent_threshold: default_dissent_threshold(),
            security_veto_ceiling: default_security_veto_ceiling(),
            dissent_summary_max_chars: default_dissent_summary_max_chars(),
            missing_opinion_score: default_missing_opinion_score(),
            hallucination_penalty_cap: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShortCircuitScope {
    /// Skip the evaluation fan-out when the run produced no evidence at all
    #[default]
    Global,
    /// Additionally skip criteria that no evidence targets
    PerCriterion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub short_circuit: ShortCircuitScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt` (1-based). The first attempt never waits.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi(attempt as i32 - 2);
        let millis = (self.initial_backoff_ms as f64 * exp).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

fn default_dissent_threshold() -> u8 {
    2
}

fn default_security_veto_ceiling() -> f64 {
    2.0
}

fn default_dissent_summary_max_chars() -> usize {
    600
}

fn default_missing_opinion_score() -> u8 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RunConfig {
    /// Load from an optional file plus `AUDITGRAPH__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::ReadError(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUDITGRAPH")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: RunConfig = builder
            .build()
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        info!(
            dissent_threshold = config.synthesis.dissent_threshold,
            veto_ceiling = config.synthesis.security_veto_ceiling,
            short_circuit = ?config.routing.short_circuit,
            "run configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.synthesis;
        if s.dissent_threshold > 4 {
            return Err(ConfigError::ValidationError(
                "dissent_threshold must be within 0..=4".into(),
            ));
        }
        if !(1.0..=5.0).contains(&s.security_veto_ceiling) {
            return Err(ConfigError::ValidationError(
                "security_veto_ceiling must be within 1.0..=5.0".into(),
            ));
        }
        if !(1..=5).contains(&s.missing_opinion_score) {
            return Err(ConfigError::ValidationError(
                "missing_opinion_score must be within 1..=5".into(),
            ));
        }
        if let Some(cap) = s.hallucination_penalty_cap {
            if !(1..=5).contains(&cap) {
                return Err(ConfigError::ValidationError(
                    "hallucination_penalty_cap must be within 1..=5".into(),
                ));
            }
        }
        if s.dissent_summary_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "dissent_summary_max_chars must be positive".into(),
            ));
        }
        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if r.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if r.max_backoff_ms < r.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_backoff_ms must be >= retry.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.synthesis.dissent_threshold, 2);
        assert_eq!(config.routing.short_circuit, ShortCircuitScope::Global);
    }

    #[test]
    fn backoff_grows_and_saturates() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::ZERO);
        assert_eq!(retry.backoff(2), Duration::from_millis(1000));
        assert_eq!(retry.backoff(3), Duration::from_millis(2000));
        assert_eq!(retry.backoff(10), Duration::from_millis(8000));
    }

    #[test]
    fn invalid_ceiling_is_rejected() {
        let mut config = RunConfig::default();
        config.synthesis.security_veto_ceiling = 7.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
