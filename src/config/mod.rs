// Configuration manager module
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LoadTestError;
use crate::schedule::{Schedule, Stage};

/// Human-readable durations for config files: anything `humantime` accepts
/// (`"5m"`, `"90s"`, `"1h30m"`, `"250ms"`) or a bare number of seconds.
pub mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationRepr {
        Seconds(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match DurationRepr::deserialize(deserializer)? {
            DurationRepr::Seconds(secs) => from_seconds(secs).map_err(serde::de::Error::custom),
            DurationRepr::Text(text) => {
                let text = text.trim();
                match text.parse::<f64>() {
                    Ok(secs) => from_seconds(secs).map_err(serde::de::Error::custom),
                    Err(_) => humantime::parse_duration(text).map_err(|e| {
                        serde::de::Error::custom(format!("invalid duration '{}': {}", text, e))
                    }),
                }
            }
        }
    }

    fn from_seconds(secs: f64) -> Result<Duration, String> {
        if secs < 0.0 {
            return Err(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            ));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {}: {}", secs, e))
    }
}

/// One stage as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(with = "duration_format")]
    pub duration: Duration,
    pub target: f64,
}

impl StageConfig {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// Inclusive status-code range counted as an expected HTTP outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn contains(&self, code: u16) -> bool {
        code >= self.min && code <= self.max
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { min: 200, max: 299 }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_url: String,
    pub bearer_token: String,
    #[serde(with = "duration_format")]
    pub timeout: Duration,
    pub start_rate: f64,
    pub stages: Vec<StageConfig>,
    pub pre_allocated_workers: usize,
    pub max_workers: usize,
    pub expected_status: StatusRange,
    pub min_body_bytes: usize,
    pub check_name: String,
    #[serde(with = "duration_format")]
    pub graceful_stop: Duration,
    pub report_path: PathBuf,
    pub json_output: Option<PathBuf>,
}

/// Ramp profile of the reference run: climb to 2500 it/s in 500 it/s steps,
/// hold for two hours, then walk back down.
fn reference_stages() -> Vec<StageConfig> {
    const MIN: u64 = 60;
    [
        (5, 500.0),
        (10, 500.0),
        (5, 1000.0),
        (10, 1000.0),
        (5, 1500.0),
        (10, 1500.0),
        (5, 2000.0),
        (15, 2000.0),
        (5, 2500.0),
        (120, 2500.0),
        (5, 2000.0),
        (15, 2000.0),
        (5, 1500.0),
        (10, 1500.0),
        (5, 1000.0),
        (10, 1000.0),
        (5, 500.0),
        (10, 500.0),
        (5, 0.0),
    ]
    .iter()
    .map(|&(minutes, target)| StageConfig::new(Duration::from_secs(minutes * MIN), target))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: "https://www.google.com".to_string(),
            bearer_token: "access-token".to_string(),
            timeout: Duration::from_secs(100),
            start_rate: 0.0,
            stages: reference_stages(),
            pre_allocated_workers: 2500,
            max_workers: 4000,
            expected_status: StatusRange::default(),
            min_body_bytes: 50_000,
            check_name: "Response body size is 50 KB".to_string(),
            graceful_stop: Duration::from_secs(120),
            report_path: PathBuf::from("summary.html"),
            json_output: None,
        }
    }
}

impl Config {
    /// Validate every field, collecting all violations.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match reqwest::Url::parse(&self.target_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!(
                "target_url must use http or https, got '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!("target_url is not a valid URL: {}", e)),
        }
        if self.timeout.is_zero() {
            errors.push("timeout must be greater than 0".to_string());
        }
        if !self.start_rate.is_finite() || self.start_rate < 0.0 {
            errors.push("start_rate must be a non-negative number".to_string());
        }
        if self.stages.is_empty() {
            errors.push("stages must contain at least one stage".to_string());
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                errors.push(format!("stages[{}].duration must be greater than 0", i));
            }
            if !stage.target.is_finite() || stage.target < 0.0 {
                errors.push(format!("stages[{}].target must be a non-negative number", i));
            }
        }
        let total = self
            .stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration));
        if total.is_none() {
            errors.push("total stage duration is too large".to_string());
        }
        if self.max_workers == 0 {
            errors.push("max_workers must be greater than 0".to_string());
        }
        if self.pre_allocated_workers > self.max_workers {
            errors.push("pre_allocated_workers must be <= max_workers".to_string());
        }
        if self.expected_status.min > self.expected_status.max {
            errors.push("expected_status.min must be <= expected_status.max".to_string());
        }
        if self.report_path.as_os_str().is_empty() {
            errors.push("report_path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build the validated schedule from the configured stages.
    pub fn schedule(&self) -> Result<Schedule, LoadTestError> {
        Schedule::new(
            self.start_rate,
            self.stages
                .iter()
                .map(|s| Stage::new(s.duration, s.target))
                .collect(),
        )
    }
}

/// Parse configuration from a JSON string and validate it.
pub fn load_from_str(json: &str) -> Result<Config, LoadTestError> {
    let config: Config = serde_json::from_str(json)
        .map_err(|e| LoadTestError::ConfigError(format!("JSON parse error: {}", e)))?;

    config.validate().map_err(|errors| {
        LoadTestError::ConfigError(format!("Validation errors: {}", errors.join("; ")))
    })?;

    Ok(config)
}

/// Read configuration from a JSON file and validate it.
pub fn load_from_file(path: &Path) -> Result<Config, LoadTestError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LoadTestError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    load_from_str(&content)
}

#[cfg(test)]
pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Stage durations in whole seconds or milliseconds.
    pub fn arb_stage_config() -> impl Strategy<Value = StageConfig> {
        (
            prop_oneof![
                (1u64..86_400).prop_map(Duration::from_secs),
                (1u64..100_000).prop_map(Duration::from_millis),
            ],
            0u32..10_000,
        )
            .prop_map(|(duration, target)| StageConfig::new(duration, target as f64))
    }

    /// Strategy for generating a Config that passes validation.
    pub fn arb_config() -> impl Strategy<Value = Config> {
        (
            "[a-z]{1,10}(\\.[a-z]{2,5}){1,2}",
            "[A-Za-z0-9._-]{0,32}",
            1u64..600,
            proptest::collection::vec(arb_stage_config(), 1..12),
            0usize..5_000,
            0usize..5_000,
            (100u16..300, 0u16..300),
            0usize..1_000_000,
        )
            .prop_map(
                |(host, token, timeout_secs, stages, pre, extra, (min, span), body)| Config {
                    target_url: format!("https://{}/", host),
                    bearer_token: token,
                    timeout: Duration::from_secs(timeout_secs),
                    start_rate: 0.0,
                    stages,
                    pre_allocated_workers: pre,
                    max_workers: pre + extra + 1,
                    expected_status: StatusRange {
                        min,
                        max: min + span,
                    },
                    min_body_bytes: body,
                    check_name: "body size".to_string(),
                    graceful_stop: Duration::from_secs(30),
                    report_path: PathBuf::from("summary.html"),
                    json_output: None,
                },
            )
    }
}
