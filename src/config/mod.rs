//! Configuration management module
//!
//! Handles loading and validation of the harness configuration: backend
//! connection parameters, run parameters, sketch sizing and corpus options.

use crate::{BenchError, Result, APP_NAME, CONFIG_FILE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Exact (relational) store connection
    pub postgres: PostgresConfig,
    /// Sketch (key/value) store connection
    pub redis: RedisConfig,
    /// Probe inputs, deadlines and fan-out limits
    pub run: RunConfig,
    /// Sketch structure sizing
    pub sketch: SketchConfig,
    /// Corpus source and tokenization options
    pub corpus: CorpusConfig,
}

/// Postgres connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

/// Redis connection parameters (the server needs the RedisBloom module)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

/// Parameters shared by every strategy within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Token passed to every presence and item-count query
    pub probe_token: String,
    /// `k` passed to every top-K query
    pub top_k: usize,
    /// Deadline applied to each timed operation; unbounded when absent
    #[serde(with = "optional_duration_serde")]
    pub operation_timeout: Option<Duration>,
    /// Maximum number of in-flight backend writes during initialization
    pub fanout_limit: usize,
    /// Tokens per bulk command when loading sketch structures
    pub load_chunk_size: usize,
}

/// Capacity and error parameters of the four sketch structures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SketchConfig {
    /// Target false-positive rate of the membership filter
    pub bloom_error_rate: f64,
    /// Expected number of distinct items; sized from the corpus when absent
    pub bloom_capacity: Option<u64>,
    /// Count-min sketch overestimation error rate
    pub cms_error: f64,
    /// Probability that the count-min error bound is exceeded
    pub cms_probability: f64,
    /// Number of entries the top-K tracker reserves
    pub topk_capacity: usize,
}

/// Corpus location and tokenization options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Text file to tokenize
    pub path: Option<PathBuf>,
    /// Also split on the right double quotation mark (U+201D)
    pub split_on_right_double_quote: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "secretpassword".to_string(),
            database: "postgres".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            probe_token: "the".to_string(),
            top_k: 10,
            operation_timeout: Some(Duration::from_secs(120)),
            fanout_limit: 1024,
            load_chunk_size: 10_000,
        }
    }
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            bloom_error_rate: 0.01,
            bloom_capacity: None,
            cms_error: 0.01,
            cms_probability: 0.01,
            topk_capacity: 10,
        }
    }
}

impl HarnessConfig {
    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.postgres.host.trim().is_empty() {
            return Err(BenchError::Config("Postgres host must not be empty".to_string()));
        }

        if self.postgres.port == 0 {
            return Err(BenchError::Config("Postgres port must be greater than 0".to_string()));
        }

        if self.postgres.database.trim().is_empty() {
            return Err(BenchError::Config(
                "Postgres database must not be empty".to_string(),
            ));
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(BenchError::Config(format!(
                "Redis URL must start with redis:// or rediss://: {}",
                self.redis.url
            )));
        }

        if self.run.probe_token.trim().is_empty() {
            return Err(BenchError::Config("Probe token must not be empty".to_string()));
        }

        if self.run.probe_token != self.run.probe_token.to_lowercase() {
            return Err(BenchError::Config(format!(
                "Probe token must be lowercase to match corpus tokens: {}",
                self.run.probe_token
            )));
        }

        if self.run.top_k == 0 {
            return Err(BenchError::Config("Top-K must be greater than 0".to_string()));
        }

        // The tracker only approximates lists longer than its reserved capacity.
        if self.run.top_k > self.sketch.topk_capacity {
            return Err(BenchError::Config(format!(
                "Top-K {} exceeds the sketch tracker capacity {}",
                self.run.top_k, self.sketch.topk_capacity
            )));
        }

        if let Some(timeout) = self.run.operation_timeout {
            if timeout.is_zero() {
                return Err(BenchError::Config(
                    "Operation timeout must be greater than 0".to_string(),
                ));
            }
        }

        if self.run.fanout_limit == 0 {
            return Err(BenchError::Config("Fan-out limit must be greater than 0".to_string()));
        }

        if self.run.load_chunk_size == 0 {
            return Err(BenchError::Config(
                "Load chunk size must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("Bloom error rate", self.sketch.bloom_error_rate),
            ("CMS error", self.sketch.cms_error),
            ("CMS probability", self.sketch.cms_probability),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(BenchError::Config(format!(
                    "{} must be between 0 and 1 (exclusive): {}",
                    name, value
                )));
            }
        }

        if self.sketch.bloom_capacity == Some(0) {
            return Err(BenchError::Config("Bloom capacity must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// Set the corpus file
    pub fn with_corpus_path(mut self, path: PathBuf) -> Self {
        self.corpus.path = Some(path);
        self
    }

    /// Set the probe token
    pub fn with_probe_token(mut self, token: impl Into<String>) -> Self {
        self.run.probe_token = token.into();
        self
    }

    /// Set `k` for top-K queries, growing the tracker capacity if needed
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.run.top_k = k;
        self.sketch.topk_capacity = self.sketch.topk_capacity.max(k);
        self
    }

    /// Set the per-operation deadline
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run.operation_timeout = timeout;
        self
    }

    /// Set the maximum number of in-flight writes during initialization
    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        self.run.fanout_limit = limit;
        self
    }

    /// Load configuration from `path`, or from the standard location when `None`
    ///
    /// Returns the default configuration if the standard file doesn't exist.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = Self::config_file_path()?;
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            BenchError::Config(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            BenchError::Config(format!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the standard configuration file path
    /// Uses $CONFIG_HOME/tokenbench/tokenbench.toml
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            BenchError::Config("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

// Durations are written as humantime strings ("30s", "1m 30s").
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    // "none" disables the deadline; TOML has no null.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        if text.trim().eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        humantime::parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.probe_token, "the");
        assert_eq!(config.run.top_k, 10);
        assert_eq!(config.sketch.topk_capacity, 10);
    }

    #[test]
    fn test_toml_round_trip_keeps_durations() {
        let config = HarnessConfig::default()
            .with_operation_timeout(Some(Duration::from_millis(1500)))
            .with_top_k(25);
        let toml_str = config.to_toml().expect("Failed to serialize to TOML");
        assert!(toml_str.contains("operation_timeout = \"1s 500ms\""));

        let deserialized: HarnessConfig =
            toml::from_str(&toml_str).expect("Failed to deserialize from TOML");
        assert_eq!(
            deserialized.run.operation_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(deserialized.run.top_k, 25);
        assert_eq!(deserialized.sketch.topk_capacity, 25);
        assert_eq!(deserialized.postgres.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[run]\nprobe_token = \"whale\"\noperation_timeout = \"none\"\n\n[redis]\nurl = \"redis://cache:6380/1\""
        )
        .unwrap();

        let config = HarnessConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.run.probe_token, "whale");
        assert_eq!(config.run.operation_timeout, None);
        assert_eq!(config.run.top_k, 10);
        assert_eq!(config.redis.url, "redis://cache:6380/1");
        assert_eq!(config.postgres.port, 5432);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = HarnessConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(BenchError::Config(_))));
    }

    #[test]
    fn test_top_k_beyond_tracker_capacity_is_rejected() {
        let mut config = HarnessConfig::default();
        config.run.top_k = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tracker capacity"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = HarnessConfig::default();
        config.sketch.cms_error = 1.5;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.run.probe_token = "The".to_string();
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.redis.url = "localhost:6379".to_string();
        assert!(config.validate().is_err());

        let config = HarnessConfig::default().with_operation_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());

        let config = HarnessConfig::default().with_fanout_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_path() {
        let path = HarnessConfig::config_file_path();
        assert!(path.is_ok());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("tokenbench.toml"));
    }
}
