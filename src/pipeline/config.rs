//! Pipeline configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Unparsable { var: &'static str, value: String },

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the pipeline runtime
///
/// Loaded from environment variables with defaults matching the classic
/// 1-minute VWAP vs 20-minute Bollinger setup.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// SQLite file holding watermarks and the alert ledger
    pub db_path: String,

    /// JSONL file the tick source reads
    pub source_path: String,

    /// Keep tailing the source file after reaching its end
    pub source_follow: bool,

    /// Capacity of every inter-stage channel
    pub channel_buffer: usize,

    /// Number of window shards (instruments are hashed across them)
    pub worker_shards: usize,

    /// Tumbling window length for the fast VWAP
    pub fast_window: Duration,

    /// Sliding window length for the slow band
    pub slow_window: Duration,

    /// Sliding window hop (must equal `fast_window`)
    pub slow_hop: Duration,

    /// How far behind the newest tick the watermark trails
    pub allowed_lateness_ms: i64,

    /// Band multiplier k in vwap ± k·vwstd
    pub band_k: f64,

    /// Volume floor an alert must exceed
    pub alert_min_volume: f64,

    /// Output directory for the visualization feed
    pub viz_output_path: String,
    pub viz_max_size_mb: u64,
    pub viz_max_rotations: u32,

    /// Webhook endpoint; alerts are only logged when unset
    pub notify_webhook_url: Option<String>,
    pub notify_token: Option<String>,
    pub notify_channel: Option<String>,
    pub notify_max_retries: u32,
    pub notify_concurrency: usize,

    /// How often the fan-out stage persists watermarks
    pub checkpoint_interval_ms: u64,

    /// Historical archive and rate used by the replay producer
    pub replay_archive_path: String,
    pub replay_rate: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "data/vwapflow.db".to_string(),
            source_path: "streams/ticker/ticks.jsonl".to_string(),
            source_follow: true,
            channel_buffer: 10_000,
            worker_shards: 4,
            fast_window: Duration::from_secs(60),
            slow_window: Duration::from_secs(20 * 60),
            slow_hop: Duration::from_secs(60),
            allowed_lateness_ms: 0,
            band_k: 2.0,
            alert_min_volume: 10_000.0,
            viz_output_path: "streams/viz".to_string(),
            viz_max_size_mb: 100,
            viz_max_rotations: 10,
            notify_webhook_url: None,
            notify_token: None,
            notify_channel: None,
            notify_max_retries: 5,
            notify_concurrency: 16,
            checkpoint_interval_ms: 5_000,
            replay_archive_path: "data/ticker.jsonl".to_string(),
            replay_rate: 1_000,
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Unparsable {
            var,
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn optional_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `VWAPFLOW_DB_PATH` (default: data/vwapflow.db)
    /// - `TICK_SOURCE_PATH` (default: streams/ticker/ticks.jsonl)
    /// - `TICK_SOURCE_FOLLOW` (default: true)
    /// - `PIPELINE_CHANNEL_BUFFER` (default: 10000)
    /// - `WORKER_SHARDS` (default: 4)
    /// - `FAST_WINDOW_SECS` / `SLOW_WINDOW_SECS` / `SLOW_HOP_SECS` (default: 60 / 1200 / 60)
    /// - `ALLOWED_LATENESS_MS` (default: 0)
    /// - `BAND_K` (default: 2.0)
    /// - `ALERT_MIN_VOLUME` (default: 10000)
    /// - `VIZ_OUTPUT_PATH` (default: streams/viz)
    /// - `VIZ_MAX_SIZE_MB` / `VIZ_MAX_ROTATIONS` (default: 100 / 10)
    /// - `NOTIFY_WEBHOOK_URL`, `NOTIFY_TOKEN`, `NOTIFY_CHANNEL` (default: unset)
    /// - `NOTIFY_MAX_RETRIES` (default: 5)
    /// - `NOTIFY_CONCURRENCY` (default: 16)
    /// - `CHECKPOINT_INTERVAL_MS` (default: 5000)
    /// - `REPLAY_ARCHIVE_PATH` / `REPLAY_RATE` (default: data/ticker.jsonl / 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            db_path: env::var("VWAPFLOW_DB_PATH").unwrap_or(defaults.db_path),
            source_path: env::var("TICK_SOURCE_PATH").unwrap_or(defaults.source_path),
            source_follow: parse_var("TICK_SOURCE_FOLLOW", defaults.source_follow)?,
            channel_buffer: parse_var("PIPELINE_CHANNEL_BUFFER", defaults.channel_buffer)?,
            worker_shards: parse_var("WORKER_SHARDS", defaults.worker_shards)?,
            fast_window: Duration::from_secs(parse_var(
                "FAST_WINDOW_SECS",
                defaults.fast_window.as_secs(),
            )?),
            slow_window: Duration::from_secs(parse_var(
                "SLOW_WINDOW_SECS",
                defaults.slow_window.as_secs(),
            )?),
            slow_hop: Duration::from_secs(parse_var("SLOW_HOP_SECS", defaults.slow_hop.as_secs())?),
            allowed_lateness_ms: parse_var("ALLOWED_LATENESS_MS", defaults.allowed_lateness_ms)?,
            band_k: parse_var("BAND_K", defaults.band_k)?,
            alert_min_volume: parse_var("ALERT_MIN_VOLUME", defaults.alert_min_volume)?,
            viz_output_path: env::var("VIZ_OUTPUT_PATH").unwrap_or(defaults.viz_output_path),
            viz_max_size_mb: parse_var("VIZ_MAX_SIZE_MB", defaults.viz_max_size_mb)?,
            viz_max_rotations: parse_var("VIZ_MAX_ROTATIONS", defaults.viz_max_rotations)?,
            notify_webhook_url: optional_var("NOTIFY_WEBHOOK_URL"),
            notify_token: optional_var("NOTIFY_TOKEN"),
            notify_channel: optional_var("NOTIFY_CHANNEL"),
            notify_max_retries: parse_var("NOTIFY_MAX_RETRIES", defaults.notify_max_retries)?,
            notify_concurrency: parse_var("NOTIFY_CONCURRENCY", defaults.notify_concurrency)?,
            checkpoint_interval_ms: parse_var(
                "CHECKPOINT_INTERVAL_MS",
                defaults.checkpoint_interval_ms,
            )?,
            replay_archive_path: env::var("REPLAY_ARCHIVE_PATH")
                .unwrap_or(defaults.replay_archive_path),
            replay_rate: parse_var("REPLAY_RATE", defaults.replay_rate)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// The join pairs windows by exact end instant, so every slow window end
    /// must also be a fast window end: the slow hop equals the fast window
    /// and the slow window spans a whole number of hops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fast_window.is_zero() || self.slow_hop.is_zero() || self.slow_window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "window lengths must be non-zero".to_string(),
            ));
        }

        if self.slow_hop != self.fast_window {
            return Err(ConfigError::InvalidValue(format!(
                "SLOW_HOP_SECS ({}s) must equal FAST_WINDOW_SECS ({}s)",
                self.slow_hop.as_secs(),
                self.fast_window.as_secs()
            )));
        }

        if self.slow_window.as_millis() % self.slow_hop.as_millis() != 0 {
            return Err(ConfigError::InvalidValue(format!(
                "SLOW_WINDOW_SECS ({}s) must be a multiple of SLOW_HOP_SECS ({}s)",
                self.slow_window.as_secs(),
                self.slow_hop.as_secs()
            )));
        }

        if self.channel_buffer == 0 || self.worker_shards == 0 || self.notify_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "channel buffer, worker shards and notify concurrency must be positive".to_string(),
            ));
        }

        if self.allowed_lateness_ms < 0 {
            return Err(ConfigError::InvalidValue(
                "ALLOWED_LATENESS_MS cannot be negative".to_string(),
            ));
        }

        if !self.band_k.is_finite() || self.band_k < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "BAND_K must be a non-negative number, got {}",
                self.band_k
            )));
        }

        if self.replay_rate == 0 {
            return Err(ConfigError::InvalidValue("REPLAY_RATE must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();

        assert_eq!(config.db_path, "data/vwapflow.db");
        assert_eq!(config.channel_buffer, 10_000);
        assert_eq!(config.fast_window, Duration::from_secs(60));
        assert_eq!(config.slow_window, Duration::from_secs(1_200));
        assert_eq!(config.alert_min_volume, 10_000.0);
        assert_eq!(config.notify_webhook_url, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_config() {
        // Single test touches the process environment to avoid races
        env::remove_var("VWAPFLOW_DB_PATH");
        env::remove_var("WORKER_SHARDS");
        env::remove_var("ALERT_MIN_VOLUME");
        env::remove_var("NOTIFY_WEBHOOK_URL");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.db_path, "data/vwapflow.db");
        assert_eq!(config.worker_shards, 4);

        env::set_var("VWAPFLOW_DB_PATH", "/tmp/test.db");
        env::set_var("WORKER_SHARDS", "8");
        env::set_var("ALERT_MIN_VOLUME", "2500.5");
        env::set_var("NOTIFY_WEBHOOK_URL", "  ");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.worker_shards, 8);
        assert_eq!(config.alert_min_volume, 2_500.5);
        assert_eq!(config.notify_webhook_url, None);

        env::set_var("WORKER_SHARDS", "many");
        assert_eq!(
            PipelineConfig::from_env(),
            Err(ConfigError::Unparsable {
                var: "WORKER_SHARDS",
                value: "many".to_string()
            })
        );

        // Cleanup
        env::remove_var("VWAPFLOW_DB_PATH");
        env::remove_var("WORKER_SHARDS");
        env::remove_var("ALERT_MIN_VOLUME");
        env::remove_var("NOTIFY_WEBHOOK_URL");
    }

    #[test]
    fn test_misaligned_windows_rejected() {
        let config = PipelineConfig {
            slow_hop: Duration::from_secs(30),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = PipelineConfig {
            slow_window: Duration::from_secs(1_230),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
