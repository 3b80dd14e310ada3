//! Application configuration.
//!
//! Every field has a default so an empty environment yields a working setup.
//! Values are read from `CONTRIBFLOW_*` environment variables.

use crate::core::PipelineType;
use crate::errors::ConfigError;
use crate::pipeline::{BackoffStrategy, JitterStrategy, RetryConfig};
use crate::scheduler::CronExpression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Search engines reject sitemap files above this many URLs.
pub const SITEMAP_URL_LIMIT: usize = 50_000;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CONTRIBFLOW_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sitemap generation.
    #[serde(default)]
    pub sitemap: SitemapConfig,
    /// Batch sizes per pipeline type.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Enrichment limits.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Scheduler behaviour.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Retry policy for external collaborators.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sitemap output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// Public site root, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// URL path under which page files are served.
    #[serde(default = "default_public_path")]
    pub public_path: String,
    /// Directory the files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Maximum URLs in one page file.
    #[serde(default = "default_max_urls")]
    pub max_urls_per_file: usize,
    /// Entities read from the store per batch.
    #[serde(default = "default_sitemap_batch")]
    pub batch_size: usize,
    /// Static paths listed in the index.
    #[serde(default = "default_static_pages")]
    pub static_pages: Vec<String>,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_path() -> String {
    "/sitemaps".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("public/sitemaps")
}

fn default_max_urls() -> usize {
    49_000
}

fn default_sitemap_batch() -> usize {
    1_000
}

fn default_static_pages() -> Vec<String> {
    vec!["/".to_string()]
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            public_path: default_public_path(),
            output_dir: default_output_dir(),
            max_urls_per_file: default_max_urls(),
            batch_size: default_sitemap_batch(),
            static_pages: default_static_pages(),
        }
    }
}

/// Batch sizes for the record-processing pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Raw pull requests per extraction batch.
    pub extraction: usize,
    /// Records per enrichment batch.
    pub enrichment: usize,
    /// Records per ranking batch.
    pub ranking: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extraction: 100,
            enrichment: 50,
            ranking: 500,
        }
    }
}

/// Limits for the enrichment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// GitHub requests allowed per run.
    pub max_requests: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { max_requests: 1_000 }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often due schedules are checked, in seconds.
    pub tick_interval_secs: u64,
    /// Running history entries older than this are swept, in seconds.
    pub stale_run_secs: u64,
    /// Default cron expression per pipeline type.
    pub default_crons: HashMap<PipelineType, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let default_crons = HashMap::from([
            (PipelineType::EntityExtraction, "*/30 * * * *".to_string()),
            (PipelineType::DataEnrichment, "15 * * * *".to_string()),
            (PipelineType::ContributorRanking, "0 */6 * * *".to_string()),
            (PipelineType::SitemapGeneration, "0 3 * * *".to_string()),
        ]);
        Self {
            tick_interval_secs: 30,
            stale_run_secs: 3_600,
            default_crons,
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Staleness window as a duration.
    #[must_use]
    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_run_secs)
    }
}

/// Retry policy for transient collaborator failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    /// Converts to the pipeline retry configuration.
    #[must_use]
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_retries)
            .with_base_delay_ms(self.base_delay_ms)
            .with_max_delay_ms(self.max_delay_ms)
            .with_backoff(BackoffStrategy::Exponential)
            .with_jitter(JitterStrategy::Full)
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,contribflow=debug".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable or out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` to resolve full variable names.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unparsable or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(v) = env.raw("SITEMAP_BASE_URL") {
            config.sitemap.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env.raw("SITEMAP_PUBLIC_PATH") {
            config.sitemap.public_path = v;
        }
        if let Some(v) = env.raw("SITEMAP_OUTPUT_DIR") {
            config.sitemap.output_dir = PathBuf::from(v);
        }
        env.parse_into("SITEMAP_MAX_URLS", &mut config.sitemap.max_urls_per_file)?;
        env.parse_into("SITEMAP_BATCH_SIZE", &mut config.sitemap.batch_size)?;
        if let Some(v) = env.raw("SITEMAP_STATIC_PAGES") {
            config.sitemap.static_pages = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        env.parse_into("EXTRACTION_BATCH_SIZE", &mut config.batch.extraction)?;
        env.parse_into("ENRICHMENT_BATCH_SIZE", &mut config.batch.enrichment)?;
        env.parse_into("RANKING_BATCH_SIZE", &mut config.batch.ranking)?;
        env.parse_into("ENRICHMENT_MAX_REQUESTS", &mut config.enrichment.max_requests)?;

        env.parse_into("SCHEDULER_TICK_SECS", &mut config.scheduler.tick_interval_secs)?;
        env.parse_into("STALE_RUN_SECS", &mut config.scheduler.stale_run_secs)?;
        for pipeline_type in PipelineType::ALL {
            let key = format!("CRON_{}", pipeline_type.as_str().to_uppercase());
            if let Some(v) = env.raw(&key) {
                config.scheduler.default_crons.insert(pipeline_type, v);
            }
        }

        env.parse_into("RETRY_MAX", &mut config.retry.max_retries)?;
        env.parse_into("RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms)?;
        env.parse_into("RETRY_MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;

        if let Some(v) = env.raw("LOG") {
            config.logging.filter = v;
        }
        env.parse_into("LOG_JSON", &mut config.logging.json)?;

        config.validate()?;
        Ok(config)
    }

    /// Checks bounds and cron expressions.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.sitemap.max_urls_per_file;
        if max == 0 || max > SITEMAP_URL_LIMIT {
            return Err(ConfigError::OutOfRange {
                key: format!("{ENV_PREFIX}SITEMAP_MAX_URLS"),
                message: format!("{max} not in 1..={SITEMAP_URL_LIMIT}"),
            });
        }

        let sizes = [
            ("SITEMAP_BATCH_SIZE", self.sitemap.batch_size),
            ("EXTRACTION_BATCH_SIZE", self.batch.extraction),
            ("ENRICHMENT_BATCH_SIZE", self.batch.enrichment),
            ("RANKING_BATCH_SIZE", self.batch.ranking),
        ];
        for (key, size) in sizes {
            if size == 0 {
                return Err(ConfigError::OutOfRange {
                    key: format!("{ENV_PREFIX}{key}"),
                    message: "batch size must be positive".to_string(),
                });
            }
        }

        for cron in self.scheduler.default_crons.values() {
            CronExpression::parse(cron)?;
        }
        Ok(())
    }

    /// Default cron expression for a pipeline type.
    #[must_use]
    pub fn default_cron(&self, pipeline_type: PipelineType) -> Option<&str> {
        self.scheduler
            .default_crons
            .get(&pipeline_type)
            .map(String::as_str)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty())
    }

    fn parse_into<T: FromStr>(&self, key: &str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = self.raw(key) {
            *target = value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: format!("{ENV_PREFIX}{key}"),
                value,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.sitemap.max_urls_per_file, 49_000);
        assert_eq!(config.sitemap.batch_size, 1_000);
        assert_eq!(config.sitemap.static_pages, vec!["/".to_string()]);
        assert_eq!(config.enrichment.max_requests, 1_000);
        assert_eq!(config.scheduler.stale_window(), Duration::from_secs(3_600));
        assert!(config.default_cron(PipelineType::SitemapGeneration).is_some());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CONTRIBFLOW_SITEMAP_BASE_URL", "https://example.dev/"),
            ("CONTRIBFLOW_SITEMAP_MAX_URLS", "10"),
            ("CONTRIBFLOW_SITEMAP_STATIC_PAGES", "/, /about ,"),
            ("CONTRIBFLOW_ENRICHMENT_BATCH_SIZE", "7"),
            ("CONTRIBFLOW_CRON_SITEMAP_GENERATION", "@daily"),
            ("CONTRIBFLOW_LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.sitemap.base_url, "https://example.dev");
        assert_eq!(config.sitemap.max_urls_per_file, 10);
        assert_eq!(config.sitemap.static_pages, vec!["/", "/about"]);
        assert_eq!(config.batch.enrichment, 7);
        assert_eq!(config.default_cron(PipelineType::SitemapGeneration), Some("@daily"));
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_number() {
        let err = AppConfig::from_lookup(lookup(&[("CONTRIBFLOW_RANKING_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "CONTRIBFLOW_RANKING_BATCH_SIZE"));
    }

    #[test]
    fn test_max_urls_capped() {
        let err = AppConfig::from_lookup(lookup(&[("CONTRIBFLOW_SITEMAP_MAX_URLS", "60000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("CONTRIBFLOW_CRON_DATA_ENRICHMENT", "every day")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Cron(_)));
    }
}
