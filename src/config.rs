use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr, time::Duration};

use crate::services::{retry::RetryPolicy, stats::StatsPolicy, store::MAX_LIST_KEYS};

/// Which object store backs the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata with payload files under `storage_dir`.
    Sqlite,
    /// Process memory; everything is lost on exit.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments (flag > env > default).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub delimiter: char,
    pub list_page_size: usize,
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,
    pub stats_freshness_secs: u64,
    /// Zero disables the background refresher.
    pub stats_refresh_interval_secs: u64,
    pub stats_refresh_on_mutation: bool,
    pub max_concurrent_scans: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage console API")]
pub struct Args {
    /// Host to bind to (overrides CONSOLE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CONSOLE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides CONSOLE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory where object payloads are stored (overrides CONSOLE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CONSOLE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Folder delimiter (overrides CONSOLE_DELIMITER)
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Keys requested per listing page (overrides CONSOLE_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Tries per listing call on transient failures (overrides CONSOLE_STORE_RETRY_ATTEMPTS)
    #[arg(long)]
    pub store_retry_attempts: Option<u32>,

    /// Base backoff between retries (overrides CONSOLE_STORE_RETRY_BACKOFF_MS)
    #[arg(long)]
    pub store_retry_backoff_ms: Option<u64>,

    /// Age after which cached stats are stale (overrides CONSOLE_STATS_FRESHNESS_SECS)
    #[arg(long)]
    pub stats_freshness_secs: Option<u64>,

    /// Background refresh period, 0 to disable (overrides CONSOLE_STATS_REFRESH_INTERVAL_SECS)
    #[arg(long)]
    pub stats_refresh_interval_secs: Option<u64>,

    /// Start a scan after every upload or delete (overrides CONSOLE_STATS_REFRESH_ON_MUTATION)
    #[arg(long)]
    pub stats_refresh_on_mutation: Option<bool>,

    /// Stats scans allowed at once (overrides CONSOLE_MAX_CONCURRENT_SCANS)
    #[arg(long)]
    pub max_concurrent_scans: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it when present.
fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn merge<T>(flag: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match flag {
        Some(value) => Ok(value),
        None => Ok(env_value(name)?.unwrap_or(default)),
    }
}

fn parse_delimiter(raw: &str) -> Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Ok(c),
        _ => bail!("delimiter must be exactly one printable character, got `{}`", raw),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let delimiter: String = merge(args.delimiter, "CONSOLE_DELIMITER", "/".into())?;
        let cfg = Self {
            host: merge(args.host, "CONSOLE_HOST", "0.0.0.0".into())?,
            port: merge(args.port, "CONSOLE_PORT", 8080)?,
            backend: merge(args.backend, "CONSOLE_BACKEND", Backend::Sqlite)?,
            storage_dir: merge(args.storage_dir, "CONSOLE_STORAGE_DIR", "./data/objects".into())?,
            database_url: merge(
                args.database_url,
                "CONSOLE_DATABASE_URL",
                "sqlite://./data/meta/console.db".into(),
            )?,
            delimiter: parse_delimiter(&delimiter).context("CONSOLE_DELIMITER / --delimiter")?,
            list_page_size: merge(args.list_page_size, "CONSOLE_LIST_PAGE_SIZE", MAX_LIST_KEYS)?,
            store_retry_attempts: merge(
                args.store_retry_attempts,
                "CONSOLE_STORE_RETRY_ATTEMPTS",
                3,
            )?,
            store_retry_backoff_ms: merge(
                args.store_retry_backoff_ms,
                "CONSOLE_STORE_RETRY_BACKOFF_MS",
                100,
            )?,
            stats_freshness_secs: merge(
                args.stats_freshness_secs,
                "CONSOLE_STATS_FRESHNESS_SECS",
                300,
            )?,
            stats_refresh_interval_secs: merge(
                args.stats_refresh_interval_secs,
                "CONSOLE_STATS_REFRESH_INTERVAL_SECS",
                60,
            )?,
            stats_refresh_on_mutation: merge(
                args.stats_refresh_on_mutation,
                "CONSOLE_STATS_REFRESH_ON_MUTATION",
                false,
            )?,
            max_concurrent_scans: merge(
                args.max_concurrent_scans,
                "CONSOLE_MAX_CONCURRENT_SCANS",
                4,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.list_page_size == 0 || self.list_page_size > MAX_LIST_KEYS {
            bail!(
                "list page size must be between 1 and {}, got {}",
                MAX_LIST_KEYS,
                self.list_page_size
            );
        }
        if self.max_concurrent_scans == 0 {
            bail!("max concurrent scans must be at least 1");
        }
        if self.store_retry_attempts == 0 {
            bail!("store retry attempts must be at least 1");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retry_attempts,
            base_backoff: Duration::from_millis(self.store_retry_backoff_ms),
        }
    }

    pub fn stats_policy(&self) -> StatsPolicy {
        StatsPolicy {
            freshness_window: Duration::from_secs(self.stats_freshness_secs),
            max_concurrent_scans: self.max_concurrent_scans,
        }
    }

    /// `None` when the background refresher is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.stats_refresh_interval_secs > 0)
            .then(|| Duration::from_secs(self.stats_refresh_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only flag-driven cases: tests share the process environment.
    fn args() -> Args {
        Args {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            backend: Some(Backend::Memory),
            storage_dir: Some("/tmp/objects".into()),
            database_url: Some("sqlite::memory:".into()),
            delimiter: Some("/".into()),
            list_page_size: Some(500),
            store_retry_attempts: Some(2),
            store_retry_backoff_ms: Some(50),
            stats_freshness_secs: Some(30),
            stats_refresh_interval_secs: Some(0),
            stats_refresh_on_mutation: Some(true),
            max_concurrent_scans: Some(2),
            migrate: false,
        }
    }

    #[test]
    fn test_should_prefer_flags() {
        let cfg = AppConfig::from_args(args()).unwrap_or_else(|e| panic!("config failed: {e:#}"));
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.delimiter, '/');
        assert_eq!(cfg.refresh_interval(), None);
        assert_eq!(cfg.retry_policy().base_backoff, Duration::from_millis(50));
        assert_eq!(cfg.stats_policy().freshness_window, Duration::from_secs(30));
        assert!(cfg.stats_refresh_on_mutation);
    }

    #[test]
    fn test_should_reject_invalid_values() {
        let bad_delimiter = Args {
            delimiter: Some("//".into()),
            ..args()
        };
        assert!(AppConfig::from_args(bad_delimiter).is_err());

        let zero_scans = Args {
            max_concurrent_scans: Some(0),
            ..args()
        };
        assert!(AppConfig::from_args(zero_scans).is_err());

        let huge_page = Args {
            list_page_size: Some(MAX_LIST_KEYS + 1),
            ..args()
        };
        assert!(AppConfig::from_args(huge_page).is_err());
    }

    #[test]
    fn test_should_parse_backend_names() {
        assert_eq!("memory".parse::<Backend>(), Ok(Backend::Memory));
        assert_eq!("SQLite".parse::<Backend>(), Ok(Backend::Sqlite));
        assert!("s3".parse::<Backend>().is_err());
    }
}
