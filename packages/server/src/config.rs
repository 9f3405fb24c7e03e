use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use sitemap_export::{CdnCredentials, SecretString};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
    pub port: u16,
    pub request_timeout: Duration,
    pub max_in_flight_exports: usize,
    pub max_export_limit: i64,
    pub sitemap_base_url: String,
    pub publish_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub shard_width: i64,
    pub backup_retention: usize,
    pub min_free_disk_bytes: u64,
    pub empty_ranges_file: PathBuf,
    pub partitions_file: Option<PathBuf>,
    pub registry_refresh_cron: String,
    pub indexnow_api_key: Option<SecretString>,
    pub search_ping_url: Option<String>,
    pub cdn: Option<CdnCredentials>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            database_acquire_timeout: Duration::from_secs(parse_or(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                5,
            )?),
            port: parse_or("PORT", 8080)?,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 50)?),
            max_in_flight_exports: parse_or("MAX_IN_FLIGHT_EXPORTS", 32)?,
            max_export_limit: parse_or("MAX_EXPORT_LIMIT", 2000)?,
            sitemap_base_url: env::var("SITEMAP_BASE_URL")
                .unwrap_or_else(|_| "https://localhost".to_string()),
            publish_dir: env::var("SITEMAP_PUBLISH_DIR")
                .unwrap_or_else(|_| "public".to_string())
                .into(),
            backup_dir: env::var("SITEMAP_BACKUP_DIR")
                .unwrap_or_else(|_| ".sitemap-backups".to_string())
                .into(),
            shard_width: parse_or("SITEMAP_SHARD_WIDTH", 2000)?,
            backup_retention: parse_or("SITEMAP_BACKUP_RETENTION", 5)?,
            min_free_disk_bytes: parse_or::<u64>("SITEMAP_MIN_FREE_DISK_MB", 100)? * 1024 * 1024,
            empty_ranges_file: env::var("EMPTY_RANGES_FILE")
                .unwrap_or_else(|_| "empty-ranges.json".to_string())
                .into(),
            partitions_file: env::var("PARTITIONS_FILE").ok().map(PathBuf::from),
            registry_refresh_cron: env::var("REGISTRY_REFRESH_CRON")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),
            indexnow_api_key: SecretString::from_env("INDEXNOW_API_KEY"),
            search_ping_url: env::var("SEARCH_PING_URL").ok().filter(|s| !s.is_empty()),
            cdn: CdnCredentials::from_parts(
                env::var("CLOUDFLARE_ZONE_ID").ok(),
                SecretString::from_env("CLOUDFLARE_API_TOKEN"),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every request or run fail.
    pub fn validate(&self) -> Result<()> {
        if self.max_export_limit < 1 {
            bail!("MAX_EXPORT_LIMIT must be at least 1, got {}", self.max_export_limit);
        }
        if self.shard_width < 1 {
            bail!("SITEMAP_SHARD_WIDTH must be at least 1, got {}", self.shard_width);
        }
        Ok(())
    }

    /// Minimal configuration for the offline tools that never open a socket.
    pub fn database_only(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: 10,
            database_acquire_timeout: Duration::from_secs(5),
            port: 8080,
            request_timeout: Duration::from_secs(50),
            max_in_flight_exports: 32,
            max_export_limit: 2000,
            sitemap_base_url: "https://localhost".to_string(),
            publish_dir: PathBuf::from("public"),
            backup_dir: PathBuf::from(".sitemap-backups"),
            shard_width: 2000,
            backup_retention: 5,
            min_free_disk_bytes: 100 * 1024 * 1024,
            empty_ranges_file: PathBuf::from("empty-ranges.json"),
            partitions_file: None,
            registry_refresh_cron: "0 0 3 * * *".to_string(),
            indexnow_api_key: None,
            search_ping_url: None,
            cdn: None,
        }
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", name, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut config = Config::database_only("postgres://unused");
        assert!(config.validate().is_ok());

        config.max_export_limit = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MAX_EXPORT_LIMIT"));

        config.max_export_limit = 2000;
        config.shard_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_or_uses_default_and_rejects_garbage() {
        // Names unique to this test so parallel tests never race on them.
        env::remove_var("SITEMAP_TEST_UNSET");
        assert_eq!(parse_or("SITEMAP_TEST_UNSET", 7u32).unwrap(), 7);

        env::set_var("SITEMAP_TEST_GARBAGE", "seven");
        assert!(parse_or::<u32>("SITEMAP_TEST_GARBAGE", 7).is_err());

        env::set_var("SITEMAP_TEST_SET", " 12 ");
        assert_eq!(parse_or::<u32>("SITEMAP_TEST_SET", 7).unwrap(), 12);
    }
}
