//! Read-only health check of the published sitemap set.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fs_util::list_shards;
use crate::sitemap::validate::{
    parse_sitemap_file, sample_indices, validate_publish_dir, ValidationConfig, ValidationReport,
};
use crate::sitemap::xml::file_url;
use crate::types::shard::PublishLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Error,
}

impl HealthStatus {
    /// Process exit code for the health CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Warning => 1,
            HealthStatus::Critical | HealthStatus::Error => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub publish_dir: PathBuf,
    pub base_url: String,
    pub layout: PublishLayout,
    pub warn_after: Duration,
    pub critical_after: Duration,
    /// `None` skips the public fetch
    pub reachability_timeout: Option<Duration>,
    pub validation: ValidationConfig,
    pub stats_sample: usize,
}

impl HealthConfig {
    pub fn new(publish_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
            base_url: base_url.into(),
            layout: PublishLayout::default(),
            warn_after: Duration::from_secs(48 * 60 * 60),
            critical_after: Duration::from_secs(7 * 24 * 60 * 60),
            reachability_timeout: Some(Duration::from_secs(10)),
            validation: ValidationConfig::default(),
            stats_sample: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessCheck {
    pub status: HealthStatus,
    pub last_modified: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityCheck {
    pub url: String,
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapStats {
    pub shard_files: usize,
    pub sampled: usize,
    pub estimated_urls: u64,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub freshness: FreshnessCheck,
    pub structure: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachability: Option<ReachabilityCheck>,
    pub stats: SitemapStats,
}

impl HealthReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

pub struct HealthMonitor {
    client: reqwest::Client,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.reachability_timeout.unwrap_or(Duration::from_secs(10)))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub async fn check(&self) -> HealthReport {
        self.check_at(Utc::now()).await
    }

    /// Run every check as of `now`.
    ///
    /// Only a stale or missing index can push the result past `Warning`;
    /// structural problems and an unreachable index are warnings.
    pub async fn check_at(&self, now: DateTime<Utc>) -> HealthReport {
        let freshness = self.freshness(now);
        let structure = validate_publish_dir(
            &self.config.publish_dir,
            &self.config.layout,
            &self.config.validation,
        );
        let reachability = match self.config.reachability_timeout {
            Some(_) => Some(self.reachability().await),
            None => None,
        };
        let stats = self.stats();

        let mut status = freshness.status;
        if !structure.is_valid() || reachability.as_ref().is_some_and(|r| !r.reachable) {
            status = status.max(HealthStatus::Warning);
        }

        match status {
            HealthStatus::Healthy => info!(shards = stats.shard_files, "Sitemap healthy"),
            _ => warn!(
                status = ?status,
                freshness = %freshness.message,
                issues = structure.issues.len(),
                "Sitemap health degraded"
            ),
        }

        HealthReport {
            status,
            checked_at: now,
            freshness,
            structure,
            reachability,
            stats,
        }
    }

    /// Age of the newest `<lastmod>` in the index.
    pub fn freshness(&self, now: DateTime<Utc>) -> FreshnessCheck {
        let index_path = self.config.publish_dir.join(&self.config.layout.index_filename);
        let error = |message: String| FreshnessCheck {
            status: HealthStatus::Error,
            last_modified: None,
            age_hours: None,
            message,
        };

        let index = match parse_sitemap_file(&index_path) {
            Ok(index) => index,
            Err(e) => return error(format!("sitemap index unreadable: {}", e)),
        };
        let Some(newest) = index
            .lastmods
            .iter()
            .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .max()
        else {
            return error("no parseable lastmod in sitemap index".into());
        };

        let age = (now - newest).to_std().unwrap_or_default();
        let age_hours = age.as_secs_f64() / 3600.0;
        let (status, message) = if age > self.config.critical_after {
            (
                HealthStatus::Critical,
                format!("sitemap is {:.1} days old", age_hours / 24.0),
            )
        } else if age > self.config.warn_after {
            (
                HealthStatus::Warning,
                format!("sitemap is {:.1} hours old", age_hours),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("sitemap is fresh ({:.1} hours old)", age_hours),
            )
        };

        FreshnessCheck {
            status,
            last_modified: Some(newest),
            age_hours: Some(age_hours),
            message,
        }
    }

    pub async fn reachability(&self) -> ReachabilityCheck {
        let url = file_url(&self.config.base_url, &self.config.layout.index_filename);
        let started = Instant::now();
        let result = self.client.get(&url).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(resp) => {
                let code = resp.status();
                debug!(url = %url, status = code.as_u16(), elapsed_ms, "Fetched public index");
                ReachabilityCheck {
                    url,
                    reachable: code.is_success(),
                    status_code: Some(code.as_u16()),
                    elapsed_ms,
                    error: (!code.is_success()).then(|| format!("unexpected status {}", code)),
                }
            }
            Err(e) => ReachabilityCheck {
                url,
                reachable: false,
                status_code: None,
                elapsed_ms,
                error: Some(e.to_string()),
            },
        }
    }

    /// Shard count plus URL and size totals extrapolated from a sample.
    pub fn stats(&self) -> SitemapStats {
        let dir = &self.config.publish_dir;
        let shards = match list_shards(dir, &self.config.layout) {
            Ok(shards) => shards,
            Err(e) => {
                warn!(error = %e, "Could not list shard files");
                return SitemapStats::default();
            }
        };

        let mut sampled = 0u64;
        let mut sample_urls = 0u64;
        let mut sample_bytes = 0u64;
        for i in sample_indices(shards.len(), self.config.stats_sample) {
            let path = dir.join(&shards[i]);
            let (Ok(parsed), Ok(meta)) = (parse_sitemap_file(&path), std::fs::metadata(&path))
            else {
                continue;
            };
            sampled += 1;
            sample_urls += parsed.entries as u64;
            sample_bytes += meta.len();
        }

        let files = shards.len() as u64;
        let extrapolate = |total: u64| {
            if sampled == 0 {
                0
            } else {
                (total as f64 / sampled as f64 * files as f64).round() as u64
            }
        };
        SitemapStats {
            shard_files: shards.len(),
            sampled: sampled as usize,
            estimated_urls: extrapolate(sample_urls),
            estimated_bytes: extrapolate(sample_bytes),
        }
    }
}
