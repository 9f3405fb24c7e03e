//! Best-effort announcements after a successful publish.
//!
//! Three independent steps, each skipped with a warning when its credentials
//! are missing and never able to fail the run:
//! - IndexNow-style submission of changed URLs
//! - search engine ping with the index URL
//! - CDN purge of changed URLs, in batches of at most 30

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::error::{Result, SitemapError};
use crate::fs_util::list_managed;
use crate::security::{CdnCredentials, SecretString};
use crate::sitemap::xml::file_url;
use crate::types::shard::PublishLayout;

pub const INDEXNOW_ENDPOINT: &str = "https://api.indexnow.org/indexnow";
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const PURGE_BATCH_SIZE: usize = 30;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub base_url: String,
    pub layout: PublishLayout,
    pub indexnow_endpoint: String,
    pub indexnow_key: Option<SecretString>,
    /// Defaults to `{base_url}/{key}.txt`
    pub indexnow_key_location: Option<String>,
    pub ping_url: Option<String>,
    pub cdn: Option<CdnCredentials>,
    pub cdn_api_base: String,
    pub timeout: Duration,
}

impl NotifierConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            layout: PublishLayout::default(),
            indexnow_endpoint: INDEXNOW_ENDPOINT.to_string(),
            indexnow_key: None,
            indexnow_key_location: None,
            ping_url: None,
            cdn: None,
            cdn_api_base: CLOUDFLARE_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// How one notification step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Sent,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub urls: Vec<String>,
    pub indexnow: StepStatus,
    pub ping: StepStatus,
    pub purge: StepStatus,
    pub purge_batches: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexNowSubmission<'a> {
    host: &'a str,
    key: &'a str,
    key_location: &'a str,
    url_list: &'a [String],
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    files: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

pub struct Notifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("sitemap-export/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Announce the changed files. Failures are logged and reported, never
    /// returned.
    #[instrument(skip(self, changed_files), fields(changed = changed_files.len()))]
    pub async fn announce(&self, changed_files: &[String]) -> NotificationReport {
        let urls = self.changed_urls(changed_files);

        let indexnow = self
            .step("indexnow", self.config.indexnow_key.is_some(), self.submit_indexnow(&urls))
            .await;
        let ping = self
            .step("ping", self.config.ping_url.is_some(), self.ping())
            .await;

        let mut purge_batches = 0;
        let purge = if self.config.cdn.is_none() {
            warn!("CDN credentials not configured, skipping cache purge");
            StepStatus::Skipped
        } else {
            match self.purge(&urls).await {
                Ok(batches) => {
                    purge_batches = batches;
                    StepStatus::Sent
                }
                Err(e) => {
                    warn!(error = %e, "CDN purge failed");
                    StepStatus::Failed(e.to_string())
                }
            }
        };

        NotificationReport {
            urls,
            indexnow,
            ping,
            purge,
            purge_batches,
        }
    }

    async fn step(
        &self,
        name: &str,
        configured: bool,
        action: impl std::future::Future<Output = Result<()>>,
    ) -> StepStatus {
        if !configured {
            warn!(step = name, "Notification not configured, skipping");
            return StepStatus::Skipped;
        }
        match action.await {
            Ok(()) => {
                info!(step = name, "Notification sent");
                StepStatus::Sent
            }
            Err(e) => {
                warn!(step = name, error = %e, "Notification failed");
                StepStatus::Failed(e.to_string())
            }
        }
    }

    /// Public URLs for the changed files; the index is always included.
    pub fn changed_urls(&self, changed_files: &[String]) -> Vec<String> {
        let index = &self.config.layout.index_filename;
        let mut urls = vec![file_url(&self.config.base_url, index)];
        urls.extend(
            changed_files
                .iter()
                .filter(|name| *name != index)
                .map(|name| file_url(&self.config.base_url, name)),
        );
        urls
    }

    async fn submit_indexnow(&self, urls: &[String]) -> Result<()> {
        let target = "indexnow";
        let key = self
            .config
            .indexnow_key
            .as_ref()
            .ok_or_else(|| failure(target, "no API key"))?;
        let base = url::Url::parse(&self.config.base_url)
            .map_err(|e| failure(target, format!("invalid base URL: {}", e)))?;
        let host = base
            .host_str()
            .ok_or_else(|| failure(target, "base URL has no host"))?;
        let key_location = self
            .config
            .indexnow_key_location
            .clone()
            .unwrap_or_else(|| file_url(&self.config.base_url, &format!("{}.txt", key.expose())));

        let body = IndexNowSubmission {
            host,
            key: key.expose(),
            key_location: &key_location,
            url_list: urls,
        };
        let response = self
            .client
            .post(&self.config.indexnow_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failure(target, e.to_string()))?;

        match response.status().as_u16() {
            200 | 202 => Ok(()),
            status => Err(failure(target, format!("HTTP {}", status))),
        }
    }

    async fn ping(&self) -> Result<()> {
        let target = "ping";
        let ping_url = self
            .config
            .ping_url
            .as_ref()
            .ok_or_else(|| failure(target, "no ping URL"))?;
        let index_url = file_url(&self.config.base_url, &self.config.layout.index_filename);

        let response = self
            .client
            .get(ping_url)
            .query(&[("sitemap", index_url.as_str())])
            .send()
            .await
            .map_err(|e| failure(target, e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(failure(target, format!("HTTP {}", response.status())))
        }
    }

    /// Purge in batches; returns the number of batches sent.
    async fn purge(&self, urls: &[String]) -> Result<usize> {
        let target = "cdn-purge";
        let cdn = self
            .config
            .cdn
            .as_ref()
            .ok_or_else(|| failure(target, "no CDN credentials"))?;
        let endpoint = format!(
            "{}/zones/{}/purge_cache",
            self.config.cdn_api_base.trim_end_matches('/'),
            cdn.zone_id
        );

        let mut batches = 0;
        for batch in urls.chunks(PURGE_BATCH_SIZE) {
            let response = self
                .client
                .post(&endpoint)
                .bearer_auth(cdn.api_token.expose())
                .json(&PurgeRequest { files: batch })
                .send()
                .await
                .map_err(|e| failure(target, e.to_string()))?;

            let status = response.status();
            let body: PurgeResponse = response
                .json()
                .await
                .map_err(|e| failure(target, format!("HTTP {}: {}", status, e)))?;
            if !body.success {
                return Err(failure(
                    target,
                    format!("HTTP {}: {:?}", status, body.errors),
                ));
            }
            batches += 1;
        }
        Ok(batches)
    }
}

fn failure(target: &str, reason: impl Into<String>) -> SitemapError {
    SitemapError::NotificationFailure {
        target: target.to_string(),
        reason: reason.into(),
    }
}

/// Content hash of a sitemap document ignoring `<lastmod>` values, so a
/// rebuild with identical records does not count as a change.
pub fn fingerprint(xml: &str) -> String {
    let mut hasher = Sha256::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<lastmod>") {
        hasher.update(rest[..start].as_bytes());
        match rest[start..].find("</lastmod>") {
            Some(end) => rest = &rest[start + end + "</lastmod>".len()..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    hasher.update(rest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprints of the published XML files, keyed by filename.
pub fn fingerprint_dir(dir: &Path, layout: &PublishLayout) -> Result<BTreeMap<String, String>> {
    let mut prints = BTreeMap::new();
    for name in list_managed(dir, layout)? {
        if layout.is_temp(&name) || name == layout.summary_filename {
            continue;
        }
        let path = dir.join(&name);
        let xml = std::fs::read_to_string(&path).map_err(|e| SitemapError::io(&path, e))?;
        prints.insert(name, fingerprint(&xml));
    }
    Ok(prints)
}

/// Files added, removed or modified between two fingerprint sets.
pub fn changed_files(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(name, print)| before.get(*name) != Some(*print))
        .map(|(name, _)| name.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .cloned(),
    );
    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prints(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fingerprint_ignores_lastmod() {
        let a = "<url><loc>x</loc><lastmod>2026-01-01T00:00:00Z</lastmod></url>";
        let b = "<url><loc>x</loc><lastmod>2026-02-01T00:00:00Z</lastmod></url>";
        let c = "<url><loc>y</loc><lastmod>2026-01-01T00:00:00Z</lastmod></url>";
        assert_eq!(fingerprint(a), fingerprint(b));
        assert_ne!(fingerprint(a), fingerprint(c));
    }

    #[test]
    fn test_changed_files_covers_added_removed_and_modified() {
        let before = prints(&[("sitemap.xml", "1"), ("sitemap-1-2000.xml", "a"), ("sitemap-2001-4000.xml", "b")]);
        let after = prints(&[("sitemap.xml", "1"), ("sitemap-1-2000.xml", "a2"), ("sitemap-4001-6000.xml", "c")]);
        assert_eq!(
            changed_files(&before, &after),
            vec!["sitemap-1-2000.xml", "sitemap-2001-4000.xml", "sitemap-4001-6000.xml"]
        );
    }

    #[test]
    fn test_index_url_always_included() {
        let notifier = Notifier::new(NotifierConfig::new("https://example.com/")).unwrap();
        let urls = notifier.changed_urls(&["sitemap-1-2000.xml".into(), "sitemap.xml".into()]);
        assert_eq!(
            urls,
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/sitemap-1-2000.xml".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_steps_are_skipped() {
        let notifier = Notifier::new(NotifierConfig::new("https://example.com")).unwrap();
        let report = notifier.announce(&[]).await;
        assert_eq!(report.indexnow, StepStatus::Skipped);
        assert_eq!(report.ping, StepStatus::Skipped);
        assert_eq!(report.purge, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_fail_without_panicking() {
        let mut config = NotifierConfig::new("https://example.com");
        config.indexnow_endpoint = "http://127.0.0.1:9/indexnow".into();
        config.indexnow_key = Some(SecretString::new("abc123"));
        config.ping_url = Some("http://127.0.0.1:9/ping".into());
        config.timeout = Duration::from_secs(2);
        let notifier = Notifier::new(config).unwrap();

        let report = notifier.announce(&["sitemap-1-2000.xml".into()]).await;
        assert!(matches!(report.indexnow, StepStatus::Failed(_)));
        assert!(matches!(report.ping, StepStatus::Failed(_)));
    }
}
