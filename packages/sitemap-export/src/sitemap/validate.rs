//! Structural checks over a published (or freshly generated) sitemap set.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{Result, SitemapError};
use crate::types::shard::PublishLayout;

/// What a single sitemap document contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSitemap {
    pub has_declaration: bool,
    /// Local name of the root element (`urlset` or `sitemapindex`)
    pub root: String,
    /// `<loc>` values in document order
    pub locs: Vec<String>,
    /// `<lastmod>` values in document order
    pub lastmods: Vec<String>,
    /// Number of `<url>` or `<sitemap>` entries
    pub entries: usize,
}

/// Parse a sitemap or sitemap index, rejecting anything not well-formed.
pub fn parse_sitemap(xml: &str, file: &str) -> Result<ParsedSitemap> {
    let xml_error = |reason: String| SitemapError::Xml {
        file: file.to_string(),
        reason,
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedSitemap::default();
    let mut stack: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Decl(_) => parsed.has_declaration = true,
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if !parsed.root.is_empty() {
                        return Err(xml_error("multiple root elements".into()));
                    }
                    parsed.root = name.clone();
                } else if stack.len() == 1 && (name == "url" || name == "sitemap") {
                    parsed.entries += 1;
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if !parsed.root.is_empty() {
                        return Err(xml_error("multiple root elements".into()));
                    }
                    parsed.root = name;
                }
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| xml_error(e.to_string()))?
                    .into_owned();
                match stack.last().map(String::as_str) {
                    Some("loc") => parsed.locs.push(text),
                    Some("lastmod") => parsed.lastmods.push(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error(format!("unclosed element <{}>", stack.join("><"))));
    }
    if parsed.root.is_empty() {
        return Err(xml_error("no root element".into()));
    }
    Ok(parsed)
}

pub fn parse_sitemap_file(path: &Path) -> Result<ParsedSitemap> {
    let xml = std::fs::read_to_string(path).map_err(|e| SitemapError::io(path, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_sitemap(&xml, &name)
}

/// Filename part of a locator URL.
pub fn loc_filename(loc: &str) -> &str {
    loc.rsplit('/').next().unwrap_or(loc)
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Shards parsed in full; the first and last are always included
    pub sample_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { sample_size: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub shards_referenced: usize,
    pub shards_checked: usize,
    pub urls_in_sample: usize,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(SitemapError::ValidationFailure {
                issues: self.issues,
            })
        }
    }
}

/// Evenly spaced sample of `0..len` including both ends.
pub fn sample_indices(len: usize, size: usize) -> Vec<usize> {
    if len <= size {
        return (0..len).collect();
    }
    if size <= 1 {
        return vec![0];
    }
    let mut picks: Vec<usize> = (0..size).map(|i| i * (len - 1) / (size - 1)).collect();
    picks.dedup();
    picks
}

/// Check the index in `dir` and a sample of the shards it references.
pub fn validate_publish_dir(
    dir: &Path,
    layout: &PublishLayout,
    config: &ValidationConfig,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let index_path = dir.join(&layout.index_filename);

    let index = match parse_sitemap_file(&index_path) {
        Ok(index) => index,
        Err(e) => {
            report.issues.push(format!("index unreadable: {}", e));
            return report;
        }
    };

    if !index.has_declaration {
        report.issues.push("index has no XML declaration".into());
    }
    if index.root != "sitemapindex" {
        report
            .issues
            .push(format!("index root is <{}>, expected <sitemapindex>", index.root));
    }
    if index.locs.is_empty() {
        report.issues.push("index references no shards".into());
        return report;
    }
    report.shards_referenced = index.locs.len();

    let mut shard_names = Vec::with_capacity(index.locs.len());
    for loc in &index.locs {
        let name = loc_filename(loc);
        if !layout.is_shard(name) {
            report
                .issues
                .push(format!("index references unexpected file {}", loc));
        } else if !dir.join(name).is_file() {
            report.issues.push(format!("referenced shard {} is missing", name));
        } else {
            shard_names.push(name.to_string());
        }
    }

    for i in sample_indices(shard_names.len(), config.sample_size) {
        let name = &shard_names[i];
        report.shards_checked += 1;
        match parse_sitemap_file(&dir.join(name)) {
            Ok(shard) if shard.root != "urlset" => report
                .issues
                .push(format!("{} root is <{}>, expected <urlset>", name, shard.root)),
            Ok(shard) if shard.entries == 0 => {
                report.issues.push(format!("{} contains no URLs", name))
            }
            Ok(shard) => report.urls_in_sample += shard.entries,
            Err(e) => report.issues.push(e.to_string()),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/catalog/1?a=1&amp;b=2</loc><lastmod>2026-01-01T00:00:00Z</lastmod></url>
  <url><loc>https://example.com/catalog/2</loc></url>
</urlset>"#;

    const EMPTY_SHARD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
</urlset>"#;

    fn index(names: &[&str]) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<sitemapindex xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        for name in names {
            xml.push_str(&format!(
                "<sitemap><loc>https://example.com/{}</loc><lastmod>2026-01-01T00:00:00Z</lastmod></sitemap>\n",
                name
            ));
        }
        xml.push_str("</sitemapindex>\n");
        xml
    }

    #[test]
    fn test_parse_shard() {
        let parsed = parse_sitemap(SHARD, "s.xml").unwrap();
        assert!(parsed.has_declaration);
        assert_eq!(parsed.root, "urlset");
        assert_eq!(parsed.entries, 2);
        assert_eq!(parsed.locs[0], "https://example.com/catalog/1?a=1&b=2");
        assert_eq!(parsed.lastmods, vec!["2026-01-01T00:00:00Z".to_string()]);
    }

    #[test]
    fn test_truncated_document_is_rejected() {
        let truncated = &SHARD[..SHARD.len() - 12];
        assert!(matches!(
            parse_sitemap(truncated, "s.xml"),
            Err(SitemapError::Xml { .. })
        ));
        assert!(parse_sitemap("<urlset><url></urlset>", "s.xml").is_err());
        assert!(parse_sitemap("", "s.xml").is_err());
    }

    #[test]
    fn test_sample_includes_first_and_last() {
        assert_eq!(sample_indices(2, 3), vec![0, 1]);
        assert_eq!(sample_indices(10, 3), vec![0, 4, 9]);
        assert_eq!(sample_indices(10, 1), vec![0]);
        assert!(sample_indices(0, 3).is_empty());
    }

    #[test]
    fn test_valid_publish_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sitemap.xml"), index(&["sitemap-1-2000.xml"])).unwrap();
        std::fs::write(dir.path().join("sitemap-1-2000.xml"), SHARD).unwrap();

        let report =
            validate_publish_dir(dir.path(), &PublishLayout::default(), &ValidationConfig::default());
        assert!(report.is_valid(), "{:?}", report.issues);
        assert_eq!(report.urls_in_sample, 2);
    }

    #[test]
    fn test_empty_or_missing_shards_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sitemap.xml"),
            index(&["sitemap-1-2000.xml", "sitemap-2001-4000.xml", "sitemap-4001-6000.xml"]),
        )
        .unwrap();
        std::fs::write(dir.path().join("sitemap-1-2000.xml"), SHARD).unwrap();
        std::fs::write(dir.path().join("sitemap-2001-4000.xml"), EMPTY_SHARD).unwrap();

        let report =
            validate_publish_dir(dir.path(), &PublishLayout::default(), &ValidationConfig::default());
        assert!(!report.is_valid());
        assert!(report.issues.iter().any(|i| i.contains("sitemap-4001-6000.xml is missing")));
        assert!(report.issues.iter().any(|i| i.contains("sitemap-2001-4000.xml contains no URLs")));
        assert!(matches!(
            report.into_result(),
            Err(SitemapError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn test_index_without_shards_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sitemap.xml"), index(&[])).unwrap();
        let report =
            validate_publish_dir(dir.path(), &PublishLayout::default(), &ValidationConfig::default());
        assert_eq!(report.issues, vec!["index references no shards".to_string()]);
    }
}
