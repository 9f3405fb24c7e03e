//! Rendering of shard and index documents.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;

use crate::types::part::SitemapPart;
use crate::types::shard::SitemapIndex;

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

const CHANGEFREQ: &str = "weekly";
const PRIORITY: &str = "0.8";

/// Lowercase, dash-separated, ASCII alphanumerics only.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }
    slug
}

pub fn format_lastmod(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Public page URL of one part.
///
/// Missing titles fall back to the code so the path stays readable.
pub fn part_url(base_url: &str, part: &SitemapPart) -> String {
    let category_slug = slug_or_fallback(&part.category_title, "group", &part.category_code);
    let sub_slug = slug_or_fallback(&part.sub_category_title, "subgroup", &part.sub_category_code);
    format!(
        "{}/catalog/{}/{}/{}/{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&part.category_code),
        category_slug,
        urlencoding::encode(&part.sub_category_code),
        sub_slug,
        urlencoding::encode(&part.catalog_id),
    )
}

fn slug_or_fallback(title: &str, label: &str, code: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        slugify(&format!("{} {}", label, code))
    } else {
        slug
    }
}

pub fn render_shard(base_url: &str, parts: &[SitemapPart], lastmod: &DateTime<Utc>) -> String {
    let lastmod = format_lastmod(lastmod);
    let mut out = String::with_capacity(128 + parts.len() * 256);
    out.push_str(XML_DECLARATION);
    let _ = write!(out, "\n<urlset xmlns=\"{}\">\n", SITEMAP_NS);
    for part in parts {
        let _ = write!(
            out,
            "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
            escape(part_url(base_url, part).as_str()),
            lastmod,
            CHANGEFREQ,
            PRIORITY,
        );
    }
    out.push_str("</urlset>\n");
    out
}

pub fn render_index(index: &SitemapIndex) -> String {
    let mut out = String::with_capacity(128 + index.len() * 160);
    out.push_str(XML_DECLARATION);
    let _ = write!(out, "\n<sitemapindex xmlns=\"{}\">\n", SITEMAP_NS);
    for entry in &index.entries {
        let _ = write!(
            out,
            "  <sitemap>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n  </sitemap>\n",
            escape(entry.loc.as_str()),
            format_lastmod(&entry.last_modified),
        );
    }
    out.push_str("</sitemapindex>\n");
    out
}

/// Absolute URL of a published file.
pub fn file_url(base_url: &str, filename: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), filename)
}
