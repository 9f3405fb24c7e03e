//! Catalog records as they flow from the store to the endpoint and to XML.

use serde::{Deserialize, Serialize};

/// Category code pair used to look up display titles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey {
    pub category_code: String,
    pub sub_category_code: String,
}

impl CategoryKey {
    pub fn new(category_code: impl Into<String>, sub_category_code: impl Into<String>) -> Self {
        Self {
            category_code: category_code.into(),
            sub_category_code: sub_category_code.into(),
        }
    }
}

/// An exportable catalog record, as returned by a range query.
///
/// Only records with all required fields present are exportable; stores
/// filter the rest out in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPart {
    /// Numeric primary key used for range slicing
    pub id: i64,
    pub category_code: String,
    pub sub_category_code: String,
    /// Public catalog identifier that appears in URLs
    pub catalog_id: String,
}

impl CatalogPart {
    pub fn new(
        id: i64,
        category_code: impl Into<String>,
        sub_category_code: impl Into<String>,
        catalog_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            category_code: category_code.into(),
            sub_category_code: sub_category_code.into(),
            catalog_id: catalog_id.into(),
        }
    }

    pub fn key(&self) -> CategoryKey {
        CategoryKey::new(&self.category_code, &self.sub_category_code)
    }
}

/// One row of the category title reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRow {
    pub category_code: String,
    pub sub_category_code: String,
    pub title: String,
    pub subtitle: String,
}

/// A catalog record enriched with display titles.
///
/// This is the wire shape of the export endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapPart {
    pub category_code: String,
    pub sub_category_code: String,
    pub catalog_id: String,
    pub category_title: String,
    pub sub_category_title: String,
}

impl SitemapPart {
    /// Attach titles; a missing title degrades to empty strings.
    pub fn from_part(part: CatalogPart, titles: Option<(&str, &str)>) -> Self {
        let (category_title, sub_category_title) = titles.unwrap_or(("", ""));
        Self {
            category_title: category_title.to_string(),
            sub_category_title: sub_category_title.to_string(),
            category_code: part.category_code,
            sub_category_code: part.sub_category_code,
            catalog_id: part.catalog_id,
        }
    }
}
