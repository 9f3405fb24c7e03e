//! Sitemap XML: rendering, the full-catalog builder, and structural checks.

pub mod builder;
pub mod validate;
pub mod xml;

pub use builder::{BuilderConfig, SitemapBuilder};
pub use validate::{validate_publish_dir, ValidationConfig, ValidationReport};
