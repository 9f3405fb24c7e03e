// HTTP routes
pub mod health;
pub mod sitemap_files;
pub mod sitemap_parts;

pub use health::*;
pub use sitemap_files::*;
pub use sitemap_parts::*;
