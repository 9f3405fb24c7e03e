// Sitemap export server - API core
//
// HTTP export endpoint, scheduled registry refresh and the command line tools
// built on the sitemap-export library.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
