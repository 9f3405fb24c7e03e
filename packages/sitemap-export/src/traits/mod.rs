//! Core trait abstractions for the sitemap export library.
//!
//! These traits define the seams where applications plug in storage and
//! where tests substitute deterministic fakes.

pub mod generator;
pub mod store;
