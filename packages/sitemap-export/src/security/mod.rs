//! Credential handling for outbound integrations.

pub mod credentials;

pub use credentials::{CdnCredentials, SecretString};
