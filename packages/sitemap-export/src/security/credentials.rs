//! Credentials for the search-notification and CDN purge integrations.
//!
//! Uses the `secrecy` crate so API keys never end up in logs, debug output,
//! or error messages.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

/// A secret string that won't be logged or displayed.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(value.into().into_boxed_str()))
    }

    /// Read an optional secret from the environment.
    ///
    /// Unset and blank variables both mean "not configured".
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }

    /// Expose the secret value. Only call this when building a request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Zone and token for CDN cache purges.
#[derive(Clone)]
pub struct CdnCredentials {
    pub zone_id: String,
    pub api_token: SecretString,
}

impl CdnCredentials {
    pub fn new(zone_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            api_token: SecretString::new(api_token.into()),
        }
    }

    /// Both values must be present; either one alone is treated as unset.
    pub fn from_parts(zone_id: Option<String>, api_token: Option<SecretString>) -> Option<Self> {
        match (zone_id.filter(|z| !z.trim().is_empty()), api_token) {
            (Some(zone_id), Some(api_token)) => Some(Self { zone_id, api_token }),
            _ => None,
        }
    }
}

impl fmt::Debug for CdnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdnCredentials")
            .field("zone_id", &self.zone_id)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_not_in_debug_or_display() {
        let secret = SecretString::new("cf-super-secret-token");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(secret.expose(), "cf-super-secret-token");
    }

    #[test]
    fn test_cdn_credentials_debug_hides_token() {
        let creds = CdnCredentials::new("zone-123", "cf-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("zone-123"));
        assert!(!debug.contains("cf-secret"));
    }

    #[test]
    fn test_partial_cdn_credentials_are_unset() {
        assert!(CdnCredentials::from_parts(Some("zone".into()), None).is_none());
        assert!(CdnCredentials::from_parts(Some("  ".into()), Some("t".into())).is_none());
        assert!(CdnCredentials::from_parts(Some("zone".into()), Some("t".into())).is_some());
    }
}
