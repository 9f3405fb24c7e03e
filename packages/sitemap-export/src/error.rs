//! Typed errors for the sitemap export library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the serving path can
//! branch on the failure class (retry, degrade, or surface a 500) and the
//! regeneration path can decide between abort and rollback.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::range::IdRange;

/// Errors that can occur while exporting, generating or publishing sitemaps.
#[derive(Debug, Error)]
pub enum SitemapError {
    /// No pooled connection became available in time
    #[error("timed out acquiring a database connection")]
    ConnectionAcquisitionTimeout,

    /// The statement exceeded its timeout budget
    #[error("statement timed out after {timeout_ms}ms for range {range}")]
    QueryStatementTimeout { range: IdRange, timeout_ms: u64 },

    /// Connection reset, closed pool, or other retry-worthy I/O failure
    #[error("transient database error: {0}")]
    Transient(String),

    /// Any other database failure
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Post-generation structural check failed
    #[error("validation failed: {}", .issues.join("; "))]
    ValidationFailure { issues: Vec<String> },

    /// Rollback was requested but the snapshot is gone
    #[error("backup unavailable: {path}")]
    BackupUnavailable { path: PathBuf },

    /// Best-effort downstream announcement failed
    #[error("notification to {target} failed: {reason}")]
    NotificationFailure { target: String, reason: String },

    /// Pre-flight check failed before any destructive step
    #[error("disk or permission check failed: {0}")]
    DiskOrPermissionFailure(String),

    /// Another regeneration run holds the lock
    #[error("regeneration already in progress (lock: {lock_path})")]
    RegenerationInProgress { lock_path: PathBuf },

    /// Request parameters do not describe a valid range
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },

    /// Partition layout is not a disjoint, ordered, contiguous covering
    #[error("invalid partition layout: {reason}")]
    InvalidPartitionLayout { reason: String },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed XML
    #[error("XML error in {file}: {reason}")]
    Xml { file: String, reason: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Coarse classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ConnectionAcquisition,
    StatementTimeout,
    Transient,
    Permanent,
}

impl SitemapError {
    /// Build an I/O error carrying the offending path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SitemapError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            SitemapError::ConnectionAcquisitionTimeout => ErrorClass::ConnectionAcquisition,
            SitemapError::QueryStatementTimeout { .. } => ErrorClass::StatementTimeout,
            SitemapError::Transient(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Stable machine-readable code, safe to expose to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SitemapError::ConnectionAcquisitionTimeout => "CONNECTION_ACQUISITION_TIMEOUT",
            SitemapError::QueryStatementTimeout { .. } => "QUERY_STATEMENT_TIMEOUT",
            SitemapError::Transient(_) => "TRANSIENT_DATABASE_ERROR",
            SitemapError::Database(_) => "DATABASE_ERROR",
            SitemapError::ValidationFailure { .. } => "VALIDATION_FAILURE",
            SitemapError::BackupUnavailable { .. } => "BACKUP_UNAVAILABLE",
            SitemapError::NotificationFailure { .. } => "NOTIFICATION_FAILURE",
            SitemapError::DiskOrPermissionFailure(_) => "DISK_OR_PERMISSION_FAILURE",
            SitemapError::RegenerationInProgress { .. } => "REGENERATION_IN_PROGRESS",
            SitemapError::InvalidRange { .. } => "INVALID_RANGE",
            SitemapError::InvalidPartitionLayout { .. } => "INVALID_PARTITION_LAYOUT",
            SitemapError::Config(_) => "CONFIG_ERROR",
            SitemapError::Io { .. } => "IO_ERROR",
            SitemapError::Xml { .. } => "XML_ERROR",
            SitemapError::Json(_) => "JSON_ERROR",
            SitemapError::Http(_) => "HTTP_ERROR",
        }
    }
}

/// Result type alias for sitemap operations.
pub type Result<T> = std::result::Result<T, SitemapError>;
