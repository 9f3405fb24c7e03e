//! Closed intervals over the catalog ID space.
//!
//! Every component (router, registry, executor, builder) speaks `IdRange`, so
//! the serving endpoint and the regeneration job agree on what a range is.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SitemapError};

/// Limit used by the export endpoint when the caller does not send one.
pub const DEFAULT_REQUEST_LIMIT: i64 = 3000;

/// A closed interval `[start, end]` of catalog IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdRange {
    pub start: i64,
    pub end: i64,
}

impl IdRange {
    /// Create a range, rejecting `start > end`.
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(SitemapError::InvalidRange {
                reason: format!("start {} is after end {}", start, end),
            });
        }
        Ok(Self { start, end })
    }

    /// Translate endpoint pagination into an ID range.
    ///
    /// `limit` is clamped to `[1, max_limit]`; the result is always
    /// `start = offset + 1`, `end = offset + limit`.
    pub fn from_offset_limit(offset: i64, limit: Option<i64>, max_limit: i64) -> Result<Self> {
        if offset < 0 {
            return Err(SitemapError::InvalidRange {
                reason: format!("offset must be >= 0, got {}", offset),
            });
        }
        if max_limit < 1 {
            return Err(SitemapError::InvalidRange {
                reason: format!("max limit must be >= 1, got {}", max_limit),
            });
        }

        let limit = limit.unwrap_or(DEFAULT_REQUEST_LIMIT).clamp(1, max_limit);
        let start = offset.checked_add(1);
        let end = offset.checked_add(limit);

        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(SitemapError::InvalidRange {
                reason: format!("offset {} overflows the ID space", offset),
            }),
        }
    }

    /// The aligned fixed-width window that contains `id`.
    ///
    /// Windows are `[1, width]`, `[width + 1, 2 * width]`, ... so shard names
    /// stay stable between regeneration runs.
    pub fn window_containing(id: i64, width: i64) -> Result<Self> {
        if width < 1 {
            return Err(SitemapError::InvalidRange {
                reason: format!("window width must be >= 1, got {}", width),
            });
        }
        if id < 1 {
            return Err(SitemapError::InvalidRange {
                reason: format!("catalog IDs start at 1, got {}", id),
            });
        }
        let start = ((id - 1) / width) * width + 1;
        let end = start.saturating_add(width - 1);
        Ok(Self { start, end })
    }

    /// Number of IDs covered.
    pub fn width(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn contains_id(&self, id: i64) -> bool {
        id >= self.start && id <= self.end
    }

    /// True if `other` lies entirely inside this range.
    pub fn contains(&self, other: &IdRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &IdRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if the two ranges overlap or touch end-to-start.
    pub fn mergeable_with(&self, other: &IdRange) -> bool {
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Sort and coalesce ranges so the result is disjoint and non-adjacent.
pub fn coalesce(mut ranges: Vec<IdRange>) -> Vec<IdRange> {
    ranges.sort();
    let mut merged: Vec<IdRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.mergeable_with(&range) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}
