//! Range → partition routing.
//!
//! A range is routed to a partition only when the partition's bounds fully
//! contain it. Anything that straddles a boundary goes to the full-table path
//! so records on either side are never dropped.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SitemapError};
use crate::types::range::IdRange;

/// A physical segment of the parts table keyed by ID bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub start: i64,
    pub end: i64,
}

impl Partition {
    pub fn new(name: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn bounds(&self) -> IdRange {
        IdRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Why a range was sent to the full table instead of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The store is not partitioned
    Unpartitioned,
    /// The range spans a partition boundary
    PartitionMismatch,
    /// The range lies (at least partly) outside the covered ID space
    OutsideLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Partition(Partition),
    FullTable { reason: FallbackReason },
}

impl RouteDecision {
    pub fn partition_name(&self) -> Option<&str> {
        match self {
            RouteDecision::Partition(p) => Some(&p.name),
            RouteDecision::FullTable { .. } => None,
        }
    }

    /// Value for the `X-Query-Strategy` response header.
    pub fn strategy(&self) -> &'static str {
        match self {
            RouteDecision::Partition(_) => "partition",
            RouteDecision::FullTable { .. } => "full-table",
        }
    }
}

/// Maps ID ranges onto a validated partition layout.
#[derive(Debug, Clone, Default)]
pub struct PartitionRouter {
    partitions: Vec<Partition>,
}

impl PartitionRouter {
    /// Build a router, validating that the layout is an ordered, disjoint,
    /// contiguous covering with SQL-safe names.
    pub fn new(partitions: Vec<Partition>) -> Result<Self> {
        for (i, p) in partitions.iter().enumerate() {
            if !is_safe_identifier(&p.name) {
                return Err(SitemapError::InvalidPartitionLayout {
                    reason: format!("unsafe partition name {:?}", p.name),
                });
            }
            if p.start > p.end {
                return Err(SitemapError::InvalidPartitionLayout {
                    reason: format!("{} has start {} after end {}", p.name, p.start, p.end),
                });
            }
            if i > 0 {
                let prev = &partitions[i - 1];
                if p.start <= prev.end {
                    return Err(SitemapError::InvalidPartitionLayout {
                        reason: format!("{} overlaps or precedes {}", p.name, prev.name),
                    });
                }
                if p.start != prev.end + 1 {
                    return Err(SitemapError::InvalidPartitionLayout {
                        reason: format!("gap between {} and {}", prev.name, p.name),
                    });
                }
            }
        }
        Ok(Self { partitions })
    }

    /// Load a layout from a JSON array of `{name, start, end}` objects.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SitemapError::io(path, e))?;
        let partitions: Vec<Partition> = serde_json::from_str(&raw)?;
        Self::new(partitions)
    }

    /// A router for an unpartitioned store.
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    /// The production layout of `part_info`.
    pub fn default_layout() -> Vec<Partition> {
        vec![
            Partition::new("part_info_p1", 1, 500_000),
            Partition::new("part_info_p2", 500_001, 1_000_000),
            Partition::new("part_info_p3", 1_000_001, 2_000_000),
            Partition::new("part_info_p4", 2_000_001, 3_000_000),
            Partition::new("part_info_p5", 3_000_001, 4_000_000),
            Partition::new("part_info_p6", 4_000_001, 5_000_000),
            Partition::new("part_info_p7", 5_000_001, 10_000_000),
            Partition::new("part_info_p8", 10_000_001, 100_000_000),
        ]
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Route a range to the partition that fully contains it.
    pub fn route(&self, range: &IdRange) -> RouteDecision {
        if self.partitions.is_empty() {
            return RouteDecision::FullTable {
                reason: FallbackReason::Unpartitioned,
            };
        }

        // Last partition starting at or before range.start.
        let idx = self.partitions.partition_point(|p| p.start <= range.start);
        if idx == 0 {
            return RouteDecision::FullTable {
                reason: FallbackReason::OutsideLayout,
            };
        }

        let candidate = &self.partitions[idx - 1];
        if candidate.bounds().contains(range) {
            return RouteDecision::Partition(candidate.clone());
        }

        let reason = if range.start > candidate.end || range.end > self.covered_end() {
            FallbackReason::OutsideLayout
        } else {
            FallbackReason::PartitionMismatch
        };
        RouteDecision::FullTable { reason }
    }

    fn covered_end(&self) -> i64 {
        self.partitions.last().map(|p| p.end).unwrap_or(i64::MIN)
    }
}

/// `[a-z_][a-z0-9_]*`, short enough for a Postgres identifier.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
