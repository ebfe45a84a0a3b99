// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Half-open byte-range arithmetic.
//!
//! The cached filelike tracks downloaded spans, pending request spans
//! and connection targets as sorted lists of disjoint `[start, end)`
//! intervals. All operations here are O(n) in the list length.

pub mod buffer;

use serde::{Deserialize, Serialize};

pub use buffer::VirtualLruBuffer;

/// A half-open byte interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// First byte offset in the interval
    pub start: u64,
    /// One past the last byte offset
    pub end: u64,
}

impl Range {
    /// Create a range. `start` must not exceed `end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {start} exceeds end {end}");
        Range { start, end }
    }

    /// Length of the interval in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the interval contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether this range and `other` share at least one byte.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The overlapping sub-range, if any.
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Range { start, end })
        } else {
            None
        }
    }
}

/// Whether `query` is fully covered by the union of `ranges`.
///
/// `ranges` must be sorted by start and disjoint.
pub fn is_range_covered(query: Range, ranges: &[Range]) -> bool {
    if query.is_empty() {
        return true;
    }
    let mut position = query.start;
    for range in ranges {
        if range.start > position {
            break;
        }
        if range.end > position {
            position = range.end;
            if position >= query.end {
                return true;
            }
        }
    }
    position >= query.end
}

/// The sub-ranges of `query` not covered by `ranges`.
///
/// Candidate ranges are clipped to the query bound first so that
/// out-of-bounds entries do not corrupt the complement. `ranges` must be
/// sorted by start and disjoint.
pub fn missing_ranges(query: Range, ranges: &[Range]) -> Vec<Range> {
    let mut missing = Vec::new();
    let mut position = query.start;

    for range in ranges {
        let Some(clipped) = range.intersection(&query) else {
            continue;
        };
        if clipped.start > position {
            missing.push(Range::new(position, clipped.start));
        }
        position = position.max(clipped.end);
    }

    if position < query.end {
        missing.push(Range::new(position, query.end));
    }
    missing
}

/// Pairwise intersection of two sorted disjoint range lists.
pub fn intersect_ranges(a: &[Range], b: &[Range]) -> Vec<Range> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if let Some(overlap) = a[i].intersection(&b[j]) {
            result.push(overlap);
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Whether any range in `a` overlaps any range in `b`.
pub fn ranges_overlap(a: &[Range], b: &[Range]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].overlaps(&b[j]) {
            return true;
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// Sort and coalesce a range list into disjoint canonical form.
///
/// Adjacent ranges merge; empty ranges drop out.
pub fn merge_ranges(ranges: &[Range]) -> Vec<Range> {
    let mut sorted: Vec<Range> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<Range> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}
