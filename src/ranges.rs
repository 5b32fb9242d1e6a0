// src/ranges.rs
//
//! Coverage tracking for a single part buffer.
//!
//! `WriteAt` calls may land anywhere inside a part, in any order.
//! [`OffsetRanges`] records which `[start, end)` byte ranges of the part
//! buffer are filled so the writer can tell when a part becomes complete
//! and how much of a trailing part is usable.

/// Non-overlapping, sorted `[start, end)` ranges inside a buffer of
/// `part_size` bytes.
#[derive(Debug, Clone)]
pub struct OffsetRanges {
    part_size: i64,
    ranges: Vec<(i64, i64)>,
}

impl OffsetRanges {
    pub fn new(part_size: i64) -> Self {
        Self { part_size, ranges: Vec::new() }
    }

    /// Record that `[start, end)` is now filled, merging with any adjacent
    /// or overlapping ranges.
    pub fn add(&mut self, start: i64, end: i64) {
        debug_assert!(start >= 0 && start <= end && end <= self.part_size);
        if start == end {
            return;
        }
        let mut merged_start = start;
        let mut merged_end = end;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut inserted = false;
        for &(s, e) in &self.ranges {
            if e < merged_start || s > merged_end {
                // disjoint; keep order
                if s > merged_end && !inserted {
                    out.push((merged_start, merged_end));
                    inserted = true;
                }
                out.push((s, e));
            } else {
                merged_start = merged_start.min(s);
                merged_end = merged_end.max(e);
            }
        }
        if !inserted {
            out.push((merged_start, merged_end));
        }
        self.ranges = out;
    }

    /// Highest `e` such that `[0, e)` is fully covered, or `-1` when offset
    /// 0 is not covered.
    pub fn get_max_valid_offset(&self) -> i64 {
        match self.ranges.first() {
            Some(&(0, e)) => e,
            _ => -1,
        }
    }

    /// The whole part buffer is covered.
    pub fn is_full(&self) -> bool {
        self.get_max_valid_offset() == self.part_size
    }
}
