// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::buffer::BufferFlags;

/// Number of in-flight frame records.
pub const MAX_TIMESTAMP: usize = 17;

/// Timestamp written into every entry on reset.
pub const RESET_TIMESTAMP: i64 = -19771003;

/// Presentation data recorded for one submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub timestamp: i64,
    pub flags: BufferFlags,
}

impl Default for FrameRecord {
    fn default() -> Self {
        Self {
            timestamp: RESET_TIMESTAMP,
            flags: BufferFlags::NONE,
        }
    }
}

/// Ring of frame records keyed by hardware tag.
///
/// The submit side tags each frame with `tag()` before handing it to the
/// engine and then calls `advance()`. The engine reports a tag for every
/// displayable frame and `lookup()` recovers its timestamp, whatever order
/// the engine completes frames in. Entries are overwritten when the tag
/// space wraps; stale reads after a wrap are accepted.
#[derive(Debug, Clone)]
pub struct TimestampLedger {
    entries: [FrameRecord; MAX_TIMESTAMP],
    index: usize,
    output_index: usize,
}

impl TimestampLedger {
    pub fn new() -> Self {
        Self {
            entries: [FrameRecord::default(); MAX_TIMESTAMP],
            index: 0,
            output_index: 0,
        }
    }

    /// Tag for the next submitted frame.
    pub fn tag(&self) -> i32 {
        self.index as i32
    }

    /// Record the next frame at the current tag.
    pub fn record(&mut self, timestamp: i64, flags: BufferFlags) -> i32 {
        self.entries[self.index] = FrameRecord { timestamp, flags };
        self.tag()
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % MAX_TIMESTAMP;
    }

    /// Look up a tag reported by the engine.
    ///
    /// Returns `None` for tags outside the ring, which the engine reports
    /// for frames it did not tag.
    pub fn lookup(&self, tag: i32) -> Option<FrameRecord> {
        usize::try_from(tag)
            .ok()
            .and_then(|tag| self.entries.get(tag))
            .copied()
    }

    /// Count a displayed frame; returns the display-order position.
    pub fn next_output(&mut self) -> usize {
        let position = self.output_index;
        self.output_index = (self.output_index + 1) % MAX_TIMESTAMP;
        position
    }

    pub fn reset(&mut self) {
        self.entries = [FrameRecord::default(); MAX_TIMESTAMP];
        self.index = 0;
        self.output_index = 0;
    }
}

impl Default for TimestampLedger {
    fn default() -> Self {
        Self::new()
    }
}
