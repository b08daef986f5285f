// LibriSync - Audible Library Sync for Mobile
// Copyright (C) 2025 Henning Berge
//
// This program is a Rust port of Libation (https://github.com/rmcrackan/Libation)
// Original work Copyright (C) Libation contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Sample locator
//!
//! Turns chunk offsets, the sample-to-chunk runs and the sample-size table
//! into absolute `(offset, size)` pairs, one sample at a time.
//!
//! # Layout Rule
//! ```text
//! chunk i starts at chunk_offsets[i]
//! sample j of chunk i starts at chunk_offsets[i] + sum(size of samples 0..j in chunk i)
//! ```
//! The sample-size index advances monotonically across chunks while the
//! byte cursor resets at every chunk boundary. Only the next sample is ever
//! computed, so memory use does not grow with the track length.

use crate::mp4::track::SampleTable;
use serde::{Deserialize, Serialize};

/// Absolute location of one encoded sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSample {
    /// Absolute file position of the first sample byte
    pub offset: u64,
    pub size: u32,
    pub chunk_index: usize,
    pub sample_index: usize,
}

impl AudioSample {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.size))
    }
}

/// What to do with a sample whose byte range cannot be honoured
/// (past the end of the source, or behind the stream cursor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleBoundsPolicy {
    /// Skip the sample, report it, and keep converting
    #[default]
    Filter,
    /// Abort the conversion with `InvalidSampleOffset`
    Fail,
}

/// Lazy iterator over the samples of one track in chunk-then-sample order
#[derive(Debug, Clone)]
pub struct SampleLocator<'a> {
    table: &'a SampleTable,
    next_chunk: usize,
    current_chunk: usize,
    remaining_in_chunk: u32,
    cursor: u64,
    sample_index: usize,
}

impl<'a> SampleLocator<'a> {
    pub fn new(table: &'a SampleTable) -> Self {
        Self {
            table,
            next_chunk: 0,
            current_chunk: 0,
            remaining_in_chunk: 0,
            cursor: 0,
            sample_index: 0,
        }
    }
}

impl Iterator for SampleLocator<'_> {
    type Item = AudioSample;

    fn next(&mut self) -> Option<AudioSample> {
        if self.sample_index >= self.table.sample_count() {
            return None;
        }

        // Chunks declared with zero samples are skipped.
        while self.remaining_in_chunk == 0 {
            let chunk_offset = *self.table.chunk_offsets.get(self.next_chunk)?;
            self.current_chunk = self.next_chunk;
            self.next_chunk += 1;
            self.cursor = chunk_offset;
            self.remaining_in_chunk = self.table.samples_in_chunk(self.current_chunk);
        }

        let size = self.table.sample_sizes.get(self.sample_index)?;
        let sample = AudioSample {
            offset: self.cursor,
            size,
            chunk_index: self.current_chunk,
            sample_index: self.sample_index,
        };

        self.cursor = self.cursor.saturating_add(u64::from(size));
        self.sample_index += 1;
        self.remaining_in_chunk -= 1;

        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.table.sample_count().saturating_sub(self.sample_index)))
    }
}
