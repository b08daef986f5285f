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


//! Track and sample-table descriptions
//!
//! These are plain values copied out of the container. Nothing here holds
//! a reference back into the source once the parser returns.

use crate::mp4::atom::FourCC;

/// Sample sizes from `stsz`
///
/// A nonzero uniform size in the box means every sample has that size, so no
/// per-sample array is materialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Uniform { size: u32, count: u32 },
    Table(Vec<u32>),
}

impl SampleSizes {
    pub fn len(&self) -> usize {
        match self {
            SampleSizes::Uniform { count, .. } => *count as usize,
            SampleSizes::Table(sizes) => sizes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the sample at a 0-based index
    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            SampleSizes::Uniform { size, count } => (index < *count as usize).then_some(*size),
            SampleSizes::Table(sizes) => sizes.get(index).copied(),
        }
    }
}

impl Default for SampleSizes {
    fn default() -> Self {
        SampleSizes::Table(Vec::new())
    }
}

/// One `stsc` run: chunks from `first_chunk` (1-based) onward hold
/// `samples_per_chunk` samples until the next entry takes over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_index: u32,
}

/// One `stts` run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_duration: u32,
}

/// The four tables that locate and time every sample of a track
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleTable {
    pub sample_sizes: SampleSizes,
    pub chunk_offsets: Vec<u64>,
    pub samples_per_chunk: Vec<SampleToChunkEntry>,
    pub time_to_sample: Vec<TimeToSampleEntry>,
}

impl SampleTable {
    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_offsets.len()
    }

    /// Number of samples in the chunk at a 0-based index
    ///
    /// Scans `stsc` in reverse for the last entry whose 1-based `first_chunk`
    /// starts at or before this chunk. Falls back to the first entry's count
    /// when none match, and to one sample per chunk when `stsc` is empty.
    pub fn samples_in_chunk(&self, chunk_index: usize) -> u32 {
        let chunk_index = chunk_index as u64;
        self.samples_per_chunk
            .iter()
            .rev()
            .find(|entry| u64::from(entry.first_chunk).saturating_sub(1) <= chunk_index)
            .or_else(|| self.samples_per_chunk.first())
            .map(|entry| entry.samples_per_chunk)
            .unwrap_or(1)
    }

    /// Per-sample durations in track timescale units, in decode order
    pub fn sample_durations(&self) -> impl Iterator<Item = u32> + '_ {
        self.time_to_sample
            .iter()
            .flat_map(|entry| std::iter::repeat(entry.sample_duration).take(entry.sample_count as usize))
    }
}

/// One `trak` box under `moov`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Track {
    pub track_id: u32,
    /// Handler type from `hdlr` ("soun", "text", "sbtl", ...)
    pub media_type: FourCC,
    /// Format of the first sample description entry
    pub codec: FourCC,
    pub sample_table: SampleTable,
    /// Media duration in `timescale` units
    pub duration: u64,
    pub timescale: u32,
}

impl Track {
    pub fn is_audio(&self) -> bool {
        self.media_type == FourCC::SOUN
    }

    /// Text and subtitle tracks may carry chapter titles
    pub fn is_chapter_candidate(&self) -> bool {
        self.media_type == FourCC::TEXT || self.media_type == FourCC::SBTL
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / f64::from(self.timescale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stsc(entries: &[(u32, u32)]) -> SampleTable {
        SampleTable {
            samples_per_chunk: entries
                .iter()
                .map(|&(first_chunk, samples_per_chunk)| SampleToChunkEntry {
                    first_chunk,
                    samples_per_chunk,
                    description_index: 1,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_samples_in_chunk_uses_one_based_runs() {
        let table = stsc(&[(1, 4), (3, 2), (5, 7)]);
        assert_eq!(table.samples_in_chunk(0), 4);
        assert_eq!(table.samples_in_chunk(1), 4);
        assert_eq!(table.samples_in_chunk(2), 2);
        assert_eq!(table.samples_in_chunk(3), 2);
        assert_eq!(table.samples_in_chunk(4), 7);
        assert_eq!(table.samples_in_chunk(100), 7);
    }

    #[test]
    fn test_samples_in_chunk_defaults_to_first_entry() {
        // First run starts at chunk 3, so chunks 0 and 1 match nothing.
        let table = stsc(&[(3, 5), (6, 9)]);
        assert_eq!(table.samples_in_chunk(0), 5);
        assert_eq!(table.samples_in_chunk(1), 5);
        assert_eq!(table.samples_in_chunk(5), 9);
    }

    #[test]
    fn test_samples_in_chunk_empty_stsc() {
        assert_eq!(SampleTable::default().samples_in_chunk(3), 1);
    }

    #[test]
    fn test_uniform_sample_sizes() {
        let sizes = SampleSizes::Uniform { size: 371, count: 3 };
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.get(2), Some(371));
        assert_eq!(sizes.get(3), None);
    }

    #[test]
    fn test_sample_durations_expand_runs() {
        let table = SampleTable {
            time_to_sample: vec![
                TimeToSampleEntry { sample_count: 2, sample_duration: 1024 },
                TimeToSampleEntry { sample_count: 1, sample_duration: 512 },
            ],
            ..Default::default()
        };
        assert_eq!(table.sample_durations().collect::<Vec<_>>(), vec![1024, 1024, 512]);
    }

    #[test]
    fn test_track_kinds() {
        let track = Track {
            media_type: FourCC::TEXT,
            timescale: 1000,
            duration: 2500,
            ..Default::default()
        };
        assert!(track.is_chapter_candidate());
        assert!(!track.is_audio());
        assert_eq!(track.duration_seconds(), 2.5);
    }
}
