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


//! Conversion events and progress reporting
//!
//! Diagnostics are pushed into an injected [`EventSink`] rather than a global
//! logger. The default sink forwards to `tracing`; tests install a
//! [`RecordingSink`] and assert on what was emitted.
//!
//! # Progress Information
//! - Bytes written / total bytes
//! - Samples decrypted and skipped
//! - Throttle pauses
//! - Tag rewrites

use crate::convert::options::TaskPriority;
use crate::mp4::atom::FourCC;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a sample was left out of decryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Computed end offset lies past the end of the source
    OutOfBounds { source_len: u64 },
    /// Sample starts before bytes that were already written
    Overlapping { cursor: u64 },
}

/// Structured diagnostic emitted by the parser and the conversion engine
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    StructureParsed {
        track_count: usize,
        mdat_offset: u64,
        mdat_size: u64,
    },
    ConversionStarted {
        track_id: u32,
        sample_count: usize,
        source_len: u64,
        throttled: bool,
        priority: TaskPriority,
    },
    SampleSkipped {
        sample_index: usize,
        offset: u64,
        size: u32,
        reason: SkipReason,
    },
    Yielded {
        samples_processed: usize,
        pause: Duration,
    },
    Progress {
        bytes_written: u64,
        total_bytes: u64,
    },
    TagRewritten {
        offset: u64,
        from: FourCC,
        to: FourCC,
    },
    /// A best-effort metadata field or chapter was dropped
    MetadataFieldSkipped {
        context: String,
        reason: String,
    },
    ConversionFinished {
        samples_decrypted: usize,
        samples_skipped: usize,
        bytes_written: u64,
    },
}

/// Receiver of conversion diagnostics
pub trait EventSink: Send + Sync {
    fn record(&self, event: ConversionEvent);
}

/// Forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: ConversionEvent) {
        match event {
            ConversionEvent::StructureParsed { track_count, mdat_offset, mdat_size } => {
                debug!(track_count, mdat_offset, mdat_size, "parsed container structure");
            }
            ConversionEvent::ConversionStarted { track_id, sample_count, source_len, throttled, priority } => {
                info!(track_id, sample_count, source_len, throttled, ?priority, "starting conversion");
            }
            ConversionEvent::SampleSkipped { sample_index, offset, size, reason } => {
                warn!(sample_index, offset, size, ?reason, "skipping sample outside usable range");
            }
            ConversionEvent::Yielded { samples_processed, pause } => {
                debug!(samples_processed, pause_ms = pause.as_millis() as u64, "yielding CPU");
            }
            ConversionEvent::Progress { bytes_written, total_bytes } => {
                debug!(bytes_written, total_bytes, "conversion progress");
            }
            ConversionEvent::TagRewritten { offset, from, to } => {
                debug!(offset, from = %from, to = %to, "rewrote tag");
            }
            ConversionEvent::MetadataFieldSkipped { context, reason } => {
                warn!(%context, %reason, "skipping malformed metadata");
            }
            ConversionEvent::ConversionFinished { samples_decrypted, samples_skipped, bytes_written } => {
                info!(samples_decrypted, samples_skipped, bytes_written, "conversion finished");
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: ConversionEvent) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ConversionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<ConversionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn skipped_samples(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConversionEvent::SampleSkipped { sample_index, .. } => Some(sample_index),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: ConversionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Sink used when the caller does not inject one
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

const MIN_PROGRESS_STEP: u64 = 1024 * 1024;

/// Rate-limits `Progress` events to roughly one per percent of output
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total_bytes: u64,
    step: u64,
    last_reported: u64,
}

impl ProgressReporter {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            step: (total_bytes / 100).max(MIN_PROGRESS_STEP),
            last_reported: 0,
        }
    }

    /// Report `bytes_written` if it advanced by at least one step
    pub fn update(&mut self, bytes_written: u64, sink: &dyn EventSink) {
        if bytes_written.saturating_sub(self.last_reported) >= self.step {
            self.last_reported = bytes_written;
            sink.record(ConversionEvent::Progress {
                bytes_written,
                total_bytes: self.total_bytes,
            });
        }
    }

    /// Percentage complete (0.0 - 100.0) for the last reported position
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.last_reported as f64 / self.total_bytes as f64) * 100.0
        }
    }
}
