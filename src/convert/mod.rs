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


//! Conversion configuration, diagnostics and the tag rewrite pass
//!
//! # Modules
//! - `options`: per-run settings (throttling, bounds policy, window sizes, tags)
//! - `events`: the injected event sink and progress reporting
//! - `rewrite`: brand and codec tag rewrite over the converted output

pub mod events;
pub mod options;
pub mod rewrite;

pub use events::{ConversionEvent, EventSink, NullSink, RecordingSink, SkipReason, TracingSink};
pub use options::{ConversionOptions, FormatTags, TagRewriteScope, TaskPriority, ThrottleConfig};
pub use rewrite::{rewrite_tags, RewriteReport};
