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


//! MP4 container parsing
//!
//! # Modules
//! - `atom`: box headers and four-character codes
//! - `source`: seekable byte sources (file or memory)
//! - `track`: tracks and sample tables
//! - `parser`: recursive-descent structure pass
//! - `locator`: absolute sample positions
//! - `metadata`: tags, duration and chapters

pub mod atom;
pub mod locator;
pub mod metadata;
pub mod parser;
pub mod source;
pub mod track;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use atom::{BoxHeader, BoxKind, FourCC, Region};
pub use locator::{AudioSample, SampleBoundsPolicy, SampleLocator};
pub use metadata::{Chapter, Metadata};
pub use parser::{ContainerLayout, Mp4Parser, SampleEntryLocation, SOURCE_BRAND};
pub use source::{InputSource, ReadSeek};
pub use track::{SampleSizes, SampleTable, Track};
