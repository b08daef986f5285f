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


uniffi::setup_scaffolding!();

pub mod audio;
pub mod bridge;
pub mod convert;
pub mod crypto;
pub mod error;
pub mod mp4;

pub use convert::{ConversionEvent, ConversionOptions, EventSink};
pub use crypto::{AaxcDecrypter, ConversionSummary};
pub use error::{AaxcError, Result};
pub use mp4::{InputSource, Metadata, Mp4Parser};

/// Parse the metadata of an input source
pub fn read_metadata(source: &InputSource) -> Result<Metadata> {
    Mp4Parser::new(source.open()?)?.parse_metadata()
}
