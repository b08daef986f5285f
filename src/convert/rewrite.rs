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


//! Brand and codec tag rewrite
//!
//! Runs over the output after the decryption pass. Sample bytes never move,
//! so every offset recorded while parsing the input is valid in the output.
//!
//! # Order
//! 1. `ftyp` major brand, only when it still holds the source brand
//! 2. Sample-entry format tags recorded by the parser (`stsd` entries)
//! 3. When step 2 patched nothing: a chunked scan of the `stsd` payloads, or
//!    of the whole `moov` payload under [`TagRewriteScope::MovieBox`]
//!
//! The scan reads overlapping windows so a tag straddling a window edge is
//! still found.

use crate::convert::events::{ConversionEvent, EventSink};
use crate::convert::options::{ConversionOptions, TagRewriteScope};
use crate::error::Result;
use crate::mp4::atom::{FourCC, Region};
use crate::mp4::parser::ContainerLayout;
use crate::mp4::source::read_exact_at;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewriteReport {
    pub brand_rewritten: bool,
    pub codec_tags_rewritten: usize,
}

/// Rewrite the brand and codec tags of a converted file in place
pub fn rewrite_tags<F: Read + Write + Seek>(
    file: &mut F,
    layout: &ContainerLayout,
    options: &ConversionOptions,
    sink: &dyn EventSink,
) -> Result<RewriteReport> {
    let tags = &options.tags;
    let mut report = RewriteReport::default();

    if let Some(offset) = layout.brand_offset {
        report.brand_rewritten = patch_tag(file, offset, tags.source_brand, tags.target_brand, sink)?;
    }

    for entry in &layout.sample_entries {
        if entry.format == tags.source_codec
            && patch_tag(file, entry.format_offset, tags.source_codec, tags.target_codec, sink)?
        {
            report.codec_tags_rewritten += 1;
        }
    }

    if report.codec_tags_rewritten == 0 {
        report.codec_tags_rewritten =
            scan_and_patch(file, &layout.sample_description_regions, options, sink)?;
    }

    if report.codec_tags_rewritten == 0 && options.rewrite_scope == TagRewriteScope::MovieBox {
        if let Some(moov) = layout.moov {
            debug!("no codec tag inside sample descriptions, scanning moov");
            report.codec_tags_rewritten = scan_and_patch(file, &[moov], options, sink)?;
        }
    }

    file.flush()?;
    Ok(report)
}

/// Overwrite `from` with `to` at `offset` if the bytes there equal `from`
fn patch_tag<F: Read + Write + Seek>(
    file: &mut F,
    offset: u64,
    from: FourCC,
    to: FourCC,
    sink: &dyn EventSink,
) -> Result<bool> {
    let current = read_exact_at(file, offset, 4)?;
    if current.as_slice() != from.as_bytes() {
        return Ok(false);
    }

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(to.as_bytes())?;
    sink.record(ConversionEvent::TagRewritten { offset, from, to });
    Ok(true)
}

fn scan_and_patch<F: Read + Write + Seek>(
    file: &mut F,
    regions: &[Region],
    options: &ConversionOptions,
    sink: &dyn EventSink,
) -> Result<usize> {
    let tags = &options.tags;
    let mut patched = 0;
    for region in regions {
        for offset in find_pattern_offsets(file, *region, tags.source_codec.as_bytes(), options.copy_chunk_size)? {
            if patch_tag(file, offset, tags.source_codec, tags.target_codec, sink)? {
                patched += 1;
            }
        }
    }
    Ok(patched)
}

/// Absolute offsets of every occurrence of `pattern` inside `region`
///
/// Reads at most `window + pattern.len() - 1` bytes at a time.
pub fn find_pattern_offsets<R: Read + Seek>(
    reader: &mut R,
    region: Region,
    pattern: &[u8],
    window: usize,
) -> Result<Vec<u64>> {
    let mut offsets: Vec<u64> = Vec::new();
    if pattern.is_empty() {
        return Ok(offsets);
    }

    let window = window.max(1) as u64;
    let overlap = pattern.len() as u64 - 1;
    let end = region.end();
    let mut pos = region.offset;

    while pos < end {
        let len = (window + overlap).min(end - pos);
        let buf = read_exact_at(reader, pos, len as usize)?;

        for (i, candidate) in buf.windows(pattern.len()).enumerate() {
            let absolute = pos + i as u64;
            if candidate == pattern && offsets.last().map_or(true, |&last| absolute > last) {
                offsets.push(absolute);
            }
        }

        if pos + len >= end {
            break;
        }
        pos += window;
    }

    Ok(offsets)
}
