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


//! Recursive-descent box parser
//!
//! One traversal function walks a region child by child; each recognised box
//! kind either contributes fields or is descended into. The parser reads only
//! box headers and the small tables under `stbl`; the `mdat` payload is never
//! touched.
//!
//! # Traversal
//! ```text
//! (top level) ftyp, moov, mdat
//! moov -> trak
//! trak -> tkhd, mdia
//! mdia -> mdhd, hdlr, minf
//! minf -> stbl
//! stbl -> stsd, stsz, stco | co64, stsc, stts
//! ```

use crate::convert::events::{default_sink, ConversionEvent, EventSink};
use crate::error::{AaxcError, Result};
use crate::mp4::atom::{be_u32, be_u64, read_box_header, BoxHeader, BoxKind, FourCC, Region};
use crate::mp4::source::{read_exact_at, source_len};
use crate::mp4::track::{SampleSizes, SampleTable, SampleToChunkEntry, TimeToSampleEntry, Track};
use serde::Serialize;
use std::io::{Read, Seek};
use std::sync::Arc;

/// Major brand of an encrypted AAXC/AAX container
pub const SOURCE_BRAND: FourCC = FourCC(*b"aax ");

/// Position of one sample-description entry's format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleEntryLocation {
    /// Absolute offset of the 4-byte format tag
    pub format_offset: u64,
    pub format: FourCC,
    pub track_id: u32,
}

/// Everything the conversion engine needs from the container
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerLayout {
    pub major_brand: FourCC,
    /// Absolute offset of the major brand inside `ftyp`
    pub brand_offset: Option<u64>,
    pub tracks: Vec<Track>,
    /// Payload start of the first `mdat` (0 when absent)
    pub mdat_offset: u64,
    /// Payload length of the first `mdat` (0 when absent)
    pub mdat_size: u64,
    pub moov: Option<Region>,
    pub sample_entries: Vec<SampleEntryLocation>,
    /// Payload regions of every `stsd` box
    pub sample_description_regions: Vec<Region>,
    pub source_len: u64,
}

impl ContainerLayout {
    /// First track with the `soun` handler
    pub fn audio_track(&self) -> Result<&Track> {
        self.tracks.iter().find(|t| t.is_audio()).ok_or(AaxcError::NoAudioTrack)
    }

    pub fn chapter_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_chapter_candidate())
    }
}

/// One `trak` plus where its sample descriptions live
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedTrak {
    pub track: Track,
    pub sample_entries: Vec<SampleEntryLocation>,
    pub stsd_region: Option<Region>,
}

/// MP4 parser over a seekable byte source
///
/// Each `parse_*` call is an independent pass that starts from offset 0, so
/// calling the same operation twice yields identical values.
pub struct Mp4Parser<R> {
    reader: R,
    len: u64,
    expected_brand: FourCC,
    sink: Arc<dyn EventSink>,
}

impl<R: Read + Seek> Mp4Parser<R> {
    /// Wrap a reader; the logical length is taken from the end of the stream
    pub fn new(mut reader: R) -> Result<Self> {
        let len = source_len(&mut reader)?;
        Ok(Self {
            reader,
            len,
            expected_brand: SOURCE_BRAND,
            sink: default_sink(),
        })
    }

    /// Brand that `parse_structure` requires in `ftyp`
    pub fn with_expected_brand(mut self, brand: FourCC) -> Self {
        self.expected_brand = brand;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn source_len(&self) -> u64 {
        self.len
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub(crate) fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    /// Parse the box tree into tracks and the `mdat` location
    ///
    /// # Errors
    /// - InvalidAtomSize if any box or table runs past its parent or the source
    /// - NotSourceFormat if `ftyp` is missing or carries another major brand
    pub fn parse_structure(&mut self) -> Result<ContainerLayout> {
        let mut layout = ContainerLayout {
            source_len: self.len,
            ..Default::default()
        };
        let mut saw_ftyp = false;
        let mut saw_mdat = false;

        for header in self.children(Region::new(0, self.len))? {
            match header.kind() {
                BoxKind::Ftyp => {
                    let brand = self.read_major_brand(&header)?;
                    if brand != self.expected_brand {
                        return Err(AaxcError::NotSourceFormat {
                            expected: self.expected_brand.to_string(),
                            found: brand.to_string(),
                        });
                    }
                    layout.major_brand = brand;
                    layout.brand_offset = Some(header.payload_offset());
                    saw_ftyp = true;
                }
                BoxKind::Moov => {
                    layout.moov = Some(header.payload());
                    for child in self.children(header.payload())? {
                        if child.kind() != BoxKind::Trak {
                            continue;
                        }
                        let parsed = self.parse_trak(&child)?;
                        layout.sample_entries.extend(parsed.sample_entries);
                        layout.sample_description_regions.extend(parsed.stsd_region);
                        layout.tracks.push(parsed.track);
                    }
                }
                BoxKind::Mdat if !saw_mdat => {
                    layout.mdat_offset = header.payload_offset();
                    layout.mdat_size = header.payload_len();
                    saw_mdat = true;
                }
                _ => {}
            }
        }

        if !saw_ftyp {
            return Err(AaxcError::NotSourceFormat {
                expected: self.expected_brand.to_string(),
                found: "no ftyp box".to_string(),
            });
        }

        self.sink.record(ConversionEvent::StructureParsed {
            track_count: layout.tracks.len(),
            mdat_offset: layout.mdat_offset,
            mdat_size: layout.mdat_size,
        });

        Ok(layout)
    }

    /// Headers of every direct child inside `region`
    pub(crate) fn children(&mut self, region: Region) -> Result<Vec<BoxHeader>> {
        let end = region.end().min(self.len);
        let mut headers = Vec::new();
        let mut offset = region.offset;
        while let Some(header) = read_box_header(&mut self.reader, offset, end)? {
            offset = header.end();
            headers.push(header);
        }
        Ok(headers)
    }

    /// First `max` payload bytes of a box (fewer if the payload is shorter)
    pub(crate) fn read_head(&mut self, header: &BoxHeader, max: usize) -> Result<Vec<u8>> {
        let len = header.payload_len().min(max as u64) as usize;
        Ok(read_exact_at(&mut self.reader, header.payload_offset(), len)?)
    }

    pub(crate) fn read_major_brand(&mut self, ftyp: &BoxHeader) -> Result<FourCC> {
        let head = self.read_head(ftyp, 4)?;
        FourCC::from_slice(&head).ok_or_else(|| too_short(ftyp, 4))
    }

    pub(crate) fn parse_trak(&mut self, trak: &BoxHeader) -> Result<ParsedTrak> {
        let mut parsed = ParsedTrak::default();

        for child in self.children(trak.payload())? {
            match child.kind() {
                BoxKind::Tkhd => parsed.track.track_id = self.parse_tkhd(&child)?,
                BoxKind::Mdia => self.parse_mdia(&child, &mut parsed)?,
                _ => {}
            }
        }

        for entry in &mut parsed.sample_entries {
            entry.track_id = parsed.track.track_id;
        }
        Ok(parsed)
    }

    fn parse_tkhd(&mut self, tkhd: &BoxHeader) -> Result<u32> {
        let head = self.read_head(tkhd, 24)?;
        let at = if head.first() == Some(&1) { 20 } else { 12 };
        be_u32(&head, at).ok_or_else(|| too_short(tkhd, at + 4))
    }

    fn parse_mdia(&mut self, mdia: &BoxHeader, parsed: &mut ParsedTrak) -> Result<()> {
        for child in self.children(mdia.payload())? {
            match child.kind() {
                BoxKind::Mdhd => {
                    let (timescale, duration) = self.parse_time_header(&child)?;
                    parsed.track.timescale = timescale;
                    parsed.track.duration = duration;
                }
                BoxKind::Hdlr => {
                    let head = self.read_head(&child, 12)?;
                    parsed.track.media_type = head
                        .get(8..12)
                        .and_then(FourCC::from_slice)
                        .ok_or_else(|| too_short(&child, 12))?;
                }
                BoxKind::Minf => {
                    for stbl in self.children(child.payload())? {
                        if stbl.kind() == BoxKind::Stbl {
                            self.parse_stbl(&stbl, parsed)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `(timescale, duration)` from an `mdhd` or `mvhd` payload
    pub(crate) fn parse_time_header(&mut self, header: &BoxHeader) -> Result<(u32, u64)> {
        let head = self.read_head(header, 32)?;
        if head.first() == Some(&1) {
            let timescale = be_u32(&head, 20).ok_or_else(|| too_short(header, 24))?;
            let duration = be_u64(&head, 24).ok_or_else(|| too_short(header, 32))?;
            Ok((timescale, duration))
        } else {
            let timescale = be_u32(&head, 12).ok_or_else(|| too_short(header, 16))?;
            let duration = be_u32(&head, 16).ok_or_else(|| too_short(header, 20))?;
            Ok((timescale, u64::from(duration)))
        }
    }

    fn parse_stbl(&mut self, stbl: &BoxHeader, parsed: &mut ParsedTrak) -> Result<()> {
        let mut table = SampleTable::default();

        for child in self.children(stbl.payload())? {
            match child.kind() {
                BoxKind::Stsd => {
                    parsed.stsd_region = Some(child.payload());
                    parsed.sample_entries = self.parse_stsd(&child)?;
                    if let Some(first) = parsed.sample_entries.first() {
                        parsed.track.codec = first.format;
                    }
                }
                BoxKind::Stsz => table.sample_sizes = self.parse_stsz(&child)?,
                BoxKind::Stco => {
                    let (count, body) = self.read_table(&child, 4, 4)?;
                    table.chunk_offsets = (0..count)
                        .filter_map(|i| be_u32(&body, i * 4).map(u64::from))
                        .collect();
                }
                BoxKind::Co64 => {
                    let (count, body) = self.read_table(&child, 4, 8)?;
                    table.chunk_offsets = (0..count).filter_map(|i| be_u64(&body, i * 8)).collect();
                }
                BoxKind::Stsc => {
                    let (count, body) = self.read_table(&child, 4, 12)?;
                    table.samples_per_chunk = (0..count)
                        .filter_map(|i| {
                            Some(SampleToChunkEntry {
                                first_chunk: be_u32(&body, i * 12)?,
                                samples_per_chunk: be_u32(&body, i * 12 + 4)?,
                                description_index: be_u32(&body, i * 12 + 8)?,
                            })
                        })
                        .collect();
                }
                BoxKind::Stts => {
                    let (count, body) = self.read_table(&child, 4, 8)?;
                    table.time_to_sample = (0..count)
                        .filter_map(|i| {
                            Some(TimeToSampleEntry {
                                sample_count: be_u32(&body, i * 8)?,
                                sample_duration: be_u32(&body, i * 8 + 4)?,
                            })
                        })
                        .collect();
                }
                _ => {}
            }
        }

        parsed.track.sample_table = table;
        Ok(())
    }

    fn parse_stsd(&mut self, stsd: &BoxHeader) -> Result<Vec<SampleEntryLocation>> {
        let head = self.read_head(stsd, 8)?;
        let count = be_u32(&head, 4).ok_or_else(|| too_short(stsd, 8))? as usize;

        let entries_start = stsd.payload_offset() + 8;
        let region = Region::new(entries_start, stsd.end() - entries_start);
        Ok(self
            .children(region)?
            .into_iter()
            .take(count)
            .map(|entry| SampleEntryLocation {
                format_offset: entry.offset + 4,
                format: entry.box_type,
                track_id: 0,
            })
            .collect())
    }

    fn parse_stsz(&mut self, stsz: &BoxHeader) -> Result<SampleSizes> {
        let head = self.read_head(stsz, 12)?;
        let uniform = be_u32(&head, 4).ok_or_else(|| too_short(stsz, 8))?;
        let count = be_u32(&head, 8).ok_or_else(|| too_short(stsz, 12))?;

        if uniform != 0 {
            return Ok(SampleSizes::Uniform { size: uniform, count });
        }

        let (count, body) = self.read_table(stsz, 8, 4)?;
        Ok(SampleSizes::Table(
            (0..count).filter_map(|i| be_u32(&body, i * 4)).collect(),
        ))
    }

    /// Read a counted table whose u32 entry count sits at `count_at` in the payload
    ///
    /// # Errors
    /// - InvalidAtomSize if `count * entry_len` bytes do not fit in the box
    fn read_table(&mut self, header: &BoxHeader, count_at: usize, entry_len: usize) -> Result<(usize, Vec<u8>)> {
        let head = self.read_head(header, count_at + 4)?;
        let count = be_u32(&head, count_at).ok_or_else(|| too_short(header, count_at + 4))? as u64;

        let body_offset = (count_at + 4) as u64;
        let available = header.payload_len().saturating_sub(body_offset);
        let needed = count.saturating_mul(entry_len as u64);
        if needed > available {
            return Err(AaxcError::invalid_atom_size(
                header.box_type,
                header.payload_offset() + body_offset,
                needed,
                available,
            ));
        }

        let body = read_exact_at(&mut self.reader, header.payload_offset() + body_offset, needed as usize)?;
        Ok((count as usize, body))
    }
}

/// Box payload too small for the fields its type requires
fn too_short(header: &BoxHeader, needed: usize) -> AaxcError {
    AaxcError::invalid_atom_size(header.box_type, header.offset, needed as u64, header.payload_len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::events::RecordingSink;
    use crate::mp4::test_fixtures::{
        ftyp, full_box, mdat, plain_box, stsd_entry, FixtureBuilder, FixtureTrack,
    };
    use std::io::Cursor;

    #[test]
    fn test_ftyp_only_container() {
        // 32-byte ftyp: brand, minor version, four compatible brands
        let data = plain_box(
            b"ftyp",
            &[b"aax ".as_slice(), &[0, 0, 2, 0], b"isom", b"iso2", b"M4A ", b"mp42"].concat(),
        );
        assert_eq!(data.len(), 32);

        let layout = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure().unwrap();
        assert!(layout.tracks.is_empty());
        assert_eq!(layout.mdat_offset, 0);
        assert_eq!(layout.mdat_size, 0);
        assert_eq!(layout.brand_offset, Some(8));
    }

    #[test]
    fn test_wrong_brand_rejected() {
        let data = ftyp(b"M4A ");
        let result = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure();
        assert!(matches!(result, Err(AaxcError::NotSourceFormat { .. })));
    }

    #[test]
    fn test_missing_ftyp_rejected() {
        let data = mdat(&[0u8; 16]);
        let result = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure();
        assert!(matches!(result, Err(AaxcError::NotSourceFormat { .. })));
    }

    #[test]
    fn test_box_past_source_end_rejected() {
        let mut data = ftyp(b"aax ");
        data.extend_from_slice(&[0, 0, 0x10, 0]);
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 16]);

        let result = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure();
        assert!(matches!(result, Err(AaxcError::InvalidAtomSize { .. })));
    }

    #[test]
    fn test_parses_audio_and_text_tracks() {
        let fixture = FixtureBuilder::new()
            .track(FixtureTrack::audio(vec![vec![1u8; 40], vec![2u8; 20], vec![3u8; 33]], 2))
            .track(FixtureTrack::chapters(&["Opening", "Chapter 1"], 1000))
            .build();

        let sink = Arc::new(RecordingSink::new());
        let layout = Mp4Parser::new(Cursor::new(fixture.bytes.clone()))
            .unwrap()
            .with_event_sink(sink.clone())
            .parse_structure()
            .unwrap();

        assert_eq!(layout.tracks.len(), 2);
        let audio = layout.audio_track().unwrap();
        assert_eq!(audio.track_id, 1);
        assert_eq!(audio.codec, FourCC(*b"aavd"));
        assert_eq!(audio.timescale, 44100);
        assert_eq!(audio.sample_table.sample_count(), 3);
        assert_eq!(audio.sample_table.chunk_offsets, fixture.audio_chunk_offsets);
        assert_eq!(layout.chapter_tracks().count(), 1);

        let (mdat_offset, mdat_len) = fixture.mdat_payload;
        assert_eq!(layout.mdat_offset, mdat_offset);
        assert_eq!(layout.mdat_size, mdat_len);

        assert_eq!(layout.sample_entries.len(), 2);
        let entry = layout.sample_entries[0];
        assert_eq!(&fixture.bytes[entry.format_offset as usize..][..4], b"aavd");

        assert!(matches!(sink.events()[..], [ConversionEvent::StructureParsed { track_count: 2, .. }]));
    }

    #[test]
    fn test_parse_is_repeatable() {
        let fixture = FixtureBuilder::new()
            .track(FixtureTrack::audio(vec![vec![9u8; 48]; 5], 2))
            .build();
        let mut parser = Mp4Parser::new(Cursor::new(fixture.bytes)).unwrap();

        let first = parser.parse_structure().unwrap();
        let second = parser.parse_structure().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_audio_track() {
        let fixture = FixtureBuilder::new()
            .track(FixtureTrack::chapters(&["Only text"], 1000))
            .build();
        let layout = Mp4Parser::new(Cursor::new(fixture.bytes)).unwrap().parse_structure().unwrap();
        assert!(matches!(layout.audio_track(), Err(AaxcError::NoAudioTrack)));
    }

    #[test]
    fn test_truncated_table_rejected() {
        // stco claiming 1000 entries with room for one
        let stco = full_box(b"stco", 0, &[&1000u32.to_be_bytes()[..], &64u32.to_be_bytes()].concat());
        let stbl = plain_box(b"stbl", &[stsd_entry(b"aavd"), stco].concat());
        let minf = plain_box(b"minf", &stbl);
        let mdia = plain_box(b"mdia", &minf);
        let trak = plain_box(b"trak", &mdia);
        let moov = plain_box(b"moov", &trak);

        let mut data = ftyp(b"aax ");
        data.extend_from_slice(&moov);

        let result = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure();
        assert!(matches!(result, Err(AaxcError::InvalidAtomSize { ref box_type, .. }) if box_type == "stco"));
    }

    #[test]
    fn test_version_one_headers() {
        // Bodies start after version/flags, so payload offset N is body offset N - 4.
        let mut tkhd = vec![0u8; 32];
        tkhd[16..20].copy_from_slice(&7u32.to_be_bytes());
        let tkhd = full_box(b"tkhd", 1, &tkhd);

        let mut mdhd = vec![0u8; 32];
        mdhd[16..20].copy_from_slice(&22050u32.to_be_bytes());
        mdhd[20..28].copy_from_slice(&88200u64.to_be_bytes());
        let mdhd = full_box(b"mdhd", 1, &mdhd);

        let hdlr = full_box(b"hdlr", 0, &[&[0u8; 4][..], b"soun", &[0u8; 12]].concat());
        let mdia = plain_box(b"mdia", &[mdhd, hdlr].concat());
        let trak = plain_box(b"trak", &[tkhd, mdia].concat());
        let moov = plain_box(b"moov", &trak);

        let mut data = ftyp(b"aax ");
        data.extend_from_slice(&moov);

        let layout = Mp4Parser::new(Cursor::new(data)).unwrap().parse_structure().unwrap();
        let track = &layout.tracks[0];
        assert_eq!(track.track_id, 7);
        assert_eq!(track.timescale, 22050);
        assert_eq!(track.duration, 88200);
        assert!(track.is_audio());
    }
}
