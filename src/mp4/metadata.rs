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


//! Metadata extraction
//!
//! A read-only pass over the same box tree the structure parser walks. It
//! collects the `mvhd` duration, iTunes-style `ilst` tags and chapter titles
//! from text tracks, and never touches the decryption path.
//!
//! Extraction is best-effort below the top level: a malformed tag, chapter
//! sample or secondary `trak` is reported through the event sink and dropped,
//! and the pass carries on.

use crate::convert::events::ConversionEvent;
use crate::error::{AaxcError, Result};
use crate::mp4::atom::{be_u16, BoxHeader, BoxKind, FourCC, Region};
use crate::mp4::locator::{AudioSample, SampleLocator};
use crate::mp4::parser::Mp4Parser;
use crate::mp4::source::read_exact_at;
use crate::mp4::track::Track;
use serde::Serialize;
use std::io::{Read, Seek};

/// Chapter titles longer than this many bytes are truncated
const MAX_CHAPTER_SAMPLE: u32 = 4096;

/// Tag values larger than this are skipped (cover art included)
const MAX_TAG_VALUE: u64 = 16 * 1024 * 1024;

/// Bytes of type indicator and locale in front of every `data` value
const DATA_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chapter {
    /// Seconds, rounded to two decimals
    pub start_time: f64,
    pub end_time: f64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub copyright: Option<String>,
    pub encoding_tool: Option<String>,
    pub purchase_date: Option<String>,
    /// `rldt`, or `©day` when `rldt` is absent
    pub release_date: Option<String>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub comment: Option<String>,
    #[serde(skip)]
    pub cover_art: Option<Vec<u8>>,
    pub chapters: Vec<Chapter>,
    /// Movie duration in `timescale` units (from `mvhd`)
    pub duration: u64,
    pub timescale: u32,
}

impl Metadata {
    pub fn duration_seconds(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / f64::from(self.timescale)
        }
    }

    /// Long description when present, else the short one
    pub fn best_description(&self) -> Option<&str> {
        self.long_description.as_deref().or(self.description.as_deref())
    }

    fn apply_text(&mut self, tag: FourCC, value: String, day: &mut Option<String>) {
        let slot = match &tag.0 {
            b"\xA9nam" => &mut self.title,
            b"\xA9ART" => &mut self.artist,
            b"aART" => &mut self.album_artist,
            b"\xA9alb" => &mut self.album,
            b"\xA9gen" => &mut self.genre,
            b"desc" => &mut self.description,
            b"ldes" => &mut self.long_description,
            b"cprt" => &mut self.copyright,
            b"\xA9too" => &mut self.encoding_tool,
            b"purd" => &mut self.purchase_date,
            b"rldt" => &mut self.release_date,
            b"\xA9day" => day,
            b"\xA9nrt" => &mut self.narrator,
            b"\xA9pub" => &mut self.publisher,
            b"\xA9cmt" => &mut self.comment,
            _ => return,
        };
        // First non-empty value wins
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

fn is_text_tag(tag: FourCC) -> bool {
    matches!(
        &tag.0,
        b"\xA9nam"
            | b"\xA9ART"
            | b"aART"
            | b"\xA9alb"
            | b"\xA9gen"
            | b"desc"
            | b"ldes"
            | b"cprt"
            | b"\xA9too"
            | b"purd"
            | b"rldt"
            | b"\xA9day"
            | b"\xA9nrt"
            | b"\xA9pub"
            | b"\xA9cmt"
    )
}

const COVR: FourCC = FourCC(*b"covr");

impl<R: Read + Seek> Mp4Parser<R> {
    /// Extract tags, duration and chapters
    ///
    /// Does not check the `ftyp` brand, so converted files can be read too.
    ///
    /// # Errors
    /// - InvalidAtomSize if a top-level or `moov`-level box runs past its parent
    /// - IoError if the source cannot be read
    pub fn parse_metadata(&mut self) -> Result<Metadata> {
        let mut metadata = Metadata::default();
        let mut day = None;
        let mut chapter_tracks = Vec::new();

        for header in self.children(Region::new(0, self.source_len()))? {
            match header.kind() {
                BoxKind::Moov => {
                    for child in self.children(header.payload())? {
                        match child.kind() {
                            BoxKind::Mvhd => match self.parse_time_header(&child) {
                                Ok((timescale, duration)) => {
                                    metadata.timescale = timescale;
                                    metadata.duration = duration;
                                }
                                Err(e) => self.skip_field("mvhd", &e),
                            },
                            BoxKind::Trak => match self.parse_trak(&child) {
                                Ok(parsed) if parsed.track.is_chapter_candidate() => {
                                    chapter_tracks.push(parsed.track)
                                }
                                Ok(_) => {}
                                Err(e) => self.skip_field("trak", &e),
                            },
                            BoxKind::Udta => {
                                if let Err(e) = self.parse_udta(&child, &mut metadata, &mut day) {
                                    self.skip_field("udta", &e);
                                }
                            }
                            BoxKind::Meta => {
                                if let Err(e) = self.parse_meta(&child, &mut metadata, &mut day) {
                                    self.skip_field("meta", &e);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                BoxKind::Meta => {
                    if let Err(e) = self.parse_meta(&header, &mut metadata, &mut day) {
                        self.skip_field("meta", &e);
                    }
                }
                _ => {}
            }
        }

        if metadata.release_date.is_none() {
            metadata.release_date = day;
        }

        // Chapters of every text track, in track order
        let movie_seconds = metadata.duration_seconds();
        for track in &chapter_tracks {
            match self.read_chapters(track, movie_seconds) {
                Ok(chapters) => metadata.chapters.extend(chapters),
                Err(e) => self.skip_field(&format!("chapters of track {}", track.track_id), &e),
            }
        }

        Ok(metadata)
    }

    fn skip_field(&self, context: &str, err: &AaxcError) {
        self.sink().record(ConversionEvent::MetadataFieldSkipped {
            context: context.to_string(),
            reason: err.to_string(),
        });
    }

    fn parse_udta(&mut self, udta: &BoxHeader, metadata: &mut Metadata, day: &mut Option<String>) -> Result<()> {
        for child in self.children(udta.payload())? {
            if child.kind() == BoxKind::Meta {
                self.parse_meta(&child, metadata, day)?;
            }
        }
        Ok(())
    }

    fn parse_meta(&mut self, meta: &BoxHeader, metadata: &mut Metadata, day: &mut Option<String>) -> Result<()> {
        // ISO `meta` is a full box; QuickTime writers put `hdlr` right after the header.
        let head = self.read_head(meta, 8)?;
        let skip = if head.get(4..8) == Some(b"hdlr".as_slice()) { 0 } else { 4 };
        let payload = meta.payload();
        let region = Region::new(payload.offset + skip, payload.len.saturating_sub(skip));

        for child in self.children(region)? {
            if child.kind() == BoxKind::Ilst {
                self.parse_ilst(&child, metadata, day)?;
            }
        }
        Ok(())
    }

    fn parse_ilst(&mut self, ilst: &BoxHeader, metadata: &mut Metadata, day: &mut Option<String>) -> Result<()> {
        for item in self.children(ilst.payload())? {
            let tag = item.box_type;
            if !is_text_tag(tag) && tag != COVR {
                continue;
            }

            match self.read_item_value(&item) {
                Ok(Some(value)) if tag == COVR => {
                    if metadata.cover_art.is_none() && !value.is_empty() {
                        metadata.cover_art = Some(value);
                    }
                }
                Ok(Some(value)) => match String::from_utf8(value) {
                    Ok(text) => {
                        let text = text.trim_matches(char::from(0)).trim().to_string();
                        if !text.is_empty() {
                            metadata.apply_text(tag, text, day);
                        }
                    }
                    Err(e) => self.skip_field(&tag.to_string(), &AaxcError::invalid_data(e.to_string())),
                },
                Ok(None) => {}
                Err(e) => self.skip_field(&tag.to_string(), &e),
            }
        }
        Ok(())
    }

    /// Raw value of the first `data` atom inside an `ilst` item
    fn read_item_value(&mut self, item: &BoxHeader) -> Result<Option<Vec<u8>>> {
        let Some(data) = self
            .children(item.payload())?
            .into_iter()
            .find(|child| child.box_type == FourCC::DATA)
        else {
            return Ok(None);
        };

        let value_len = data
            .payload_len()
            .checked_sub(DATA_HEADER_LEN as u64)
            .ok_or_else(|| AaxcError::invalid_atom_size(data.box_type, data.offset, data.size, data.payload_len()))?;
        if value_len > MAX_TAG_VALUE {
            return Err(AaxcError::invalid_data(format!("{} byte value exceeds limit", value_len)));
        }

        let value = read_exact_at(
            self.reader_mut(),
            data.payload_offset() + DATA_HEADER_LEN as u64,
            value_len as usize,
        )?;
        Ok(Some(value))
    }

    /// Chapter markers from a text track
    ///
    /// Each non-empty sample starts a chapter at the accumulated `stts` time;
    /// a chapter ends where the next one starts, the last one at the track
    /// duration (or `movie_seconds` when the track has none).
    fn read_chapters(&mut self, track: &Track, movie_seconds: f64) -> Result<Vec<Chapter>> {
        if track.timescale == 0 {
            return Err(AaxcError::invalid_data("chapter track has a zero timescale"));
        }
        let timescale = f64::from(track.timescale);
        let source_len = self.source_len();

        let mut durations = track.sample_table.sample_durations();
        let mut elapsed = 0u64;
        let mut starts = Vec::new();

        for sample in SampleLocator::new(&track.sample_table) {
            let start = elapsed;
            elapsed += u64::from(durations.next().unwrap_or(0));

            if sample.size == 0 {
                continue;
            }
            if sample.end() > source_len {
                self.skip_field(
                    &format!("chapter sample {}", sample.sample_index),
                    &AaxcError::InvalidSampleOffset {
                        sample_index: sample.sample_index,
                        offset: sample.offset,
                        size: sample.size,
                        source_len,
                    },
                );
                continue;
            }

            match self.read_chapter_title(&sample)? {
                Some(title) => starts.push((start as f64 / timescale, title)),
                None => self.skip_field(
                    &format!("chapter sample {}", sample.sample_index),
                    &AaxcError::invalid_data("empty chapter title"),
                ),
            }
        }

        let track_end = if track.duration > 0 { track.duration_seconds() } else { movie_seconds };
        let ends: Vec<f64> = starts
            .iter()
            .skip(1)
            .map(|(start, _)| *start)
            .chain(std::iter::once(track_end))
            .collect();

        Ok(starts
            .into_iter()
            .zip(ends)
            .map(|((start, title), end)| Chapter {
                start_time: round2(start),
                end_time: round2(end.max(start)),
                title,
            })
            .collect())
    }

    /// Title of one chapter sample, capped at `MAX_CHAPTER_SAMPLE` bytes of text
    fn read_chapter_title(&mut self, sample: &AudioSample) -> Result<Option<String>> {
        if sample.size >= 2 {
            let prefix = read_exact_at(self.reader_mut(), sample.offset, 2)?;
            let len = be_u16(&prefix, 0).map_or(0, u32::from);
            if len > 0 && len + 2 <= sample.size {
                let text = read_exact_at(
                    self.reader_mut(),
                    sample.offset + 2,
                    len.min(MAX_CHAPTER_SAMPLE) as usize,
                )?;
                return Ok(decode_text(&text));
            }
        }

        let bytes = read_exact_at(
            self.reader_mut(),
            sample.offset,
            sample.size.min(MAX_CHAPTER_SAMPLE) as usize,
        )?;
        Ok(decode_text(&bytes))
    }
}

fn round2(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// Decode a chapter sample: a 2-byte big-endian length prefix when it fits,
/// otherwise the whole sample as a bare string
pub fn decode_chapter_title(bytes: &[u8]) -> Option<String> {
    if let Some(len) = be_u16(bytes, 0).map(usize::from) {
        if len > 0 && len + 2 <= bytes.len() {
            return decode_text(&bytes[2..2 + len]);
        }
    }
    decode_text(bytes)
}

/// UTF-16 when a byte order mark is present, UTF-8 (lossy) otherwise
fn decode_text(bytes: &[u8]) -> Option<String> {
    let text = match bytes {
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    let text = text.trim_matches(char::from(0)).trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
