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


//! Audiobook metadata export
//!
//! Turns the raw container [`Metadata`] into the record external formatting
//! code consumes.
//!
//! # Export Fields
//! - Title, authors, narrators, publisher, genre
//! - Duration in seconds, rounded to two decimals
//! - Release year: leading component of a hyphen-delimited date ("2020-05-01" -> 2020)
//! - Bitrate in kbps: `file_size_bits / duration_seconds / 1000`, truncated
//! - Chapters: 0-based index -> { start, end, title }
//! - Description: long description if present, cut to 250 characters
//!
//! # Cue Sheets
//! - One TRACK per chapter, INDEX 01 at the chapter start
//! - Timestamps are MM:SS:FF with 75 frames per second

use crate::error::Result;
use crate::mp4::metadata::Metadata;
use crate::mp4::parser::Mp4Parser;
use crate::mp4::source::open_input_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::Path;

pub const MAX_DESCRIPTION_CHARS: usize = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterMarker {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub title: String,
}

impl ChapterMarker {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Audiobook metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub narrators: Vec<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub duration_seconds: f64,
    pub release_year: Option<i32>,
    pub bitrate_kbps: u64,
    pub chapters: BTreeMap<usize, ChapterMarker>,
    pub description: Option<String>,
    pub has_cover_art: bool,
}

impl AudioMetadata {
    /// Build the export record from parsed container metadata
    ///
    /// `file_size` is the size of the audio file in bytes, used for the bitrate.
    pub fn from_metadata(metadata: &Metadata, file_size: u64) -> Self {
        let raw_duration = metadata.duration_seconds();
        let duration_seconds = round2(raw_duration);

        let bitrate_kbps = if raw_duration > 0.0 {
            (file_size as f64 * 8.0 / raw_duration / 1000.0) as u64
        } else {
            0
        };

        let chapters = metadata
            .chapters
            .iter()
            .enumerate()
            .map(|(index, chapter)| {
                (
                    index,
                    ChapterMarker {
                        start: chapter.start_time,
                        end: chapter.end_time,
                        title: chapter.title.clone(),
                    },
                )
            })
            .collect();

        Self {
            title: metadata
                .title
                .clone()
                .or_else(|| metadata.album.clone())
                .unwrap_or_default(),
            authors: split_names(metadata.artist.as_deref().or(metadata.album_artist.as_deref())),
            narrators: split_names(metadata.narrator.as_deref()),
            publisher: metadata.publisher.clone().or_else(|| metadata.copyright.clone()),
            genre: metadata.genre.clone(),
            duration_seconds,
            release_year: metadata.release_date.as_deref().and_then(parse_release_year),
            bitrate_kbps,
            chapters,
            description: metadata.best_description().map(truncate_description),
            has_cover_art: metadata.cover_art.is_some(),
        }
    }

    /// Read and export the metadata of a file on disk
    ///
    /// # Errors
    /// - FileNotFound if the path does not exist
    /// - InvalidAtomSize if the box structure is damaged
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = open_input_file(path)?;
        let file_size = file.metadata()?.len();
        let metadata = Mp4Parser::new(BufReader::new(file))?.parse_metadata()?;
        Ok(Self::from_metadata(&metadata, file_size))
    }

    /// Format authors for display: "Author1, Author2"
    pub fn format_authors(&self) -> String {
        self.authors.join(", ")
    }

    /// Format narrators for display: "Narrator1, Narrator2"
    pub fn format_narrators(&self) -> String {
        self.narrators.join(", ")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate cue sheet content for `audio_filename`
    pub fn generate_cue_sheet(&self, audio_filename: &str) -> String {
        let mut cue = String::new();

        cue.push_str(&format!("PERFORMER \"{}\"\n", self.format_authors()));
        cue.push_str(&format!("TITLE \"{}\"\n", self.title));

        let file_type = if audio_filename.to_lowercase().ends_with(".mp3") {
            "MP3"
        } else {
            "MP4"
        };
        cue.push_str(&format!("FILE \"{}\" {}\n", audio_filename, file_type));

        for (index, chapter) in &self.chapters {
            cue.push_str(&format!("  TRACK {:02} AUDIO\n", index + 1));
            cue.push_str(&format!("    TITLE \"{}\"\n", chapter.title));
            cue.push_str(&format!("    INDEX 01 {}\n", format_cue_timestamp(chapter.start)));
        }

        cue
    }
}

/// Format seconds as a cue timestamp (MM:SS:FF, 75 frames per second)
pub fn format_cue_timestamp(seconds: f64) -> String {
    let ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let total_seconds = ms / 1000;
    let frames = ((ms % 1000) * 75) / 1000;
    format!("{:02}:{:02}:{:02}", total_seconds / 60, total_seconds % 60, frames)
}

/// Leading component of a hyphen-delimited date
fn parse_release_year(date: &str) -> Option<i32> {
    date.trim().split('-').next()?.trim().parse().ok()
}

fn split_names(names: Option<&str>) -> Vec<String> {
    names
        .map(|names| {
            names
                .split([',', ';'])
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_description(description: &str) -> String {
    description.chars().take(MAX_DESCRIPTION_CHARS).collect()
}

fn round2(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
