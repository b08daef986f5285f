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


//! Box (atom) headers and type tags
//!
//! # Box Header Layout
//! ```text
//! offset 0: u32 size      (1 = 64-bit size follows, 0 = extends to end of parent)
//! offset 4: [u8; 4] type
//! offset 8: u64 size      (only when the 32-bit size is 1)
//! ```
//!
//! All integers in the container are big-endian. A header is only accepted
//! when the box it declares fits inside its parent region; anything else is
//! rejected with `InvalidAtomSize` before a single payload byte is read.

use crate::error::{AaxcError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// Four-character code identifying a box type, brand or codec
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const FTYP: FourCC = FourCC(*b"ftyp");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const MVHD: FourCC = FourCC(*b"mvhd");
    pub const TRAK: FourCC = FourCC(*b"trak");
    pub const TKHD: FourCC = FourCC(*b"tkhd");
    pub const MDIA: FourCC = FourCC(*b"mdia");
    pub const MDHD: FourCC = FourCC(*b"mdhd");
    pub const HDLR: FourCC = FourCC(*b"hdlr");
    pub const MINF: FourCC = FourCC(*b"minf");
    pub const STBL: FourCC = FourCC(*b"stbl");
    pub const STSD: FourCC = FourCC(*b"stsd");
    pub const STSZ: FourCC = FourCC(*b"stsz");
    pub const STCO: FourCC = FourCC(*b"stco");
    pub const CO64: FourCC = FourCC(*b"co64");
    pub const STSC: FourCC = FourCC(*b"stsc");
    pub const STTS: FourCC = FourCC(*b"stts");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const UDTA: FourCC = FourCC(*b"udta");
    pub const META: FourCC = FourCC(*b"meta");
    pub const ILST: FourCC = FourCC(*b"ilst");
    pub const DATA: FourCC = FourCC(*b"data");

    /// Handler types
    pub const SOUN: FourCC = FourCC(*b"soun");
    pub const TEXT: FourCC = FourCC(*b"text");
    pub const SBTL: FourCC = FourCC(*b"sbtl");

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Read a tag from the first four bytes of `data`
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

// iTunes tags start with 0xA9, shown as '©' (Latin-1).
impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = match b {
                0x20..=0x7E | 0xA0..=0xFF => b as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{}\")", self)
    }
}

impl std::str::FromStr for FourCC {
    type Err = AaxcError;

    /// Parse a four-character tag, Latin-1 encoded (so "©nam" is accepted)
    fn from_str(s: &str) -> Result<Self> {
        let bytes = s
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| AaxcError::InvalidConfiguration(format!("'{}' is not a Latin-1 tag", s)))?;
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| {
            AaxcError::InvalidConfiguration(format!("'{}' is not a four-character tag", s))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FourCC {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Box kinds the parser descends into or extracts fields from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    Ftyp,
    Moov,
    Mvhd,
    Trak,
    Tkhd,
    Mdia,
    Mdhd,
    Hdlr,
    Minf,
    Stbl,
    Stsd,
    Stsz,
    Stco,
    Co64,
    Stsc,
    Stts,
    Mdat,
    Udta,
    Meta,
    Ilst,
    Other(FourCC),
}

impl From<FourCC> for BoxKind {
    fn from(tag: FourCC) -> Self {
        match &tag.0 {
            b"ftyp" => BoxKind::Ftyp,
            b"moov" => BoxKind::Moov,
            b"mvhd" => BoxKind::Mvhd,
            b"trak" => BoxKind::Trak,
            b"tkhd" => BoxKind::Tkhd,
            b"mdia" => BoxKind::Mdia,
            b"mdhd" => BoxKind::Mdhd,
            b"hdlr" => BoxKind::Hdlr,
            b"minf" => BoxKind::Minf,
            b"stbl" => BoxKind::Stbl,
            b"stsd" => BoxKind::Stsd,
            b"stsz" => BoxKind::Stsz,
            b"stco" => BoxKind::Stco,
            b"co64" => BoxKind::Co64,
            b"stsc" => BoxKind::Stsc,
            b"stts" => BoxKind::Stts,
            b"mdat" => BoxKind::Mdat,
            b"udta" => BoxKind::Udta,
            b"meta" => BoxKind::Meta,
            b"ilst" => BoxKind::Ilst,
            _ => BoxKind::Other(tag),
        }
    }
}

/// A contiguous byte range of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Region {
    pub offset: u64,
    pub len: u64,
}

impl Region {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }
}

/// Parsed box header, positioned absolutely in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Absolute offset of the first header byte
    pub offset: u64,
    /// Total box size including the header
    pub size: u64,
    pub box_type: FourCC,
    /// 8 for 32-bit sizes, 16 for 64-bit sizes
    pub header_len: u8,
}

impl BoxHeader {
    pub fn kind(&self) -> BoxKind {
        BoxKind::from(self.box_type)
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + u64::from(self.header_len)
    }

    pub fn payload_len(&self) -> u64 {
        self.size - u64::from(self.header_len)
    }

    pub fn payload(&self) -> Region {
        Region::new(self.payload_offset(), self.payload_len())
    }

    /// Offset of the first byte after this box
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Read the box header at `offset` inside a parent region ending at `parent_end`
///
/// Returns `Ok(None)` when fewer than 8 bytes remain in the parent (end of
/// the child list). A `size` of 0 extends the box to `parent_end`.
///
/// # Errors
/// - InvalidAtomSize if the declared size is smaller than its own header or
///   runs past `parent_end`
/// - IoError if the header bytes cannot be read
pub fn read_box_header<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    parent_end: u64,
) -> Result<Option<BoxHeader>> {
    if offset >= parent_end || parent_end - offset < 8 {
        return Ok(None);
    }
    let available = parent_end - offset;

    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let box_type = FourCC([buf[4], buf[5], buf[6], buf[7]]);

    let (size, header_len) = match size32 {
        0 => (available, 8u8),
        1 => {
            if available < 16 {
                return Err(AaxcError::invalid_atom_size(box_type, offset, 16, available));
            }
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            (u64::from_be_bytes(ext), 16u8)
        }
        n => (u64::from(n), 8u8),
    };

    if size < u64::from(header_len) || size > available {
        return Err(AaxcError::invalid_atom_size(box_type, offset, size, available));
    }

    Ok(Some(BoxHeader {
        offset,
        size,
        box_type,
        header_len,
    }))
}

pub(crate) fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(at..at.checked_add(8)?)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
