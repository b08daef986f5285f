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


//! Byte sources for the parser and the conversion engine
//!
//! A source is anything that can seek and read an exact number of bytes:
//! a file opened for random access or an in-memory buffer.

use crate::error::{AaxcError, Result};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Seekable, readable byte source
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where the encrypted container comes from
#[derive(Debug, Clone)]
pub enum InputSource {
    /// File opened for random-access reads
    Path(PathBuf),
    /// Whole container already in memory
    Memory(Vec<u8>),
}

impl InputSource {
    /// Open the source for reading
    ///
    /// # Errors
    /// - FileNotFound if the path does not exist
    /// - InvalidData if the file exists but cannot be opened
    pub fn open(&self) -> Result<Box<dyn ReadSeek + '_>> {
        match self {
            InputSource::Path(path) => Ok(Box::new(BufReader::new(open_input_file(path)?))),
            InputSource::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
        }
    }

    /// Total length of the source in bytes
    pub fn len(&self) -> Result<u64> {
        match self {
            InputSource::Path(path) => Ok(std::fs::metadata(path)
                .map_err(|e| map_open_error(path, e))?
                .len()),
            InputSource::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl From<PathBuf> for InputSource {
    fn from(path: PathBuf) -> Self {
        InputSource::Path(path)
    }
}

impl From<Vec<u8>> for InputSource {
    fn from(bytes: Vec<u8>) -> Self {
        InputSource::Memory(bytes)
    }
}

/// Open an input file, mapping failures to the crate's error taxonomy
pub fn open_input_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| map_open_error(path, e))
}

fn map_open_error(path: &Path, err: io::Error) -> AaxcError {
    if err.kind() == io::ErrorKind::NotFound {
        AaxcError::FileNotFound(path.display().to_string())
    } else {
        AaxcError::InvalidData(format!("cannot open {}: {}", path.display(), err))
    }
}

/// Length of a seekable source; the stream position is restored afterwards
pub fn source_len<S: Seek>(source: &mut S) -> io::Result<u64> {
    let position = source.stream_position()?;
    let len = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(position))?;
    Ok(len)
}

/// Read exactly `len` bytes starting at `offset`
pub fn read_exact_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
