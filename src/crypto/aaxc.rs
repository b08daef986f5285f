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


//! AAXC to M4A conversion
//!
//! # Conversion Process
//! 1. Parse the container structure (`ftyp` brand check, tracks, `mdat`)
//! 2. Locate every sample of the audio track
//! 3. Stream the input front to back:
//!    - bytes between samples are copied verbatim
//!    - each sample is decrypted with the chain restarted from the IV
//! 4. Rewrite the `ftyp` brand and the `stsd` codec tags in the output
//!
//! The output has the same length as the input and differs only inside audio
//! samples and at the rewritten tag positions. The input is read in bounded
//! windows, never as a whole.
//!
//! # Execution Modes
//! - [`AaxcDecrypter::convert_file`]: synchronous, full speed unless the
//!   options enable throttling
//! - [`AaxcDecrypter::convert_file_async`]: runs on a blocking worker, stops
//!   between samples when its [`CancellationToken`] fires
//!
//! Both produce identical output. The engine keeps no per-run state, so one
//! instance can run several conversions at once.

use crate::convert::events::{default_sink, ConversionEvent, EventSink, ProgressReporter, SkipReason};
use crate::convert::options::ConversionOptions;
use crate::convert::rewrite::rewrite_tags;
use crate::crypto::cipher::SampleCipher;
use crate::crypto::keys::{AesIv, AesKey};
use crate::error::{AaxcError, Result};
use crate::mp4::locator::{AudioSample, SampleBoundsPolicy, SampleLocator};
use crate::mp4::parser::{ContainerLayout, Mp4Parser};
use crate::mp4::source::{open_input_file, InputSource};
use crate::mp4::track::Track;
use serde::Serialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a finished conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConversionSummary {
    pub samples_decrypted: usize,
    pub samples_skipped: usize,
    pub bytes_written: u64,
    pub brand_rewritten: bool,
    pub codec_tags_rewritten: usize,
}

/// AAXC decryption engine
///
/// Holds the key material and the event sink. Everything that varies per
/// run (throttling, bounds policy, window sizes, tags) comes in through
/// [`ConversionOptions`].
///
/// # Example
/// ```no_run
/// use aaxc_core::convert::ConversionOptions;
/// use aaxc_core::crypto::AaxcDecrypter;
/// use std::path::Path;
///
/// # fn example() -> aaxc_core::Result<()> {
/// let decrypter = AaxcDecrypter::from_hex(
///     "2b7e151628aed2a6abf7158809cf4f3c",
///     "000102030405060708090a0b0c0d0e0f",
/// )?;
/// let summary = decrypter.convert_file(
///     Path::new("book.aaxc"),
///     Path::new("book.m4a"),
///     &ConversionOptions::default(),
/// )?;
/// println!("decrypted {} samples", summary.samples_decrypted);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AaxcDecrypter {
    cipher: SampleCipher,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for AaxcDecrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AaxcDecrypter").field("cipher", &self.cipher).finish_non_exhaustive()
    }
}

impl AaxcDecrypter {
    /// Create an engine from raw key material
    ///
    /// # Errors
    /// - InvalidKeySize / InvalidIvSize unless both are exactly 16 bytes
    /// - CryptorCreationFailed if the cipher backend rejects them
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = SampleCipher::new(AesKey::from_slice(key)?, AesIv::from_slice(iv)?);
        cipher.begin_sample()?;
        Ok(Self {
            cipher,
            sink: default_sink(),
        })
    }

    /// Create an engine from hex key material (whitespace tolerated)
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        Ok(Self::with_keys(AesKey::from_hex(key_hex)?, AesIv::from_hex(iv_hex)?))
    }

    pub fn with_keys(key: AesKey, iv: AesIv) -> Self {
        Self {
            cipher: SampleCipher::new(key, iv),
            sink: default_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Decrypt a single sample held in memory
    pub fn decrypt_sample(&self, sample: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt_sample(sample)
    }

    /// Convert an in-memory container
    pub fn convert_bytes(&self, input: &[u8], options: &ConversionOptions) -> Result<Vec<u8>> {
        let mut output = Cursor::new(Vec::with_capacity(input.len()));
        self.convert(Cursor::new(input), &mut output, options)?;
        Ok(output.into_inner())
    }

    /// Convert a file or in-memory source into `output`
    pub fn convert_source<W>(&self, source: &InputSource, output: &mut W, options: &ConversionOptions) -> Result<ConversionSummary>
    where
        W: Read + Write + Seek,
    {
        self.convert(source.open()?, output, options)
    }

    /// Convert from any seekable reader into a seekable, readable writer
    ///
    /// The writer must be readable because the tag rewrite reads back the
    /// bytes it patches.
    pub fn convert<R, W>(&self, input: R, output: &mut W, options: &ConversionOptions) -> Result<ConversionSummary>
    where
        R: Read + Seek,
        W: Read + Write + Seek,
    {
        self.convert_with_cancel(input, output, options, None)
    }

    /// Like [`convert`](Self::convert), stopping with `Cancelled` once `cancel` fires
    pub fn convert_with_cancel<R, W>(
        &self,
        input: R,
        output: &mut W,
        options: &ConversionOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConversionSummary>
    where
        R: Read + Seek,
        W: Read + Write + Seek,
    {
        options.validate()?;

        let mut parser = Mp4Parser::new(input)?
            .with_expected_brand(options.tags.source_brand)
            .with_event_sink(self.sink.clone());
        let layout = parser.parse_structure()?;
        let track = layout.audio_track()?;
        let mut input = parser.into_inner();

        self.convert_track(&mut input, output, &layout, track, options, cancel)
    }

    /// Stream one parsed track from `input` to `output`
    ///
    /// # Errors
    /// - InvalidConfiguration if `options` fail validation
    /// - InvalidSampleOffset for an unusable sample under `SampleBoundsPolicy::Fail`,
    ///   or when a sample cannot be read in full
    /// - Cancelled if `cancel` fires before a sample or at a yield point
    /// - IoError for read/write failures
    pub fn convert_track<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        layout: &ContainerLayout,
        track: &Track,
        options: &ConversionOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConversionSummary>
    where
        R: Read + Seek,
        W: Read + Write + Seek,
    {
        options.validate()?;
        let sink = self.sink.as_ref();
        let source_len = layout.source_len;
        let copy_window = options.copy_chunk_size;
        let decrypt_window = options.effective_decrypt_chunk_size();
        let mut buf = vec![0u8; copy_window.max(decrypt_window)];

        sink.record(ConversionEvent::ConversionStarted {
            track_id: track.track_id,
            sample_count: track.sample_table.sample_count(),
            source_len,
            throttled: options.throttle.enabled,
            priority: options.throttle.priority,
        });

        let mut summary = ConversionSummary::default();
        let mut progress = ProgressReporter::new(source_len);
        let mut cursor = 0u64;

        for sample in SampleLocator::new(&track.sample_table) {
            check_cancelled(cancel)?;

            if sample.size == 0 {
                continue;
            }

            let skip = if sample.end() > source_len {
                Some(SkipReason::OutOfBounds { source_len })
            } else if sample.offset < cursor {
                Some(SkipReason::Overlapping { cursor })
            } else {
                None
            };

            if let Some(reason) = skip {
                match options.bounds_policy {
                    SampleBoundsPolicy::Filter => {
                        sink.record(ConversionEvent::SampleSkipped {
                            sample_index: sample.sample_index,
                            offset: sample.offset,
                            size: sample.size,
                            reason,
                        });
                        summary.samples_skipped += 1;
                        continue;
                    }
                    SampleBoundsPolicy::Fail => return Err(sample_offset_error(&sample, source_len)),
                }
            }

            copy_range(input, output, cursor, sample.offset, &mut buf[..copy_window])?;
            self.decrypt_into(input, output, &sample, source_len, &mut buf[..decrypt_window])?;
            cursor = sample.end();

            summary.samples_decrypted += 1;
            progress.update(cursor, sink);

            if options.throttle.should_yield(summary.samples_decrypted) {
                check_cancelled(cancel)?;
                let pause = options.throttle.yield_duration;
                sink.record(ConversionEvent::Yielded {
                    samples_processed: summary.samples_decrypted,
                    pause,
                });
                std::thread::sleep(pause);
            }
        }

        copy_range(input, output, cursor, source_len, &mut buf[..copy_window])?;
        output.flush()?;
        summary.bytes_written = source_len;

        let report = rewrite_tags(output, layout, options, sink)?;
        summary.brand_rewritten = report.brand_rewritten;
        summary.codec_tags_rewritten = report.codec_tags_rewritten;

        sink.record(ConversionEvent::ConversionFinished {
            samples_decrypted: summary.samples_decrypted,
            samples_skipped: summary.samples_skipped,
            bytes_written: summary.bytes_written,
        });

        Ok(summary)
    }

    /// Decrypt one sample window by window; `buf` is a whole number of blocks
    fn decrypt_into<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        sample: &AudioSample,
        source_len: u64,
        buf: &mut [u8],
    ) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        input.seek(SeekFrom::Start(sample.offset))?;
        output.seek(SeekFrom::Start(sample.offset))?;

        let mut decryptor = self.cipher.begin_sample()?;
        let mut remaining = u64::from(sample.size);
        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            input.read_exact(&mut buf[..n]).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => sample_offset_error(sample, source_len),
                _ => AaxcError::IoError(e),
            })?;
            decryptor.decrypt_aligned(&mut buf[..n]);
            output.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Convert `input` into a new file at `output`
    ///
    /// A partially written output is removed when the conversion fails.
    ///
    /// # Errors
    /// - FileNotFound if `input` does not exist
    /// - InvalidData if either file cannot be opened or created
    /// - any error from [`convert`](Self::convert)
    pub fn convert_file(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<ConversionSummary> {
        self.convert_file_with_cancel(input, output, options, None)
    }

    fn convert_file_with_cancel(
        &self,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConversionSummary> {
        let reader = BufReader::new(open_input_file(input)?);
        let mut writer = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .map_err(|e| AaxcError::InvalidData(format!("cannot create {}: {}", output.display(), e)))?;

        info!(input = %input.display(), output = %output.display(), "converting file");

        let result = self
            .convert_with_cancel(reader, &mut writer, options, cancel)
            .and_then(|summary| {
                writer.sync_all()?;
                Ok(summary)
            });

        if let Err(e) = &result {
            drop(writer);
            if let Err(remove_err) = std::fs::remove_file(output) {
                warn!(output = %output.display(), error = %remove_err, "could not remove partial output");
            }
            warn!(error = %e, "conversion failed, partial output removed");
        }

        result
    }

    /// Convert a file on a blocking worker thread
    ///
    /// `cancel` is checked before every sample and at every throttle pause.
    /// A cancelled or failed run removes the partial output and returns the
    /// error; `Cancelled` for cancellation.
    pub async fn convert_file_async(
        &self,
        input: PathBuf,
        output: PathBuf,
        options: ConversionOptions,
        cancel: CancellationToken,
    ) -> Result<ConversionSummary> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.convert_file_with_cancel(&input, &output, &options, Some(&cancel)))
            .await
            .map_err(join_error)?
    }

    /// Start a file conversion in the background and return a handle to it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_file_conversion(
        &self,
        input: PathBuf,
        output: PathBuf,
        options: ConversionOptions,
    ) -> ConversionTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = self.clone();
        let handle = tokio::task::spawn_blocking(move || {
            engine.convert_file_with_cancel(&input, &output, &options, Some(&token))
        });
        ConversionTask { handle, cancel }
    }
}

/// A running background conversion
#[derive(Debug)]
pub struct ConversionTask {
    handle: JoinHandle<Result<ConversionSummary>>,
    cancel: CancellationToken,
}

impl ConversionTask {
    /// Ask the conversion to stop at the next sample boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the conversion to end
    pub async fn join(self) -> Result<ConversionSummary> {
        self.handle.await.map_err(join_error)?
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(AaxcError::Cancelled),
        _ => Ok(()),
    }
}

fn join_error(err: tokio::task::JoinError) -> AaxcError {
    if err.is_cancelled() {
        AaxcError::Cancelled
    } else {
        AaxcError::DecryptionFailed(format!("conversion worker panicked: {}", err))
    }
}

fn sample_offset_error(sample: &AudioSample, source_len: u64) -> AaxcError {
    AaxcError::InvalidSampleOffset {
        sample_index: sample.sample_index,
        offset: sample.offset,
        size: sample.size,
        source_len,
    }
}

/// Copy `[from, to)` verbatim in windows of `buf.len()` bytes
fn copy_range<R, W>(input: &mut R, output: &mut W, from: u64, to: u64, buf: &mut [u8]) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if to <= from {
        return Ok(());
    }
    input.seek(SeekFrom::Start(from))?;
    output.seek(SeekFrom::Start(from))?;

    let mut remaining = to - from;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        input.read_exact(&mut buf[..n])?;
        output.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}
