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


//! Host bridge exposed through uniffi
//!
//! # Design Patterns
//! 1. **JSON Communication**: options and results cross the boundary as JSON
//! 2. **Error Handling**: errors are returned as JSON error responses
//! 3. **No Panics**: panics are caught so they never unwind into the host
//! 4. **Blocking Calls**: the host calls these from a worker thread; pass
//!    background options to throttle the conversion
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//! Or on error:
//! ```json
//! { "success": false, "error": "Error message", "user_message": "..." }
//! ```

use crate::audio::{AudioDecoder, AudioMetadata};
use crate::convert::ConversionOptions;
use crate::crypto::AaxcDecrypter;
use crate::error::{AaxcError, Result};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

fn result_to_json<T: Serialize>(result: Result<T>) -> String {
    match result {
        Ok(data) => serde_json::json!({
            "success": true,
            "data": data
        })
        .to_string(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &AaxcError) -> String {
    serde_json::json!({
        "success": false,
        "error": err.to_string(),
        "user_message": err.user_message()
    })
    .to_string()
}

/// Run `f`, turning a panic into an error response
fn guarded<T: Serialize>(f: impl FnOnce() -> Result<T>) -> String {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result_to_json(result),
        Err(_) => error_response(&AaxcError::invalid_data("internal panic during operation")),
    }
}

/// Parse conversion options; an empty string means defaults
fn parse_options(options_json: &str) -> Result<ConversionOptions> {
    if options_json.trim().is_empty() {
        return Ok(ConversionOptions::default());
    }
    let options: ConversionOptions = serde_json::from_str(options_json)?;
    options.validate()?;
    Ok(options)
}

/// Convert an AAXC file to M4A
///
/// `options_json` is a (possibly partial) `ConversionOptions` object, e.g.
/// `{"throttle":{"enabled":true,"priority":"background"}}`.
/// On success `data` is the conversion summary.
#[uniffi::export]
pub fn convert_aaxc_file(
    input_path: String,
    output_path: String,
    key_hex: String,
    iv_hex: String,
    options_json: String,
) -> String {
    guarded(|| {
        let options = parse_options(&options_json)?;
        let decrypter = AaxcDecrypter::from_hex(&key_hex, &iv_hex)?;
        decrypter.convert_file(Path::new(&input_path), Path::new(&output_path), &options)
    })
}

/// Read the metadata export record of an audiobook file
#[uniffi::export]
pub fn read_audiobook_metadata_json(path: String) -> String {
    guarded(|| AudioMetadata::from_file(Path::new(&path)))
}

/// Detect whether a file is an encrypted source or an already converted file
#[uniffi::export]
pub fn detect_audio_format(path: String) -> String {
    guarded(|| {
        let format = AudioDecoder::detect_format(Path::new(&path))?;
        Ok(serde_json::json!({
            "format": format,
            "encrypted": format.is_encrypted(),
        }))
    })
}
