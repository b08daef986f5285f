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


//! Conversion options
//!
//! Everything the engine needs to know about a run is passed in here at call
//! time. The engine itself holds only the key material and its event sink,
//! so one instance can serve concurrent conversions.

use crate::error::{AaxcError, Result};
use crate::mp4::atom::FourCC;
use crate::mp4::locator::SampleBoundsPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verbatim copy window (non-sample bytes)
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Decrypt window (sample bytes); kept smaller to bound peak memory
pub const DEFAULT_DECRYPT_CHUNK_SIZE: usize = 256 * 1024;

/// Upper bound for either window; keeps per-run memory bounded
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_YIELD_INTERVAL: usize = 500;
pub const DEFAULT_YIELD_DURATION: Duration = Duration::from_millis(15);

/// Scheduling priority hint for the host
///
/// The engine does not change OS priorities itself; the value is reported
/// with the conversion so the host can pick a matching queue or QoS class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    #[default]
    UserInitiated,
    Utility,
    Background,
}

/// CPU throttling for background execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Samples processed between pauses
    pub yield_interval: usize,
    /// Length of each pause, in seconds on the wire
    #[serde(with = "duration_secs")]
    pub yield_duration: Duration,
    pub priority: TaskPriority,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            yield_interval: DEFAULT_YIELD_INTERVAL,
            yield_duration: DEFAULT_YIELD_DURATION,
            priority: TaskPriority::UserInitiated,
        }
    }
}

impl ThrottleConfig {
    /// Throttling on, background priority
    pub fn background() -> Self {
        Self {
            enabled: true,
            priority: TaskPriority::Background,
            ..Self::default()
        }
    }

    /// True when a pause is due after `samples_processed` samples
    pub fn should_yield(&self, samples_processed: usize) -> bool {
        self.enabled
            && self.yield_interval > 0
            && samples_processed > 0
            && samples_processed % self.yield_interval == 0
    }
}

/// Brand and codec tags rewritten after decryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatTags {
    /// `ftyp` major brand of the encrypted source
    pub source_brand: FourCC,
    pub target_brand: FourCC,
    /// Sample-entry format of encrypted audio
    pub source_codec: FourCC,
    pub target_codec: FourCC,
}

impl Default for FormatTags {
    fn default() -> Self {
        Self {
            source_brand: FourCC(*b"aax "),
            target_brand: FourCC(*b"M4A "),
            source_codec: FourCC(*b"aavd"),
            target_codec: FourCC(*b"mp4a"),
        }
    }
}

/// Where the fallback codec-tag scan may look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagRewriteScope {
    /// Only inside `stsd` payloads
    #[default]
    SampleDescriptions,
    /// Fall back to the whole `moov` payload when `stsd` yields nothing
    MovieBox,
}

/// Options for one conversion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub throttle: ThrottleConfig,
    pub bounds_policy: SampleBoundsPolicy,
    pub copy_chunk_size: usize,
    pub decrypt_chunk_size: usize,
    pub tags: FormatTags,
    pub rewrite_scope: TagRewriteScope,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            bounds_policy: SampleBoundsPolicy::default(),
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            decrypt_chunk_size: DEFAULT_DECRYPT_CHUNK_SIZE,
            tags: FormatTags::default(),
            rewrite_scope: TagRewriteScope::default(),
        }
    }
}

impl ConversionOptions {
    /// Preset for conversions running alongside playback or in the background
    pub fn background() -> Self {
        Self {
            throttle: ThrottleConfig::background(),
            ..Self::default()
        }
    }

    pub fn with_bounds_policy(mut self, policy: SampleBoundsPolicy) -> Self {
        self.bounds_policy = policy;
        self
    }

    /// Decrypt window rounded down to whole AES blocks
    pub fn effective_decrypt_chunk_size(&self) -> usize {
        (self.decrypt_chunk_size - self.decrypt_chunk_size % 16).max(16)
    }

    /// # Errors
    /// - InvalidConfiguration for zero-sized windows, windows above
    ///   [`MAX_CHUNK_SIZE`], or a zero yield interval
    pub fn validate(&self) -> Result<()> {
        if self.copy_chunk_size == 0 {
            return Err(AaxcError::InvalidConfiguration(
                "copy_chunk_size must be greater than zero".to_string(),
            ));
        }
        for (name, size) in [
            ("copy_chunk_size", self.copy_chunk_size),
            ("decrypt_chunk_size", self.decrypt_chunk_size),
        ] {
            if size > MAX_CHUNK_SIZE {
                return Err(AaxcError::InvalidConfiguration(format!(
                    "{} must be at most {} bytes, got {}",
                    name, MAX_CHUNK_SIZE, size
                )));
            }
        }
        if self.decrypt_chunk_size < 16 {
            return Err(AaxcError::InvalidConfiguration(format!(
                "decrypt_chunk_size must be at least one AES block, got {}",
                self.decrypt_chunk_size
            )));
        }
        if self.throttle.enabled && self.throttle.yield_interval == 0 {
            return Err(AaxcError::InvalidConfiguration(
                "yield_interval must be greater than zero when throttling".to_string(),
            ));
        }
        Ok(())
    }
}

/// `Duration` as fractional seconds
mod duration_secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| de::Error::custom(format!("invalid duration in seconds: {}", secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConversionOptions::default();
        assert!(!options.throttle.enabled);
        assert_eq!(options.bounds_policy, SampleBoundsPolicy::Filter);
        assert_eq!(options.tags.source_brand, FourCC(*b"aax "));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_background_preset() {
        let options = ConversionOptions::background();
        assert!(options.throttle.enabled);
        assert_eq!(options.throttle.priority, TaskPriority::Background);
        assert!(options.throttle.should_yield(500));
        assert!(!options.throttle.should_yield(499));
        assert!(!options.throttle.should_yield(0));
    }

    #[test]
    fn test_decrypt_chunk_rounds_to_blocks() {
        let options = ConversionOptions {
            decrypt_chunk_size: 1000,
            ..Default::default()
        };
        assert_eq!(options.effective_decrypt_chunk_size(), 992);
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let options = ConversionOptions {
            decrypt_chunk_size: 8,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(AaxcError::InvalidConfiguration(_))));

        let mut options = ConversionOptions::background();
        options.throttle.yield_interval = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let options = ConversionOptions {
            copy_chunk_size: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(AaxcError::InvalidConfiguration(_))));

        let options = ConversionOptions {
            decrypt_chunk_size: MAX_CHUNK_SIZE + 16,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(AaxcError::InvalidConfiguration(_))));

        let options = ConversionOptions {
            copy_chunk_size: MAX_CHUNK_SIZE,
            decrypt_chunk_size: MAX_CHUNK_SIZE,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_yield_duration_in_seconds() {
        let options: ConversionOptions =
            serde_json::from_str(r#"{"throttle":{"enabled":true,"yield_duration":0.25}}"#).unwrap();
        assert_eq!(options.throttle.yield_duration, Duration::from_millis(250));

        let json = serde_json::to_value(ThrottleConfig::default()).unwrap();
        assert_eq!(json["yield_duration"], 0.015);

        assert!(serde_json::from_str::<ThrottleConfig>(r#"{"yield_duration":-1.0}"#).is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let options: ConversionOptions = serde_json::from_str(
            r#"{"bounds_policy":"fail","throttle":{"enabled":true,"yield_interval":1000},"tags":{"target_brand":"M4B "}}"#,
        )
        .unwrap();

        assert_eq!(options.bounds_policy, SampleBoundsPolicy::Fail);
        assert_eq!(options.throttle.yield_interval, 1000);
        assert_eq!(options.throttle.yield_duration, DEFAULT_YIELD_DURATION);
        assert_eq!(options.tags.target_brand, FourCC(*b"M4B "));
        assert_eq!(options.tags.source_codec, FourCC(*b"aavd"));
        assert_eq!(options.copy_chunk_size, DEFAULT_COPY_CHUNK_SIZE);
    }
}
