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


//! Per-sample AES-128-CBC decryption
//!
//! # Sample Encryption Rules
//! - AES-128 in CBC mode, no padding
//! - The chain restarts from the declared IV at the first byte of every sample
//! - Only whole 16-byte blocks are encrypted; a trailing remainder of
//!   fewer than 16 bytes is stored in the clear
//!
//! Reusing the chain from the previous sample decrypts the first sample
//! correctly and garbles every sample after it, so a [`SampleDecryptor`] is
//! created per sample and dropped when the sample is done.

use crate::crypto::keys::{AesIv, AesKey};
use crate::error::{AaxcError, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, KeyIvInit};

pub const BLOCK_SIZE: usize = 16;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Key material plus the rule for restarting the chain per sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCipher {
    key: AesKey,
    iv: AesIv,
}

impl SampleCipher {
    pub fn new(key: AesKey, iv: AesIv) -> Self {
        Self { key, iv }
    }

    /// Fresh CBC state positioned at the start of a sample
    ///
    /// # Errors
    /// - CryptorCreationFailed if the backend rejects the key material
    pub fn begin_sample(&self) -> Result<SampleDecryptor> {
        let inner = Aes128CbcDec::new_from_slices(self.key.as_bytes(), self.iv.as_bytes())
            .map_err(|e| AaxcError::CryptorCreationFailed(e.to_string()))?;
        Ok(SampleDecryptor { inner })
    }

    /// Decrypt one whole sample held in memory
    ///
    /// Output length equals input length. Inputs shorter than one block come
    /// back unchanged.
    pub fn decrypt_sample(&self, sample: &[u8]) -> Result<Vec<u8>> {
        let mut out = sample.to_vec();
        self.begin_sample()?.decrypt_aligned(&mut out);
        Ok(out)
    }
}

/// CBC state for one sample
///
/// Feed the sample front to back through [`decrypt_aligned`](Self::decrypt_aligned).
/// The chain carries over between calls, so a sample can be processed in
/// windows as long as every window except the last is block-aligned.
pub struct SampleDecryptor {
    inner: Aes128CbcDec,
}

impl SampleDecryptor {
    /// Decrypt every whole block of `buf` in place
    ///
    /// Returns the number of bytes decrypted; bytes past that are untouched.
    pub fn decrypt_aligned(&mut self, buf: &mut [u8]) -> usize {
        let mut decrypted = 0;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.inner.decrypt_block_mut(GenericArray::from_mut_slice(block));
            decrypted += BLOCK_SIZE;
        }
        decrypted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::test_fixtures::{encrypt_sample, TEST_IV, TEST_KEY};

    fn cipher() -> SampleCipher {
        SampleCipher::new(AesKey::new(TEST_KEY), AesIv::new(TEST_IV))
    }

    #[test]
    fn test_known_answer_vector() {
        let ciphertext = hex::decode("7649abac8119b246cee98e9b12e9197d").unwrap();
        let plaintext = cipher().decrypt_sample(&ciphertext).unwrap();
        assert_eq!(hex::encode(plaintext), "6bc1bee22e409f96e93d7e117393172a");
    }

    #[test]
    fn test_remainder_passes_through() {
        let cipher = cipher();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33] {
            let plain: Vec<u8> = (0..len as u8).collect();
            let encrypted = encrypt_sample(&TEST_KEY, &TEST_IV, &plain);
            let whole = len - len % BLOCK_SIZE;

            let decrypted = cipher.decrypt_sample(&encrypted).unwrap();
            assert_eq!(decrypted.len(), len, "length {}", len);
            assert_eq!(decrypted, plain, "length {}", len);
            // The clear tail is never touched, even on ciphertext input
            assert_eq!(&decrypted[whole..], &encrypted[whole..], "length {}", len);
        }
    }

    #[test]
    fn test_short_input_unchanged() {
        let data = [0x5Au8; 15];
        assert_eq!(cipher().decrypt_sample(&data).unwrap(), data.to_vec());
    }

    #[test]
    fn test_iv_resets_per_sample() {
        let cipher = cipher();
        let block = hex::decode("7649abac8119b246cee98e9b12e9197d").unwrap();

        let first = cipher.decrypt_sample(&block).unwrap();
        let second = cipher.decrypt_sample(&block).unwrap();
        assert_eq!(first, second);

        // A chain carried over from the first sample would give different bytes
        let mut chained = [block.clone(), block.clone()].concat();
        cipher.begin_sample().unwrap().decrypt_aligned(&mut chained);
        assert_eq!(&chained[..16], first.as_slice());
        assert_ne!(&chained[16..], first.as_slice());
    }

    #[test]
    fn test_windowed_matches_whole() {
        let plain: Vec<u8> = (0..100u8).collect();
        let encrypted = encrypt_sample(&TEST_KEY, &TEST_IV, &plain);

        let mut windowed = encrypted.clone();
        let mut decryptor = cipher().begin_sample().unwrap();
        for window in windowed.chunks_mut(32) {
            decryptor.decrypt_aligned(window);
        }

        assert_eq!(windowed, plain);
    }
}
