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


#![allow(dead_code)]

#[path = "../../src/mp4/test_fixtures.rs"]
mod fixtures;

pub use fixtures::*;

use aaxc_core::AaxcDecrypter;

pub fn engine() -> AaxcDecrypter {
    AaxcDecrypter::new(&TEST_KEY, &TEST_IV).expect("test key material is valid")
}

/// Audio samples of varied lengths, including partial trailing blocks
pub fn varied_samples(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| (0..(40 + i * 7)).map(|b| (b * 31 + i) as u8).collect())
        .collect()
}
