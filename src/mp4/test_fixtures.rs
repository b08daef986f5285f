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


//! Synthetic container fixtures for tests
//!
//! Builds small but structurally complete AAXC-like files: `ftyp`, a `moov`
//! with one `trak` per fixture track plus `udta/meta/ilst`, and an `mdat`
//! whose chunks are separated by filler bytes. Audio samples can be encrypted
//! the same way real files are (AES-128-CBC, whole blocks, IV reset per sample).
//!
//! This file is also compiled into the integration tests, so it only depends
//! on std and the cipher crates.

#![allow(dead_code)]

use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};

pub type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

pub const TEST_KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];
pub const TEST_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

const FILLER: &[u8] = b"JUNK-filler";

pub fn plain_box(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    out
}

/// Box with a version byte and three zero flag bytes before `body`
pub fn full_box(tag: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version, 0, 0, 0];
    payload.extend_from_slice(body);
    plain_box(tag, &payload)
}

/// 24-byte `ftyp` with the given major brand
pub fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
    plain_box(b"ftyp", &[brand.as_slice(), &[0, 0, 2, 0], b"isom", brand].concat())
}

pub fn mdat(payload: &[u8]) -> Vec<u8> {
    plain_box(b"mdat", payload)
}

/// `stsd` holding one entry of the given format
pub fn stsd_entry(format: &[u8; 4]) -> Vec<u8> {
    stsd(&[*format])
}

fn stsd(formats: &[[u8; 4]]) -> Vec<u8> {
    let mut body = (formats.len() as u32).to_be_bytes().to_vec();
    for format in formats {
        // reserved(6) + data_reference_index(2) + 20 bytes of audio fields
        let mut entry = vec![0u8; 28];
        entry[7] = 1;
        body.extend_from_slice(&plain_box(format, &entry));
    }
    full_box(b"stsd", 0, &body)
}

/// Encrypt every whole block of `data` with a fresh CBC chain
pub fn encrypt_sample(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut encryptor = Aes128CbcEnc::new(key.into(), iv.into());
    for block in out.chunks_exact_mut(16) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    out
}

/// iTunes-style `ilst` item holding a `data` atom
pub fn ilst_item(tag: &[u8; 4], data_type: u32, value: &[u8]) -> Vec<u8> {
    let mut data = data_type.to_be_bytes().to_vec();
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(value);
    plain_box(tag, &plain_box(b"data", &data))
}

#[derive(Debug, Clone)]
pub struct FixtureTrack {
    pub handler: [u8; 4],
    pub codecs: Vec<[u8; 4]>,
    pub samples: Vec<Vec<u8>>,
    pub samples_per_chunk: usize,
    pub timescale: u32,
    pub sample_duration: u32,
}

impl FixtureTrack {
    /// `soun` track with `aavd` sample entries
    pub fn audio(samples: Vec<Vec<u8>>, samples_per_chunk: usize) -> Self {
        Self {
            handler: *b"soun",
            codecs: vec![*b"aavd"],
            samples,
            samples_per_chunk,
            timescale: 44100,
            sample_duration: 1024,
        }
    }

    /// `text` track with one length-prefixed title per sample, ten seconds each
    pub fn chapters(titles: &[&str], timescale: u32) -> Self {
        let samples = titles
            .iter()
            .map(|title| {
                let mut sample = (title.len() as u16).to_be_bytes().to_vec();
                sample.extend_from_slice(title.as_bytes());
                sample
            })
            .collect();
        Self {
            handler: *b"text",
            codecs: vec![*b"text"],
            samples,
            samples_per_chunk: 1,
            timescale,
            sample_duration: timescale * 10,
        }
    }

    pub fn with_codecs(mut self, codecs: &[[u8; 4]]) -> Self {
        self.codecs = codecs.to_vec();
        self
    }

    fn is_audio(&self) -> bool {
        &self.handler == b"soun"
    }

    fn duration(&self) -> u64 {
        self.samples.len() as u64 * u64::from(self.sample_duration)
    }
}

/// A built container plus the positions tests assert against
#[derive(Debug, Clone)]
pub struct Fixture {
    pub bytes: Vec<u8>,
    /// `(payload offset, payload len)` of `mdat`
    pub mdat_payload: (u64, u64),
    pub brand_offset: u64,
    pub audio_chunk_offsets: Vec<u64>,
    /// `(offset, declared size)` of every audio sample
    pub audio_samples: Vec<(u64, u32)>,
    /// Audio samples before encryption
    pub plain_samples: Vec<Vec<u8>>,
    /// Offsets of every sample-entry format tag
    pub codec_offsets: Vec<u64>,
}

impl Fixture {
    pub fn audio_sample_bytes(&self, index: usize) -> &[u8] {
        let (offset, size) = self.audio_samples[index];
        &self.bytes[offset as usize..offset as usize + size as usize]
    }
}

#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    brand: [u8; 4],
    tracks: Vec<FixtureTrack>,
    ilst: Vec<Vec<u8>>,
    movie_timescale: u32,
    encryption: Option<([u8; 16], [u8; 16])>,
    oversize_last_sample: u32,
    filler: usize,
    co64: bool,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            brand: *b"aax ",
            tracks: Vec::new(),
            ilst: Vec::new(),
            movie_timescale: 1000,
            encryption: None,
            oversize_last_sample: 0,
            filler: FILLER.len(),
            co64: false,
        }
    }

    pub fn brand(mut self, brand: &[u8; 4]) -> Self {
        self.brand = *brand;
        self
    }

    pub fn track(mut self, track: FixtureTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn text_tag(mut self, tag: &[u8; 4], value: &str) -> Self {
        self.ilst.push(ilst_item(tag, 1, value.as_bytes()));
        self
    }

    pub fn cover(mut self, image: &[u8]) -> Self {
        self.ilst.push(ilst_item(b"covr", 13, image));
        self
    }

    pub fn raw_ilst_item(mut self, item: Vec<u8>) -> Self {
        self.ilst.push(item);
        self
    }

    pub fn encrypted(mut self, key: [u8; 16], iv: [u8; 16]) -> Self {
        self.encryption = Some((key, iv));
        self
    }

    /// Declare the last audio sample `extra` bytes larger than what is stored
    pub fn oversize_last_sample(mut self, extra: u32) -> Self {
        self.oversize_last_sample = extra;
        self
    }

    pub fn filler(mut self, len: usize) -> Self {
        self.filler = len;
        self
    }

    pub fn co64(mut self) -> Self {
        self.co64 = true;
        self
    }

    pub fn build(self) -> Fixture {
        // Non-audio chunks go first so the last audio sample ends the file.
        let mut order: Vec<usize> = (0..self.tracks.len()).filter(|&i| !self.tracks[i].is_audio()).collect();
        order.extend((0..self.tracks.len()).filter(|&i| self.tracks[i].is_audio()));

        let stored: Vec<Vec<Vec<u8>>> = self
            .tracks
            .iter()
            .map(|track| match (track.is_audio(), self.encryption) {
                (true, Some((key, iv))) => track.samples.iter().map(|s| encrypt_sample(&key, &iv, s)).collect(),
                _ => track.samples.clone(),
            })
            .collect();

        let ftyp_box = ftyp(&self.brand);

        // Table sizes do not depend on offset values, so one dry run fixes the layout.
        let placeholder: Vec<Vec<u64>> = self
            .tracks
            .iter()
            .map(|t| vec![0; t.samples.chunks(t.samples_per_chunk.max(1)).count()])
            .collect();
        let moov_len = self.moov(&placeholder).0.len();

        let mdat_payload_offset = (ftyp_box.len() + moov_len + 8) as u64;
        let mut payload = Vec::new();
        let mut chunk_offsets = vec![Vec::new(); self.tracks.len()];
        for &index in &order {
            let track = &self.tracks[index];
            for chunk in stored[index].chunks(track.samples_per_chunk.max(1)) {
                payload.extend(FILLER.iter().cycle().take(self.filler));
                chunk_offsets[index].push(mdat_payload_offset + payload.len() as u64);
                for sample in chunk {
                    payload.extend_from_slice(sample);
                }
            }
        }

        let (moov_box, codec_rel) = self.moov(&chunk_offsets);
        let mut bytes = ftyp_box.clone();
        let moov_start = bytes.len() as u64;
        bytes.extend_from_slice(&moov_box);
        bytes.extend_from_slice(&mdat(&payload));

        let audio_index = self.tracks.iter().position(FixtureTrack::is_audio);
        let mut audio_samples = Vec::new();
        let mut audio_chunk_offsets = Vec::new();
        let mut plain_samples = Vec::new();
        if let Some(index) = audio_index {
            let track = &self.tracks[index];
            audio_chunk_offsets = chunk_offsets[index].clone();
            let sizes = self.declared_sizes(track);
            let mut sample = 0;
            for (chunk, &offset) in track.samples.chunks(track.samples_per_chunk.max(1)).zip(&audio_chunk_offsets) {
                let mut cursor = offset;
                for _ in chunk {
                    audio_samples.push((cursor, sizes[sample]));
                    cursor += u64::from(sizes[sample]);
                    sample += 1;
                }
            }
            plain_samples = track.samples.clone();
        }

        Fixture {
            bytes,
            mdat_payload: (mdat_payload_offset, payload.len() as u64),
            brand_offset: 8,
            audio_chunk_offsets,
            audio_samples,
            plain_samples,
            codec_offsets: codec_rel.into_iter().map(|rel| moov_start + rel).collect(),
        }
    }

    fn declared_sizes(&self, track: &FixtureTrack) -> Vec<u32> {
        let mut sizes: Vec<u32> = track.samples.iter().map(|s| s.len() as u32).collect();
        if track.is_audio() {
            if let Some(last) = sizes.last_mut() {
                *last += self.oversize_last_sample;
            }
        }
        sizes
    }

    /// Returns the `moov` box and the offsets of codec tags relative to it
    fn moov(&self, chunk_offsets: &[Vec<u64>]) -> (Vec<u8>, Vec<u64>) {
        let movie_duration = self
            .tracks
            .iter()
            .map(|t| t.duration() * u64::from(self.movie_timescale) / u64::from(t.timescale.max(1)))
            .max()
            .unwrap_or(0);

        let mut mvhd = vec![0u8; 96];
        mvhd[8..12].copy_from_slice(&self.movie_timescale.to_be_bytes());
        mvhd[12..16].copy_from_slice(&(movie_duration as u32).to_be_bytes());
        let mut payload = full_box(b"mvhd", 0, &mvhd);

        let mut codec_offsets = Vec::new();
        for (index, track) in self.tracks.iter().enumerate() {
            let trak_start = 8 + payload.len() as u64;
            let (trak, rel) = self.trak(index as u32 + 1, track, &chunk_offsets[index]);
            codec_offsets.extend(rel.into_iter().map(|r| trak_start + r));
            payload.extend_from_slice(&trak);
        }

        if !self.ilst.is_empty() {
            let hdlr = full_box(b"hdlr", 0, &[&[0u8; 4][..], b"mdir", b"appl", &[0u8; 9]].concat());
            let ilst = plain_box(b"ilst", &self.ilst.concat());
            let meta = full_box(b"meta", 0, &[hdlr, ilst].concat());
            payload.extend_from_slice(&plain_box(b"udta", &meta));
        }

        (plain_box(b"moov", &payload), codec_offsets)
    }

    fn trak(&self, track_id: u32, track: &FixtureTrack, chunk_offsets: &[u64]) -> (Vec<u8>, Vec<u64>) {
        let mut tkhd = vec![0u8; 80];
        tkhd[8..12].copy_from_slice(&track_id.to_be_bytes());
        let tkhd = full_box(b"tkhd", 0, &tkhd);

        let mut mdhd = vec![0u8; 20];
        mdhd[8..12].copy_from_slice(&track.timescale.to_be_bytes());
        mdhd[12..16].copy_from_slice(&(track.duration() as u32).to_be_bytes());
        let mdhd = full_box(b"mdhd", 0, &mdhd);
        let hdlr = full_box(b"hdlr", 0, &[&[0u8; 4][..], &track.handler, &[0u8; 13]].concat());

        let per_chunk = track.samples_per_chunk.max(1);
        let chunk_lens: Vec<usize> = track.samples.chunks(per_chunk).map(<[_]>::len).collect();

        let mut stsc = Vec::new();
        let mut runs = 0u32;
        let mut previous = None;
        for (i, &len) in chunk_lens.iter().enumerate() {
            if previous != Some(len) {
                stsc.extend_from_slice(&(i as u32 + 1).to_be_bytes());
                stsc.extend_from_slice(&(len as u32).to_be_bytes());
                stsc.extend_from_slice(&1u32.to_be_bytes());
                runs += 1;
                previous = Some(len);
            }
        }
        let stsc = full_box(b"stsc", 0, &[&runs.to_be_bytes()[..], &stsc].concat());

        let mut stts = (1u32).to_be_bytes().to_vec();
        stts.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
        stts.extend_from_slice(&track.sample_duration.to_be_bytes());
        let stts = full_box(b"stts", 0, &stts);

        let sizes = self.declared_sizes(track);
        let mut stsz = vec![0u8; 4];
        stsz.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
        for size in sizes {
            stsz.extend_from_slice(&size.to_be_bytes());
        }
        let stsz = full_box(b"stsz", 0, &stsz);

        let mut offsets = (chunk_offsets.len() as u32).to_be_bytes().to_vec();
        let stco = if self.co64 {
            for offset in chunk_offsets {
                offsets.extend_from_slice(&offset.to_be_bytes());
            }
            full_box(b"co64", 0, &offsets)
        } else {
            for offset in chunk_offsets {
                offsets.extend_from_slice(&(*offset as u32).to_be_bytes());
            }
            full_box(b"stco", 0, &offsets)
        };

        let stsd_box = stsd(&track.codecs);
        let stbl = plain_box(b"stbl", &[stsd_box.clone(), stts, stsc, stsz, stco].concat());
        let minf = plain_box(b"minf", &stbl);
        let mdia = plain_box(b"mdia", &[mdhd.clone(), hdlr.clone(), minf].concat());
        let trak = plain_box(b"trak", &[tkhd.clone(), mdia].concat());

        // trak hdr + tkhd, mdia hdr + mdhd + hdlr, minf hdr, stbl hdr, stsd hdr + vf + count
        let stsd_entries = 8 + tkhd.len() + 8 + mdhd.len() + hdlr.len() + 8 + 8 + 16;
        let codec_offsets = (0..track.codecs.len())
            .map(|i| (stsd_entries + i * 36 + 4) as u64)
            .collect();

        (trak, codec_offsets)
    }
}
