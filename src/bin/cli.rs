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


use aaxc_core::audio::{AudioDecoder, AudioMetadata};
use aaxc_core::convert::ConversionOptions;
use aaxc_core::mp4::{Mp4Parser, SampleBoundsPolicy};
use aaxc_core::AaxcDecrypter;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "aaxc-cli")]
#[command(about = "AAXC to M4A converter - desktop tool", long_about = None)]
struct Cli {
    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt an AAXC file into an M4A file
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// AES key, 32 hex characters
        #[arg(long)]
        key: String,
        /// AES IV, 32 hex characters
        #[arg(long)]
        iv: String,
        /// Throttle the conversion and mark it as background work
        #[arg(long)]
        background: bool,
        /// Fail on samples outside the file instead of skipping them
        #[arg(long)]
        strict_bounds: bool,
        /// Samples between throttle pauses
        #[arg(long)]
        yield_interval: Option<usize>,
        /// Length of each throttle pause in milliseconds
        #[arg(long)]
        yield_ms: Option<u64>,
    },
    /// Print the metadata export record as JSON
    Metadata {
        file: PathBuf,
        /// Print a cue sheet instead of JSON
        #[arg(long)]
        cue: bool,
    },
    /// Print the format and track layout of a file
    Probe { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "aaxc_core=debug,aaxc_cli=debug".to_string()
        } else {
            "info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Convert {
            input,
            output,
            key,
            iv,
            background,
            strict_bounds,
            yield_interval,
            yield_ms,
        } => {
            let mut options = if background {
                ConversionOptions::background()
            } else {
                ConversionOptions::default()
            };
            if strict_bounds {
                options.bounds_policy = SampleBoundsPolicy::Fail;
            }
            if let Some(interval) = yield_interval {
                options.throttle.enabled = true;
                options.throttle.yield_interval = interval;
            }
            if let Some(ms) = yield_ms {
                options.throttle.enabled = true;
                options.throttle.yield_duration = Duration::from_millis(ms);
            }
            convert(input, output, &key, &iv, options).await
        }
        Commands::Metadata { file, cue } => print_metadata(&file, cue),
        Commands::Probe { file } => probe(&file),
    }
}

async fn convert(input: PathBuf, output: PathBuf, key: &str, iv: &str, options: ConversionOptions) -> Result<()> {
    options.validate()?;
    let decrypter = AaxcDecrypter::from_hex(key, iv).context("invalid key material")?;

    let task = decrypter.spawn_file_conversion(input.clone(), output.clone(), options);
    let cancel = task.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling conversion");
            cancel.cancel();
        }
    });

    let summary = task
        .join()
        .await
        .with_context(|| format!("converting {} failed", input.display()))?;

    info!(
        samples_decrypted = summary.samples_decrypted,
        samples_skipped = summary.samples_skipped,
        "wrote {}",
        output.display()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_metadata(file: &Path, cue: bool) -> Result<()> {
    let metadata = AudioMetadata::from_file(file).with_context(|| format!("reading {}", file.display()))?;

    if cue {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        print!("{}", metadata.generate_cue_sheet(&name));
    } else {
        println!("{}", metadata.to_json()?);
    }
    Ok(())
}

fn probe(file: &Path) -> Result<()> {
    let format = AudioDecoder::detect_format(file)?;
    println!("Format: {:?} (encrypted: {})", format, format.is_encrypted());

    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let layout = Mp4Parser::new(reader)?
        .with_expected_brand(aaxc_core::mp4::FourCC(*b"aax "))
        .parse_structure();

    match layout {
        Ok(layout) => {
            println!("mdat: offset {} size {}", layout.mdat_offset, layout.mdat_size);
            for track in &layout.tracks {
                println!(
                    "track {}: {} codec {} samples {} chunks {} duration {:.2}s",
                    track.track_id,
                    track.media_type,
                    track.codec,
                    track.sample_table.sample_count(),
                    track.sample_table.chunk_count(),
                    track.duration_seconds()
                );
            }
        }
        Err(e) if !format.is_encrypted() => {
            println!("Not an encrypted source: {}", e);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
