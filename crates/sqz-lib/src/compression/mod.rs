//! Range-coded compression of alignment records.
//!
//! The stream is a single headerless range-coder output: records follow
//! one another field by field and a zero read length ends it. Encoder and
//! decoder must be built with identical `ModelParams` and reference
//! directory.

pub mod cigar;
pub mod codecs;
mod compress_impl;
mod decompress_impl;
pub mod fields;
pub mod model;
pub mod quality_ctx;
pub mod range_coder;
pub mod read_name;
pub mod sequence;

use crate::cli::{is_stdio_path, CompressConfig, DecompressConfig};
use anyhow::{Context, Result};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub use compress_impl::compress_records;
pub use decompress_impl::decompress_records;

const OUTPUT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Summary of one compression or decompression run
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    pub records: u64,
    pub mapped: u64,
    pub bases: u64,
    pub reference_switches: u64,
    pub consensus_bases: u64,
    /// Range-coded bytes written or read
    pub stream_bytes: u64,
}

impl RunStats {
    fn from_state(state: &codecs::CodecState, stream_bytes: u64) -> Self {
        let s = state.stats;
        Self {
            records: s.records,
            mapped: s.mapped,
            bases: s.bases,
            reference_switches: s.reference_switches,
            consensus_bases: state.consensus_bases(),
            stream_bytes,
        }
    }
}

/// Open `path` for writing, or stdout when it is `-`.
fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if is_stdio_path(path) {
        return Ok(Box::new(BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, std::io::stdout().lock())));
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(Box::new(BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, file)))
}

/// Size of a regular input file, if known.
fn input_size(path: &Path) -> Option<u64> {
    if is_stdio_path(path) {
        return None;
    }
    std::fs::metadata(path).ok().map(|m| m.len())
}

fn log_compression_stats(stats: &RunStats, original_size: Option<u64>, elapsed: Duration) {
    info!("Compression completed in {:.2}s", elapsed.as_secs_f64());
    info!(
        "Records: {} ({} mapped, {} unmapped), {} bases",
        stats.records,
        stats.mapped,
        stats.records - stats.mapped,
        stats.bases
    );
    info!("Consensus: {} coordinates, {} reference switches", stats.consensus_bases, stats.reference_switches);
    if let Some(size) = original_size {
        info!("Original size: {} bytes", size);
    }
    info!("Compressed size: {} bytes", stats.stream_bytes);
    if let Some(size) = original_size.filter(|_| stats.stream_bytes > 0) {
        info!("Compression ratio: {:.2}x", size as f64 / stats.stream_bytes as f64);
    }
    if stats.bases > 0 {
        info!("Bits per base: {:.3}", 8.0 * stats.stream_bytes as f64 / stats.bases as f64);
    }
}

/// Compress a SAM/BAM file into a range-coded stream.
pub fn compress(args: &CompressConfig) -> Result<()> {
    compress_impl::compress(args)
}

/// Decompress a range-coded stream into SAM or FASTQ text.
pub fn decompress(args: &DecompressConfig) -> Result<()> {
    decompress_impl::decompress(args)
}
