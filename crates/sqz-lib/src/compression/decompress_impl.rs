//! Decompression orchestrator.

use super::codecs::CodecState;
use super::range_coder::RangeDecoder;
use super::*;
use crate::cli::{DecompressConfig, ModelParams, OutputFormat};
use crate::error::SqzError;
use crate::io::output::RecordWriter;
use crate::io::reference::ReferenceSource;
use crate::io::InputSource;
use std::io::Read;
use std::time::Instant;

/// Bytes the encoder flushes after the last symbol
const CODER_FLUSH_BYTES: usize = 8;

pub(super) fn decompress(args: &DecompressConfig) -> Result<()> {
    let start_time = Instant::now();
    let params = args.model_params();
    params.validate()?;

    let mut data = Vec::new();
    InputSource::open(&args.input)?
        .read_to_end(&mut data)
        .with_context(|| format!("Failed to read compressed input: {}", args.input.display()))?;
    info!("Decompressing {} ({} bytes) as {:?}", args.input.display(), data.len(), args.output_format);
    let reference = args.reference_dir.as_ref().map(ReferenceSource::new);

    let output = open_output(&args.output)?;
    let stats = decompress_records(&data, output, params, reference, args.output_format)?;

    info!("Decompression completed in {:.2}s", start_time.elapsed().as_secs_f64());
    info!("Records: {} ({} mapped), {} bases", stats.records, stats.mapped, stats.bases);
    Ok(())
}

/// Decode every record in `data` and write it to `out` in `format`.
pub fn decompress_records<W: Write>(
    data: &[u8],
    out: W,
    params: ModelParams,
    reference: Option<ReferenceSource>,
    format: OutputFormat,
) -> Result<RunStats> {
    if data.len() < CODER_FLUSH_BYTES {
        return Err(SqzError::CorruptStream(format!(
            "compressed stream is {} bytes, shorter than the coder flush",
            data.len()
        ))
        .into());
    }
    let mut state = CodecState::new(params, reference);
    let mut rc = RangeDecoder::new(data);
    let mut writer = RecordWriter::new(out, format);

    // A complete stream is consumed exactly, so any byte read past the end
    // means the record just decoded (or the end marker) was cut off.
    loop {
        let decoded = state
            .decode_record(&mut rc)
            .with_context(|| format!("Failed to decode record {}", state.stats.records + 1))?;
        if rc.overrun() > 0 {
            writer.finish().context("Failed to flush decompressed output")?;
            return Err(SqzError::CorruptStream(format!(
                "stream ended without end marker after {} records",
                state.stats.records.saturating_sub(u64::from(decoded.is_some()))
            ))
            .into());
        }
        let Some(rec) = decoded else {
            break;
        };
        writer.write_record(&rec)?;
    }
    writer.finish().context("Failed to flush decompressed output")?;

    Ok(RunStats::from_state(&state, rc.position() as u64))
}
