//! Compression orchestrator: one sequential pass from alignment reader to
//! range-coded output.

use super::codecs::CodecState;
use super::range_coder::RangeEncoder;
use super::*;
use crate::cli::{CompressConfig, ModelParams};
use crate::error::SqzError;
use crate::io::reference::ReferenceSource;
use crate::io::AlignmentReader;
use std::io::BufRead;
use std::time::Instant;
use tracing::debug;

/// Encoder output is handed to the sink once this much is pending
const FLUSH_THRESHOLD: usize = 1 << 20;
/// Mapping quality stored under `fixed_mapq`
pub const FIXED_MAPQ: u8 = 255;

pub(super) fn compress(args: &CompressConfig) -> Result<()> {
    let start_time = Instant::now();
    let params = args.model_params();
    params.validate()?;

    let mut reader = AlignmentReader::open(&args.input, args.input_format)?;
    info!("Compressing {} ({:?} input)", args.input.display(), reader.format());
    if let Some(dir) = &args.reference_dir {
        info!("Reference directory: {}", dir.display());
    }
    if args.fixed_mapq {
        info!("Mapping qualities fixed to {}", FIXED_MAPQ);
    }
    let reference = args.reference_dir.as_ref().map(ReferenceSource::new);

    let mut output = open_output(&args.output)?;
    let stats = compress_records(&mut reader, &mut output, params, reference, args.fixed_mapq)?;
    output.flush().context("Failed to flush compressed output")?;

    log_compression_stats(&stats, input_size(&args.input), start_time.elapsed());
    Ok(())
}

/// Encode every record from `reader` into `out`, ending with the stream
/// terminator.
pub fn compress_records<R: BufRead, W: Write>(
    reader: &mut AlignmentReader<R>,
    out: &mut W,
    params: ModelParams,
    reference: Option<ReferenceSource>,
    fixed_mapq: bool,
) -> Result<RunStats> {
    let mut state = CodecState::new(params, reference);
    let mut rc = RangeEncoder::new();
    let mut written = 0u64;

    while let Some(mut rec) = reader.next_record()? {
        if fixed_mapq {
            rec.mapq = FIXED_MAPQ;
        }
        let rname = match rec.ref_id {
            Some(id) if !rec.is_unmapped() => Some(reader.reference_name(id).ok_or_else(|| {
                SqzError::record(&rec.name, format!("reference id {id} not in header"))
            })?),
            _ => None,
        };
        state
            .encode_record(&mut rc, &rec, rname)
            .with_context(|| format!("Failed to encode record {}", state.stats.records + 1))?;

        if rc.pending() >= FLUSH_THRESHOLD {
            let chunk = rc.take_output();
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
    }

    state.encode_end(&mut rc);
    let tail = rc.finish();
    out.write_all(&tail)?;
    written += tail.len() as u64;
    debug!(
        "Encoder: {} bytes, {} boundary adjustments, {} quality contexts",
        rc.bytes_emitted(),
        rc.boundary_adjustments(),
        state.quality_contexts()
    );

    Ok(RunStats::from_state(&state, written))
}
