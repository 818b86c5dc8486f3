use std::path::{Path, PathBuf};

/// Default log2 of the number of slots in each position-indexed base model bank.
pub const DEFAULT_MODEL_WINDOW_BITS: u32 = 17;
/// Smallest accepted model window (log2).
pub const MIN_MODEL_WINDOW_BITS: u32 = 10;
/// Largest accepted model window (log2).
pub const MAX_MODEL_WINDOW_BITS: u32 = 24;
/// Default log2 of the reference span tracked by the consensus bitmap.
pub const DEFAULT_CONSENSUS_SPAN_BITS: u32 = 31;

/// Container format of the records being compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputFormat {
    /// Tab-delimited SAM text (optionally gzip/BGZF compressed)
    Sam,
    /// BGZF-compressed BAM binary
    Bam,
}

/// Textual layout written by the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// SAM records without header
    Sam,
    /// Accepted for compatibility; emits the same text as `Sam`
    Bam,
    /// Four-line FASTQ
    Fastq,
    /// FASTQ with the four lines joined by tabs
    Fq1,
}

#[derive(Clone)]
pub struct CompressConfig {
    /// Input SAM/BAM file (`-` for stdin)
    pub input: PathBuf,
    /// Output compressed stream (`-` for stdout)
    pub output: PathBuf,
    /// Directory of `<refname>.fb` 2-bit reference files
    pub reference_dir: Option<PathBuf>,
    /// Force the input format instead of sniffing it
    pub input_format: Option<InputFormat>,
    /// Replace every mapping quality with 255 before modelling
    pub fixed_mapq: bool,
    /// log2 slots in the per-coordinate base model banks
    pub model_window_bits: u32,
    /// log2 reference coordinates covered by the consensus bitmap
    pub consensus_span_bits: u32,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("-"),
            output: PathBuf::from("-"),
            reference_dir: None,
            input_format: None,
            fixed_mapq: false,
            model_window_bits: DEFAULT_MODEL_WINDOW_BITS,
            consensus_span_bits: DEFAULT_CONSENSUS_SPAN_BITS,
        }
    }
}

#[derive(Clone)]
pub struct DecompressConfig {
    /// Input compressed stream (`-` for stdin)
    pub input: PathBuf,
    /// Output file (`-` for stdout)
    pub output: PathBuf,
    /// Directory of `<refname>.fb` files; must match the one used to compress
    pub reference_dir: Option<PathBuf>,
    /// Output record layout
    pub output_format: OutputFormat,
    /// Must match the value used to compress
    pub model_window_bits: u32,
    /// Must match the value used to compress
    pub consensus_span_bits: u32,
}

impl Default for DecompressConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("-"),
            output: PathBuf::from("-"),
            reference_dir: None,
            output_format: OutputFormat::Sam,
            model_window_bits: DEFAULT_MODEL_WINDOW_BITS,
            consensus_span_bits: DEFAULT_CONSENSUS_SPAN_BITS,
        }
    }
}

/// Model geometry shared by encoder and decoder. Both sides must agree on
/// every field, since the stream carries no header describing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelParams {
    pub model_window_bits: u32,
    pub consensus_span_bits: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model_window_bits: DEFAULT_MODEL_WINDOW_BITS,
            consensus_span_bits: DEFAULT_CONSENSUS_SPAN_BITS,
        }
    }
}

impl ModelParams {
    /// Check the window and span are within supported bounds.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(MIN_MODEL_WINDOW_BITS..=MAX_MODEL_WINDOW_BITS).contains(&self.model_window_bits) {
            anyhow::bail!(
                "model window bits must be between {} and {}, got {}",
                MIN_MODEL_WINDOW_BITS,
                MAX_MODEL_WINDOW_BITS,
                self.model_window_bits
            );
        }
        if !(self.model_window_bits..=32).contains(&self.consensus_span_bits) {
            anyhow::bail!(
                "consensus span bits must be between {} and 32, got {}",
                self.model_window_bits,
                self.consensus_span_bits
            );
        }
        Ok(())
    }
}

impl CompressConfig {
    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model_window_bits: self.model_window_bits,
            consensus_span_bits: self.consensus_span_bits,
        }
    }
}

impl DecompressConfig {
    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model_window_bits: self.model_window_bits,
            consensus_span_bits: self.consensus_span_bits,
        }
    }
}

/// True when `path` names the standard stream (`-` or empty).
pub fn is_stdio_path(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.as_os_str() == "-"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(ModelParams::default().validate().is_ok());
        assert_eq!(CompressConfig::default().model_params(), DecompressConfig::default().model_params());
    }

    #[test]
    fn test_window_bounds_rejected() {
        let small = ModelParams { model_window_bits: 4, ..ModelParams::default() };
        assert!(small.validate().is_err());
        let span = ModelParams { model_window_bits: 20, consensus_span_bits: 16 };
        assert!(span.validate().is_err());
    }

    #[test]
    fn test_stdio_path() {
        assert!(is_stdio_path(Path::new("-")));
        assert!(is_stdio_path(Path::new("")));
        assert!(!is_stdio_path(Path::new("reads.bam")));
    }
}
