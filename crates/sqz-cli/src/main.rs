use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use sqz_lib::cli::{
    CompressConfig, DecompressConfig, InputFormat, OutputFormat, DEFAULT_CONSENSUS_SPAN_BITS,
    DEFAULT_MODEL_WINDOW_BITS,
};

#[derive(Parser)]
#[command(name = "sqz")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reference-aware SAM/BAM compression", long_about = None)]
struct Cli {
    /// Input SAM/BAM (or compressed stream with -d); `-` or omitted for stdin
    #[arg(value_name = "INPUT", default_value = "-")]
    input: PathBuf,

    /// Output file; `-` for stdout
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    output: PathBuf,

    /// Decompress instead of compress
    #[arg(short = 'd', long = "decompress")]
    decompress: bool,

    /// Directory of `<refname>.fb` 2-bit reference files
    #[arg(short = 'r', long = "reference", value_name = "DIR")]
    reference_dir: Option<PathBuf>,

    /// Output format when decompressing
    #[arg(short = 'f', long = "format", value_enum, default_value = "sam")]
    format: CliOutputFormat,

    /// Store every mapping quality as 255
    #[arg(short = 'M', long = "fixed-mapq")]
    fixed_mapq: bool,

    /// Input container format (detected when omitted)
    #[arg(long, value_enum)]
    input_format: Option<CliInputFormat>,

    /// log2 slots in the per-coordinate base models; must match on both sides
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_MODEL_WINDOW_BITS)]
    window_bits: u32,

    /// log2 coordinate span one consensus window may cover; must match on both sides
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_CONSENSUS_SPAN_BITS)]
    consensus_span_bits: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliOutputFormat {
    /// SAM records without header
    Sam,
    /// Same text as sam
    Bam,
    /// Four-line FASTQ
    Fastq,
    /// FASTQ with fields joined by tabs on one line
    Fq1,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliInputFormat {
    Sam,
    Bam,
}

enum Config {
    Compress(CompressConfig),
    Decompress(DecompressConfig),
}

impl Cli {
    fn into_config(self) -> Config {
        if self.decompress {
            let output_format = match self.format {
                CliOutputFormat::Sam => OutputFormat::Sam,
                CliOutputFormat::Bam => OutputFormat::Bam,
                CliOutputFormat::Fastq => OutputFormat::Fastq,
                CliOutputFormat::Fq1 => OutputFormat::Fq1,
            };
            return Config::Decompress(DecompressConfig {
                input: self.input,
                output: self.output,
                reference_dir: self.reference_dir,
                output_format,
                model_window_bits: self.window_bits,
                consensus_span_bits: self.consensus_span_bits,
            });
        }
        Config::Compress(CompressConfig {
            input: self.input,
            output: self.output,
            reference_dir: self.reference_dir,
            input_format: self.input_format.map(|f| match f {
                CliInputFormat::Sam => InputFormat::Sam,
                CliInputFormat::Bam => InputFormat::Bam,
            }),
            fixed_mapq: self.fixed_mapq,
            model_window_bits: self.window_bits,
            consensus_span_bits: self.consensus_span_bits,
            ..CompressConfig::default()
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.into_config() {
        Config::Compress(config) => {
            info!("Starting compression...");
            sqz_lib::compression::compress(&config)?;
        }
        Config::Decompress(config) => {
            info!("Starting decompression...");
            sqz_lib::compression::decompress(&config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_bits_reach_both_configs() {
        let cli = Cli::try_parse_from(["sqz", "-d", "--consensus-span-bits", "24", "in.sqz"]).unwrap();
        let Config::Decompress(config) = cli.into_config() else {
            panic!("expected decompress config");
        };
        assert_eq!(config.consensus_span_bits, 24);

        let cli = Cli::try_parse_from(["sqz", "--consensus-span-bits", "20", "in.sam"]).unwrap();
        let Config::Compress(config) = cli.into_config() else {
            panic!("expected compress config");
        };
        assert_eq!(config.consensus_span_bits, 20);
        assert_eq!(config.model_window_bits, DEFAULT_MODEL_WINDOW_BITS);
    }

    #[test]
    fn test_span_bits_default() {
        let cli = Cli::try_parse_from(["sqz", "in.sam"]).unwrap();
        let Config::Compress(config) = cli.into_config() else {
            panic!("expected compress config");
        };
        assert_eq!(config.consensus_span_bits, DEFAULT_CONSENSUS_SPAN_BITS);
    }
}
