//! Text output of decoded records.

use super::record::{format_cigar, reverse_complement, DecodedRecord};
use crate::cli::OutputFormat;
use crate::error::Result;
use std::io::Write;

/// Writes decoded records as SAM, FASTQ or one-line FASTQ.
pub struct RecordWriter<W: Write> {
    out: W,
    format: OutputFormat,
    line: Vec<u8>,
    scratch: Vec<u8>,
    records_written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            line: Vec::with_capacity(1024),
            scratch: Vec::with_capacity(512),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn write_record(&mut self, rec: &DecodedRecord) -> Result<()> {
        self.line.clear();
        match self.format {
            OutputFormat::Sam | OutputFormat::Bam => self.format_sam(rec),
            OutputFormat::Fastq => self.format_fastq(rec, b'\n'),
            OutputFormat::Fq1 => self.format_fastq(rec, b'\t'),
        }
        self.out.write_all(&self.line)?;
        self.records_written += 1;
        Ok(())
    }

    fn format_sam(&mut self, rec: &DecodedRecord) {
        let line = &mut self.line;
        line.extend_from_slice(&rec.name);
        line.push(b'\t');
        line.extend_from_slice(rec.flag.to_string().as_bytes());
        line.push(b'\t');
        match &rec.rname {
            Some(rname) => line.extend_from_slice(rname),
            None => line.push(b'*'),
        }
        line.push(b'\t');
        line.extend_from_slice(rec.pos.to_string().as_bytes());
        line.push(b'\t');
        line.extend_from_slice(rec.mapq.to_string().as_bytes());
        line.push(b'\t');
        format_cigar(&rec.cigar, line);
        line.extend_from_slice(b"\t*\t0\t0\t");
        line.extend_from_slice(&rec.seq);
        line.push(b'\t');
        line.extend(rec.qual.iter().map(|&q| q + 33));
        line.push(b'\n');
    }

    /// FASTQ in original read orientation; `sep` joins the four lines.
    fn format_fastq(&mut self, rec: &DecodedRecord, sep: u8) {
        let reverse = rec.is_reverse();
        let line = &mut self.line;
        line.push(b'@');
        line.extend_from_slice(&rec.name);
        line.push(sep);

        self.scratch.clear();
        self.scratch.extend_from_slice(&rec.seq);
        if reverse {
            reverse_complement(&mut self.scratch);
        }
        line.extend_from_slice(&self.scratch);
        line.push(sep);
        line.push(b'+');
        line.push(sep);

        let start = line.len();
        line.extend(rec.qual.iter().map(|&q| q + 33));
        if reverse {
            line[start..].reverse();
        }
        line.push(b'\n');
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
