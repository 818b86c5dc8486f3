//! Input and output of alignment records.

pub mod aux;
pub mod bam;
pub mod bgzf;
pub mod header;
pub mod output;
pub mod record;
pub mod reference;
pub mod sam;

use crate::cli::{is_stdio_path, InputFormat};
use crate::error::Result;
use anyhow::Context;
use bam::{BamReader, BAM_MAGIC};
use bgzf::{from_io, BlockInflater, Framing};
use header::Header;
use record::AlignmentRecord;
use sam::SamReader;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

const INPUT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Raw input: a file or stdin
pub enum InputSource {
    File(BufReader<std::fs::File>),
    Stdin(BufReader<std::io::Stdin>),
}

impl InputSource {
    /// Open `path`, or stdin when it is `-`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if is_stdio_path(path) {
            return Ok(InputSource::Stdin(BufReader::with_capacity(
                INPUT_BUFFER_SIZE,
                std::io::stdin(),
            )));
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open input file: {}", path.display()))?;
        Ok(InputSource::File(BufReader::with_capacity(INPUT_BUFFER_SIZE, file)))
    }
}

impl Read for InputSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            InputSource::File(r) => r.read(buf),
            InputSource::Stdin(r) => r.read(buf),
        }
    }
}

impl BufRead for InputSource {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            InputSource::File(r) => r.fill_buf(),
            InputSource::Stdin(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            InputSource::File(r) => r.consume(amt),
            InputSource::Stdin(r) => r.consume(amt),
        }
    }
}

/// SAM or BAM record stream over any (optionally gzip/BGZF framed) input.
pub enum AlignmentReader<R: BufRead> {
    Sam(SamReader<BlockInflater<R>>),
    Bam(BamReader<BlockInflater<R>>),
}

impl AlignmentReader<InputSource> {
    /// Open a SAM/BAM file, or stdin when the path is `-`.
    pub fn open(path: &Path, format: Option<InputFormat>) -> anyhow::Result<Self> {
        let source = InputSource::open(path)?;
        Self::from_reader(source, format)
            .with_context(|| format!("Failed to read alignment header from {}", path.display()))
    }
}

impl<R: BufRead> AlignmentReader<R> {
    /// Wrap `reader`, sniffing the container format unless `format` forces one.
    pub fn from_reader(reader: R, format: Option<InputFormat>) -> Result<Self> {
        let mut inflater = BlockInflater::new(reader)?;
        let framing = inflater.framing();
        let format = match format {
            Some(f) => f,
            None => {
                let peek = inflater.fill_buf().map_err(from_io)?;
                if peek.starts_with(BAM_MAGIC) {
                    InputFormat::Bam
                } else {
                    InputFormat::Sam
                }
            }
        };
        debug!("Input format: {:?} ({:?} framing)", format, framing);
        let reader = match format {
            InputFormat::Sam => AlignmentReader::Sam(SamReader::new(inflater)?),
            InputFormat::Bam => {
                if framing == Framing::Plain {
                    debug!("BAM input without gzip framing");
                }
                AlignmentReader::Bam(BamReader::new(inflater)?)
            }
        };
        let header = reader.header();
        debug!(
            "Header: {} references, {} read groups",
            header.references.len(),
            header.read_groups.len()
        );
        for (id, tags) in &header.read_groups {
            debug!("Read group {}: {:?}", id, tags);
        }
        Ok(reader)
    }

    pub fn format(&self) -> InputFormat {
        match self {
            AlignmentReader::Sam(_) => InputFormat::Sam,
            AlignmentReader::Bam(_) => InputFormat::Bam,
        }
    }

    /// Header as read so far; SAM input may register references on the fly.
    pub fn header(&self) -> &Header {
        match self {
            AlignmentReader::Sam(r) => r.header(),
            AlignmentReader::Bam(r) => r.header(),
        }
    }

    pub fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        match self {
            AlignmentReader::Sam(r) => r.next_record(),
            AlignmentReader::Bam(r) => r.next_record(),
        }
    }

    /// Name of reference `id` in the header table.
    pub fn reference_name(&self, id: usize) -> Option<&[u8]> {
        self.header().references.get(id).map(|r| r.name.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::tests::{bam_header, bam_record, TestRecord};
    use crate::io::bgzf::tests::bgzf_file;

    const SAM: &str = "@SQ\tSN:chr1\tLN:50\nr1\t0\tchr1\t3\t30\t2M\t*\t0\t0\tAC\tII\n";

    #[test]
    fn test_detects_sam() {
        let mut reader = AlignmentReader::from_reader(SAM.as_bytes(), None).unwrap();
        assert_eq!(reader.format(), InputFormat::Sam);
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(reader.reference_name(rec.ref_id.unwrap()), Some(&b"chr1"[..]));
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_detects_bgzf_bam() {
        let mut data = bam_header(&[("chr1", 50)], "@SQ\tSN:chr1\tLN:50\n");
        data.extend(bam_record(&TestRecord {
            name: "r1",
            flag: 0,
            ref_id: 0,
            pos0: 2,
            mapq: 30,
            cigar: &[(2, 0)],
            seq: "AC",
            qual: &[40, 40],
            aux: &[],
        }));
        let file = bgzf_file(&[&data]);
        let mut reader = AlignmentReader::from_reader(&file[..], None).unwrap();
        assert_eq!(reader.format(), InputFormat::Bam);
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.pos, 3);
        assert_eq!(rec.seq, b"AC");
    }

    #[test]
    fn test_forced_format() {
        assert!(AlignmentReader::from_reader(SAM.as_bytes(), Some(InputFormat::Bam)).is_err());
    }
}
