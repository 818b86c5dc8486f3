//! Transparent inflation of BGZF, generic gzip or uncompressed input.
//!
//! ```text
//! BGZF block:
//!   header   magic 1f 8b, CM=8, FLG=FEXTRA, MTIME, XFL, OS, XLEN
//!   extra    subfield "BC", SLEN=2, BSIZE (= total block size - 1)
//!   cdata    raw deflate, at most 64 KiB once inflated
//!   footer   CRC32, ISIZE
//! ```
//!
//! BGZF members are inflated one block at a time and checked against their
//! CRC32/ISIZE footer. Any other gzip stream goes through an incremental
//! multi-member decoder. Input without the gzip magic is passed through.

use crate::error::{Result, SqzError};
use flate2::bufread::MultiGzDecoder;
use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::io::{self, BufRead, BufReader, Read};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Fixed gzip header bytes before the extra field
const GZIP_FIXED_HEADER: usize = 12;
/// Size of a BGZF block header with only the BC subfield
pub const BGZF_HEADER_SIZE: usize = 18;
/// CRC32 + ISIZE
pub const BGZF_FOOTER_SIZE: usize = 8;
/// Upper bound on the inflated size of one block
pub const BGZF_MAX_BLOCK_SIZE: usize = 64 * 1024;

const FLG_FEXTRA: u8 = 0x04;
const CM_DEFLATE: u8 = 8;

/// Read until `buf` is full or the input ends; returns the bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    if read_full(reader, buf)? != buf.len() {
        return Err(SqzError::Truncated { what });
    }
    Ok(())
}

/// Does `peek` start with a gzip header carrying a leading BGZF `BC` subfield?
fn looks_like_bgzf(peek: &[u8]) -> bool {
    peek.len() >= BGZF_HEADER_SIZE
        && peek[..2] == GZIP_MAGIC
        && peek[2] == CM_DEFLATE
        && peek[3] & FLG_FEXTRA != 0
        && u16::from_le_bytes([peek[10], peek[11]]) >= 6
        && &peek[12..14] == b"BC"
        && peek[14..16] == [2, 0]
}

/// Block-at-a-time BGZF reader.
struct BgzfBlocks<R> {
    reader: R,
    inflater: Decompress,
    compressed: Vec<u8>,
    block: Vec<u8>,
    pos: usize,
    blocks_read: u64,
}

impl<R: BufRead> BgzfBlocks<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            inflater: Decompress::new(false),
            compressed: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            block: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            pos: 0,
            blocks_read: 0,
        }
    }

    /// Load the next block into `self.block`. Returns false at clean EOF.
    fn read_block(&mut self) -> Result<bool> {
        let mut header = [0u8; GZIP_FIXED_HEADER];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(false),
            GZIP_FIXED_HEADER => {}
            _ => return Err(SqzError::Truncated { what: "BGZF block header" }),
        }
        if header[..2] != GZIP_MAGIC {
            return Err(SqzError::InvalidGzip(format!(
                "expected gzip magic 1f 8b at block {}, got {:02x} {:02x}",
                self.blocks_read, header[0], header[1]
            )));
        }
        if header[2] != CM_DEFLATE {
            return Err(SqzError::InvalidGzip(format!("unsupported compression method {}", header[2])));
        }
        if header[3] != FLG_FEXTRA {
            return Err(SqzError::InvalidGzip(format!(
                "block {} has flags {:#04x}, expected FEXTRA only",
                self.blocks_read, header[3]
            )));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        read_exact_or_truncated(&mut self.reader, &mut extra, "BGZF extra field")?;
        let bsize = find_bsize(&extra).ok_or_else(|| {
            SqzError::InvalidGzip(format!("block {} has no BC subfield", self.blocks_read))
        })?;

        let block_size = bsize as usize + 1;
        let cdata_len = block_size
            .checked_sub(GZIP_FIXED_HEADER + xlen + BGZF_FOOTER_SIZE)
            .ok_or_else(|| SqzError::InvalidGzip(format!("block size {block_size} too small")))?;

        self.compressed.resize(cdata_len, 0);
        read_exact_or_truncated(&mut self.reader, &mut self.compressed, "BGZF compressed data")?;
        let mut footer = [0u8; BGZF_FOOTER_SIZE];
        read_exact_or_truncated(&mut self.reader, &mut footer, "BGZF block footer")?;
        let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let expected_size = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

        self.block.clear();
        self.block.reserve(BGZF_MAX_BLOCK_SIZE);
        self.pos = 0;
        self.inflater.reset(false);
        let status = self
            .inflater
            .decompress_vec(&self.compressed, &mut self.block, FlushDecompress::Finish)
            .map_err(|e| SqzError::InvalidGzip(format!("block {}: {e}", self.blocks_read)))?;
        if status != Status::StreamEnd {
            return Err(SqzError::InvalidGzip(format!(
                "deflate stream of block {} did not end",
                self.blocks_read
            )));
        }

        if self.block.len() != expected_size {
            return Err(SqzError::InvalidGzip(format!(
                "block {} inflated to {} bytes, footer says {}",
                self.blocks_read,
                self.block.len(),
                expected_size
            )));
        }
        let mut crc = Crc::new();
        crc.update(&self.block);
        if crc.sum() != expected_crc {
            return Err(SqzError::InvalidGzip(format!("CRC32 mismatch in block {}", self.blocks_read)));
        }

        self.blocks_read += 1;
        Ok(true)
    }

    fn fill(&mut self) -> Result<&[u8]> {
        // Empty blocks (including the EOF marker) are skipped
        while self.pos >= self.block.len() {
            if !self.read_block()? {
                break;
            }
        }
        Ok(&self.block[self.pos.min(self.block.len())..])
    }
}

/// Locate the `BC` subfield in a gzip extra field and return BSIZE.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut at = 0;
    while at + 4 <= extra.len() {
        let slen = u16::from_le_bytes([extra[at + 2], extra[at + 3]]) as usize;
        if &extra[at..at + 2] == b"BC" && slen == 2 {
            let v = extra.get(at + 4..at + 6)?;
            return Some(u16::from_le_bytes([v[0], v[1]]));
        }
        at += 4 + slen;
    }
    None
}

enum Mode<R: BufRead> {
    Plain(R),
    Bgzf(BgzfBlocks<R>),
    Gzip(BufReader<MultiGzDecoder<R>>),
}

/// Byte stream over raw, BGZF or gzip input, detected from the first bytes.
pub struct BlockInflater<R: BufRead> {
    mode: Mode<R>,
}

/// Kind of framing detected on the input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Plain,
    Bgzf,
    Gzip,
}

impl<R: BufRead> BlockInflater<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let (is_bgzf, is_gzip) = {
            let peek = reader.fill_buf()?;
            (looks_like_bgzf(peek), peek.len() >= 2 && peek[..2] == GZIP_MAGIC)
        };
        let mode = if is_bgzf {
            Mode::Bgzf(BgzfBlocks::new(reader))
        } else if is_gzip {
            Mode::Gzip(BufReader::with_capacity(BGZF_MAX_BLOCK_SIZE, MultiGzDecoder::new(reader)))
        } else {
            Mode::Plain(reader)
        };
        Ok(Self { mode })
    }

    pub fn framing(&self) -> Framing {
        match self.mode {
            Mode::Plain(_) => Framing::Plain,
            Mode::Bgzf(_) => Framing::Bgzf,
            Mode::Gzip(_) => Framing::Gzip,
        }
    }

    /// Number of BGZF blocks inflated so far (0 for other framings).
    pub fn blocks_read(&self) -> u64 {
        match &self.mode {
            Mode::Bgzf(b) => b.blocks_read,
            _ => 0,
        }
    }
}

fn to_io(e: SqzError) -> io::Error {
    match e {
        SqzError::Io(e) => e,
        SqzError::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl<R: BufRead> Read for BlockInflater<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for BlockInflater<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.mode {
            Mode::Plain(r) => r.fill_buf(),
            Mode::Bgzf(b) => b.fill().map_err(to_io),
            Mode::Gzip(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match &mut self.mode {
            Mode::Plain(r) => r.consume(amt),
            Mode::Bgzf(b) => b.pos += amt,
            Mode::Gzip(r) => r.consume(amt),
        }
    }
}

/// Recover a typed error that crossed an `io::Read` boundary.
pub(crate) fn from_io(e: io::Error) -> SqzError {
    match e.get_ref().map(|inner| inner.is::<SqzError>()) {
        Some(true) => match e.into_inner().map(|inner| inner.downcast::<SqzError>()) {
            Some(Ok(err)) => *err,
            _ => SqzError::InvalidGzip("unrecognised inflater error".to_string()),
        },
        _ => SqzError::Io(e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use flate2::Compression;
    use std::io::Write;

    /// Build one BGZF block holding `data`.
    pub(crate) fn bgzf_block(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        let cdata = enc.finish().unwrap();
        let bsize = (BGZF_HEADER_SIZE + cdata.len() + BGZF_FOOTER_SIZE - 1) as u16;
        let mut block = vec![0x1f, 0x8b, 8, 4, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0];
        block.extend_from_slice(&bsize.to_le_bytes());
        block.extend_from_slice(&cdata);
        let mut crc = Crc::new();
        crc.update(data);
        block.extend_from_slice(&crc.sum().to_le_bytes());
        block.extend_from_slice(&(data.len() as u32).to_le_bytes());
        block
    }

    /// BGZF file: one block per chunk, followed by the EOF marker.
    pub(crate) fn bgzf_file(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(bgzf_block(chunk));
        }
        out.extend(bgzf_block(b""));
        out
    }

    fn inflate_all(input: &[u8]) -> Result<Vec<u8>> {
        let mut inflater = BlockInflater::new(input)?;
        let mut out = Vec::new();
        inflater.read_to_end(&mut out).map_err(from_io)?;
        Ok(out)
    }

    #[test]
    fn test_plain_passthrough() {
        let inflater = BlockInflater::new(&b"@HD\tVN:1.6\n"[..]).unwrap();
        assert_eq!(inflater.framing(), Framing::Plain);
        assert_eq!(inflate_all(b"@HD\tVN:1.6\n").unwrap(), b"@HD\tVN:1.6\n");
    }

    #[test]
    fn test_empty_input() {
        assert!(inflate_all(b"").unwrap().is_empty());
    }

    #[test]
    fn test_bgzf_multi_block() {
        let file = bgzf_file(&[b"hello ", b"", b"bgzf world"]);
        let inflater = BlockInflater::new(&file[..]).unwrap();
        assert_eq!(inflater.framing(), Framing::Bgzf);
        assert_eq!(inflate_all(&file).unwrap(), b"hello bgzf world");
    }

    #[test]
    fn test_generic_gzip_concatenated() {
        let mut file = Vec::new();
        for part in [&b"first member\n"[..], b"second member\n"] {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(part).unwrap();
            file.extend(enc.finish().unwrap());
        }
        let inflater = BlockInflater::new(&file[..]).unwrap();
        assert_eq!(inflater.framing(), Framing::Gzip);
        assert_eq!(inflate_all(&file).unwrap(), b"first member\nsecond member\n");
    }

    #[test]
    fn test_truncated_block_is_error() {
        let file = bgzf_file(&[b"some payload that will be cut"]);
        let err = inflate_all(&file[..30]).unwrap_err();
        assert!(matches!(err, SqzError::Truncated { .. }), "{err}");
    }

    #[test]
    fn test_crc_mismatch_is_error() {
        let mut file = bgzf_block(b"checksummed");
        let crc_at = file.len() - 8;
        file[crc_at] ^= 0xff;
        let err = inflate_all(&file).unwrap_err();
        assert!(matches!(err, SqzError::InvalidGzip(_)), "{err}");
    }

    #[test]
    fn test_find_bsize_skips_other_subfields() {
        let extra = [b'X', b'Y', 1, 0, 7, b'B', b'C', 2, 0, 0x34, 0x12];
        assert_eq!(find_bsize(&extra), Some(0x1234));
        assert_eq!(find_bsize(&[b'X', b'Y', 0, 0]), None);
    }
}
