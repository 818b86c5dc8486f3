//! BAM binary reader.
//!
//! ```text
//! Header:  magic "BAM\1", l_text i32, text, n_ref i32,
//!          n_ref x { l_name i32, name (NUL-terminated), l_ref i32 }
//! Record:  block_size i32, then block_size bytes:
//!          refID i32, pos i32 (0-based), bin_mq_nl u32, flag_nc u32,
//!          l_seq i32, next_refID i32, next_pos i32, tlen i32,
//!          read_name, cigar u32 x n_cigar, seq (4-bit packed),
//!          qual u8 x l_seq, aux
//! ```
//!
//! All integers are little-endian and read through [`ByteCursor`], so host
//! byte order never matters.

use super::aux;
use super::bgzf::{from_io, read_full};
use super::header::Header;
use super::record::{AlignmentRecord, CigarKind, CigarOp};
use crate::error::{Result, SqzError};
use std::io::Read;

pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Fixed-width portion of a record after block_size
const FIXED_RECORD_FIELDS: usize = 32;

/// 4-bit sequence code to base
const SEQ_NIBBLES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Little-endian reader over a byte slice with bounds checking.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len()).ok_or_else(|| {
            SqzError::InvalidBam(format!(
                "need {n} bytes for {what} at offset {}, {} left",
                self.pos,
                self.remaining()
            ))
        })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_array::<1>(what)?[0])
    }

    pub fn read_u16_le(&mut self, what: &str) -> Result<u16> {
        self.read_array(what).map(u16::from_le_bytes)
    }

    pub fn read_u32_le(&mut self, what: &str) -> Result<u32> {
        self.read_array(what).map(u32::from_le_bytes)
    }

    pub fn read_i32_le(&mut self, what: &str) -> Result<i32> {
        self.read_array(what).map(i32::from_le_bytes)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    if read_full(reader, buf).map_err(from_io)? != buf.len() {
        return Err(SqzError::Truncated { what });
    }
    Ok(())
}

fn read_i32<R: Read>(reader: &mut R, what: &'static str) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(i32::from_le_bytes(buf))
}

fn non_negative(v: i32, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| SqzError::InvalidBam(format!("negative {what}: {v}")))
}

/// Streaming BAM record reader over inflated bytes.
pub struct BamReader<R: Read> {
    reader: R,
    header: Header,
    block: Vec<u8>,
    records_read: u64,
}

impl<R: Read> BamReader<R> {
    /// Read and parse the BAM header.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic, "BAM magic")?;
        if &magic != BAM_MAGIC {
            return Err(SqzError::InvalidBam(format!("bad magic {magic:02x?}")));
        }

        let l_text = non_negative(read_i32(&mut reader, "header text length")?, "header text length")?;
        let mut text = vec![0u8; l_text];
        read_exact(&mut reader, &mut text, "header text")?;
        // Header text is frequently NUL padded
        while text.last() == Some(&0) {
            text.pop();
        }

        let mut header = Header {
            text: String::from_utf8_lossy(&text).into_owned(),
            ..Header::default()
        };
        let header_text = header.text.clone();
        header.parse_text(&header_text, false)?;

        let n_ref = non_negative(read_i32(&mut reader, "reference count")?, "reference count")?;
        for _ in 0..n_ref {
            let l_name = non_negative(read_i32(&mut reader, "reference name length")?, "reference name length")?;
            let mut name = vec![0u8; l_name];
            read_exact(&mut reader, &mut name, "reference name")?;
            if name.last() == Some(&0) {
                name.pop();
            }
            let l_ref = non_negative(read_i32(&mut reader, "reference length")?, "reference length")?;
            header.references.push(&name, l_ref as u32);
        }

        Ok(Self {
            reader,
            header,
            block: Vec::new(),
            records_read: 0,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read the next record, `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        let mut size = [0u8; 4];
        match read_full(&mut self.reader, &mut size).map_err(from_io)? {
            0 => return Ok(None),
            4 => {}
            _ => return Err(SqzError::Truncated { what: "BAM record size" }),
        }
        let block_size = non_negative(i32::from_le_bytes(size), "record block size")?;
        if block_size < FIXED_RECORD_FIELDS {
            return Err(SqzError::InvalidBam(format!(
                "record {} block size {block_size} shorter than fixed fields",
                self.records_read
            )));
        }
        self.block.resize(block_size, 0);
        read_exact(&mut self.reader, &mut self.block, "BAM record")?;

        let record = parse_record(&self.block, &self.header)?;
        self.records_read += 1;
        Ok(Some(record))
    }
}

fn ref_index(id: i32, header: &Header) -> Result<Option<usize>> {
    if id < 0 {
        return Ok(None);
    }
    let id = id as usize;
    if id >= header.references.len() {
        return Err(SqzError::InvalidBam(format!(
            "reference id {id} beyond the {} header references",
            header.references.len()
        )));
    }
    Ok(Some(id))
}

/// Parse one record block (everything after block_size).
pub fn parse_record(block: &[u8], header: &Header) -> Result<AlignmentRecord> {
    let mut cur = ByteCursor::new(block);
    let ref_id = cur.read_i32_le("refID")?;
    let pos = cur.read_i32_le("pos")?;
    let bin_mq_nl = cur.read_u32_le("bin_mq_nl")?;
    let flag_nc = cur.read_u32_le("flag_nc")?;
    let l_seq = non_negative(cur.read_i32_le("l_seq")?, "sequence length")?;
    let next_ref_id = cur.read_i32_le("next_refID")?;
    let next_pos = cur.read_i32_le("next_pos")?;
    let template_len = cur.read_i32_le("tlen")?;

    let l_read_name = (bin_mq_nl & 0xff) as usize;
    let mapq = ((bin_mq_nl >> 8) & 0xff) as u8;
    let flag = (flag_nc >> 16) as u16;
    let n_cigar = (flag_nc & 0xffff) as usize;

    let raw_name = cur.read_bytes(l_read_name, "read name")?;
    let name = match raw_name.split_last() {
        Some((0, name)) => name.to_vec(),
        _ => return Err(SqzError::InvalidBam("read name not NUL-terminated".to_string())),
    };

    let mut cigar = Vec::with_capacity(n_cigar);
    for _ in 0..n_cigar {
        let v = cur.read_u32_le("CIGAR")?;
        let kind = CigarKind::from_code((v & 0xf) as u8).ok_or_else(|| {
            SqzError::record(&name, format!("unknown CIGAR operation code {}", v & 0xf))
        })?;
        cigar.push(CigarOp::new(kind, v >> 4));
    }

    let packed = cur.read_bytes(l_seq.div_ceil(2), "sequence")?;
    let seq: Vec<u8> = (0..l_seq)
        .map(|i| {
            let byte = packed[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0xf };
            SEQ_NIBBLES[nibble as usize]
        })
        .collect();

    let raw_qual = cur.read_bytes(l_seq, "quality")?;
    let qual = if raw_qual.first() == Some(&0xff) {
        vec![0u8; l_seq]
    } else {
        raw_qual.to_vec()
    };

    let aux = cur.rest().to_vec();
    aux::validate_binary(&aux)?;

    Ok(AlignmentRecord {
        name,
        flag,
        ref_id: ref_index(ref_id, header)?,
        pos: if pos < 0 { 0 } else { pos as u32 + 1 },
        mapq,
        cigar,
        seq,
        qual,
        mate_ref_id: ref_index(next_ref_id, header)?,
        mate_pos: if next_pos < 0 { 0 } else { next_pos as u32 + 1 },
        template_len,
        aux,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal BAM writer used to build test inputs.
    pub(crate) fn bam_header(refs: &[(&str, u32)], text: &str) -> Vec<u8> {
        let mut out = BAM_MAGIC.to_vec();
        out.extend_from_slice(&(text.len() as i32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
        out.extend_from_slice(&(refs.len() as i32).to_le_bytes());
        for (name, len) in refs {
            out.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&(*len as i32).to_le_bytes());
        }
        out
    }

    pub(crate) struct TestRecord<'a> {
        pub name: &'a str,
        pub flag: u16,
        pub ref_id: i32,
        pub pos0: i32,
        pub mapq: u8,
        pub cigar: &'a [(u32, u8)],
        pub seq: &'a str,
        pub qual: &'a [u8],
        pub aux: &'a [u8],
    }

    pub(crate) fn bam_record(r: &TestRecord) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&r.ref_id.to_le_bytes());
        body.extend_from_slice(&r.pos0.to_le_bytes());
        let bin_mq_nl = ((r.mapq as u32) << 8) | (r.name.len() as u32 + 1);
        body.extend_from_slice(&bin_mq_nl.to_le_bytes());
        let flag_nc = ((r.flag as u32) << 16) | r.cigar.len() as u32;
        body.extend_from_slice(&flag_nc.to_le_bytes());
        body.extend_from_slice(&(r.seq.len() as i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(r.name.as_bytes());
        body.push(0);
        for &(len, op) in r.cigar {
            body.extend_from_slice(&((len << 4) | op as u32).to_le_bytes());
        }
        let codes: Vec<u8> = r
            .seq
            .bytes()
            .map(|b| SEQ_NIBBLES.iter().position(|&n| n == b).unwrap_or(15) as u8)
            .collect();
        for pair in codes.chunks(2) {
            body.push((pair[0] << 4) | pair.get(1).copied().unwrap_or(0));
        }
        body.extend_from_slice(r.qual);
        body.extend_from_slice(r.aux);
        let mut out = (body.len() as i32).to_le_bytes().to_vec();
        out.extend(body);
        out
    }

    fn sample_record() -> Vec<u8> {
        bam_record(&TestRecord {
            name: "read1",
            flag: 16,
            ref_id: 0,
            pos0: 99,
            mapq: 60,
            cigar: &[(2, 4), (3, 0)],
            seq: "ACGTN",
            qual: &[30, 31, 32, 33, 2],
            aux: b"NMC\x01",
        })
    }

    #[test]
    fn test_cursor_bounds() {
        let mut cur = ByteCursor::new(&[1, 0, 0, 0, 2]);
        assert_eq!(cur.read_u32_le("x").unwrap(), 1);
        assert_eq!(cur.remaining(), 1);
        assert!(cur.read_u16_le("y").is_err());
        assert_eq!(cur.read_u8("z").unwrap(), 2);
    }

    #[test]
    fn test_read_header_and_record() {
        let mut data = bam_header(&[("chr1", 1000), ("chr2", 50)], "@RG\tID:g1\tSM:s\n");
        data.extend(sample_record());
        let mut reader = BamReader::new(&data[..]).unwrap();
        assert_eq!(reader.header().references.len(), 2);
        assert!(reader.header().read_group("g1").is_some());

        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.name, b"read1");
        assert_eq!(rec.flag, 16);
        assert_eq!(rec.ref_id, Some(0));
        assert_eq!(rec.pos, 100);
        assert_eq!(rec.mapq, 60);
        assert_eq!(rec.cigar, vec![CigarOp::new(CigarKind::SoftClip, 2), CigarOp::new(CigarKind::Match, 3)]);
        assert_eq!(rec.seq, b"ACGTN");
        assert_eq!(rec.qual, vec![30, 31, 32, 33, 2]);
        assert_eq!(rec.aux, b"NMC\x01");
        assert_eq!(rec.mate_ref_id, None);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_missing_quality_becomes_zero() {
        let mut data = bam_header(&[("chr1", 10)], "");
        data.extend(bam_record(&TestRecord {
            name: "r",
            flag: 4,
            ref_id: -1,
            pos0: -1,
            mapq: 0,
            cigar: &[],
            seq: "AC",
            qual: &[0xff, 0xff],
            aux: b"",
        }));
        let mut reader = BamReader::new(&data[..]).unwrap();
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.qual, vec![0, 0]);
        assert_eq!(rec.pos, 0);
        assert_eq!(rec.ref_id, None);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(BamReader::new(&b"BAM\x02\0\0\0\0"[..]), Err(SqzError::InvalidBam(_))));
    }

    #[test]
    fn test_truncated_record() {
        let mut data = bam_header(&[("chr1", 1000)], "");
        let rec = sample_record();
        data.extend_from_slice(&rec[..rec.len() - 3]);
        let mut reader = BamReader::new(&data[..]).unwrap();
        assert!(matches!(reader.next_record(), Err(SqzError::Truncated { .. })));
    }

    #[test]
    fn test_ref_id_out_of_range() {
        let mut data = bam_header(&[], "");
        data.extend(sample_record());
        let mut reader = BamReader::new(&data[..]).unwrap();
        assert!(matches!(reader.next_record(), Err(SqzError::InvalidBam(_))));
    }
}
