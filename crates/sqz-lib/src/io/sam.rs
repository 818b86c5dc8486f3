//! SAM text reader.

use super::aux;
use super::bgzf::from_io;
use super::header::Header;
use super::record::{AlignmentRecord, CigarKind, CigarOp};
use crate::error::{Result, SqzError};
use std::io::BufRead;
use std::str::FromStr;

/// Mandatory columns of a SAM record line
const MANDATORY_FIELDS: usize = 11;

pub struct SamReader<R: BufRead> {
    reader: R,
    header: Header,
    line: Vec<u8>,
    line_no: u64,
}

/// Trim trailing \n and \r\n in place.
#[inline]
fn trim_newline(buf: &mut Vec<u8>) {
    while buf.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
        buf.pop();
    }
}

fn parse_num<T: FromStr>(field: &[u8], what: &str, line: u64) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            SqzError::sam(line, format!("invalid {what} '{}'", String::from_utf8_lossy(field)))
        })
}

/// Parse SAM CIGAR text. `*` yields an empty list.
pub fn parse_cigar(text: &[u8], line: u64) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::new();
    if text == b"*" {
        return Ok(ops);
    }
    let mut len: u64 = 0;
    let mut have_digits = false;
    for &c in text {
        if c.is_ascii_digit() {
            len = len * 10 + (c - b'0') as u64;
            if len >= 1 << 28 {
                return Err(SqzError::sam(line, "CIGAR operation length too large"));
            }
            have_digits = true;
            continue;
        }
        let kind = CigarKind::from_letter(c)
            .ok_or_else(|| SqzError::sam(line, format!("unknown CIGAR operation '{}'", c as char)))?;
        if !have_digits {
            return Err(SqzError::sam(line, format!("CIGAR operation '{}' without length", c as char)));
        }
        ops.push(CigarOp::new(kind, len as u32));
        len = 0;
        have_digits = false;
    }
    if have_digits {
        return Err(SqzError::sam(line, "CIGAR ends with a length but no operation"));
    }
    Ok(ops)
}

impl<R: BufRead> SamReader<R> {
    /// Consume the `@` header lines at the start of the input.
    pub fn new(reader: R) -> Result<Self> {
        let mut sam = Self {
            reader,
            header: Header::default(),
            line: Vec::with_capacity(1024),
            line_no: 0,
        };
        let mut text = String::new();
        loop {
            let starts_header = {
                let peek = sam.reader.fill_buf().map_err(from_io)?;
                peek.first() == Some(&b'@')
            };
            if !starts_header {
                break;
            }
            sam.read_line()?;
            let line = String::from_utf8_lossy(&sam.line).into_owned();
            sam.header.parse_line(&line, sam.line_no, true)?;
            text.push_str(&line);
            text.push('\n');
        }
        sam.header.text = text;
        Ok(sam)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Line number of the last line read (1-based).
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    fn read_line(&mut self) -> Result<usize> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line).map_err(from_io)?;
        if n > 0 {
            self.line_no += 1;
        }
        trim_newline(&mut self.line);
        Ok(n)
    }

    /// Read the next record, `None` at end of input. Blank lines are skipped.
    pub fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        loop {
            if self.read_line()? == 0 {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }
        let line = std::mem::take(&mut self.line);
        let record = self.parse_record(&line);
        self.line = line;
        record.map(Some)
    }

    fn parse_record(&mut self, line: &[u8]) -> Result<AlignmentRecord> {
        let ln = self.line_no;
        let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        if fields.len() < MANDATORY_FIELDS {
            return Err(SqzError::sam(
                ln,
                format!("expected at least {MANDATORY_FIELDS} tab-separated fields, found {}", fields.len()),
            ));
        }

        let name = fields[0].to_vec();
        let flag: u16 = parse_num(fields[1], "FLAG", ln)?;
        let ref_id = match fields[2] {
            b"*" => None,
            rname => Some(self.header.references.resolve_or_insert(rname)),
        };
        let pos: u32 = parse_num(fields[3], "POS", ln)?;
        let mapq: u8 = parse_num(fields[4], "MAPQ", ln)?;
        let cigar = parse_cigar(fields[5], ln)?;
        let mate_ref_id = match fields[6] {
            b"*" => None,
            b"=" => ref_id,
            rname => Some(self.header.references.resolve_or_insert(rname)),
        };
        let mate_pos: u32 = parse_num(fields[7], "PNEXT", ln)?;
        let template_len: i32 = parse_num(fields[8], "TLEN", ln)?;

        let seq = if fields[9] == b"*" {
            Vec::new()
        } else {
            // soft-masking (lower case) is not kept
            fields[9].to_ascii_uppercase()
        };

        let qual = if fields[10] == b"*" {
            vec![0u8; seq.len()]
        } else {
            if fields[10].len() != seq.len() {
                return Err(SqzError::sam(
                    ln,
                    format!("QUAL length {} differs from SEQ length {}", fields[10].len(), seq.len()),
                ));
            }
            fields[10]
                .iter()
                .map(|&q| {
                    q.checked_sub(b'!')
                        .ok_or_else(|| SqzError::sam(ln, format!("quality character {q:#04x} below '!'")))
                })
                .collect::<Result<Vec<u8>>>()?
        };

        let mut aux_data = Vec::new();
        for field in &fields[MANDATORY_FIELDS..] {
            if field.is_empty() {
                continue;
            }
            aux::sam_field_to_binary(field, &mut aux_data, ln)?;
        }

        Ok(AlignmentRecord {
            name,
            flag,
            ref_id,
            pos,
            mapq,
            cigar,
            seq,
            qual,
            mate_ref_id,
            mate_pos,
            template_len,
            aux: aux_data,
        })
    }
}
