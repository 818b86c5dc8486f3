//! CIGAR coding for mapped records.
//!
//! A single `M` covering the read costs one binary symbol. Anything else is
//! a list of operations, each conditioned on the previous operation, with
//! lengths as 7-bit groups under a per-operation model. A query-consuming
//! operation that finishes the read is sent with length 0 and rebuilt from
//! the remaining read length.

use super::model::SimpleModel;
use super::range_coder::{RangeDecoder, RangeEncoder};
use crate::error::{Result, SqzError};
use crate::io::record::{cigar_query_len, CigarKind, CigarOp};

/// Operation symbol marking the end of the list
const END_OP: usize = 15;
/// Decoded lists longer than this are treated as corrupt
const MAX_DECODED_OPS: usize = 1 << 16;
const MAX_LEN_SHIFT: u32 = 28;

pub struct CigarCodec {
    all_match: SimpleModel<2>,
    ops: Vec<SimpleModel<16>>,
    lens: Vec<SimpleModel<256>>,
}

impl Default for CigarCodec {
    fn default() -> Self {
        Self {
            all_match: SimpleModel::new(),
            ops: vec![SimpleModel::new(); 16],
            lens: vec![SimpleModel::new(); 16],
        }
    }
}

/// Check `cigar` can be coded against a read of `seq_len` bases.
pub fn validate(cigar: &[CigarOp], seq_len: usize) -> std::result::Result<(), String> {
    let covered = cigar_query_len(cigar);
    if covered != seq_len as u64 {
        return Err(format!("CIGAR covers {covered} of the {seq_len} read bases"));
    }
    // A zero length is reserved for the operation that finishes the read
    let mut remaining = covered;
    for op in cigar.iter().filter(|op| op.kind.consumes_query()) {
        if op.len == 0 && remaining > 0 {
            return Err(format!("zero length {} operation", op.kind.letter() as char));
        }
        remaining -= op.len as u64;
    }
    Ok(())
}

impl CigarCodec {
    /// `cigar` must already satisfy `validate` for `seq_len`.
    pub fn encode(&mut self, rc: &mut RangeEncoder, cigar: &[CigarOp], seq_len: u32) {
        if let [op] = cigar {
            if op.kind == CigarKind::Match {
                self.all_match.encode(rc, 1);
                return;
            }
        }
        self.all_match.encode(rc, 0);

        let mut remaining = seq_len;
        let mut last_op = 0;
        for op in cigar {
            let code = op.kind.code() as usize;
            let mut len = op.len;
            if op.kind.consumes_query() {
                remaining -= len;
                if remaining == 0 {
                    len = 0;
                }
            }
            self.ops[last_op].encode(rc, code);
            let model = &mut self.lens[code];
            if len >= 0x80 {
                while len != 0 {
                    let more = if len >= 0x80 { 0x80 } else { 0 };
                    model.encode(rc, ((len & 0x7f) | more) as usize);
                    len >>= 7;
                }
            } else {
                model.encode(rc, len as usize);
            }
            last_op = code;
        }
        self.ops[last_op].encode(rc, END_OP);
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder, seq_len: u32) -> Result<Vec<CigarOp>> {
        if self.all_match.decode(rc) == 1 {
            return Ok(vec![CigarOp::new(CigarKind::Match, seq_len)]);
        }

        let mut cigar = Vec::new();
        let mut remaining = seq_len;
        let mut last_op = 0;
        loop {
            let code = self.ops[last_op].decode(rc);
            if code == END_OP {
                break;
            }
            let kind = CigarKind::from_code(code as u8)
                .ok_or_else(|| SqzError::CorruptStream(format!("unknown CIGAR operation {code}")))?;
            if cigar.len() == MAX_DECODED_OPS {
                return Err(SqzError::CorruptStream("CIGAR without end marker".to_string()));
            }

            let model = &mut self.lens[code];
            let mut len = 0u32;
            let mut shift = 0;
            loop {
                let part = model.decode(rc) as u32;
                len |= (part & 0x7f) << shift;
                if part & 0x80 == 0 {
                    break;
                }
                shift += 7;
                if shift > MAX_LEN_SHIFT {
                    return Err(SqzError::CorruptStream("CIGAR length overflow".to_string()));
                }
            }
            last_op = code;

            if kind.consumes_query() {
                if len == 0 {
                    len = remaining;
                }
                remaining = remaining
                    .checked_sub(len)
                    .ok_or_else(|| SqzError::CorruptStream("CIGAR longer than read".to_string()))?;
            }
            cigar.push(CigarOp::new(kind, len));
        }
        Ok(cigar)
    }
}
