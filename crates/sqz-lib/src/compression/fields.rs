//! Scalar field codecs: read length, flags, position delta, reference name
//! and mapping quality.

use super::model::SimpleModel;
use super::range_coder::{RangeDecoder, RangeEncoder};
use crate::error::{Result, SqzError};

/// Longest reference name the decoder will assemble before giving up
const MAX_RNAME_LEN: usize = 1024;

// ============================================================================
// Sequence length
// ============================================================================
/// 16-bit read length with a "same as previous" flag. Zero ends the stream.
#[derive(Default)]
pub struct LengthCodec {
    same: SimpleModel<2>,
    lo: SimpleModel<256>,
    hi: SimpleModel<256>,
    last: u32,
}

impl LengthCodec {
    pub fn encode(&mut self, rc: &mut RangeEncoder, len: u32) {
        debug_assert!(len <= u16::MAX as u32);
        if len == self.last {
            self.same.encode(rc, 1);
            return;
        }
        self.same.encode(rc, 0);
        self.lo.encode(rc, (len & 0xff) as usize);
        self.hi.encode(rc, ((len >> 8) & 0xff) as usize);
        self.last = len;
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u32 {
        if self.same.decode(rc) == 1 {
            return self.last;
        }
        let lo = self.lo.decode(rc) as u32;
        let hi = self.hi.decode(rc) as u32;
        self.last = lo | (hi << 8);
        self.last
    }
}

// ============================================================================
// Flags
// ============================================================================
#[derive(Default)]
pub struct FlagsCodec {
    lo: SimpleModel<256>,
    hi: SimpleModel<256>,
}

impl FlagsCodec {
    pub fn encode(&mut self, rc: &mut RangeEncoder, flag: u16) {
        self.lo.encode(rc, (flag & 0xff) as usize);
        self.hi.encode(rc, (flag >> 8) as usize);
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u16 {
        let lo = self.lo.decode(rc) as u16;
        let hi = self.hi.decode(rc) as u16;
        lo | (hi << 8)
    }
}

// ============================================================================
// Position
// ============================================================================
/// Wrapping 32-bit delta from the previous record's position, one byte
/// model per byte of the delta.
#[derive(Default)]
pub struct PositionCodec {
    bytes: [SimpleModel<256>; 4],
    last: u32,
}

impl PositionCodec {
    pub fn encode(&mut self, rc: &mut RangeEncoder, pos: u32) {
        let delta = pos.wrapping_sub(self.last);
        for (i, model) in self.bytes.iter_mut().enumerate() {
            model.encode(rc, ((delta >> (8 * i)) & 0xff) as usize);
        }
        self.last = pos;
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u32 {
        let mut delta = 0u32;
        for (i, model) in self.bytes.iter_mut().enumerate() {
            delta |= (model.decode(rc) as u32) << (8 * i);
        }
        self.last = self.last.wrapping_add(delta);
        self.last
    }
}

// ============================================================================
// Reference name
// ============================================================================
/// Order-1 text model over NUL-terminated reference names, behind a
/// "same as previous" flag.
pub struct RefNameCodec {
    same: SimpleModel<2>,
    chars: Vec<SimpleModel<256>>,
    last_char: u8,
    last_name: Option<Vec<u8>>,
}

impl Default for RefNameCodec {
    fn default() -> Self {
        Self {
            same: SimpleModel::new(),
            chars: vec![SimpleModel::new(); 256],
            last_char: 0,
            last_name: None,
        }
    }
}

impl RefNameCodec {
    /// Returns true when the name differs from the previous one.
    pub fn encode(&mut self, rc: &mut RangeEncoder, rname: &[u8]) -> bool {
        if self.last_name.as_deref() == Some(rname) {
            self.same.encode(rc, 1);
            return false;
        }
        self.same.encode(rc, 0);
        for &c in rname.iter().chain(std::iter::once(&0u8)) {
            self.chars[self.last_char as usize].encode(rc, c as usize);
            self.last_char = c;
        }
        self.last_name = Some(rname.to_vec());
        true
    }

    /// Returns the name and whether it changed.
    pub fn decode(&mut self, rc: &mut RangeDecoder) -> Result<(&[u8], bool)> {
        let changed = self.same.decode(rc) == 0;
        if !changed && self.last_name.is_none() {
            return Err(SqzError::CorruptStream("reference repeat before any reference".to_string()));
        }
        if changed {
            let mut name = Vec::new();
            loop {
                let c = self.chars[self.last_char as usize].decode(rc) as u8;
                self.last_char = c;
                if c == 0 {
                    break;
                }
                if name.len() == MAX_RNAME_LEN {
                    return Err(SqzError::CorruptStream("unterminated reference name".to_string()));
                }
                name.push(c);
            }
            self.last_name = Some(name);
        }
        Ok((self.last_name.as_deref().unwrap_or_default(), changed))
    }
}

// ============================================================================
// Mapping quality
// ============================================================================
#[derive(Default)]
pub struct MapqCodec {
    model: SimpleModel<256>,
}

impl MapqCodec {
    pub fn encode(&mut self, rc: &mut RangeEncoder, mapq: u8) {
        self.model.encode(rc, mapq as usize);
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u8 {
        self.model.decode(rc) as u8
    }
}
