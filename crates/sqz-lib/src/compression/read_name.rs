//! Tokenised read name coding.
//!
//! A name is split into runs of letters, runs of `0`, decimal numbers and
//! single other characters. Each token position has its own models and
//! remembers the token it saw last time, so the usual sequencer name
//! (`INSTR:RUN:FC:LANE:TILE:X:Y`) costs little more than its changing
//! coordinates.

use super::model::SimpleModel;
use super::range_coder::{RangeDecoder, RangeEncoder};
use crate::error::{Result, SqzError};

/// Longest read name accepted
pub const MAX_NAME_LEN: usize = 254;
/// Token positions per name, including the end marker
const MAX_TOKENS: usize = 256;
/// Digit runs are cut once the value reaches this
const DIGIT_LIMIT: u32 = 1 << 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum TokenKind {
    Unknown = 0,
    Alpha = 1,
    Char = 2,
    Zero = 3,
    Digits = 4,
    DigitDelta = 5,
    Match = 6,
    End = 7,
}

impl TokenKind {
    fn from_symbol(sym: usize) -> Option<Self> {
        Some(match sym {
            1 => TokenKind::Alpha,
            2 => TokenKind::Char,
            3 => TokenKind::Zero,
            4 => TokenKind::Digits,
            5 => TokenKind::DigitDelta,
            6 => TokenKind::Match,
            7 => TokenKind::End,
            _ => return None,
        })
    }
}

/// Models and history for one token position
#[derive(Clone)]
struct TokenSlot {
    kind: SimpleModel<10>,
    alpha_len: SimpleModel<256>,
    alpha: SimpleModel<256>,
    zero: SimpleModel<256>,
    digits: [SimpleModel<256>; 4],
    delta: SimpleModel<256>,
    chr: SimpleModel<256>,
    last_kind: TokenKind,
    /// Length (alpha, zero), value (digits) or byte (char)
    last_int: u32,
    /// Offset of the last alpha token in the name buffer
    last_str: usize,
}

impl Default for TokenSlot {
    fn default() -> Self {
        Self {
            kind: SimpleModel::new(),
            alpha_len: SimpleModel::new(),
            alpha: SimpleModel::new(),
            zero: SimpleModel::new(),
            digits: Default::default(),
            delta: SimpleModel::new(),
            chr: SimpleModel::new(),
            last_kind: TokenKind::Unknown,
            last_int: 0,
            last_str: 0,
        }
    }
}

impl TokenSlot {
    fn encode_kind(&mut self, rc: &mut RangeEncoder, kind: TokenKind) {
        self.kind.encode(rc, kind as usize);
    }

    fn encode_value(&mut self, rc: &mut RangeEncoder, v: u32) {
        for (i, m) in self.digits.iter_mut().enumerate() {
            m.encode(rc, ((v >> (8 * i)) & 0xff) as usize);
        }
    }

    fn decode_value(&mut self, rc: &mut RangeDecoder) -> u32 {
        let mut v = 0;
        for (i, m) in self.digits.iter_mut().enumerate() {
            v |= (m.decode(rc) as u32) << (8 * i);
        }
        v
    }
}

pub struct NameCodec {
    slots: Vec<TokenSlot>,
    /// Previous name; bytes past its end keep older names' content
    last_name: [u8; MAX_TOKENS],
}

impl Default for NameCodec {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            last_name: [0; MAX_TOKENS],
        }
    }
}

fn push_decimal(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(v.to_string().as_bytes());
}

fn corrupt(msg: impl Into<String>) -> SqzError {
    SqzError::CorruptStream(msg.into())
}

impl NameCodec {
    fn slot(&mut self, ntok: usize) -> &mut TokenSlot {
        if self.slots.len() <= ntok {
            self.slots.resize_with(ntok + 1, TokenSlot::default);
        }
        &mut self.slots[ntok]
    }

    /// Names longer than `MAX_NAME_LEN` must be rejected by the caller.
    pub fn encode(&mut self, rc: &mut RangeEncoder, name: &[u8]) {
        debug_assert!(name.len() <= MAX_NAME_LEN);
        let len = name.len();
        let mut i = 0;
        let mut ntok = 0;
        let last_name = self.last_name;
        while i < len {
            let slot = self.slot(ntok);
            let c = name[i];

            if c.is_ascii_alphabetic() {
                let mut s = i + 1;
                while s < len && name[s].is_ascii_alphabetic() {
                    s += 1;
                }
                let run = &name[i..s];
                let matches = slot.last_kind == TokenKind::Alpha
                    && slot.last_int as usize == run.len()
                    && last_name.get(slot.last_str..slot.last_str + run.len()) == Some(run);
                if matches {
                    slot.encode_kind(rc, TokenKind::Match);
                } else {
                    slot.encode_kind(rc, TokenKind::Alpha);
                    slot.alpha_len.encode(rc, run.len());
                    for &b in run {
                        slot.alpha.encode(rc, b as usize);
                    }
                }
                slot.last_int = run.len() as u32;
                slot.last_str = i;
                slot.last_kind = TokenKind::Alpha;
                i = s;
            } else if c == b'0' {
                let mut s = i;
                while s < len && name[s] == b'0' {
                    s += 1;
                }
                let v = (s - i) as u32;
                if slot.last_kind == TokenKind::Zero && slot.last_int == v {
                    slot.encode_kind(rc, TokenKind::Match);
                } else {
                    slot.encode_kind(rc, TokenKind::Zero);
                    slot.zero.encode(rc, v as usize);
                }
                slot.last_int = v;
                slot.last_kind = TokenKind::Zero;
                i = s;
            } else if c.is_ascii_digit() {
                let mut s = i;
                let mut v: u32 = 0;
                while s < len && name[s].is_ascii_digit() && v < DIGIT_LIMIT {
                    v = v * 10 + (name[s] - b'0') as u32;
                    s += 1;
                }
                let d = v as i64 - slot.last_int as i64;
                if slot.last_kind == TokenKind::Digits && d == 0 {
                    slot.encode_kind(rc, TokenKind::Match);
                } else if slot.last_kind == TokenKind::Digits && d > 0 && d < 256 {
                    slot.encode_kind(rc, TokenKind::DigitDelta);
                    slot.delta.encode(rc, d as usize);
                } else {
                    slot.encode_kind(rc, TokenKind::Digits);
                    slot.encode_value(rc, v);
                }
                slot.last_int = v;
                slot.last_kind = TokenKind::Digits;
                i = s;
            } else {
                if slot.last_kind == TokenKind::Char && slot.last_int == c as u32 {
                    slot.encode_kind(rc, TokenKind::Match);
                } else {
                    slot.encode_kind(rc, TokenKind::Char);
                    slot.chr.encode(rc, c as usize);
                }
                slot.last_int = c as u32;
                slot.last_kind = TokenKind::Char;
                i += 1;
            }
            ntok += 1;
        }
        self.slot(ntok).encode_kind(rc, TokenKind::End);
        self.last_name[..len].copy_from_slice(name);
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> Result<Vec<u8>> {
        let mut name = Vec::with_capacity(64);
        let mut ntok = 0;
        let last_name = self.last_name;
        loop {
            if ntok == MAX_TOKENS {
                return Err(corrupt("read name without end token"));
            }
            let slot = self.slot(ntok);
            let sym = slot.kind.decode(rc);
            let kind = TokenKind::from_symbol(sym)
                .ok_or_else(|| corrupt(format!("unknown read name token {sym}")))?;

            match kind {
                TokenKind::End => break,
                TokenKind::Alpha => {
                    let v = slot.alpha_len.decode(rc);
                    slot.last_int = v as u32;
                    slot.last_str = name.len();
                    for _ in 0..v {
                        name.push(slot.alpha.decode(rc) as u8);
                    }
                    slot.last_kind = TokenKind::Alpha;
                }
                TokenKind::Char => {
                    let c = slot.chr.decode(rc) as u8;
                    name.push(c);
                    slot.last_int = c as u32;
                    slot.last_kind = TokenKind::Char;
                }
                TokenKind::Zero => {
                    let v = slot.zero.decode(rc);
                    slot.last_int = v as u32;
                    name.resize(name.len() + v, b'0');
                    slot.last_kind = TokenKind::Zero;
                }
                TokenKind::Digits => {
                    let v = slot.decode_value(rc);
                    slot.last_int = v;
                    push_decimal(&mut name, v);
                    slot.last_kind = TokenKind::Digits;
                }
                TokenKind::DigitDelta => {
                    let d = slot.delta.decode(rc) as u32;
                    let v = slot.last_int.wrapping_add(d);
                    slot.last_int = v;
                    push_decimal(&mut name, v);
                    slot.last_kind = TokenKind::Digits;
                }
                TokenKind::Match => match slot.last_kind {
                    TokenKind::Char => name.push(slot.last_int as u8),
                    TokenKind::Alpha => {
                        let v = slot.last_int as usize;
                        let prev = last_name
                            .get(slot.last_str..slot.last_str + v)
                            .ok_or_else(|| corrupt("read name match beyond previous name"))?;
                        slot.last_str = name.len();
                        name.extend_from_slice(prev);
                    }
                    TokenKind::Zero => name.resize(name.len() + slot.last_int as usize, b'0'),
                    TokenKind::Digits => push_decimal(&mut name, slot.last_int),
                    _ => return Err(corrupt(format!("read name match with no previous token at {ntok}"))),
                },
                TokenKind::Unknown => return Err(corrupt("unknown read name token")),
            }
            if name.len() > MAX_NAME_LEN {
                return Err(corrupt("decoded read name too long"));
            }
            ntok += 1;
        }
        self.last_name[..name.len()].copy_from_slice(&name);
        Ok(name)
    }
}
