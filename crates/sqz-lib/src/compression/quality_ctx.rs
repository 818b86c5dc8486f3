/// Context-modelled quality coding.
///
/// Context (20 bits): the larger of the two previous values combined with
/// the latest one, a "last two equal" bit, a running degradation counter
/// and a coarse read-offset bucket. Reverse-strand qualities are coded in
/// sequencing order.
use super::model::{ContextBank, SimpleModel};
use super::range_coder::{RangeDecoder, RangeEncoder};

// ============================================================================
// Context parameters
// ============================================================================
const QBITS: u32 = 12;
const QMASK: u32 = (1 << QBITS) - 1;
const CONTEXTS: usize = 1 << 20;
/// Quality alphabet: 0..=94 plus the terminator
pub const QUAL_SYMBOLS: usize = 96;
/// Ends a quality string shorter than its sequence
const TERMINATOR: u8 = 95;
/// Largest quality value that can be coded
pub const MAX_QUAL: u8 = 94;

/// Running context for one quality string
struct QualContext {
    ctx: u32,
    delta: u32,
    q1: u32,
    q2: u32,
}

impl QualContext {
    fn new() -> Self {
        Self { ctx: 0, delta: 5, q1: 0, q2: 0 }
    }

    #[inline(always)]
    fn update(&mut self, i: usize, q: u8) {
        let q = q as u32;
        let (q1, q2) = (self.q1, self.q2);
        let mut ctx = ((q1.max(q2) << 6) + q) & QMASK;
        ctx += ((q1 == q2) as u32) << QBITS;
        if q1 > q {
            self.delta += q1 - q;
        }
        ctx += (self.delta >> 3).min(7) << (QBITS + 1);
        ctx += (((i + 15).min(127) as u32) & (15 << 3)) << (QBITS + 1);
        self.ctx = ctx;
        self.q2 = q1;
        self.q1 = q;
    }
}

pub struct QualityCodec {
    models: ContextBank<SimpleModel<QUAL_SYMBOLS>>,
    scratch: Vec<u8>,
}

impl Default for QualityCodec {
    fn default() -> Self {
        Self {
            models: ContextBank::new(CONTEXTS),
            scratch: Vec::new(),
        }
    }
}

impl QualityCodec {
    /// Values must be at most `MAX_QUAL`; `len` is the sequence length.
    pub fn encode(&mut self, rc: &mut RangeEncoder, qual: &[u8], len: usize, reverse: bool) {
        self.scratch.clear();
        self.scratch.extend_from_slice(&qual[..qual.len().min(len)]);
        if reverse {
            self.scratch.reverse();
        }

        let mut ctx = QualContext::new();
        for (i, &q) in self.scratch.iter().enumerate() {
            debug_assert!(q <= MAX_QUAL);
            self.models.get_mut(ctx.ctx as usize).encode(rc, q as usize);
            ctx.update(i, q);
        }
        if self.scratch.len() < len {
            self.models.get_mut(ctx.ctx as usize).encode(rc, TERMINATOR as usize);
        }
    }

    /// Qualities missing after an early terminator are filled with 0 at the
    /// end of the stored string, on either strand.
    pub fn decode(&mut self, rc: &mut RangeDecoder, len: usize, reverse: bool) -> Vec<u8> {
        let mut qual = Vec::with_capacity(len);
        let mut ctx = QualContext::new();
        for i in 0..len {
            let q = self.models.get_mut(ctx.ctx as usize).decode(rc) as u8;
            if q == TERMINATOR {
                break;
            }
            qual.push(q);
            ctx.update(i, q);
        }
        if reverse {
            qual.reverse();
        }
        qual.resize(len, 0);
        qual
    }

    /// Contexts touched so far
    pub fn contexts_used(&self) -> usize {
        self.models.allocated()
    }
}
