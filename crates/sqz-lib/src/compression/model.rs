//! Adaptive frequency models driven by the range coder.
//!
//! `SimpleModel<N>` keeps its symbols roughly sorted by frequency so the
//! linear cumulative-frequency scan stops early on skewed data.
//! `BaseModel` is the fixed-order five symbol (A,C,G,T,N) variant used for
//! sequence and consensus contexts.

use super::range_coder::{RangeDecoder, RangeEncoder};

// ============================================================================
// Constants
// ============================================================================
/// Frequency increment per coded symbol
const STEP: u32 = 8;
/// Halve all frequencies once the total exceeds this
const MAX_FREQ: u32 = (1 << 16) - 32;
/// Check the sort order once every this many updates
const SORT_INTERVAL_MASK: u32 = 15;

/// Bases modelled by `BaseModel`: A C G T N
pub const BASE_SYMBOLS: usize = 5;
const BASE_STEP: u32 = 8;
const BASE_MAX_FREQ: u32 = (1 << 16) - 16;

// ============================================================================
// SimpleModel
// ============================================================================
#[derive(Clone, Copy, Debug)]
struct SymFreq {
    sym: u16,
    freq: u32,
}

#[derive(Clone, Debug)]
pub struct SimpleModel<const N: usize> {
    total: u32,
    updates: u32,
    entries: [SymFreq; N],
}

impl<const N: usize> Default for SimpleModel<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SimpleModel<N> {
    pub fn new() -> Self {
        let mut entries = [SymFreq { sym: 0, freq: 1 }; N];
        for (i, e) in entries.iter_mut().enumerate() {
            e.sym = i as u16;
        }
        Self {
            total: N as u32,
            updates: 0,
            entries,
        }
    }

    fn normalize(&mut self) {
        let mut total = 0;
        for e in self.entries.iter_mut() {
            e.freq -= e.freq >> 1;
            total += e.freq;
        }
        self.total = total;
    }

    /// Bump entry `i` and occasionally move it one place towards the front.
    #[inline]
    fn update(&mut self, i: usize) {
        self.entries[i].freq += STEP;
        self.total += STEP;
        if self.total > MAX_FREQ {
            self.normalize();
        }
        self.updates = self.updates.wrapping_add(1);
        if self.updates & SORT_INTERVAL_MASK == 0 && i > 0 && self.entries[i].freq > self.entries[i - 1].freq {
            self.entries.swap(i, i - 1);
        }
    }

    /// Encode `sym`, which must be below `N`.
    #[inline]
    pub fn encode(&mut self, rc: &mut RangeEncoder, sym: usize) {
        debug_assert!(sym < N);
        let mut cum = 0;
        let mut i = 0;
        while self.entries[i].sym as usize != sym {
            cum += self.entries[i].freq;
            i += 1;
        }
        rc.encode(cum, self.entries[i].freq, self.total);
        self.update(i);
    }

    #[inline]
    pub fn decode(&mut self, rc: &mut RangeDecoder) -> usize {
        let target = rc.decode_freq(self.total);
        let mut cum = 0;
        let mut i = 0;
        // Clamp to the last entry so a corrupt stream cannot index past the end
        while i + 1 < N && cum + self.entries[i].freq <= target {
            cum += self.entries[i].freq;
            i += 1;
        }
        rc.decode(cum, self.entries[i].freq, self.total);
        let sym = self.entries[i].sym as usize;
        self.update(i);
        sym
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

// ============================================================================
// BaseModel
// ============================================================================
#[derive(Clone, Copy, Debug)]
pub struct BaseModel {
    freq: [u32; BASE_SYMBOLS],
    total: u32,
}

impl Default for BaseModel {
    fn default() -> Self {
        let freq = [3 * BASE_STEP, 3 * BASE_STEP, 3 * BASE_STEP, 3 * BASE_STEP, 1];
        Self {
            freq,
            total: freq.iter().sum(),
        }
    }
}

impl BaseModel {
    /// Reseed with a bias towards `observed` and a stronger one towards
    /// `expected` (the reference or consensus base).
    pub fn reset(&mut self, observed: u8, expected: u8) {
        self.freq = [5, 5, 5, 5, 1];
        self.freq[observed as usize] += 200;
        self.freq[expected as usize] += 1800;
        self.total = self.freq.iter().sum();
    }

    fn normalize(&mut self) {
        let mut total = 0;
        for f in self.freq.iter_mut() {
            *f -= *f >> 1;
            total += *f;
        }
        self.total = total;
    }

    #[inline]
    fn update(&mut self, sym: usize) {
        self.freq[sym] += BASE_STEP;
        self.total += BASE_STEP;
        if self.total > BASE_MAX_FREQ {
            self.normalize();
        }
    }

    #[inline]
    pub fn encode(&mut self, rc: &mut RangeEncoder, sym: u8) {
        let sym = sym as usize;
        let cum: u32 = self.freq[..sym].iter().sum();
        rc.encode(cum, self.freq[sym], self.total);
        self.update(sym);
    }

    #[inline]
    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u8 {
        let target = rc.decode_freq(self.total);
        let mut cum = 0;
        let mut sym = 0;
        while sym + 1 < BASE_SYMBOLS && cum + self.freq[sym] <= target {
            cum += self.freq[sym];
            sym += 1;
        }
        rc.decode(cum, self.freq[sym], self.total);
        self.update(sym);
        sym as u8
    }

    /// Most frequent of A, C, G and T (first wins on ties).
    pub fn most_probable(&self) -> u8 {
        let mut best = 0;
        for b in 1..4 {
            if self.freq[b] > self.freq[best] {
                best = b;
            }
        }
        best as u8
    }
}

// ============================================================================
// Lazy context bank
// ============================================================================
/// Models allocated on first use, indexed by context id.
///
/// Slot lookup: flat Vec, u32::MAX = uninitialized.
pub struct ContextBank<M> {
    ctx_slots: Vec<u32>,
    models: Vec<M>,
}

impl<M: Default> ContextBank<M> {
    pub fn new(n_contexts: usize) -> Self {
        Self {
            ctx_slots: vec![u32::MAX; n_contexts],
            models: Vec::new(),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, ctx: usize) -> &mut M {
        let slot = match self.ctx_slots[ctx] {
            u32::MAX => {
                let id = self.models.len() as u32;
                self.ctx_slots[ctx] = id;
                self.models.push(M::default());
                id as usize
            }
            id => id as usize,
        };
        &mut self.models[slot]
    }

    /// Number of contexts addressable
    pub fn capacity(&self) -> usize {
        self.ctx_slots.len()
    }

    /// Number of contexts touched so far
    pub fn allocated(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_model_round_trip_with_sorting() {
        let syms: Vec<usize> = (0..20_000).map(|i| if i % 11 == 0 { i % 256 } else { 200 }).collect();

        let mut model = SimpleModel::<256>::new();
        let mut enc = RangeEncoder::with_trace();
        for &s in &syms {
            model.encode(&mut enc, s);
        }
        // the dominant symbol has bubbled to the front
        assert_eq!(model.entries[0].sym, 200);
        assert!(model.total() < 1 << 16);
        let trace = enc.take_trace();
        let data = enc.finish();
        // heavily skewed input compresses well below a byte per symbol
        assert!(data.len() < syms.len() / 4);

        let mut model = SimpleModel::<256>::new();
        let mut dec = RangeDecoder::with_trace(&data);
        for &s in &syms {
            assert_eq!(model.decode(&mut dec), s);
        }
        assert_eq!(dec.take_trace(), trace);
    }

    #[test]
    fn test_binary_model_normalizes() {
        let mut model = SimpleModel::<2>::new();
        let mut enc = RangeEncoder::new();
        for _ in 0..100_000 {
            model.encode(&mut enc, 1);
        }
        assert!(model.total() <= MAX_FREQ);
        assert!(model.entries.iter().all(|e| e.freq >= 1));
    }

    #[test]
    fn test_base_model_reset_and_round_trip() {
        let mut m = BaseModel::default();
        m.reset(1, 2);
        assert_eq!(m.freq, [5, 205, 1805, 5, 1]);
        assert_eq!(m.most_probable(), 2);

        let bases = [2u8, 2, 2, 4, 1, 2, 0, 3, 2, 2];
        let mut enc = RangeEncoder::new();
        for &b in &bases {
            m.encode(&mut enc, b);
        }
        let data = enc.finish();

        let mut m = BaseModel::default();
        m.reset(1, 2);
        let mut dec = RangeDecoder::new(&data);
        for &b in &bases {
            assert_eq!(m.decode(&mut dec), b);
        }
    }

    #[test]
    fn test_context_bank_lazy() {
        let mut bank: ContextBank<SimpleModel<4>> = ContextBank::new(1 << 20);
        assert_eq!(bank.allocated(), 0);
        bank.get_mut(12345);
        bank.get_mut(7);
        bank.get_mut(12345);
        assert_eq!(bank.allocated(), 2);
        assert_eq!(bank.capacity(), 1 << 20);
    }
}
