//! Carryless range coder mixing a 64-bit `low` with a 32-bit `range`.
//!
//! When `low` and `low + range` disagree in their top byte the range is
//! shrunk to end at the byte boundary instead of propagating a carry, so
//! every emitted byte is final the moment it is written.
//!
//! All frequencies passed to `encode`/`decode` must keep `tot < 2^16`.

// ============================================================================
// Constants
// ============================================================================
/// Renormalise once range drops to 24 bits
const TOP: u32 = 0x00FF_FFFF;
/// Bits 56..63 of `low`
const LMASK: u64 = 0xFF00_0000_0000_0000;
/// Largest total frequency the coder accepts
pub const MAX_TOTAL_FREQ: u32 = 1 << 16;

/// One coder call, as seen by the opt-in trace
pub type TraceEntry = (u32, u32, u32);

// ============================================================================
// Encoder
// ============================================================================
pub struct RangeEncoder {
    low: u64,
    range: u32,
    output: Vec<u8>,
    bytes_emitted: u64,
    boundary_adjustments: u64,
    trace: Option<Vec<TraceEntry>>,
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeEncoder {
    pub fn new() -> Self {
        Self {
            low: 0,
            range: u32::MAX,
            output: Vec::with_capacity(1 << 16),
            bytes_emitted: 0,
            boundary_adjustments: 0,
            trace: None,
        }
    }

    /// Record every `(cum, freq, tot)` passed to `encode`.
    pub fn with_trace() -> Self {
        Self {
            trace: Some(Vec::new()),
            ..Self::new()
        }
    }

    #[inline(always)]
    pub fn encode(&mut self, cum: u32, freq: u32, tot: u32) {
        debug_assert!(tot < MAX_TOTAL_FREQ && freq > 0 && cum + freq <= tot);
        if let Some(trace) = self.trace.as_mut() {
            trace.push((cum, freq, tot));
        }
        self.range /= tot;
        self.low = self.low.wrapping_add(self.range.wrapping_mul(cum) as u64);
        self.range = self.range.wrapping_mul(freq);

        while self.range <= TOP {
            if (self.low ^ self.low.wrapping_add(self.range as u64)) & LMASK != 0 {
                let l32 = self.low as u32;
                self.range = (l32 | TOP).wrapping_sub(l32);
                self.boundary_adjustments += 1;
            }
            self.output.push((self.low >> 56) as u8);
            self.low <<= 8;
            self.range <<= 8;
        }
    }

    /// Take the bytes produced so far. They never change after emission.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.bytes_emitted += self.output.len() as u64;
        std::mem::take(&mut self.output)
    }

    /// Bytes currently buffered and not yet taken
    pub fn pending(&self) -> usize {
        self.output.len()
    }

    /// Total bytes produced, including those already taken
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes_emitted + self.output.len() as u64
    }

    /// Times the range was shrunk to avoid a carry across a byte boundary
    pub fn boundary_adjustments(&self) -> u64 {
        self.boundary_adjustments
    }

    pub fn take_trace(&mut self) -> Vec<TraceEntry> {
        self.trace.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Flush the 8 bytes of `low` and return whatever has not been taken.
    pub fn finish(&mut self) -> Vec<u8> {
        for _ in 0..8 {
            self.output.push((self.low >> 56) as u8);
            self.low <<= 8;
        }
        self.take_output()
    }
}

// ============================================================================
// Decoder
// ============================================================================
pub struct RangeDecoder<'a> {
    low: u64,
    range: u32,
    in_freq: u32,
    input: &'a [u8],
    pos: usize,
    overrun: usize,
    trace: Option<Vec<TraceEntry>>,
}

impl<'a> RangeDecoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        let mut dec = Self {
            low: 0,
            range: u32::MAX,
            in_freq: 0,
            input,
            pos: 0,
            overrun: 0,
            trace: None,
        };
        // Only the last 4 of the first 8 bytes stay visible
        for _ in 0..8 {
            dec.in_freq = (dec.in_freq << 8) | dec.next_byte() as u32;
        }
        dec
    }

    pub fn with_trace(input: &'a [u8]) -> Self {
        Self {
            trace: Some(Vec::new()),
            ..Self::new(input)
        }
    }

    /// Reads past the end yield zero bytes, mirroring the encoder's flush.
    #[inline(always)]
    fn next_byte(&mut self) -> u8 {
        match self.input.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => {
                self.overrun += 1;
                0
            }
        }
    }

    /// Bytes consumed from the input
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Zero bytes supplied after the input ran out
    pub fn overrun(&self) -> usize {
        self.overrun
    }

    /// The frequency slot the next symbol falls in. Must be followed by
    /// exactly one `decode` with the same `tot`.
    #[inline(always)]
    pub fn decode_freq(&mut self, tot: u32) -> u32 {
        self.range /= tot;
        self.in_freq / self.range
    }

    #[inline(always)]
    pub fn decode(&mut self, cum: u32, freq: u32, tot: u32) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push((cum, freq, tot));
        }
        let delta = cum.wrapping_mul(self.range);
        self.in_freq = self.in_freq.wrapping_sub(delta);
        self.low = self.low.wrapping_add(delta as u64);
        self.range = self.range.wrapping_mul(freq);

        while self.range <= TOP {
            if (self.low ^ self.low.wrapping_add(self.range as u64)) & LMASK != 0 {
                let l32 = self.low as u32;
                self.range = (l32 | TOP).wrapping_sub(l32);
            }
            self.in_freq = (self.in_freq << 8) | self.next_byte() as u32;
            self.low <<= 8;
            self.range <<= 8;
        }
    }

    pub fn take_trace(&mut self) -> Vec<TraceEntry> {
        self.trace.as_mut().map(std::mem::take).unwrap_or_default()
    }
}
