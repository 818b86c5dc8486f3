//! Sequence coding.
//!
//! Unmapped reads use an order-8 base context. Mapped reads are coded
//! against per-coordinate models: the first read covering a coordinate
//! establishes its consensus (against the reference when one is
//! configured), later reads are predicted from it.

use super::model::{BaseModel, ContextBank, SimpleModel};
use super::range_coder::{RangeDecoder, RangeEncoder};
use crate::cli::ModelParams;
use crate::error::{Result, SqzError};
use crate::io::record::{base_code, CigarKind, CigarOp, CODE_TO_BASE};
use crate::io::reference::ReferenceSource;

// ============================================================================
// Constants
// ============================================================================
/// Unmapped context: the last 8 bases, 2 bits each
const SEQ8_BITS: u32 = 16;
const SEQ8_MASK: u32 = (1 << SEQ8_BITS) - 1;
/// Seed for the unmapped context (a 12-mer absent from the human genome)
const SEQ8_SEED: u32 = 0x7616c7 & SEQ8_MASK;

/// Self-consensus history contexts (5^7)
const SELF_CONS_CONTEXTS: u32 = 78_125;
/// Match-bit history length times read-offset buckets
const CONS_TYPE_CONTEXTS: usize = 256 * 128;
/// Previous-base history times reference base
const CONS_BASE_CONTEXTS: usize = 36 * 6;

const N_CODE: u8 = 4;

// ============================================================================
// Consensus bitmap
// ============================================================================
/// One bit per reference coordinate (modulo the configured span) recording
/// that its consensus has been established. Grows on demand.
pub struct ConsensusBitmap {
    words: Vec<u64>,
    span_mask: u64,
    highest: Option<usize>,
}

impl ConsensusBitmap {
    pub fn new(span_bits: u32) -> Self {
        Self {
            words: Vec::new(),
            span_mask: (1u64 << span_bits) - 1,
            highest: None,
        }
    }

    #[inline]
    fn key(&self, pos: u32) -> usize {
        (pos as u64 & self.span_mask) as usize
    }

    #[inline]
    pub fn get(&self, pos: u32) -> bool {
        let k = self.key(pos);
        self.words.get(k >> 6).is_some_and(|w| w & (1 << (k & 63)) != 0)
    }

    #[inline]
    pub fn set(&mut self, pos: u32) {
        let k = self.key(pos);
        let word = k >> 6;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (k & 63);
        if self.highest.map_or(true, |h| k > h) {
            self.highest = Some(k);
        }
    }

    /// Clear every bit up to the highest one set.
    pub fn clear(&mut self) {
        if let Some(h) = self.highest.take() {
            self.words[..=h >> 6].fill(0);
        }
    }
}

// ============================================================================
// Unmapped reads
// ============================================================================
pub struct UnmappedSeqCodec {
    models: ContextBank<BaseModel>,
}

impl Default for UnmappedSeqCodec {
    fn default() -> Self {
        Self {
            models: ContextBank::new(1 << SEQ8_BITS),
        }
    }
}

impl UnmappedSeqCodec {
    /// N and other non-ACGT bases are sent as the context's favourite base.
    pub fn encode(&mut self, rc: &mut RangeEncoder, seq: &[u8]) {
        let mut ctx = SEQ8_SEED;
        for &b in seq {
            let model = self.models.get_mut(ctx as usize);
            let mut code = base_code(b);
            if code == N_CODE {
                code = model.most_probable();
            }
            model.encode(rc, code);
            ctx = (ctx * 4 + code as u32) & SEQ8_MASK;
        }
    }

    /// Bases whose quality is 0 come back as N.
    pub fn decode(&mut self, rc: &mut RangeDecoder, qual: &[u8]) -> Result<Vec<u8>> {
        let mut seq = Vec::with_capacity(qual.len());
        let mut ctx = SEQ8_SEED;
        for &q in qual {
            let code = self.models.get_mut(ctx as usize).decode(rc);
            if code == N_CODE {
                return Err(SqzError::CorruptStream("N in unmapped base context".to_string()));
            }
            seq.push(if q == 0 { b'N' } else { CODE_TO_BASE[code as usize] });
            ctx = (ctx * 4 + code as u32) & SEQ8_MASK;
        }
        Ok(seq)
    }
}

// ============================================================================
// Consensus against a reference
// ============================================================================
/// Codes a newly established consensus base `b` given reference base `r`:
/// first whether they agree, then on disagreement `b ^ r`.
pub struct ConsensusCodec {
    match_bit: Vec<SimpleModel<2>>,
    diff: Vec<SimpleModel<8>>,
    /// Last 8 match bits
    last_ct: usize,
    /// Last two mismatching bases
    last: usize,
}

impl Default for ConsensusCodec {
    fn default() -> Self {
        Self {
            match_bit: vec![SimpleModel::new(); CONS_TYPE_CONTEXTS],
            diff: vec![SimpleModel::new(); CONS_BASE_CONTEXTS],
            last_ct: 0,
            last: 0,
        }
    }
}

impl ConsensusCodec {
    #[inline]
    fn type_ctx(&self, apos: usize) -> usize {
        self.last_ct * 128 + apos.min(127)
    }

    pub fn encode(&mut self, rc: &mut RangeEncoder, apos: usize, b: u8, r: u8) {
        let same = (b == r) as usize;
        let ctx = self.type_ctx(apos);
        self.match_bit[ctx].encode(rc, same);
        self.last_ct = (self.last_ct * 2 + same) % 256;
        if b == r {
            return;
        }
        self.diff[self.last * 6 + r as usize].encode(rc, (b ^ r) as usize);
        self.last = (self.last * 6 + b as usize) % 36;
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder, apos: usize, r: u8) -> Result<u8> {
        let ctx = self.type_ctx(apos);
        let same = self.match_bit[ctx].decode(rc);
        self.last_ct = (self.last_ct * 2 + same) % 256;
        if same == 1 {
            return Ok(r);
        }
        let b = self.diff[self.last * 6 + r as usize].decode(rc) as u8 ^ r;
        if b > N_CODE {
            return Err(SqzError::CorruptStream(format!("consensus base code {b}")));
        }
        self.last = (self.last * 6 + b as usize) % 36;
        Ok(b)
    }
}

/// Consensus without a reference: each new base is predicted from the
/// previously established ones.
pub struct SelfConsensusCodec {
    models: ContextBank<BaseModel>,
    last: u32,
}

impl Default for SelfConsensusCodec {
    fn default() -> Self {
        Self {
            models: ContextBank::new(SELF_CONS_CONTEXTS as usize),
            last: 0,
        }
    }
}

impl SelfConsensusCodec {
    pub fn encode(&mut self, rc: &mut RangeEncoder, b: u8) {
        self.models.get_mut(self.last as usize).encode(rc, b);
        self.last = (self.last * 5 + b as u32) % SELF_CONS_CONTEXTS;
    }

    pub fn decode(&mut self, rc: &mut RangeDecoder) -> u8 {
        let b = self.models.get_mut(self.last as usize).decode(rc);
        self.last = (self.last * 5 + b as u32) % SELF_CONS_CONTEXTS;
        b
    }
}

// ============================================================================
// Mapped reads
// ============================================================================
/// Where a base lands in the model banks
enum Slot {
    Aligned { rpos: u32, apos: usize },
    Inserted(u32),
    SoftClipped(u32),
}

/// Positions of every sequence base in CIGAR order.
fn walk(cigar: &[CigarOp], pos: u32, len: usize, reverse: bool, mut f: impl FnMut(Slot) -> Result<()>) -> Result<()> {
    let mut rpos = pos.wrapping_sub(1);
    let mut spos = 0usize;
    for op in cigar {
        if op.kind.is_aligned() {
            for _ in 0..op.len {
                let apos = if reverse { len.wrapping_sub(1 + spos) } else { spos };
                f(Slot::Aligned { rpos, apos })?;
                rpos = rpos.wrapping_add(1);
                spos += 1;
            }
            continue;
        }
        match op.kind {
            CigarKind::Deletion | CigarKind::Skip => rpos = rpos.wrapping_add(op.len),
            CigarKind::Insertion => {
                for remaining in (1..=op.len).rev() {
                    f(Slot::Inserted(rpos.wrapping_add(remaining)))?;
                    spos += 1;
                }
            }
            CigarKind::SoftClip => {
                for i in 0..op.len {
                    f(Slot::SoftClipped(rpos.wrapping_add(i)))?;
                    spos += 1;
                }
            }
            // H, P
            _ => {}
        }
    }
    Ok(())
}

pub struct MappedSeqCodec {
    bitmap: ConsensusBitmap,
    ref_pos: ContextBank<BaseModel>,
    ins_pos: ContextBank<BaseModel>,
    sclip_pos: ContextBank<BaseModel>,
    window_mask: u32,
    consensus: ConsensusCodec,
    self_consensus: SelfConsensusCodec,
    reference: Option<ReferenceSource>,
    /// Coordinates whose consensus was established
    pub consensus_bases: u64,
}

impl MappedSeqCodec {
    pub fn new(params: ModelParams, reference: Option<ReferenceSource>) -> Self {
        let window = 1usize << params.model_window_bits;
        Self {
            bitmap: ConsensusBitmap::new(params.consensus_span_bits),
            ref_pos: ContextBank::new(window),
            ins_pos: ContextBank::new(window),
            sclip_pos: ContextBank::new(window),
            window_mask: (window - 1) as u32,
            consensus: ConsensusCodec::default(),
            self_consensus: SelfConsensusCodec::default(),
            reference,
            consensus_bases: 0,
        }
    }

    /// Forget established coordinates; called when the reference changes.
    pub fn reference_changed(&mut self) {
        self.bitmap.clear();
    }

    /// `cigar` must cover exactly `seq.len()` query bases.
    pub fn encode(
        &mut self,
        rc: &mut RangeEncoder,
        rname: &[u8],
        pos: u32,
        cigar: &[CigarOp],
        seq: &[u8],
        reverse: bool,
    ) -> Result<()> {
        let mut spos = 0;
        walk(cigar, pos, seq.len(), reverse, |slot| {
            let c = base_code(seq[spos]);
            spos += 1;
            match slot {
                Slot::Aligned { rpos, apos } => {
                    let model_idx = (rpos & self.window_mask) as usize;
                    if self.bitmap.get(rpos) {
                        self.ref_pos.get_mut(model_idx).encode(rc, c);
                        return Ok(());
                    }
                    self.bitmap.set(rpos);
                    self.consensus_bases += 1;
                    let r = match self.reference.as_mut() {
                        Some(refs) => {
                            let r = refs.base(rname, rpos.wrapping_add(1))?;
                            self.consensus.encode(rc, apos, c, r);
                            r
                        }
                        None => {
                            self.self_consensus.encode(rc, c);
                            c
                        }
                    };
                    self.ref_pos.get_mut(model_idx).reset(c, r);
                }
                Slot::Inserted(k) => self.ins_pos.get_mut((k & self.window_mask) as usize).encode(rc, c),
                Slot::SoftClipped(k) => self.sclip_pos.get_mut((k & self.window_mask) as usize).encode(rc, c),
            }
            Ok(())
        })
    }

    pub fn decode(
        &mut self,
        rc: &mut RangeDecoder,
        rname: &[u8],
        pos: u32,
        cigar: &[CigarOp],
        len: usize,
        reverse: bool,
    ) -> Result<Vec<u8>> {
        let mut seq = Vec::with_capacity(len);
        walk(cigar, pos, len, reverse, |slot| {
            let c = match slot {
                Slot::Aligned { rpos, apos } => {
                    let model_idx = (rpos & self.window_mask) as usize;
                    if self.bitmap.get(rpos) {
                        self.ref_pos.get_mut(model_idx).decode(rc)
                    } else {
                        self.bitmap.set(rpos);
                        self.consensus_bases += 1;
                        let (c, r) = match self.reference.as_mut() {
                            Some(refs) => {
                                let r = refs.base(rname, rpos.wrapping_add(1))?;
                                (self.consensus.decode(rc, apos, r)?, r)
                            }
                            None => {
                                let c = self.self_consensus.decode(rc);
                                (c, c)
                            }
                        };
                        self.ref_pos.get_mut(model_idx).reset(c, r);
                        c
                    }
                }
                Slot::Inserted(k) => self.ins_pos.get_mut((k & self.window_mask) as usize).decode(rc),
                Slot::SoftClipped(k) => self.sclip_pos.get_mut((k & self.window_mask) as usize).decode(rc),
            };
            seq.push(CODE_TO_BASE[c as usize]);
            Ok(())
        })?;
        if seq.len() != len {
            return Err(SqzError::CorruptStream(format!(
                "CIGAR yields {} bases for a read of {len}",
                seq.len()
            )));
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reference::pack_bases;
    use crate::io::sam::parse_cigar;
    use tempfile::TempDir;

    #[test]
    fn test_bitmap_set_get_clear() {
        let mut bm = ConsensusBitmap::new(20);
        assert!(!bm.get(5));
        bm.set(5);
        bm.set(1000);
        assert!(bm.get(5) && bm.get(1000));
        // keyed modulo the span
        assert!(bm.get(1000 + (1 << 20)));
        bm.clear();
        assert!(!bm.get(5) && !bm.get(1000));
        bm.clear();
    }

    #[test]
    fn test_unmapped_n_restored_by_quality() {
        let seq = b"ACGTNACGTTTTNNA";
        let qual = [30, 30, 30, 30, 0, 30, 30, 30, 30, 30, 30, 30, 0, 0, 30];
        let mut enc = RangeEncoder::new();
        UnmappedSeqCodec::default().encode(&mut enc, seq);
        let data = enc.finish();
        let mut dec = RangeDecoder::new(&data);
        assert_eq!(UnmappedSeqCodec::default().decode(&mut dec, &qual).unwrap(), seq.to_vec());
    }

    #[test]
    fn test_consensus_codec_round_trip() {
        let pairs: Vec<(usize, u8, u8)> = (0..500).map(|i| (i % 150, ((i * 7) % 5) as u8, (i % 4) as u8)).collect();
        let mut enc = RangeEncoder::new();
        let mut codec = ConsensusCodec::default();
        for &(apos, b, r) in &pairs {
            codec.encode(&mut enc, apos, b, r);
        }
        let data = enc.finish();
        let mut dec = RangeDecoder::new(&data);
        let mut codec = ConsensusCodec::default();
        for &(apos, b, r) in &pairs {
            assert_eq!(codec.decode(&mut dec, apos, r).unwrap(), b);
        }
    }

    struct Read {
        pos: u32,
        cigar: &'static str,
        seq: &'static [u8],
        reverse: bool,
        new_ref: bool,
    }

    fn mapped_round_trip(reads: &[Read], reference: Option<&TempDir>) {
        let params = ModelParams { model_window_bits: 10, ..ModelParams::default() };
        let refs = || reference.map(|d| ReferenceSource::new(d.path()));

        let mut enc = RangeEncoder::new();
        let mut codec = MappedSeqCodec::new(params, refs());
        for r in reads {
            if r.new_ref {
                codec.reference_changed();
            }
            let cigar = parse_cigar(r.cigar.as_bytes(), 1).unwrap();
            codec.encode(&mut enc, b"chr1", r.pos, &cigar, r.seq, r.reverse).unwrap();
        }
        let data = enc.finish();

        let mut dec = RangeDecoder::new(&data);
        let mut codec = MappedSeqCodec::new(params, refs());
        for r in reads {
            if r.new_ref {
                codec.reference_changed();
            }
            let cigar = parse_cigar(r.cigar.as_bytes(), 1).unwrap();
            let seq = codec.decode(&mut dec, b"chr1", r.pos, &cigar, r.seq.len(), r.reverse).unwrap();
            assert_eq!(seq, r.seq);
        }
    }

    fn reads() -> Vec<Read> {
        vec![
            Read { pos: 100, cigar: "4M", seq: b"ACGT", reverse: false, new_ref: true },
            Read { pos: 101, cigar: "4M", seq: b"CGTA", reverse: false, new_ref: false },
            Read { pos: 98, cigar: "2S3M1I2M2D3M", seq: b"TTACGGTANNC", reverse: true, new_ref: false },
            Read { pos: 1030, cigar: "3M100N3=1X", seq: b"GATTACA", reverse: false, new_ref: false },
            Read { pos: 100, cigar: "2H4M", seq: b"ACGA", reverse: false, new_ref: true },
        ]
    }

    #[test]
    fn test_mapped_self_consensus() {
        mapped_round_trip(&reads(), None);
    }

    #[test]
    fn test_mapped_with_reference() {
        let dir = TempDir::new().unwrap();
        let chr1: Vec<u8> = b"ACGT".iter().cycle().take(2000).copied().collect();
        std::fs::write(dir.path().join("chr1.fb"), pack_bases(&chr1)).unwrap();
        mapped_round_trip(&reads(), Some(&dir));
    }

    #[test]
    fn test_missing_reference_fails() {
        let dir = TempDir::new().unwrap();
        let mut codec = MappedSeqCodec::new(ModelParams::default(), Some(ReferenceSource::new(dir.path())));
        let mut enc = RangeEncoder::new();
        let cigar = parse_cigar(b"2M", 1).unwrap();
        assert!(matches!(
            codec.encode(&mut enc, b"chrQ", 1, &cigar, b"AC", false),
            Err(SqzError::Reference { .. })
        ));
    }
}
