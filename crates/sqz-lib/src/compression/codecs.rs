//! Record-level codec driver.
//!
//! `CodecState` owns every model for one stream. Encoder and decoder both
//! walk `FIELD_ORDER`, so the order in which fields reach the range coder
//! is defined in exactly one place.

use super::cigar::{self, CigarCodec};
use super::fields::{FlagsCodec, LengthCodec, MapqCodec, PositionCodec, RefNameCodec};
use super::quality_ctx::{QualityCodec, MAX_QUAL};
use super::range_coder::{RangeDecoder, RangeEncoder};
use super::read_name::{NameCodec, MAX_NAME_LEN};
use super::sequence::{MappedSeqCodec, UnmappedSeqCodec};
use crate::cli::ModelParams;
use crate::error::{Result, SqzError};
use crate::io::record::{AlignmentRecord, DecodedRecord, FLAG_UNMAPPED};
use crate::io::reference::ReferenceSource;

/// Longest read the length codec can carry
pub const MAX_READ_LEN: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Length,
    Flags,
    Position,
    /// Mapped records only
    RefName,
    /// Mapped records only
    Cigar,
    Mapq,
    Name,
    Quality,
    Sequence,
}

/// Wire order of the fields within a record. Changing it breaks every
/// existing stream.
pub const FIELD_ORDER: [Field; 9] = [
    Field::Length,
    Field::Flags,
    Field::Position,
    Field::RefName,
    Field::Cigar,
    Field::Mapq,
    Field::Name,
    Field::Quality,
    Field::Sequence,
];

/// Counters gathered while coding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub records: u64,
    pub mapped: u64,
    pub bases: u64,
    pub reference_switches: u64,
}

pub struct CodecState {
    length: LengthCodec,
    flags: FlagsCodec,
    position: PositionCodec,
    rname: RefNameCodec,
    cigar: CigarCodec,
    mapq: MapqCodec,
    name: NameCodec,
    quality: QualityCodec,
    unmapped_seq: UnmappedSeqCodec,
    mapped_seq: MappedSeqCodec,
    pub stats: CodecStats,
}

/// Check a record fits the field codecs. `rname` is the resolved
/// reference name of a mapped record.
pub fn validate_record(rec: &AlignmentRecord, rname: Option<&[u8]>) -> Result<()> {
    if rec.seq.is_empty() {
        return Err(SqzError::record(&rec.name, "empty SEQ"));
    }
    if rec.seq.len() > MAX_READ_LEN {
        return Err(SqzError::LimitExceeded { what: "read length", value: rec.seq.len(), max: MAX_READ_LEN });
    }
    if rec.name.len() > MAX_NAME_LEN {
        return Err(SqzError::LimitExceeded { what: "read name length", value: rec.name.len(), max: MAX_NAME_LEN });
    }
    if rec.qual.len() > rec.seq.len() {
        return Err(SqzError::record(&rec.name, "QUAL longer than SEQ"));
    }
    if let Some(&q) = rec.qual.iter().find(|&&q| q > MAX_QUAL) {
        return Err(SqzError::record(&rec.name, format!("quality {q} above {MAX_QUAL}")));
    }
    if rec.is_unmapped() {
        return Ok(());
    }
    let rname = rname.ok_or_else(|| SqzError::record(&rec.name, "mapped record without a reference"))?;
    if rname.contains(&0) {
        return Err(SqzError::record(&rec.name, "NUL in reference name"));
    }
    if rec.pos == 0 {
        return Err(SqzError::record(&rec.name, "mapped record without a position"));
    }
    cigar::validate(&rec.cigar, rec.seq.len()).map_err(|msg| SqzError::record(&rec.name, msg))
}

impl CodecState {
    pub fn new(params: ModelParams, reference: Option<ReferenceSource>) -> Self {
        Self {
            length: LengthCodec::default(),
            flags: FlagsCodec::default(),
            position: PositionCodec::default(),
            rname: RefNameCodec::default(),
            cigar: CigarCodec::default(),
            mapq: MapqCodec::default(),
            name: NameCodec::default(),
            quality: QualityCodec::default(),
            unmapped_seq: UnmappedSeqCodec::default(),
            mapped_seq: MappedSeqCodec::new(params, reference),
            stats: CodecStats::default(),
        }
    }

    /// Validate and encode one record.
    pub fn encode_record(&mut self, rc: &mut RangeEncoder, rec: &AlignmentRecord, rname: Option<&[u8]>) -> Result<()> {
        validate_record(rec, rname)?;
        let len = rec.seq.len();
        let mapped = !rec.is_unmapped();
        let reverse = rec.is_reverse();
        let rname = rname.unwrap_or_default();

        for field in FIELD_ORDER {
            match field {
                Field::Length => self.length.encode(rc, len as u32),
                Field::Flags => self.flags.encode(rc, rec.flag),
                Field::Position => self.position.encode(rc, rec.pos),
                Field::RefName if mapped => {
                    if self.rname.encode(rc, rname) {
                        self.mapped_seq.reference_changed();
                        self.stats.reference_switches += 1;
                    }
                }
                Field::Cigar if mapped => self.cigar.encode(rc, &rec.cigar, len as u32),
                Field::RefName | Field::Cigar => {}
                Field::Mapq => self.mapq.encode(rc, rec.mapq),
                Field::Name => self.name.encode(rc, &rec.name),
                Field::Quality => self.quality.encode(rc, &rec.qual, len, reverse),
                Field::Sequence if mapped => {
                    self.mapped_seq.encode(rc, rname, rec.pos, &rec.cigar, &rec.seq, reverse)?
                }
                Field::Sequence => self.unmapped_seq.encode(rc, &rec.seq),
            }
        }

        self.stats.records += 1;
        self.stats.mapped += mapped as u64;
        self.stats.bases += len as u64;
        Ok(())
    }

    /// Encode the end-of-stream marker.
    pub fn encode_end(&mut self, rc: &mut RangeEncoder) {
        self.length.encode(rc, 0);
    }

    /// Decode the next record, or `None` at the end marker.
    pub fn decode_record(&mut self, rc: &mut RangeDecoder) -> Result<Option<DecodedRecord>> {
        let mut rec = DecodedRecord::default();
        let mut len = 0usize;

        for field in FIELD_ORDER {
            let mapped = rec.flag & FLAG_UNMAPPED == 0;
            match field {
                Field::Length => {
                    len = self.length.decode(rc) as usize;
                    if len == 0 {
                        return Ok(None);
                    }
                }
                Field::Flags => rec.flag = self.flags.decode(rc),
                Field::Position => rec.pos = self.position.decode(rc),
                Field::RefName if mapped => {
                    let (name, changed) = self.rname.decode(rc)?;
                    rec.rname = Some(name.to_vec());
                    if changed {
                        self.mapped_seq.reference_changed();
                        self.stats.reference_switches += 1;
                    }
                }
                Field::Cigar if mapped => rec.cigar = self.cigar.decode(rc, len as u32)?,
                Field::RefName | Field::Cigar => {}
                Field::Mapq => rec.mapq = self.mapq.decode(rc),
                Field::Name => rec.name = self.name.decode(rc)?,
                Field::Quality => rec.qual = self.quality.decode(rc, len, rec.is_reverse()),
                Field::Sequence if mapped => {
                    let rname = rec.rname.as_deref().unwrap_or_default();
                    rec.seq = self.mapped_seq.decode(rc, rname, rec.pos, &rec.cigar, len, rec.is_reverse())?;
                }
                Field::Sequence => rec.seq = self.unmapped_seq.decode(rc, &rec.qual)?,
            }
        }

        self.stats.records += 1;
        self.stats.mapped += rec.rname.is_some() as u64;
        self.stats.bases += len as u64;
        Ok(Some(rec))
    }

    /// Reference coordinates whose consensus has been established
    pub fn consensus_bases(&self) -> u64 {
        self.mapped_seq.consensus_bases
    }

    /// Quality contexts touched so far
    pub fn quality_contexts(&self) -> usize {
        self.quality.contexts_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::record::{CigarKind, CigarOp, FLAG_REVERSE};
    use crate::io::sam::parse_cigar;

    fn mapped(name: &str, flag: u16, pos: u32, cigar: &str, seq: &str, qual: &[u8]) -> AlignmentRecord {
        AlignmentRecord {
            name: name.as_bytes().to_vec(),
            flag,
            ref_id: Some(0),
            pos,
            mapq: 60,
            cigar: parse_cigar(cigar.as_bytes(), 1).unwrap(),
            seq: seq.as_bytes().to_vec(),
            qual: qual.to_vec(),
            ..AlignmentRecord::default()
        }
    }

    fn unmapped(name: &str, seq: &str, qual: &[u8]) -> AlignmentRecord {
        AlignmentRecord {
            name: name.as_bytes().to_vec(),
            flag: FLAG_UNMAPPED,
            seq: seq.as_bytes().to_vec(),
            qual: qual.to_vec(),
            ..AlignmentRecord::default()
        }
    }

    fn records() -> Vec<(AlignmentRecord, Option<&'static [u8]>)> {
        vec![
            (mapped("r1", 0, 100, "4M", "ACGT", &[40; 4]), Some(&b"chr1"[..])),
            (mapped("r2", FLAG_REVERSE, 101, "1S2M1I", "TCGA", &[30, 31, 32, 33]), Some(&b"chr1"[..])),
            (mapped("r3", 0, 5, "2M10N2M", "GGCC", &[20; 4]), Some(&b"chr2"[..])),
            (unmapped("r4", "ACNGT", &[30, 30, 0, 30, 30]), None),
            (mapped("r5", 0, 6, "4M", "GCCA", &[]), Some(&b"chr2"[..])),
            (mapped("r6", FLAG_REVERSE, 8, "5M", "CATTG", &[35, 36]), Some(&b"chr2"[..])),
        ]
    }

    #[test]
    fn test_encode_decode_trace_symmetry() {
        let params = ModelParams { model_window_bits: 12, ..ModelParams::default() };
        let mut enc = RangeEncoder::with_trace();
        let mut state = CodecState::new(params, None);
        let mut enc_traces = Vec::new();
        for (rec, rname) in records() {
            state.encode_record(&mut enc, &rec, rname).unwrap();
            enc_traces.push(enc.take_trace());
        }
        state.encode_end(&mut enc);
        assert_eq!(state.stats.records, 6);
        assert_eq!(state.stats.mapped, 5);
        assert_eq!(state.stats.reference_switches, 2);
        let data = enc.finish();

        let mut dec = RangeDecoder::with_trace(&data);
        let mut state = CodecState::new(params, None);
        for (i, (rec, rname)) in records().into_iter().enumerate() {
            let got = state.decode_record(&mut dec).unwrap().unwrap();
            assert_eq!(dec.take_trace(), enc_traces[i], "record {i}");
            assert_eq!(got.name, rec.name);
            assert_eq!(got.flag, rec.flag);
            assert_eq!(got.rname.as_deref(), rname);
            assert_eq!(got.mapq, rec.mapq);
            if rname.is_some() {
                assert_eq!(got.pos, rec.pos);
                assert_eq!(got.cigar, rec.cigar);
            }
            let mut qual = rec.qual.clone();
            qual.resize(rec.seq.len(), 0);
            assert_eq!(got.qual, qual);
            assert_eq!(got.seq, rec.seq);
        }
        assert!(state.decode_record(&mut dec).unwrap().is_none());
    }

    #[test]
    fn test_validation_failures() {
        let ok = mapped("r", 0, 1, "4M", "ACGT", &[30; 4]);
        assert!(validate_record(&ok, Some(b"chr1")).is_ok());

        let mut r = ok.clone();
        r.seq.clear();
        r.qual.clear();
        assert!(matches!(validate_record(&r, Some(&b"chr1"[..])), Err(SqzError::InvalidRecord { .. })));

        let mut r = ok.clone();
        r.name = vec![b'x'; 255];
        assert!(matches!(validate_record(&r, Some(&b"chr1"[..])), Err(SqzError::LimitExceeded { max: 254, .. })));

        let mut r = ok.clone();
        r.qual[2] = 95;
        assert!(validate_record(&r, Some(b"chr1")).is_err());

        let mut r = ok.clone();
        r.cigar = vec![CigarOp::new(CigarKind::Match, 5)];
        assert!(validate_record(&r, Some(b"chr1")).is_err());

        assert!(validate_record(&ok, None).is_err());
        assert!(validate_record(&ok, Some(b"ch\0r")).is_err());

        let mut r = ok.clone();
        r.pos = 0;
        assert!(validate_record(&r, Some(b"chr1")).is_err());

        let long = unmapped("r", &"A".repeat(70_000), &[]);
        assert!(matches!(validate_record(&long, None), Err(SqzError::LimitExceeded { value: 70_000, .. })));
    }

    #[test]
    fn test_end_marker_only() {
        let mut state = CodecState::new(ModelParams::default(), None);
        let mut enc = RangeEncoder::new();
        state.encode_end(&mut enc);
        let data = enc.finish();
        let mut dec = RangeDecoder::new(&data);
        let mut state = CodecState::new(ModelParams::default(), None);
        assert!(state.decode_record(&mut dec).unwrap().is_none());
    }
}
