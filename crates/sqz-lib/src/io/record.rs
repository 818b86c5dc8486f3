//! Canonical alignment record shared by the SAM and BAM readers.

/// Read is unmapped
pub const FLAG_UNMAPPED: u16 = 0x4;
/// Read aligned to the reverse strand
pub const FLAG_REVERSE: u16 = 0x10;

/// CIGAR operation, numbered as in the BAM encoding (`MIDNSHP=X`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CigarKind {
    Match = 0,
    Insertion = 1,
    Deletion = 2,
    Skip = 3,
    SoftClip = 4,
    HardClip = 5,
    Padding = 6,
    SequenceMatch = 7,
    SequenceMismatch = 8,
}

const CIGAR_LETTERS: &[u8; 9] = b"MIDNSHP=X";

impl CigarKind {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CigarKind::Match,
            1 => CigarKind::Insertion,
            2 => CigarKind::Deletion,
            3 => CigarKind::Skip,
            4 => CigarKind::SoftClip,
            5 => CigarKind::HardClip,
            6 => CigarKind::Padding,
            7 => CigarKind::SequenceMatch,
            8 => CigarKind::SequenceMismatch,
            _ => return None,
        })
    }

    pub fn from_letter(letter: u8) -> Option<Self> {
        CIGAR_LETTERS
            .iter()
            .position(|&l| l == letter)
            .and_then(|i| Self::from_code(i as u8))
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn letter(self) -> u8 {
        CIGAR_LETTERS[self as usize]
    }

    /// Consumes bases of the read sequence
    #[inline]
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Insertion
                | CigarKind::SoftClip
                | CigarKind::SequenceMatch
                | CigarKind::SequenceMismatch
        )
    }

    /// Aligned to a reference coordinate (M, =, X)
    #[inline]
    pub fn is_aligned(self) -> bool {
        matches!(self, CigarKind::Match | CigarKind::SequenceMatch | CigarKind::SequenceMismatch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Render a CIGAR as SAM text, `*` when empty.
pub fn format_cigar(cigar: &[CigarOp], out: &mut Vec<u8>) {
    if cigar.is_empty() {
        out.push(b'*');
        return;
    }
    for op in cigar {
        out.extend_from_slice(op.len.to_string().as_bytes());
        out.push(op.kind.letter());
    }
}

/// Sum of the lengths of query-consuming operations.
pub fn cigar_query_len(cigar: &[CigarOp]) -> u64 {
    cigar
        .iter()
        .filter(|op| op.kind.consumes_query())
        .map(|op| op.len as u64)
        .sum()
}

/// One alignment record.
///
/// Sequence bases are upper-case ASCII; qualities are raw Phred values
/// (no +33 offset). `pos` is 1-based with 0 meaning "no position".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlignmentRecord {
    pub name: Vec<u8>,
    pub flag: u16,
    /// Index into the header's reference table
    pub ref_id: Option<usize>,
    pub pos: u32,
    pub mapq: u8,
    pub cigar: Vec<CigarOp>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub mate_ref_id: Option<usize>,
    pub mate_pos: u32,
    pub template_len: i32,
    /// Auxiliary fields in BAM binary layout
    pub aux: Vec<u8>,
}

impl AlignmentRecord {
    #[inline]
    pub fn is_unmapped(&self) -> bool {
        self.flag & FLAG_UNMAPPED != 0
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.flag & FLAG_REVERSE != 0
    }
}

/// A record as reconstructed by the decoder: only the modelled fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedRecord {
    pub name: Vec<u8>,
    pub flag: u16,
    /// Reference name; `None` for unmapped records
    pub rname: Option<Vec<u8>>,
    pub pos: u32,
    pub mapq: u8,
    pub cigar: Vec<CigarOp>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl DecodedRecord {
    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.flag & FLAG_REVERSE != 0
    }
}

/// Base to model symbol: A=0 C=1 G=2 T=3, anything else N=4.
static BASE_CODE_LUT: [u8; 256] = {
    let mut t = [4u8; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

#[inline(always)]
pub fn base_code(b: u8) -> u8 {
    BASE_CODE_LUT[b as usize]
}

pub const CODE_TO_BASE: &[u8; 5] = b"ACGTN";

/// Reverse-complement in place; non-ACGT becomes N.
pub fn reverse_complement(seq: &mut [u8]) {
    seq.reverse();
    for b in seq.iter_mut() {
        *b = match *b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            _ => b'N',
        };
    }
}
