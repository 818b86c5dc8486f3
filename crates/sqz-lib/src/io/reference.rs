//! 2-bit packed reference sequences (`<dir>/<refname>.fb`).
//!
//! Four bases per byte, least significant pair first, A=0 C=1 G=2 T=3.
//! Only the reference currently being coded is held in memory.

use crate::error::{Result, SqzError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const REFERENCE_EXTENSION: &str = "fb";

pub struct ReferenceSource {
    dir: PathBuf,
    current: Option<Vec<u8>>,
    packed: Vec<u8>,
    warned_past_end: bool,
}

impl ReferenceSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            current: None,
            packed: Vec::new(),
            warned_past_end: false,
        }
    }

    pub fn path_for(&self, rname: &[u8]) -> PathBuf {
        self.dir
            .join(format!("{}.{REFERENCE_EXTENSION}", String::from_utf8_lossy(rname)))
    }

    fn load(&mut self, rname: &[u8]) -> Result<()> {
        let path = self.path_for(rname);
        debug!("Loading reference {}", path.display());
        self.packed = std::fs::read(&path).map_err(|source| SqzError::Reference { path, source })?;
        self.current = Some(rname.to_vec());
        self.warned_past_end = false;
        Ok(())
    }

    /// Base code (0..=3) at 1-based `pos` of `rname`, loading the file when
    /// the reference changes. Positions past the end of the file read as A.
    pub fn base(&mut self, rname: &[u8], pos: u32) -> Result<u8> {
        if self.current.as_deref() != Some(rname) {
            self.load(rname)?;
        }
        let p = pos.saturating_sub(1) as usize;
        match self.packed.get(p >> 2) {
            Some(&byte) => Ok((byte >> (2 * (p & 3))) & 3),
            None => {
                if !self.warned_past_end {
                    warn!(
                        "position {} is beyond the end of reference {}",
                        pos,
                        String::from_utf8_lossy(rname)
                    );
                    self.warned_past_end = true;
                }
                Ok(0)
            }
        }
    }
}

/// Pack ASCII bases into the `.fb` layout; non-ACGT becomes A.
pub fn pack_bases(seq: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; seq.len().div_ceil(4)];
    for (i, &b) in seq.iter().enumerate() {
        let code = match b.to_ascii_uppercase() {
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => 0,
        };
        out[i >> 2] |= code << (2 * (i & 3));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pack_layout() {
        // A C G T -> 0b11_10_01_00
        assert_eq!(pack_bases(b"ACGT"), vec![0xe4]);
        assert_eq!(pack_bases(b"TTTTG"), vec![0xff, 0x02]);
    }

    #[test]
    fn test_lookup_and_switch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("chr1.fb"), pack_bases(b"ACGTTGCA")).unwrap();
        std::fs::write(dir.path().join("chr2.fb"), pack_bases(b"GG")).unwrap();

        let mut refs = ReferenceSource::new(dir.path());
        let bases: Vec<u8> = (1..=8).map(|p| refs.base(b"chr1", p).unwrap()).collect();
        assert_eq!(bases, vec![0, 1, 2, 3, 3, 2, 1, 0]);
        assert_eq!(refs.base(b"chr2", 1).unwrap(), 2);
        // past the end of the file
        assert_eq!(refs.base(b"chr2", 100).unwrap(), 0);
        assert_eq!(refs.base(b"chr1", 4).unwrap(), 3);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let mut refs = ReferenceSource::new(dir.path());
        assert!(matches!(refs.base(b"chrZ", 1), Err(SqzError::Reference { .. })));
    }
}
