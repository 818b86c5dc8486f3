//! Reference table and read-group lookup built from a SAM/BAM header.

use crate::error::{Result, SqzError};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: Vec<u8>,
    /// Declared length; 0 when the reference was first seen in a record
    pub len: u32,
}

/// Ordered (name, length) list with a name → index map.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    refs: Vec<Reference>,
    index: FxHashMap<Vec<u8>, usize>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reference, returning its index. A name already present keeps
    /// its first index.
    pub fn push(&mut self, name: &[u8], len: u32) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.refs.len();
        self.refs.push(Reference { name: name.to_vec(), len });
        self.index.insert(name.to_vec(), id);
        id
    }

    /// Look up `name`, registering it with length 0 when unknown.
    pub fn resolve_or_insert(&mut self, name: &[u8]) -> usize {
        match self.index.get(name) {
            Some(&id) => id,
            None => self.push(name, 0),
        }
    }

    pub fn get(&self, id: usize) -> Option<&Reference> {
        self.refs.get(id)
    }

    pub fn id_of(&self, name: &[u8]) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.refs.iter()
    }
}

/// Tags of one `@RG` line, in file order, excluding `ID`.
pub type ReadGroupTags = Vec<(String, String)>;

#[derive(Debug, Clone, Default)]
pub struct Header {
    pub text: String,
    pub references: ReferenceTable,
    pub read_groups: FxHashMap<String, ReadGroupTags>,
}

impl Header {
    pub fn read_group(&self, id: &str) -> Option<&ReadGroupTags> {
        self.read_groups.get(id)
    }

    /// Parse one `@`-prefixed header line.
    ///
    /// `@SQ` lines add references unless `with_sq` is false (BAM headers carry
    /// their authoritative reference list in binary form). `@RG` lines feed the
    /// read-group table. Other record types are kept only as text.
    pub(crate) fn parse_line(&mut self, line: &str, line_no: u64, with_sq: bool) -> Result<()> {
        let mut fields = line.split('\t');
        let kind = fields.next().unwrap_or("");
        if kind.len() != 3 || !kind.starts_with('@') {
            return Err(SqzError::sam(line_no, format!("malformed header record type '{kind}'")));
        }
        match kind {
            "@SQ" if with_sq => {
                let mut name = None;
                let mut len = None;
                for field in fields {
                    let (tag, value) = split_tag(field, line_no)?;
                    match tag {
                        "SN" => name = Some(value),
                        "LN" => {
                            len = Some(value.parse::<u32>().map_err(|_| {
                                SqzError::sam(line_no, format!("invalid @SQ LN value '{value}'"))
                            })?)
                        }
                        _ => {}
                    }
                }
                let name = name.ok_or_else(|| SqzError::sam(line_no, "@SQ line without SN"))?;
                let len = len.ok_or_else(|| SqzError::sam(line_no, "@SQ line without LN"))?;
                self.references.push(name.as_bytes(), len);
            }
            "@RG" => {
                let mut id = None;
                let mut tags = Vec::new();
                for field in fields {
                    let (tag, value) = split_tag(field, line_no)?;
                    if tag == "ID" {
                        id = Some(value.to_string());
                    } else {
                        tags.push((tag.to_string(), value.to_string()));
                    }
                }
                let id = id.ok_or_else(|| SqzError::sam(line_no, "@RG line without ID"))?;
                self.read_groups.insert(id, tags);
            }
            "@CO" => {}
            _ => {
                for field in fields {
                    split_tag(field, line_no)?;
                }
            }
        }
        Ok(())
    }

    /// Parse a full header text block (the BAM `text` field).
    pub(crate) fn parse_text(&mut self, text: &str, with_sq: bool) -> Result<()> {
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.parse_line(line, i as u64 + 1, with_sq)?;
        }
        Ok(())
    }
}

fn split_tag(field: &str, line_no: u64) -> Result<(&str, &str)> {
    let bytes = field.as_bytes();
    if bytes.len() < 3 || bytes[2] != b':' {
        return Err(SqzError::sam(line_no, format!("malformed header field '{field}'")));
    }
    Ok((&field[..2], &field[3..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_table_lookup() {
        let mut refs = ReferenceTable::new();
        assert_eq!(refs.push(b"chr1", 1000), 0);
        assert_eq!(refs.push(b"chr2", 500), 1);
        assert_eq!(refs.push(b"chr1", 7), 0);
        assert_eq!(refs.id_of(b"chr2"), Some(1));
        assert_eq!(refs.resolve_or_insert(b"chrUn"), 2);
        assert_eq!(refs.get(2).unwrap().len, 0);
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_parse_header_text() {
        let mut header = Header::default();
        let text = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:248956422\n@RG\tID:rg1\tSM:sample\tPL:ILLUMINA\n@CO\tfree text: here\n";
        header.parse_text(text, true).unwrap();
        assert_eq!(header.references.len(), 1);
        assert_eq!(header.references.get(0).unwrap().len, 248_956_422);
        let rg = header.read_group("rg1").unwrap();
        assert_eq!(rg[0], ("SM".to_string(), "sample".to_string()));
        assert_eq!(rg.len(), 2);
    }

    #[test]
    fn test_malformed_sq_rejected() {
        let mut header = Header::default();
        assert!(header.parse_line("@SQ\tSN:chr1", 3, true).is_err());
        assert!(header.parse_line("@SQ\tSN:chr1\tLN:abc", 3, true).is_err());
        let err = header.parse_line("@SQ\tSNchr1\tLN:5", 9, true).unwrap_err();
        assert!(format!("{err}").contains("line 9"));
    }

    #[test]
    fn test_bam_text_skips_sq() {
        let mut header = Header::default();
        header.parse_text("@SQ\tSN:chr1\tLN:10\n", false).unwrap();
        assert!(header.references.is_empty());
    }
}
