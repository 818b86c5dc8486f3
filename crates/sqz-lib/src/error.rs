//! Error taxonomy for reading, coding and writing alignment streams.
//!
//! Every variant is fatal for the run: a range-coded stream is only
//! meaningful as a perfectly ordered whole, so nothing is skipped or
//! resynchronised.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sqz operations
pub type Result<T> = std::result::Result<T, SqzError>;

#[derive(Error, Debug)]
pub enum SqzError {
    /// Underlying read/write failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Input ended part-way through a structure
    #[error("truncated input: {what}")]
    Truncated {
        /// The structure being read when input ran out
        what: &'static str,
    },

    /// Malformed gzip or BGZF framing
    #[error("invalid gzip/BGZF data: {0}")]
    InvalidGzip(String),

    /// Malformed BAM binary layout
    #[error("invalid BAM data: {0}")]
    InvalidBam(String),

    /// Malformed SAM text (header or record line)
    #[error("SAM line {line}: {message}")]
    Sam {
        /// 1-based line number in the SAM text
        line: u64,
        /// What was wrong with the line
        message: String,
    },

    /// Auxiliary field with a type code that has no binary representation
    #[error("unknown auxiliary type '{}' for tag {tag}", *code as char)]
    UnknownAuxType {
        /// Two-letter tag
        tag: String,
        /// Offending type code
        code: u8,
    },

    /// A record that cannot be represented by the field codecs
    #[error("record '{name}': {message}")]
    InvalidRecord {
        /// Read name of the offending record
        name: String,
        /// What was wrong with it
        message: String,
    },

    /// A value beyond a fixed format limit
    #[error("{what} of {value} exceeds the maximum of {max}")]
    LimitExceeded {
        /// The quantity that was too large
        what: &'static str,
        /// The observed value
        value: usize,
        /// The largest supported value
        max: usize,
    },

    /// Reference sequence file could not be loaded
    #[error("failed to load reference {}: {source}", path.display())]
    Reference {
        /// Path of the `.fb` file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Compressed stream decoded to an impossible value
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),
}

impl SqzError {
    pub(crate) fn sam(line: u64, message: impl Into<String>) -> Self {
        SqzError::Sam { line, message: message.into() }
    }

    pub(crate) fn record(name: &[u8], message: impl Into<String>) -> Self {
        SqzError::InvalidRecord {
            name: String::from_utf8_lossy(name).into_owned(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sam_error_names_line() {
        let err = SqzError::sam(42, "unknown CIGAR operation 'Q'");
        let msg = format!("{err}");
        assert!(msg.contains("line 42"));
        assert!(msg.contains("'Q'"));
    }

    #[test]
    fn test_unknown_aux_type_display() {
        let err = SqzError::UnknownAuxType { tag: "XY".to_string(), code: b'q' };
        assert_eq!(format!("{err}"), "unknown auxiliary type 'q' for tag XY");
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = SqzError::LimitExceeded { what: "read length", value: 70_000, max: 65_535 };
        let msg = format!("{err}");
        assert!(msg.contains("70000"));
        assert!(msg.contains("65535"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: SqzError = io.into();
        assert!(matches!(err, SqzError::Io(_)));
    }
}
