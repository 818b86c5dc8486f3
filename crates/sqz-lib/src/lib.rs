//! Lossless, reference-aware compression of SAM/BAM alignment records with
//! a range coder and adaptive context models.

pub mod cli;
pub mod compression;
pub mod error;
pub mod io;

pub use compression::{compress, decompress};
