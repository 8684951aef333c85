//! Compound-image containers.
//!
//! Two container formats feed the flash queue one sub-image at a time:
//! a multi-zip (a ZIP archive of `zip_<n>.zip` entries) and a large-zip
//! (raw concatenated ZIPs behind a fixed index header).

pub mod largezip;
pub mod multizip;

pub use largezip::{LargeZipHeader, LargeZipState};
pub use multizip::MultiZipState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompoundError {
    #[error("not a large-zip container (bad magic)")]
    BadMagic,

    #[error("sub-image {index} truncated: expected {expected} bytes")]
    TruncatedSubImage { index: usize, expected: usize },

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// State of one compound flash, owned by the engine for the duration of the
/// iteration. The container kind never changes within a session.
#[derive(Debug)]
pub enum CompoundSession {
    MultiZip(MultiZipState),
    LargeZip(LargeZipState),
}

impl CompoundSession {
    /// Zero-based cursor into the sub-image stream.
    pub fn current_index(&self) -> usize {
        match self {
            CompoundSession::MultiZip(s) => s.index(),
            CompoundSession::LargeZip(s) => s.index(),
        }
    }

    pub(crate) fn advance_index(&mut self) {
        match self {
            CompoundSession::MultiZip(s) => s.advance_index(),
            CompoundSession::LargeZip(s) => s.advance_index(),
        }
    }
}
