//! Large-zip container parsing.
//!
//! A large-zip file starts with a fixed header: the ASCII magic, then eight
//! little-endian start offsets and eight little-endian lengths. Sub-images
//! are raw ZIP files concatenated at the given offsets. A length of zero or
//! less terminates the sequence.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use super::CompoundError;
use crate::protocol::constants::{LARGEZIP_HEADER_SIZE, LARGEZIP_MAGIC, LARGEZIP_MAX_SUBIMAGES};

/// In-memory copy of the large-zip index.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeZipHeader {
    pub starts: [u32; LARGEZIP_MAX_SUBIMAGES],
    pub lengths: [i32; LARGEZIP_MAX_SUBIMAGES],
}

impl LargeZipHeader {
    pub const SIZE: usize = LARGEZIP_HEADER_SIZE;

    /// Read and validate the header at the reader's current position.
    ///
    /// On any failure the reader is rewound to its pre-call position.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self, CompoundError> {
        let origin = reader.stream_position()?;

        let mut raw = [0u8; Self::SIZE];
        if let Err(e) = reader.read_exact(&mut raw) {
            reader.seek(SeekFrom::Start(origin))?;
            return Err(e.into());
        }
        if &raw[..LARGEZIP_MAGIC.len()] != LARGEZIP_MAGIC {
            reader.seek(SeekFrom::Start(origin))?;
            return Err(CompoundError::BadMagic);
        }

        let mut cursor = Cursor::new(&raw[LARGEZIP_MAGIC.len()..]);
        let mut header = Self::default();
        for start in header.starts.iter_mut() {
            *start = cursor.read_u32::<LittleEndian>()?;
        }
        for length in header.lengths.iter_mut() {
            *length = cursor.read_i32::<LittleEndian>()?;
        }
        Ok(header)
    }
}

/// Cursor state for one large-zip flash session.
pub struct LargeZipState {
    file: File,
    header: LargeZipHeader,
    index: usize,
    current: Option<Arc<[u8]>>,
}

impl fmt::Debug for LargeZipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeZipState")
            .field("header", &self.header)
            .field("index", &self.index)
            .finish()
    }
}

impl LargeZipState {
    /// Open a container and validate its header.
    pub fn open(path: &Path) -> Result<Self, CompoundError> {
        let mut file = File::open(path)?;
        let header = LargeZipHeader::read_from(&mut file)?;
        debug!(path = %path.display(), "opened large-zip container");
        Ok(Self {
            file,
            header,
            index: 0,
            current: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn advance_index(&mut self) {
        self.index += 1;
    }

    /// Read the sub-image at the current cursor, replacing the previously
    /// held buffer. `None` when the cursor ran past the index or hit a
    /// zero-length entry.
    pub(crate) fn next_subimage(&mut self) -> Result<Option<(String, Arc<[u8]>)>, CompoundError> {
        if self.index >= LARGEZIP_MAX_SUBIMAGES {
            return Ok(None);
        }
        let length = self.header.lengths[self.index];
        if length <= 0 {
            return Ok(None);
        }
        let start = self.header.starts[self.index];

        self.file.seek(SeekFrom::Start(start as u64))?;
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CompoundError::TruncatedSubImage {
                    index: self.index,
                    expected: length as usize,
                }
            } else {
                CompoundError::Io(e)
            }
        })?;

        debug!(
            index = self.index,
            start,
            length,
            "read large-zip sub-image"
        );
        let data: Arc<[u8]> = buf.into();
        self.current = Some(data.clone());
        Ok(Some((format!("{}-zip", self.index), data)))
    }
}
