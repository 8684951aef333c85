//! Multi-zip container iteration.
//!
//! A multi-zip is an ordinary ZIP archive whose entries are themselves ZIP
//! payloads named `zip_0.zip`, `zip_1.zip`, ... — iteration halts at the
//! first absent index.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use super::CompoundError;

/// Cursor state for one multi-zip flash session.
pub struct MultiZipState {
    archive: ZipArchive<File>,
    index: usize,
    current: Option<Arc<[u8]>>,
}

impl fmt::Debug for MultiZipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiZipState")
            .field("entries", &self.archive.len())
            .field("index", &self.index)
            .finish()
    }
}

impl MultiZipState {
    /// Open the outer archive.
    pub fn open(path: &Path) -> Result<Self, CompoundError> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file)?;
        debug!(path = %path.display(), entries = archive.len(), "opened multi-zip container");
        Ok(Self {
            archive,
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

    /// Extract the entry at the current cursor into a fresh buffer,
    /// replacing the previously held one. `None` when the entry for the
    /// current index does not exist.
    pub(crate) fn next_entry(&mut self) -> Result<Option<(String, Arc<[u8]>)>, CompoundError> {
        let name = format!("zip_{}.zip", self.index);
        let buf = {
            let mut entry = match self.archive.by_name(&name) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            buf
        };

        debug!(%name, size = buf.len(), "extracted sub-image");
        let data: Arc<[u8]> = buf.into();
        self.current = Some(data.clone());
        Ok(Some((name, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_multizip(entries: &[&[u8]]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (i, data) in entries.iter().enumerate() {
            writer.start_file(format!("zip_{i}.zip"), options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[test]
    fn test_entries_extracted_in_index_order() {
        let file = build_multizip(&[b"first payload", b"second payload"]);
        let mut state = MultiZipState::open(file.path()).unwrap();

        let (name, data) = state.next_entry().unwrap().unwrap();
        assert_eq!(name, "zip_0.zip");
        assert_eq!(&data[..], b"first payload");

        state.advance_index();
        let (name, data) = state.next_entry().unwrap().unwrap();
        assert_eq!(name, "zip_1.zip");
        assert_eq!(&data[..], b"second payload");

        state.advance_index();
        assert!(state.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_missing_index_halts_iteration() {
        let file = build_multizip(&[b"only one"]);
        let mut state = MultiZipState::open(file.path()).unwrap();
        state.advance_index();
        assert!(state.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_not_a_zip_fails_to_open() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"garbage, not an archive").unwrap();
        assert!(matches!(
            MultiZipState::open(file.path()),
            Err(CompoundError::Zip(_))
        ));
    }
}
