//! Term directory: `TermId -> head handle` and `TermId -> tail handle`.
//!
//! Both maps live in one header file next to the blob store:
//!
//! ```text
//! magic "TDXDIR01", signature:i64, clean:u8, head section, tail section
//! ```
//!
//! The clean byte is cleared on open and set again by [`TermDirectory::close`].
//! A directory that was not closed cleanly is treated as lost and rebuilt
//! from the store by the accessor.

use crate::error::{IndexError, Result};
use crate::index::multimap::OrderedMultimap;
use crate::index::types::{Handle, TermId};
use crate::index::write_atomic;
use crate::utils::ByteCursor;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 8] = b"TDXDIR01";
const CLEAN_FLAG_POS: u64 = 16;

/// What `open` found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// No header file existed
    Missing,
    /// The previous session did not close the directory
    Unclean,
    /// The file belongs to another store or is unreadable
    Foreign,
    /// Loaded as written by the last clean close
    Clean,
}

impl DirectoryState {
    pub fn needs_rescan(&self) -> bool {
        !matches!(self, DirectoryState::Clean)
    }
}

pub struct TermDirectory {
    path: PathBuf,
    signature: i64,
    head: OrderedMultimap,
    tail: OrderedMultimap,
    open: bool,
}

impl TermDirectory {
    /// Load the directory at `path` and mark it unclean on disk.
    ///
    /// Anything but a clean file stamped with `signature` comes back empty.
    pub fn open(path: &Path, signature: i64, cache_pages: usize) -> Result<(Self, DirectoryState)> {
        let mut dir = Self {
            path: path.to_path_buf(),
            signature,
            head: OrderedMultimap::with_cache_size(cache_pages),
            tail: OrderedMultimap::with_cache_size(cache_pages),
            open: true,
        };

        let state = if path.exists() {
            let bytes = fs::read(path)?;
            match Self::decode(&bytes, signature, cache_pages) {
                Ok(Some((head, tail))) => {
                    dir.head = head;
                    dir.tail = tail;
                    DirectoryState::Clean
                }
                Ok(None) => DirectoryState::Unclean,
                Err(e) => {
                    warn!("Ignoring term directory {}: {}", path.display(), e);
                    DirectoryState::Foreign
                }
            }
        } else {
            DirectoryState::Missing
        };

        if state == DirectoryState::Clean {
            let mut file = OpenOptions::new().write(true).open(path)?;
            file.seek(SeekFrom::Start(CLEAN_FLAG_POS))?;
            file.write_all(&[0])?;
            file.sync_data()?;
        } else {
            dir.persist(false)?;
        }

        debug!(
            "Opened term directory {} ({:?}, {} heads)",
            path.display(),
            state,
            dir.head.count()
        );
        Ok((dir, state))
    }

    /// Decode a header file. `Ok(None)` means a readable but unclean file.
    fn decode(
        bytes: &[u8],
        signature: i64,
        cache_pages: usize,
    ) -> Result<Option<(OrderedMultimap, OrderedMultimap)>> {
        let mut cursor = ByteCursor::new(bytes);
        let magic = cursor
            .read_bytes(MAGIC.len())
            .ok_or_else(|| IndexError::format("directory header is truncated"))?;
        if magic != MAGIC {
            return Err(IndexError::format("directory has a foreign header"));
        }
        let stamped = cursor
            .read_i64()
            .ok_or_else(|| IndexError::format("directory header is truncated"))?;
        if stamped != signature {
            return Err(IndexError::format(format!(
                "directory signature {} does not match store signature {}",
                stamped, signature
            )));
        }
        let clean = cursor
            .read_u8()
            .ok_or_else(|| IndexError::format("directory header is truncated"))?;
        if clean != 1 {
            return Ok(None);
        }

        let head = OrderedMultimap::decode(&mut cursor, cache_pages)?;
        let tail = OrderedMultimap::decode(&mut cursor, cache_pages)?;
        Ok(Some((head, tail)))
    }

    fn persist(&self, clean: bool) -> Result<()> {
        let mut buf = Vec::with_capacity(17 + (self.head.count() + self.tail.count()) * 8 + 8);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.push(clean as u8);
        self.head.encode(&mut buf);
        self.tail.encode(&mut buf);
        write_atomic(&self.path, &buf)?;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(IndexError::Closed) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_cache_size(&mut self, pages: usize) {
        self.head.set_cache_size(pages);
        self.tail.set_cache_size(pages);
    }

    /// Head handles stored for `term`
    pub fn heads(&mut self, term: TermId) -> Result<Vec<Handle>> {
        self.check_open()?;
        Ok(self.head.get(term))
    }

    /// Tail handles stored for `term`
    pub fn tails(&mut self, term: TermId) -> Result<Vec<Handle>> {
        self.check_open()?;
        Ok(self.tail.get(term))
    }

    pub fn insert_head(&mut self, term: TermId, handle: Handle) -> Result<bool> {
        self.check_open()?;
        Ok(self.head.insert_key(term, handle))
    }

    pub fn insert_tail(&mut self, term: TermId, handle: Handle) -> Result<bool> {
        self.check_open()?;
        Ok(self.tail.insert_key(term, handle))
    }

    pub fn delete_head(&mut self, term: TermId, handle: Handle) -> Result<bool> {
        self.check_open()?;
        Ok(self.head.delete_key(term, handle))
    }

    pub fn delete_tail(&mut self, term: TermId, handle: Handle) -> Result<bool> {
        self.check_open()?;
        Ok(self.tail.delete_key(term, handle))
    }

    /// `(term, head)` pairs for terms in `low..=high`
    pub fn head_range(&self, low: TermId, high: TermId) -> Vec<(TermId, Handle)> {
        self.head.search_for_range(low, high)
    }

    /// Number of `(term, head)` pairs
    pub fn count(&self) -> usize {
        self.head.count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    pub fn clear(&mut self) {
        self.head.clear();
        self.tail.clear();
    }

    /// Write the maps and mark the file clean
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.persist(true)?;
        self.open = false;
        debug!("Closed term directory {} ({} heads)", self.path.display(), self.head.count());
        Ok(())
    }

    /// Close without writing; the file stays unclean
    pub fn abandon(&mut self) {
        self.open = false;
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("index.hdr")
    }

    #[test]
    fn test_missing_then_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = header_path(&dir);

        let (mut d, state) = TermDirectory::open(&path, 77, 8).unwrap();
        assert_eq!(state, DirectoryState::Missing);
        d.insert_head(3, 10).unwrap();
        d.insert_tail(3, 12).unwrap();
        d.close().unwrap();

        let (mut d, state) = TermDirectory::open(&path, 77, 8).unwrap();
        assert_eq!(state, DirectoryState::Clean);
        assert_eq!(d.heads(3).unwrap(), vec![10]);
        assert_eq!(d.tails(3).unwrap(), vec![12]);
        assert_eq!(d.count(), 1);
    }

    #[test]
    fn test_unclosed_directory_reopens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = header_path(&dir);

        let (mut d, _) = TermDirectory::open(&path, 1, 8).unwrap();
        d.insert_head(1, 5).unwrap();
        d.close().unwrap();

        // Opened but never closed
        let (d, _) = TermDirectory::open(&path, 1, 8).unwrap();
        drop(d);

        let (d, state) = TermDirectory::open(&path, 1, 8).unwrap();
        assert_eq!(state, DirectoryState::Unclean);
        assert!(state.needs_rescan());
        assert!(d.is_empty());
    }

    #[test]
    fn test_foreign_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = header_path(&dir);
        let (mut d, _) = TermDirectory::open(&path, 1, 8).unwrap();
        d.insert_head(1, 5).unwrap();
        d.close().unwrap();

        let (d, state) = TermDirectory::open(&path, 2, 8).unwrap();
        assert_eq!(state, DirectoryState::Foreign);
        assert!(d.is_empty());
    }

    #[test]
    fn test_garbage_file_is_foreign() {
        let dir = tempfile::tempdir().unwrap();
        let path = header_path(&dir);
        fs::write(&path, b"not a directory").unwrap();
        let (_, state) = TermDirectory::open(&path, 1, 8).unwrap();
        assert_eq!(state, DirectoryState::Foreign);
    }

    #[test]
    fn test_closed_directory_rejects_access() {
        let dir = tempfile::tempdir().unwrap();
        let (mut d, _) = TermDirectory::open(&header_path(&dir), 1, 8).unwrap();
        d.close().unwrap();
        assert!(matches!(d.heads(1), Err(IndexError::Closed)));
        assert!(matches!(d.insert_head(1, 1), Err(IndexError::Closed)));
    }

    #[test]
    fn test_tail_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let (mut d, _) = TermDirectory::open(&header_path(&dir), 1, 8).unwrap();
        d.insert_head(4, 10).unwrap();
        d.insert_tail(4, 10).unwrap();
        assert!(d.delete_tail(4, 10).unwrap());
        d.insert_tail(4, 15).unwrap();
        assert_eq!(d.tails(4).unwrap(), vec![15]);
        assert_eq!(d.head_range(0, 100), vec![(4, 10)]);
    }
}
