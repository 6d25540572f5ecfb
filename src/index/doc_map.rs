//! Document -> term ids map, used to find the postings of a deleted document.
//!
//! File layout: magic, signature, document count, then per document
//! `doc:i32, len:u32` followed by `len` bytes of delta-encoded term ids.

use crate::error::{IndexError, Result};
use crate::index::types::{DocId, TermId};
use crate::index::write_atomic;
use crate::utils::{ByteCursor, delta_decode, delta_encode};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"TDXDOC01";

pub struct DocMap {
    path: PathBuf,
    signature: i64,
    docs: BTreeMap<DocId, Vec<TermId>>,
    dirty: bool,
    loaded_from_disk: bool,
}

impl DocMap {
    pub fn create(path: &Path, signature: i64) -> Self {
        Self {
            path: path.to_path_buf(),
            signature,
            docs: BTreeMap::new(),
            dirty: true,
            loaded_from_disk: false,
        }
    }

    pub fn open(path: &Path, signature: i64) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::create(path, signature));
        }

        let bytes = fs::read(path)?;
        let truncated = || IndexError::format("document map is truncated");
        let mut cursor = ByteCursor::new(&bytes);
        if cursor.read_bytes(MAGIC.len()).ok_or_else(truncated)? != MAGIC {
            return Err(IndexError::format("document map has a foreign header"));
        }
        let stamped = cursor.read_i64().ok_or_else(truncated)?;
        if stamped != signature {
            return Err(IndexError::format(format!(
                "document map signature {} does not match store signature {}",
                stamped, signature
            )));
        }

        let count = cursor.read_u32().ok_or_else(truncated)?;
        let mut docs = BTreeMap::new();
        for _ in 0..count {
            let doc = cursor.read_i32().ok_or_else(truncated)?;
            let len = cursor.read_u32().ok_or_else(truncated)? as usize;
            let packed = cursor.read_bytes(len).ok_or_else(truncated)?;
            let terms = delta_decode(packed).into_iter().map(|t| t as TermId).collect();
            docs.insert(doc, terms);
        }

        Ok(Self {
            path: path.to_path_buf(),
            signature,
            docs,
            dirty: false,
            loaded_from_disk: true,
        })
    }

    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk
    }

    /// Record that `doc` has postings for `terms`
    pub fn add_terms(&mut self, doc: DocId, terms: impl IntoIterator<Item = TermId>) {
        let entry = self.docs.entry(doc).or_default();
        entry.extend(terms);
        entry.sort_unstable();
        entry.dedup();
        self.dirty = true;
    }

    /// Forget `doc`, returning the terms it had postings for
    pub fn remove(&mut self, doc: DocId) -> Option<Vec<TermId>> {
        let terms = self.docs.remove(&doc);
        if terms.is_some() {
            self.dirty = true;
        }
        terms
    }

    pub fn terms_of(&self, doc: DocId) -> Option<&[TermId]> {
        self.docs.get(&doc).map(Vec::as_slice)
    }

    pub fn contains(&self, doc: DocId) -> bool {
        self.docs.contains_key(&doc)
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(20 + self.docs.len() * 16);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&(self.docs.len() as u32).to_le_bytes());

        let mut packed = Vec::new();
        for (doc, terms) in &self.docs {
            packed.clear();
            let ids: Vec<u32> = terms.iter().map(|&t| t as u32).collect();
            delta_encode(&ids, &mut packed);
            buf.extend_from_slice(&doc.to_le_bytes());
            buf.extend_from_slice(&(packed.len() as u32).to_le_bytes());
            buf.extend_from_slice(&packed);
        }

        write_atomic(&self.path, &buf)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_merges_terms() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = DocMap::create(&dir.path().join("i.docs"), 1);
        map.add_terms(4, [9, 2, 9]);
        map.add_terms(4, [5]);
        assert_eq!(map.terms_of(4), Some(&[2, 5, 9][..]));
        assert_eq!(map.remove(4), Some(vec![2, 5, 9]));
        assert!(map.remove(4).is_none());
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.docs");
        let mut map = DocMap::create(&path, 1);
        map.add_terms(0, [1, 300, 70000]);
        map.add_terms(12, [3]);
        map.save().unwrap();

        let reopened = DocMap::open(&path, 1).unwrap();
        assert!(reopened.loaded_from_disk());
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.terms_of(0), Some(&[1, 300, 70000][..]));
        assert!(DocMap::open(&path, 2).err().unwrap().needs_rebuild());
    }
}
