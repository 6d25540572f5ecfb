//! Token interner: canonical token -> stable `TermId`.
//!
//! Ids are handed out sequentially from 1 and never reused. Tokens are kept
//! in lexicographic order so a wildcard prefix is a single range scan.

use crate::error::{IndexError, Result};
use crate::index::types::TermId;
use crate::index::write_atomic;
use crate::utils::ByteCursor;
use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"TDXLEX01";

pub struct Lexicon {
    path: PathBuf,
    signature: i64,
    terms: BTreeMap<String, TermId>,
    next_id: TermId,
    dirty: bool,
    loaded_from_disk: bool,
}

impl Lexicon {
    /// Empty lexicon that will be written to `path`
    pub fn create(path: &Path, signature: i64) -> Self {
        Self {
            path: path.to_path_buf(),
            signature,
            terms: BTreeMap::new(),
            next_id: 1,
            dirty: true,
            loaded_from_disk: false,
        }
    }

    /// Load the lexicon at `path`. A missing file yields an empty lexicon;
    /// a file stamped with another signature is a format error.
    pub fn open(path: &Path, signature: i64) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::create(path, signature));
        }

        let bytes = fs::read(path)?;
        let truncated = || IndexError::format("lexicon is truncated");
        let mut cursor = ByteCursor::new(&bytes);
        if cursor.read_bytes(MAGIC.len()).ok_or_else(truncated)? != MAGIC {
            return Err(IndexError::format("lexicon has a foreign header"));
        }
        let stamped = cursor.read_i64().ok_or_else(truncated)?;
        if stamped != signature {
            return Err(IndexError::format(format!(
                "lexicon signature {} does not match store signature {}",
                stamped, signature
            )));
        }

        let count = cursor.read_u32().ok_or_else(truncated)?;
        let mut terms = BTreeMap::new();
        let mut max_id = 0;
        for _ in 0..count {
            let len = cursor.read_u16().ok_or_else(truncated)?;
            let raw = cursor.read_bytes(len as usize).ok_or_else(truncated)?;
            let token = std::str::from_utf8(raw)
                .map_err(|_| IndexError::format("lexicon holds a token that is not UTF-8"))?;
            let id = cursor.read_i32().ok_or_else(truncated)?;
            if id <= 0 {
                return Err(IndexError::format(format!("lexicon holds invalid term id {}", id)));
            }
            max_id = max_id.max(id);
            terms.insert(token.to_string(), id);
        }

        Ok(Self {
            path: path.to_path_buf(),
            signature,
            terms,
            next_id: max_id + 1,
            dirty: false,
            loaded_from_disk: true,
        })
    }

    /// True when the lexicon was read from an existing file
    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk
    }

    /// Id of `token`, allocating one on first sight
    pub fn intern(&mut self, token: &str) -> TermId {
        if let Some(&id) = self.terms.get(token) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.terms.insert(token.to_string(), id);
        self.dirty = true;
        id
    }

    pub fn lookup(&self, token: &str) -> Option<TermId> {
        self.terms.get(token).copied()
    }

    /// Every `(token, id)` whose token starts with `prefix`, in token order
    pub fn prefix(&self, prefix: &str) -> Vec<(&str, TermId)> {
        self.terms
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(token, _)| token.starts_with(prefix))
            .map(|(token, &id)| (token.as_str(), id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Write the lexicon when it changed since the last save
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(20 + self.terms.len() * 16);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&(self.terms.len() as u32).to_le_bytes());
        for (token, id) in &self.terms {
            buf.extend_from_slice(&(token.len() as u16).to_le_bytes());
            buf.extend_from_slice(token.as_bytes());
            buf.extend_from_slice(&id.to_le_bytes());
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
    fn test_intern_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut lex = Lexicon::create(&dir.path().join("i.lex"), 9);
        let a = lex.intern("omega");
        let b = lex.intern("alpha");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(lex.intern("omega"), 1);
        assert_eq!(lex.lookup("alpha"), Some(2));
        assert_eq!(lex.lookup("beta"), None);
    }

    #[test]
    fn test_prefix_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut lex = Lexicon::create(&dir.path().join("i.lex"), 9);
        for token in ["omsk", "om", "omega", "on", "o", "zeta"] {
            lex.intern(token);
        }
        let spellings: Vec<&str> = lex.prefix("om").into_iter().map(|(t, _)| t).collect();
        assert_eq!(spellings, vec!["om", "omega", "omsk"]);
        assert!(lex.prefix("q").is_empty());
        assert!(lex.prefix("zz").is_empty());
        assert_eq!(lex.prefix("").len(), 6);
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.lex");
        let mut lex = Lexicon::create(&path, 9);
        lex.intern("über");
        lex.intern("plain");
        lex.save().unwrap();

        let mut reopened = Lexicon::open(&path, 9).unwrap();
        assert!(reopened.loaded_from_disk());
        assert_eq!(reopened.lookup("über"), Some(1));
        assert_eq!(reopened.intern("next"), 3);
    }

    #[test]
    fn test_signature_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.lex");
        let mut lex = Lexicon::create(&path, 9);
        lex.intern("x");
        lex.save().unwrap();
        assert!(Lexicon::open(&path, 10).err().unwrap().needs_rebuild());
    }
}
