//! Term index accessor: the blob store, term directory and lexicon behind one
//! `Created -> Operational -> Closed` state machine.
//!
//! Any structural inconsistency (bad signature, several heads for one term, a
//! malformed record) marks the accessor as failed, force-closes it and
//! surfaces [`IndexError::Format`]. Nothing is repaired in place.

use crate::error::{IndexError, Result};
use crate::index::blob_store::BlobStore;
use crate::index::directory::{DirectoryState, TermDirectory};
use crate::index::lexicon::Lexicon;
use crate::index::record;
use crate::index::types::*;
use crate::index::{DOC_MAP_EXTENSION, LEXICON_EXTENSION};
use crate::utils::{ByteCursor, CancellationToken, EngineConfig, side_file};
use lru::LruCache;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const DISCARDED_SUFFIX: &str = "discarded";

/// Signature stamped into the reserved cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub timestamp: i64,
    pub version: i32,
}

impl Signature {
    fn fresh() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(1);
        Self {
            timestamp,
            version: FORMAT_VERSION,
        }
    }

    fn encode(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut cursor = ByteCursor::new(bytes);
        Some(Self {
            timestamp: cursor.read_i64()?,
            version: cursor.read_i32()?,
        })
    }
}

struct OpenIndex {
    store: BlobStore,
    directory: TermDirectory,
    lexicon: Lexicon,
    signature: Signature,
    cache: LruCache<TermId, TermRecord>,
}

enum State {
    Created,
    Operational(OpenIndex),
    Closed,
}

/// Access to the postings of every term
pub struct TermIndexAccessor {
    path: PathBuf,
    cluster_size: u32,
    header_extension: String,
    cache_pages: usize,
    discard_retry_delay: Duration,
    state: State,
    failed: bool,
}

impl TermIndexAccessor {
    pub fn new(path: &Path, config: &EngineConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            cluster_size: config.cluster_size,
            header_extension: config.header_extension.clone(),
            cache_pages: config.directory_cache_pages,
            discard_retry_delay: config.discard_retry_delay(),
            state: State::Created,
            failed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_operational(&self) -> bool {
        matches!(self.state, State::Operational(_))
    }

    /// True once a format error force-closed the accessor
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Signature of the loaded store
    pub fn signature(&self) -> Option<Signature> {
        match &self.state {
            State::Operational(index) => Some(index.signature),
            _ => None,
        }
    }

    fn directory_path(&self) -> PathBuf {
        side_file(&self.path, &self.header_extension)
    }

    /// Every file that belongs to this index
    fn index_files(&self) -> Vec<PathBuf> {
        vec![
            self.path.clone(),
            self.directory_path(),
            side_file(&self.path, LEXICON_EXTENSION),
            side_file(&self.path, DOC_MAP_EXTENSION),
        ]
    }

    /// Open the store, verify its signature and make the directory usable.
    ///
    /// A missing, unclean or foreign directory is rebuilt by scanning every
    /// chain in the store.
    pub fn load(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self.state {
            State::Created => {}
            State::Operational(_) => return Err(IndexError::Precondition("load() called twice")),
            State::Closed => return Err(IndexError::Closed),
        }

        let result = self.open_index(cancel);
        match result {
            Ok(index) => {
                info!(
                    "Loaded text index {} ({} terms, {} clusters)",
                    self.path.display(),
                    index.directory.count(),
                    index.store.cluster_count()
                );
                self.state = State::Operational(index);
                Ok(())
            }
            Err(e) => {
                if e.needs_rebuild() {
                    self.failed = true;
                    warn!("Text index {} failed to load: {}", self.path.display(), e);
                }
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    fn open_index(&self, cancel: &CancellationToken) -> Result<OpenIndex> {
        let mut store = BlobStore::open(&self.path, self.cluster_size)?;

        let signature = if store.was_created() {
            let signature = Signature::fresh();
            store.write_reserved(&signature.encode())?;
            store.flush()?;
            signature
        } else {
            let stored = Signature::decode(&store.read_reserved()?)
                .ok_or_else(|| IndexError::format("signature cluster is truncated"))?;
            if stored.version != FORMAT_VERSION {
                return Err(IndexError::format(format!(
                    "index format version is {}, expected {}",
                    stored.version, FORMAT_VERSION
                )));
            }
            stored
        };

        let lexicon_path = side_file(&self.path, LEXICON_EXTENSION);
        let lexicon = if store.was_created() {
            Lexicon::create(&lexicon_path, signature.timestamp)
        } else {
            Lexicon::open(&lexicon_path, signature.timestamp)?
        };

        let (directory, state) =
            TermDirectory::open(&self.directory_path(), signature.timestamp, self.cache_pages)?;

        let mut index = OpenIndex {
            store,
            directory,
            lexicon,
            signature,
            cache: LruCache::new(NonZeroUsize::new(self.cache_pages).unwrap_or(NonZeroUsize::MIN)),
        };

        let holds_records = index.store.cluster_count() as Handle > index.store.reserved_handle() + 1;
        if state.needs_rescan() || (index.directory.is_empty() && holds_records) {
            if state != DirectoryState::Missing || holds_records {
                info!("Rebuilding term directory of {} ({:?})", self.path.display(), state);
            }
            index.rescan(cancel)?;
        }

        if !index.directory.is_empty() && !index.lexicon.loaded_from_disk() {
            return Err(IndexError::format("lexicon is missing while the store holds records"));
        }
        Ok(index)
    }

    /// Rebuild the directory from the chains in the store.
    ///
    /// On cancellation the directory is left empty.
    pub fn load_offsets_from_index(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let result = self.index_mut()?.rescan(cancel);
        self.check(result)
    }

    fn index_mut(&mut self) -> Result<&mut OpenIndex> {
        match &mut self.state {
            State::Operational(index) => Ok(index),
            State::Created => Err(IndexError::Precondition(
                "load() must complete before the index is used",
            )),
            State::Closed => Err(IndexError::Closed),
        }
    }

    /// Force-close on a format error so nothing else touches the files
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.needs_rebuild() && !self.failed {
                self.failed = true;
                warn!("Text index {} is corrupted: {}", self.path.display(), e);
                self.force_close();
            }
        }
        result
    }

    fn force_close(&mut self) {
        if let State::Operational(mut index) = std::mem::replace(&mut self.state, State::Closed) {
            index.directory.abandon();
        }
    }

    /// Postings of `token`, or `None` when it is unknown or has no live entry
    pub fn get_record(&mut self, token: &str) -> Result<Option<TermRecord>> {
        let id = self.index_mut()?.lexicon.lookup(token);
        match id {
            Some(id) => self.get_record_by_hc(id),
            None => Ok(None),
        }
    }

    pub fn get_record_by_hc(&mut self, id: TermId) -> Result<Option<TermRecord>> {
        let result = self.index_mut()?.read_record(id);
        let record = self.check(result)?;
        Ok(record.filter(|r| !r.entries.is_empty()))
    }

    /// Add one document's occurrences of `term`.
    ///
    /// The stored weight is `instances / max_term_in_doc`.
    pub fn add_record(
        &mut self,
        doc: DocId,
        term: TermId,
        instances: Vec<InstanceOffset>,
        max_term_in_doc: usize,
    ) -> Result<()> {
        if instances.is_empty() || max_term_in_doc == 0 {
            return Err(IndexError::Precondition("a posting needs at least one instance"));
        }
        let tf = instances.len() as f32 / max_term_in_doc.max(instances.len()) as f32;
        self.add_entries(term, &[Entry::new(doc, tf, instances)])
    }

    /// Append a segment of entries to the chain of `term`
    pub fn add_entries(&mut self, term: TermId, entries: &[Entry]) -> Result<()> {
        if entries.iter().any(|e| e.doc_index < 0) {
            return Err(IndexError::Precondition("document ids must not be negative"));
        }
        if entries.is_empty() {
            return Ok(());
        }
        let result = self.index_mut()?.append_entries(term, entries);
        self.check(result)
    }

    /// Stamp a tombstone over every live entry of `doc`. Returns how many
    /// entries were stamped.
    pub fn tombstone(&mut self, term: TermId, doc: DocId) -> Result<usize> {
        let result = self.index_mut()?.tombstone(term, doc);
        self.check(result)
    }

    pub fn intern(&mut self, token: &str) -> Result<TermId> {
        Ok(self.index_mut()?.lexicon.intern(token))
    }

    pub fn lookup_term(&mut self, token: &str) -> Result<Option<TermId>> {
        Ok(self.index_mut()?.lexicon.lookup(token))
    }

    /// Known spellings starting with `prefix`
    pub fn prefix_terms(&mut self, prefix: &str) -> Result<Vec<(String, TermId)>> {
        Ok(self
            .index_mut()?
            .lexicon
            .prefix(prefix)
            .into_iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect())
    }

    /// Number of terms with a chain in the store
    pub fn record_count(&mut self) -> Result<usize> {
        Ok(self.index_mut()?.directory.count())
    }

    pub fn lexicon_len(&mut self) -> Result<usize> {
        Ok(self.index_mut()?.lexicon.len())
    }

    pub fn store_bytes(&mut self) -> Result<u64> {
        Ok(self.index_mut()?.store.len_bytes())
    }

    pub fn set_cache_size(&mut self, pages: usize) -> Result<()> {
        let index = self.index_mut()?;
        index.directory.set_cache_size(pages);
        index
            .cache
            .resize(NonZeroUsize::new(pages).unwrap_or(NonZeroUsize::MIN));
        Ok(())
    }

    /// Make appended chains and new tokens durable
    pub fn flush(&mut self) -> Result<()> {
        let index = self.index_mut()?;
        index.store.flush()?;
        index.lexicon.save()?;
        Ok(())
    }

    /// Clean shutdown: flush and write the directory marked clean
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Operational(mut index) => {
                index.store.flush()?;
                index.lexicon.save()?;
                index.directory.close()?;
                debug!("Closed text index {}", self.path.display());
                Ok(())
            }
            State::Created | State::Closed => Ok(()),
        }
    }

    /// Close and drop the index files. With `keep_files` they are renamed
    /// aside instead of removed.
    pub fn discard(&mut self, keep_files: bool) -> Result<()> {
        self.force_close();
        for file in self.index_files() {
            if !file.exists() {
                continue;
            }
            if keep_files {
                let aside = side_file(&file, DISCARDED_SUFFIX);
                if aside.exists() {
                    self.remove_with_retry(&aside)?;
                }
                self.rename_with_retry(&file, &aside)?;
            } else {
                self.remove_with_retry(&file)?;
            }
        }
        info!("Discarded text index {} (keep files: {})", self.path.display(), keep_files);
        Ok(())
    }

    fn remove_with_retry(&self, file: &Path) -> Result<()> {
        self.retry_once("remove", file, || fs::remove_file(file))
    }

    fn rename_with_retry(&self, file: &Path, to: &Path) -> Result<()> {
        self.retry_once("rename", file, || fs::rename(file, to))
    }

    /// Run a file operation; a failure is retried once after the discard delay
    fn retry_once<F>(&self, action: &str, file: &Path, mut op: F) -> Result<()>
    where
        F: FnMut() -> io::Result<()>,
    {
        if let Err(e) = op() {
            warn!(
                "Failed to {} {} ({}), retrying in {:?}",
                action,
                file.display(),
                e,
                self.discard_retry_delay
            );
            thread::sleep(self.discard_retry_delay);
            op()?;
        }
        Ok(())
    }
}

impl Drop for TermIndexAccessor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close text index {}: {}", self.path.display(), e);
        }
    }
}

impl OpenIndex {
    fn rescan(&mut self, cancel: &CancellationToken) -> Result<usize> {
        self.directory.clear();
        self.cache.clear();

        let heads = self.store.heads()?;
        for head in heads {
            if cancel.is_cancelled() {
                self.directory.clear();
                info!("Term directory scan cancelled");
                return Err(IndexError::Cancelled);
            }

            let (parsed, _) = record::parse(&self.store.read(head)?)?;
            let hc = parsed.hc;

            if !self.directory.heads(hc)?.is_empty() {
                return Err(IndexError::format(format!(
                    "term {}: amount of offsets can not exceed 1",
                    hc
                )));
            }
            let tail = self.store.tail_of(head)?;
            self.directory.insert_head(hc, head)?;
            self.directory.insert_tail(hc, tail)?;
        }

        debug!("Term directory scan found {} terms", self.directory.count());
        Ok(self.directory.count())
    }

    fn single_handle(handles: Vec<Handle>, term: TermId) -> Result<Option<Handle>> {
        match handles.as_slice() {
            [] => Ok(None),
            [handle] => Ok(Some(*handle)),
            _ => Err(IndexError::format(format!(
                "term {}: amount of offsets can not exceed 1",
                term
            ))),
        }
    }

    fn read_record(&mut self, id: TermId) -> Result<Option<TermRecord>> {
        if let Some(record) = self.cache.get(&id) {
            return Ok(Some(record.clone()));
        }
        let Some(head) = Self::single_handle(self.directory.heads(id)?, id)? else {
            return Ok(None);
        };

        let bytes = self.store.read(head)?;
        let (parsed, _) = record::parse(&bytes)?;
        if parsed.hc != id {
            return Err(IndexError::format(format!(
                "chain {} holds term {} instead of {}",
                head, parsed.hc, id
            )));
        }
        self.cache.put(id, parsed.clone());
        Ok(Some(parsed))
    }

    fn append_entries(&mut self, term: TermId, entries: &[Entry]) -> Result<()> {
        self.cache.pop(&term);

        let head = Self::single_handle(self.directory.heads(term)?, term)?;
        if head.is_none() {
            let mut bytes = Vec::new();
            record::save(
                &mut bytes,
                &TermRecord {
                    hc: term,
                    entries: entries.to_vec(),
                },
            )?;
            let (head, tail) = self.store.alloc(&bytes)?;
            self.directory.insert_head(term, head)?;
            self.directory.insert_tail(term, tail)?;
            return Ok(());
        }

        let tail = Self::single_handle(self.directory.tails(term)?, term)?
            .ok_or_else(|| IndexError::format(format!("term {} has a head but no tail", term)))?;
        let mut bytes = Vec::new();
        record::save_entries(&mut bytes, entries)?;
        let new_tail = self.store.append(tail, &bytes)?;
        if new_tail != tail {
            self.directory.delete_tail(term, tail)?;
            self.directory.insert_tail(term, new_tail)?;
        }
        Ok(())
    }

    fn tombstone(&mut self, term: TermId, doc: DocId) -> Result<usize> {
        let Some(head) = Self::single_handle(self.directory.heads(term)?, term)? else {
            return Ok(0);
        };
        self.cache.pop(&term);

        let bytes = self.store.read(head)?;
        let (_, layout) = record::parse(&bytes)?;
        let positions = layout.positions_of(doc);
        for &pos in &positions {
            self.store
                .write_at(head, pos as usize, &TOMBSTONE_DOC.to_le_bytes())?;
        }
        Ok(positions.len())
    }
}
