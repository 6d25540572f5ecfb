//! Incremental indexer: collects document text into a pending batch and
//! appends it to the term chains on [`FullTextIndexer::end_batch_update`].
//!
//! Queries only see flushed batches.

use crate::error::{IndexError, Result};
use crate::index::accessor::TermIndexAccessor;
use crate::index::doc_map::DocMap;
use crate::index::sections::{self, SectionRegistry};
use crate::index::stats::IndexStats;
use crate::index::types::*;
use crate::index::DOC_MAP_EXTENSION;
use crate::query::{self, Highlight, PostfixForm, QueryExecutor};
use crate::utils::{CancellationToken, EngineConfig, SentenceState, side_file, tokenize};
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Documents indexed between two flushes during a rebuild
const REBUILD_BATCH: usize = 500;

/// A document as the host hands it over for (re)indexing
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    pub id: DocId,
    pub heading: Option<String>,
    /// Text fragments with an optional section name
    pub fragments: Vec<(String, Option<String>)>,
}

impl SourceDocument {
    pub fn new(id: DocId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_fragment(mut self, text: impl Into<String>, section: Option<&str>) -> Self {
        self.fragments.push((text.into(), section.map(str::to_string)));
        self
    }
}

/// Tokens of one document waiting for the next flush
#[derive(Default)]
struct PendingDocument {
    state: SentenceState,
    /// Byte position of the next fragment inside the document
    next_offset: usize,
    tokens: Vec<(String, InstanceOffset)>,
}

pub struct FullTextIndexer {
    path: PathBuf,
    config: EngineConfig,
    accessor: TermIndexAccessor,
    doc_map: DocMap,
    sections: SectionRegistry,
    pending: AHashMap<DocId, PendingDocument>,
    corrupted: bool,
}

impl FullTextIndexer {
    /// Open (or create) the index at `path`
    pub fn open(path: &Path, config: EngineConfig, cancel: &CancellationToken) -> Result<Self> {
        let (accessor, doc_map) = Self::open_parts(path, &config, cancel)?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
            accessor,
            doc_map,
            sections: SectionRegistry::default(),
            pending: AHashMap::new(),
            corrupted: false,
        })
    }

    fn open_parts(
        path: &Path,
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<(TermIndexAccessor, DocMap)> {
        let mut accessor = TermIndexAccessor::new(path, config);
        accessor.load(cancel)?;

        let signature = accessor
            .signature()
            .ok_or(IndexError::Precondition("accessor is not operational after load"))?;
        let records = accessor.record_count()?;
        let docs_path = side_file(path, DOC_MAP_EXTENSION);

        let doc_map = match DocMap::open(&docs_path, signature.timestamp) {
            Ok(map) if map.loaded_from_disk() || records == 0 => map,
            Ok(_) => {
                return Err(IndexError::format(
                    "document map is missing while the store holds records",
                ));
            }
            Err(e) if records == 0 => {
                debug!("Replacing stale document map {}: {}", docs_path.display(), e);
                DocMap::create(&docs_path, signature.timestamp)
            }
            Err(e) => return Err(e),
        };
        Ok((accessor, doc_map))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sections(&self) -> &SectionRegistry {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut SectionRegistry {
        &mut self.sections
    }

    /// True once a format error was seen; the index must be discarded and
    /// rebuilt.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted || self.accessor.is_failed()
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.needs_rebuild() {
                self.corrupted = true;
            }
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.accessor.is_operational() {
            Ok(())
        } else {
            Err(IndexError::Closed)
        }
    }

    /// Add the heading of `doc`; it forms a sentence of its own
    pub fn add_document_heading(&mut self, doc: DocId, text: &str) -> Result<()> {
        self.push_text(doc, text, sections::SUBJECT, true)
    }

    /// Add a text fragment of `doc` to the section named `section`
    /// (body when `None` or unknown)
    pub fn add_document_fragment(&mut self, doc: DocId, text: &str, section: Option<&str>) -> Result<()> {
        let section_id = match section {
            None => sections::BODY,
            Some(name) => match self.sections.by_name(name) {
                Some(s) => s.id,
                None => {
                    warn!("Unknown section '{}' for document {}, indexing as body", name, doc);
                    sections::BODY
                }
            },
        };
        self.push_text(doc, text, section_id, false)
    }

    fn push_text(&mut self, doc: DocId, text: &str, section: SectionId, own_sentence: bool) -> Result<()> {
        self.ensure_open()?;
        if doc < 0 {
            return Err(IndexError::Precondition("document ids must not be negative"));
        }

        let pending = self.pending.entry(doc).or_default();
        if own_sentence {
            pending.state.end_sentence();
        }

        let base = pending.next_offset;
        let mut dropped = 0usize;
        for token in tokenize(text, &mut pending.state) {
            let position = base + token.offset;
            if position > MAX_OFFSET as usize {
                dropped += 1;
                continue;
            }
            let offset = InstanceOffset::new(position as u32, section, token.sentence, token.order);
            pending.tokens.push((token.term, offset));
        }
        pending.next_offset = base + text.len();

        if own_sentence {
            pending.state.end_sentence();
        }
        if dropped > 0 {
            warn!(
                "Document {}: {} tokens beyond byte offset {} were not indexed",
                doc, dropped, MAX_OFFSET
            );
        }
        Ok(())
    }

    /// Number of documents waiting for the next flush
    pub fn pending_documents(&self) -> usize {
        self.pending.len()
    }

    /// Append the pending batch to the index and make it durable
    pub fn end_batch_update(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.flush_pending();
        self.track(result)
    }

    fn flush_pending(&mut self) -> Result<()> {
        let mut batch: Vec<(DocId, PendingDocument)> = std::mem::take(&mut self.pending).into_iter().collect();
        batch.sort_unstable_by_key(|(doc, _)| *doc);

        let mut segments: BTreeMap<TermId, Vec<Entry>> = BTreeMap::new();
        let docs = batch.len();
        for (doc, pending) in batch {
            let mut by_term: AHashMap<String, Vec<InstanceOffset>> = AHashMap::new();
            for (term, offset) in pending.tokens {
                by_term.entry(term).or_default().push(offset);
            }
            let max_term_in_doc = by_term.values().map(Vec::len).max().unwrap_or(1);

            let mut term_ids = Vec::with_capacity(by_term.len());
            for (term, offsets) in by_term {
                let id = self.accessor.intern(&term)?;
                let tf = offsets.len() as f32 / max_term_in_doc as f32;
                let mut entry = Entry::new(doc, tf, offsets);
                entry.normalize_offsets();
                segments.entry(id).or_default().push(entry);
                term_ids.push(id);
            }
            self.doc_map.add_terms(doc, term_ids);
        }

        let terms = segments.len();
        for (id, entries) in segments {
            self.accessor.add_entries(id, &entries)?;
        }
        self.accessor.flush()?;
        self.doc_map.save()?;
        debug!("Flushed batch of {} documents, {} terms", docs, terms);
        Ok(())
    }

    /// Drop `doc` from the index. Postings are tombstoned in place; the
    /// return value is the number of postings removed.
    pub fn delete_document(&mut self, doc: DocId) -> Result<usize> {
        self.ensure_open()?;
        self.pending.remove(&doc);
        let result = self.tombstone_document(doc);
        self.track(result)
    }

    fn tombstone_document(&mut self, doc: DocId) -> Result<usize> {
        let Some(terms) = self.doc_map.remove(doc) else {
            return Ok(0);
        };
        let mut removed = 0;
        for term in terms {
            removed += self.accessor.tombstone(term, doc)?;
        }
        self.accessor.flush()?;
        self.doc_map.save()?;
        debug!("Deleted document {} ({} postings)", doc, removed);
        Ok(removed)
    }

    /// Parse a query against the registered sections
    pub fn parse_query(&self, text: &str) -> Option<PostfixForm> {
        query::parse_query(text, &self.sections)
    }

    /// Evaluate a parsed query. Results are ordered by document id.
    pub fn process_query(&mut self, form: &PostfixForm, max_distance: u16) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let total_docs = self.doc_map.len();
        let result = QueryExecutor::new(&mut self.accessor, total_docs, max_distance).execute(form);
        self.track(result)
    }

    /// Parse and evaluate `text` with the configured `near` distance.
    /// A malformed query yields no results.
    pub fn process_query_internal(&mut self, text: &str) -> Result<Vec<Entry>> {
        let max_distance = self.config.near_distance;
        match self.parse_query(text) {
            Some(form) => self.process_query(&form, max_distance),
            None => Ok(Vec::new()),
        }
    }

    /// True when `doc` is among the results of `text`
    pub fn match_query(&mut self, text: &str, doc: DocId, max_distance: u16) -> Result<bool> {
        let Some(form) = self.parse_query(text) else {
            return Ok(false);
        };
        let entries = self.process_query(&form, max_distance)?;
        Ok(entries.binary_search_by_key(&doc, |e| e.doc_index).is_ok())
    }

    /// Snippet of `text` around the matches recorded in `entry`
    pub fn get_context(&self, entry: &Entry, lexemes: &[String], text: &str) -> (String, Vec<Highlight>) {
        query::get_context(entry, lexemes, text, self.config.context_length)
    }

    pub fn stats(&mut self) -> Result<IndexStats> {
        self.ensure_open()?;
        Ok(IndexStats {
            path: self.path.clone(),
            documents: self.doc_map.len(),
            terms: self.accessor.lexicon_len()?,
            records: self.accessor.record_count()?,
            store_bytes: self.accessor.store_bytes()?,
            pending_documents: self.pending.len(),
            format_version: FORMAT_VERSION,
            created_at_ms: self.accessor.signature().map(|s| s.timestamp).unwrap_or(0),
        })
    }

    /// Flush the pending batch and close every index file cleanly
    pub fn close_indices(&mut self) -> Result<()> {
        if self.accessor.is_operational() && !self.pending.is_empty() {
            let result = self.flush_pending();
            self.track(result)?;
        }
        if self.accessor.is_operational() {
            self.doc_map.save()?;
        }
        self.accessor.close()
    }

    /// Close and delete the index files (renamed aside with `keep_files`)
    pub fn discard_text_index(&mut self, keep_files: bool) -> Result<()> {
        self.pending.clear();
        self.accessor.discard(keep_files)?;
        self.corrupted = false;
        Ok(())
    }

    /// Delete (or rename aside) the files of the index at `path` without
    /// opening it. This is the way out of an index that fails to open with a
    /// format error.
    pub fn discard_files(path: &Path, config: &EngineConfig, keep_files: bool) -> Result<()> {
        TermIndexAccessor::new(path, config).discard(keep_files)
    }

    /// Replace the index with a fresh one built from `docs`.
    ///
    /// Cancellation discards the partial index and leaves an empty one.
    pub fn rebuild<I>(&mut self, docs: I, cancel: &CancellationToken) -> Result<usize>
    where
        I: IntoIterator<Item = SourceDocument>,
    {
        info!("Rebuilding text index {}", self.path.display());
        self.discard_text_index(false)?;
        self.reopen(cancel)?;

        let result = self.index_all(docs, cancel);
        match result {
            Ok(count) => {
                info!("Rebuilt text index {} with {} documents", self.path.display(), count);
                Ok(count)
            }
            Err(e) => {
                warn!("Rebuild of {} aborted: {}", self.path.display(), e);
                self.discard_text_index(false)?;
                self.reopen(&CancellationToken::new())?;
                Err(e)
            }
        }
    }

    fn index_all<I>(&mut self, docs: I, cancel: &CancellationToken) -> Result<usize>
    where
        I: IntoIterator<Item = SourceDocument>,
    {
        let mut count = 0;
        for doc in docs {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            if let Some(heading) = &doc.heading {
                self.add_document_heading(doc.id, heading)?;
            }
            for (text, section) in &doc.fragments {
                self.add_document_fragment(doc.id, text, section.as_deref())?;
            }
            count += 1;
            if count % REBUILD_BATCH == 0 {
                self.end_batch_update()?;
            }
        }
        self.end_batch_update()?;
        Ok(count)
    }

    fn reopen(&mut self, cancel: &CancellationToken) -> Result<()> {
        let (accessor, doc_map) = Self::open_parts(&self.path, &self.config, cancel)?;
        self.accessor = accessor;
        self.doc_map = doc_map;
        self.pending.clear();
        self.corrupted = false;
        Ok(())
    }
}
