//! # termdex - Incremental Full-Text Term Index
//!
//! termdex keeps an inverted index over many short documents (mails, feed
//! items, notes) and updates it in place while the host keeps running.
//! Queries combine implicit AND, `or`, quoted phrases, `near`, wildcard
//! prefixes and per-section restriction, with sentence and paragraph aware
//! proximity.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`index`] - Posting codec, blob store, term directory and the indexer
//! - [`query`] - Query parsing, evaluation and snippet extraction
//! - [`output`] - Result formatting with highlighted snippets
//! - [`utils`] - Tokenizer, encoding helpers, configuration, cancellation
//! - [`error`] - Error taxonomy of the index
//!
//! ## Quick Start
//!
//! ```no_run
//! use termdex::index::FullTextIndexer;
//! use termdex::utils::{CancellationToken, EngineConfig};
//! use std::path::Path;
//!
//! let cancel = CancellationToken::new();
//! let mut indexer =
//!     FullTextIndexer::open(Path::new("/tmp/text.idx"), EngineConfig::default(), &cancel).unwrap();
//!
//! indexer.add_document_heading(1, "Weekly report").unwrap();
//! indexer.add_document_fragment(1, "Numbers are up.", None).unwrap();
//! indexer.end_batch_update().unwrap();
//!
//! for entry in indexer.process_query_internal("report near numbers").unwrap() {
//!     println!("{} {:?}", entry.doc_index, entry.proximity);
//! }
//! indexer.close_indices().unwrap();
//! ```
//!
//! ## Storage
//!
//! Each term owns one chain of clusters in a blob store. New postings are
//! appended as a chain segment; deletes stamp a tombstone over the posting.
//! A corrupted or outdated index is never repaired: every format error asks
//! the caller to discard the index and rebuild it from the source documents.

pub mod error;
pub mod index;
pub mod output;
pub mod query;
pub mod utils;

pub use error::{IndexError, Result};
