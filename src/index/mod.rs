//! Inverted index storage: postings codec, blob store, term directory and
//! the incremental indexer on top of them.
//!
//! ## Files
//!
//! For an index named `<name>`:
//!
//! - `<name>` - blob cluster store holding one chain per term
//! - `<name>.hdr` - term directory (head and tail handle per term)
//! - `<name>.lex` - lexicon (token -> term id)
//! - `<name>.docs` - document -> term ids, used by deletes

pub mod accessor;
pub mod blob_store;
pub mod directory;
pub mod doc_map;
pub mod indexer;
pub mod lexicon;
pub mod multimap;
pub mod record;
pub mod sections;
pub mod stats;
pub mod types;

pub use accessor::TermIndexAccessor;
pub use indexer::{FullTextIndexer, SourceDocument};
pub use sections::SectionRegistry;
pub use types::*;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Extension of the lexicon side file
pub const LEXICON_EXTENSION: &str = "lex";

/// Extension of the document map side file
pub const DOC_MAP_EXTENSION: &str = "docs";

/// Replace `path` with `bytes` through a temporary file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = crate::utils::side_file(path, "tmp");
    {
        let mut file = BufWriter::new(File::create(&tmp)?);
        file.write_all(bytes)?;
        file.flush()?;
        file.get_ref().sync_data()?;
    }
    fs::rename(&tmp, path)
}
