use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use termdex::index::{DocId, FullTextIndexer, SourceDocument, by_relevance};
use termdex::output::{self, QueryHit};
use termdex::utils::{CancellationToken, EngineConfig, default_index_path};
use tracing::info;

#[derive(Parser)]
#[command(name = "termdex")]
#[command(about = "Incremental full-text index with proximity-aware queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Blob store file of the index (defaults to the app data directory)
    #[arg(short, long, global = true)]
    index: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a text file as document <doc-id>
    Add {
        doc_id: DocId,
        file: PathBuf,

        /// Heading (subject) of the document
        #[arg(long)]
        heading: Option<String>,

        /// Section name for the file content
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Remove a document from the index
    Delete { doc_id: DocId },
    /// Run a query
    Query {
        /// Query text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,

        /// Order results by relevance instead of document id
        #[arg(short, long)]
        relevance: bool,

        /// Directory holding `<doc-id>.txt` sources for snippets
        #[arg(long)]
        context_dir: Option<PathBuf>,

        /// Maximum token distance for `near` (overrides the config)
        #[arg(long)]
        max_distance: Option<u16>,

        /// Print document ids only
        #[arg(short = 'l', long)]
        ids_only: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Show index statistics
    Stats,
    /// Discard the index and rebuild it from `<doc-id>.txt` files
    Rebuild {
        /// Directory with one file per document; the first line is the heading
        dir: PathBuf,
    },
    /// Delete the index files
    Discard {
        /// Rename the files aside instead of deleting them
        #[arg(long)]
        keep_files: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TERMDEX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let index_path = match cli.index {
        Some(path) => path,
        None => default_index_path()?,
    };

    // Discard and rebuild must work on an index that no longer opens
    match &cli.command {
        Commands::Discard { keep_files } => {
            FullTextIndexer::discard_files(&index_path, &config, *keep_files)
                .with_context(|| format!("Failed to discard text index {}", index_path.display()))?;
            println!("Discarded index {}", index_path.display());
            return Ok(());
        }
        Commands::Rebuild { .. } => {
            FullTextIndexer::discard_files(&index_path, &config, false)
                .with_context(|| format!("Failed to discard text index {}", index_path.display()))?;
        }
        _ => {}
    }

    let cancel = CancellationToken::new();
    let mut indexer = FullTextIndexer::open(&index_path, config, &cancel).with_context(|| {
        format!(
            "Failed to open text index {} (run 'termdex discard' and rebuild if it is corrupted)",
            index_path.display()
        )
    })?;

    match cli.command {
        Commands::Add {
            doc_id,
            file,
            heading,
            section,
        } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if let Some(heading) = &heading {
                indexer.add_document_heading(doc_id, heading)?;
            }
            indexer.add_document_fragment(doc_id, &text, section.as_deref())?;
            indexer.end_batch_update()?;
            println!("Indexed document {}", doc_id);
        }
        Commands::Delete { doc_id } => {
            let removed = indexer.delete_document(doc_id)?;
            println!("Removed {} postings of document {}", removed, doc_id);
        }
        Commands::Query {
            text,
            relevance,
            context_dir,
            max_distance,
            ids_only,
            no_color,
        } => {
            let query = text.join(" ");
            let Some(form) = indexer.parse_query(&query) else {
                bail!("Malformed query: {}", query);
            };
            info!("Query program: {}", form);

            let max_distance = max_distance.unwrap_or(indexer.config().near_distance);
            let mut entries = indexer.process_query(&form, max_distance)?;
            if relevance {
                entries.sort_by(by_relevance);
            }

            if ids_only {
                let docs: Vec<DocId> = entries.iter().map(|e| e.doc_index).collect();
                output::print_doc_ids(&docs)?;
            } else {
                let hits: Vec<QueryHit<'_>> = entries
                    .iter()
                    .map(|entry| QueryHit {
                        entry,
                        snippet: context_dir
                            .as_deref()
                            .and_then(|dir| read_source(dir, entry.doc_index))
                            .map(|text| indexer.get_context(entry, &form.lexemes, &text)),
                    })
                    .collect();
                output::print_query_results(&hits, !no_color)?;
            }
        }
        Commands::Stats => {
            indexer.stats()?.print();
        }
        Commands::Rebuild { dir } => {
            let docs = load_sources(&dir)?;
            let count = indexer.rebuild(docs, &cancel)?;
            println!("Rebuilt index with {} documents", count);
        }
        Commands::Discard { .. } => unreachable!("discard is handled before the index is opened"),
    }

    indexer.close_indices()?;
    Ok(())
}

fn read_source(dir: &Path, doc: DocId) -> Option<String> {
    fs::read_to_string(dir.join(format!("{}.txt", doc))).ok()
}

/// Split a source file into heading (first line) and body (the rest,
/// starting at the line break) so indexed offsets match the file content
fn to_document(id: DocId, content: &str) -> SourceDocument {
    let split = content.find('\n').unwrap_or(content.len());
    let (heading, body) = content.split_at(split);
    let mut doc = SourceDocument::new(id).with_heading(heading);
    if !body.is_empty() {
        doc = doc.with_fragment(body, None);
    }
    doc
}

/// Read every `<doc-id>.txt` file in `dir`, ordered by document id
fn load_sources(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<DocId>().ok())
            .filter(|id| *id >= 0)
        else {
            continue;
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        docs.push(to_document(id, &content));
    }
    docs.sort_by_key(|d| d.id);
    Ok(docs)
}
