//! Output formatting for query results

use crate::index::types::{DocId, Entry, Proximity};
use crate::query::Highlight;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// One result line: the entry plus an optional snippet
pub struct QueryHit<'a> {
    pub entry: &'a Entry,
    pub snippet: Option<(String, Vec<Highlight>)>,
}

fn proximity_label(proximity: Proximity) -> &'static str {
    match proximity {
        Proximity::Document => "document",
        Proximity::Sentence => "sentence",
        Proximity::Phrase => "phrase",
    }
}

/// Print hits as `doc:score [proximity]`, each followed by its snippet
pub fn print_query_results(hits: &[QueryHit<'_>], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);

    for hit in hits {
        let entry = hit.entry;

        // Document id
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
        write!(stdout, "{}", entry.doc_index)?;
        stdout.reset()?;
        write!(stdout, ":")?;

        // Score
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "{:.3}", entry.tf_idf)?;
        stdout.reset()?;

        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(stdout, " [{}]", proximity_label(entry.proximity))?;
        stdout.reset()?;
        if entry.count() > 1 {
            write!(stdout, " {} spellings", entry.count())?;
        }
        writeln!(stdout)?;

        if let Some((snippet, highlights)) = &hit.snippet {
            write!(stdout, "  ")?;
            print_snippet(&mut stdout, snippet, highlights)?;
        }
    }

    Ok(())
}

/// Print a snippet with its highlighted spans
fn print_snippet(stdout: &mut StandardStream, snippet: &str, highlights: &[Highlight]) -> io::Result<()> {
    let mut cursor = 0;
    for h in highlights {
        let start = h.start.min(snippet.len());
        let end = (h.start + h.len).min(snippet.len());
        if start < cursor || !snippet.is_char_boundary(start) || !snippet.is_char_boundary(end) {
            continue;
        }

        // Text before match
        write!(stdout, "{}", &snippet[cursor..start])?;

        // The match itself (highlighted)
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(stdout, "{}", &snippet[start..end])?;
        stdout.reset()?;
        cursor = end;
    }

    // Text after the last match
    writeln!(stdout, "{}", &snippet[cursor..])?;
    Ok(())
}

/// Print only document ids (one per line)
pub fn print_doc_ids(docs: &[DocId]) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    for doc in docs {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        writeln!(stdout, "{}", doc)?;
        stdout.reset()?;
    }
    Ok(())
}
