use crate::error::Result;
use crate::index::accessor::TermIndexAccessor;
use crate::index::record::populate_record_id;
use crate::index::types::*;
use crate::query::parser::{Instruction, MAX_LEXEMES, PostfixForm};
use ahash::AHashSet;
use std::cmp::Ordering;

/// Evaluates postfix query programs against the term index.
///
/// Every intermediate result is a `Vec<Entry>` sorted by `doc_index`.
pub struct QueryExecutor<'a> {
    accessor: &'a mut TermIndexAccessor,
    total_docs: usize,
    max_distance: u16,
    /// Next base id handed to a wildcard spelling
    next_spelling: u16,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(accessor: &'a mut TermIndexAccessor, total_docs: usize, max_distance: u16) -> Self {
        Self {
            accessor,
            total_docs,
            max_distance,
            next_spelling: 0,
        }
    }

    /// Run `form`. A program that does not reduce to one result yields no
    /// documents.
    pub fn execute(&mut self, form: &PostfixForm) -> Result<Vec<Entry>> {
        if form.lexemes.len() > MAX_LEXEMES {
            return Ok(Vec::new());
        }
        self.next_spelling = form.lexemes.len() as u16;
        let mut stack: Vec<Vec<Entry>> = Vec::new();

        for instruction in &form.instructions {
            let result = match *instruction {
                Instruction::Term(n) => self.fetch_term(&form.lexemes[n], n as u16)?,
                Instruction::Wildcard(n) => self.fetch_wildcard(&form.lexemes[n])?,
                Instruction::Phrase { first, len } => self.fetch_phrase(&form.lexemes, first, len)?,
                Instruction::Section(id) => match stack.pop() {
                    Some(operand) => restrict_to_section(operand, id),
                    None => return Ok(Vec::new()),
                },
                Instruction::And | Instruction::Or | Instruction::Near => {
                    let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                        return Ok(Vec::new());
                    };
                    match *instruction {
                        Instruction::And => intersect(left, right),
                        Instruction::Or => union(left, right),
                        _ => near(left, right, self.max_distance),
                    }
                }
            };
            stack.push(result);
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(result), true) => Ok(result),
            _ => Ok(Vec::new()),
        }
    }

    /// Live entries of one term, one entry per document, offsets stamped
    /// with `base_id` and weights set to `tf * idf`
    fn fetch_term(&mut self, token: &str, base_id: u16) -> Result<Vec<Entry>> {
        let Some(mut record) = self.accessor.get_record(token)? else {
            return Ok(Vec::new());
        };
        populate_record_id(&mut record, base_id);

        let mut entries = coalesce(record.entries);
        let idf = (1.0 + self.total_docs.max(entries.len()) as f32 / entries.len().max(1) as f32).ln();
        for entry in &mut entries {
            entry.tf_idf *= idf;
        }
        Ok(entries)
    }

    fn fetch_wildcard(&mut self, lexeme: &str) -> Result<Vec<Entry>> {
        let prefix = lexeme.trim_end_matches('*');
        let spellings = self.accessor.prefix_terms(prefix)?;

        let mut result = Vec::new();
        for (spelling, _) in spellings {
            let base_id = self.next_spelling;
            self.next_spelling = self.next_spelling.saturating_add(1);
            let entries = self.fetch_term(&spelling, base_id)?;
            result = union(result, entries);
        }
        Ok(result)
    }

    fn fetch_phrase(&mut self, lexemes: &[String], first: usize, len: usize) -> Result<Vec<Entry>> {
        let mut combined: Option<Vec<Entry>> = None;
        for n in first..first + len {
            let entries = self.fetch_term(&lexemes[n], n as u16)?;
            combined = Some(match combined {
                None => entries,
                Some(acc) => intersect(acc, entries),
            });
            if combined.as_ref().is_some_and(Vec::is_empty) {
                return Ok(Vec::new());
            }
        }

        let mut result = combined.unwrap_or_default();
        result.retain_mut(|entry| keep_phrase_runs(entry, first as u16, len as u16));
        for entry in &mut result {
            entry.proximity = Proximity::Phrase;
        }
        Ok(result)
    }
}

/// Merge entries of the same document (a document indexed twice without a
/// delete in between)
fn coalesce(mut entries: Vec<Entry>) -> Vec<Entry> {
    entries.sort_by_key(|e| e.doc_index);
    let mut result: Vec<Entry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match result.last_mut() {
            Some(last) if last.doc_index == entry.doc_index => {
                last.tf_idf = last.tf_idf.max(entry.tf_idf);
                last.offsets.extend(entry.offsets);
                last.normalize_offsets();
            }
            _ => result.push(entry),
        }
    }
    result
}

/// Merge-join two doc-sorted lists. `combine` decides what a document
/// present on both sides turns into; one-sided documents are kept only when
/// `keep_unmatched` is set.
fn merge_by_doc<F>(left: Vec<Entry>, right: Vec<Entry>, keep_unmatched: bool, mut combine: F) -> Vec<Entry>
where
    F: FnMut(Entry, Entry) -> Option<Entry>,
{
    let mut result = Vec::with_capacity(if keep_unmatched {
        left.len() + right.len()
    } else {
        left.len().min(right.len())
    });
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let order = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.doc_index.cmp(&r.doc_index),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => {
                let entry = left.next();
                if keep_unmatched {
                    result.extend(entry);
                } else if right.peek().is_none() {
                    break;
                }
            }
            Ordering::Greater => {
                let entry = right.next();
                if keep_unmatched {
                    result.extend(entry);
                } else if left.peek().is_none() {
                    break;
                }
            }
            Ordering::Equal => {
                if let (Some(l), Some(r)) = (left.next(), right.next()) {
                    result.extend(combine(l, r));
                }
            }
        }
    }
    result
}

fn merge_offsets(mut left: Entry, right: Entry) -> Entry {
    left.offsets.extend(right.offsets);
    left.normalize_offsets();
    left
}

/// Documents on both sides; offsets are united, weights summed
pub fn intersect(left: Vec<Entry>, right: Vec<Entry>) -> Vec<Entry> {
    merge_by_doc(left, right, false, |l, r| {
        let weight = l.tf_idf + r.tf_idf;
        let mut entry = merge_offsets(l, r);
        entry.tf_idf = weight;
        entry.proximity = Proximity::Document;
        Some(entry)
    })
}

/// Documents on either side; duplicates merge offsets and keep the best weight
pub fn union(left: Vec<Entry>, right: Vec<Entry>) -> Vec<Entry> {
    merge_by_doc(left, right, true, |l, r| {
        let weight = l.tf_idf.max(r.tf_idf);
        let proximity = l.proximity.max(r.proximity);
        let mut entry = merge_offsets(l, r);
        entry.tf_idf = weight;
        entry.proximity = proximity;
        Some(entry)
    })
}

/// Documents where an occurrence from each side shares a sentence within
/// `max_distance` tokens
pub fn near(left: Vec<Entry>, right: Vec<Entry>, max_distance: u16) -> Vec<Entry> {
    merge_by_doc(left, right, false, |l, r| {
        let distance = closest_pair(&l.offsets, &r.offsets)?;
        if distance > max_distance {
            return None;
        }
        let weight = l.tf_idf + r.tf_idf;
        let mut entry = merge_offsets(l, r);
        entry.tf_idf = weight;
        entry.proximity = if distance == 1 {
            Proximity::Phrase
        } else {
            Proximity::Sentence
        };
        Some(entry)
    })
}

/// Smallest token distance between two occurrences in the same sentence.
/// Sentences never span a paragraph break.
fn closest_pair(left: &[InstanceOffset], right: &[InstanceOffset]) -> Option<u16> {
    let mut best: Option<u16> = None;
    for a in left {
        for b in right {
            if a.sentence() != b.sentence() || a.offset_normal() == b.offset_normal() {
                continue;
            }
            let distance = a.token_order().abs_diff(b.token_order());
            if best.is_none_or(|d| distance < d) {
                best = Some(distance);
            }
        }
    }
    best
}

/// Keep only the offsets forming complete runs of the phrase lexemes
/// `first..first + len`. Returns false when no run exists.
fn keep_phrase_runs(entry: &mut Entry, first: u16, len: u16) -> bool {
    let present: AHashSet<(u16, u16, u16)> = entry
        .offsets
        .iter()
        .map(|o| (o.base_id, o.sentence(), o.token_order()))
        .collect();

    let mut keep: AHashSet<(u16, u16, u16)> = AHashSet::new();
    for o in entry.offsets.iter().filter(|o| o.base_id == first) {
        let (sentence, order) = (o.sentence(), o.token_order());
        let run: Option<Vec<(u16, u16, u16)>> = (0..len)
            .map(|k| {
                let key = (first.checked_add(k)?, sentence, order.checked_add(k)?);
                present.contains(&key).then_some(key)
            })
            .collect();
        if let Some(run) = run {
            keep.extend(run);
        }
    }

    entry
        .offsets
        .retain(|o| keep.contains(&(o.base_id, o.sentence(), o.token_order())));
    !entry.offsets.is_empty()
}

/// Keep offsets of one section; documents left without offsets drop out
pub fn restrict_to_section(entries: Vec<Entry>, section: SectionId) -> Vec<Entry> {
    entries
        .into_iter()
        .filter_map(|mut entry| {
            entry.offsets.retain(|o| o.section_id() == section);
            (!entry.offsets.is_empty()).then_some(entry)
        })
        .collect()
}
