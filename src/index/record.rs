//! Binary codec of a term's postings.
//!
//! ```text
//! HC:i32, { DocIndex:i32, TfIdf:f32, (Count-1):varint, {Offset:u32, CompoundInfo:u32} x Count }*
//! ```
//!
//! All integers are little-endian. The entry list has no count: it runs to
//! the end of the chain's bytes. `DocIndex == -1` marks a tombstone.

use crate::error::{IndexError, Result};
use crate::index::types::*;
use crate::utils::{ByteCursor, encode_varint, write_i32_le};
use roaring::RoaringBitmap;
use std::io::Write;

/// Bytes taken by one stored offset
const OFFSET_BYTES: usize = 8;

/// Physical shape of a parsed record.
///
/// The live entry list of a [`TermRecord`] drops tombstones, so it can be
/// shorter than what is stored. The layout keeps the stored view: one byte
/// position per stored entry and a bitmap of the dead ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordLayout {
    /// Byte position of every stored entry's `DocIndex` field
    pub entry_positions: Vec<u32>,
    /// Stored doc id of every entry, tombstones included
    pub stored_docs: Vec<DocId>,
    /// Ordinals of tombstoned entries
    pub dead: RoaringBitmap,
    /// Total encoded length in bytes
    pub encoded_len: usize,
}

impl RecordLayout {
    pub fn stored_entries(&self) -> usize {
        self.entry_positions.len()
    }

    pub fn live_entries(&self) -> usize {
        self.stored_entries() - self.dead.len() as usize
    }

    /// Byte positions of the live entries stored for `doc`
    pub fn positions_of(&self, doc: DocId) -> Vec<u32> {
        self.stored_docs
            .iter()
            .zip(&self.entry_positions)
            .enumerate()
            .filter(|&(ordinal, (&d, _))| d == doc && !self.dead.contains(ordinal as u32))
            .map(|(_, (_, &pos))| pos)
            .collect()
    }
}

/// Parse a complete record (`HC` followed by entries)
pub fn parse(bytes: &[u8]) -> Result<(TermRecord, RecordLayout)> {
    let mut cursor = ByteCursor::new(bytes);
    let hc = cursor
        .read_i32()
        .ok_or_else(|| IndexError::format("record is shorter than its header"))?;

    let mut record = TermRecord::new(hc);
    let mut layout = RecordLayout::default();
    parse_entries_into(&mut cursor, &mut record.entries, &mut layout)?;
    layout.encoded_len = bytes.len();
    Ok((record, layout))
}

/// Parse an entries-only chain segment
pub fn parse_entries(bytes: &[u8]) -> Result<(Vec<Entry>, RecordLayout)> {
    let mut cursor = ByteCursor::new(bytes);
    let mut entries = Vec::new();
    let mut layout = RecordLayout::default();
    parse_entries_into(&mut cursor, &mut entries, &mut layout)?;
    layout.encoded_len = bytes.len();
    Ok((entries, layout))
}

fn parse_entries_into(
    cursor: &mut ByteCursor<'_>,
    entries: &mut Vec<Entry>,
    layout: &mut RecordLayout,
) -> Result<()> {
    while !cursor.is_at_end() {
        let ordinal = layout.entry_positions.len() as u32;
        let position = cursor.position() as u32;
        let entry = parse_entry(cursor)?;

        layout.entry_positions.push(position);
        layout.stored_docs.push(entry.doc_index);
        if entry.is_tombstone() {
            layout.dead.insert(ordinal);
        } else {
            entries.push(entry);
        }
    }
    Ok(())
}

fn parse_entry(cursor: &mut ByteCursor<'_>) -> Result<Entry> {
    let truncated = || IndexError::format("record entry is truncated");

    let doc_index = cursor.read_i32().ok_or_else(truncated)?;
    let tf_idf = cursor.read_f32().ok_or_else(truncated)?;
    let count = cursor
        .read_varint_i32()
        .ok_or_else(truncated)?
        .checked_add(1)
        .ok_or_else(|| IndexError::format("instance count overflows"))?;
    if count <= 0 {
        return Err(IndexError::format(format!(
            "negative instance count {} in record entry",
            count
        )));
    }

    let count = count as usize;
    let byte_len = count.checked_mul(OFFSET_BYTES).ok_or_else(truncated)?;
    if byte_len > cursor.remaining() {
        return Err(truncated());
    }

    let mut offsets = Vec::new();
    offsets
        .try_reserve_exact(count)
        .map_err(|_| IndexError::format(format!("instance count {} cannot be allocated", count)))?;

    let raw = cursor.read_bytes(byte_len).ok_or_else(truncated)?;
    for chunk in raw.chunks_exact(OFFSET_BYTES) {
        offsets.push(InstanceOffset {
            offset: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            compound_info: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            base_id: 0,
        });
    }

    Ok(Entry::new(doc_index, tf_idf, offsets))
}

/// Serialize a complete record. The record must hold at least one entry.
pub fn save<W: Write>(writer: &mut W, record: &TermRecord) -> Result<()> {
    if record.entries.is_empty() {
        return Err(IndexError::Precondition("cannot save a record without entries"));
    }
    write_i32_le(writer, record.hc)?;
    save_entries(writer, &record.entries)
}

/// Serialize entries without the `HC` header, as appended to a chain
pub fn save_entries<W: Write>(writer: &mut W, entries: &[Entry]) -> Result<()> {
    let mut buf = Vec::with_capacity(entries.len() * 24);
    for entry in entries {
        if entry.offsets.is_empty() {
            return Err(IndexError::Precondition("cannot save an entry without offsets"));
        }
        buf.extend_from_slice(&entry.doc_index.to_le_bytes());
        buf.extend_from_slice(&entry.tf_idf.to_le_bytes());
        encode_varint((entry.offsets.len() - 1) as u32, &mut buf);
        for offset in &entry.offsets {
            buf.extend_from_slice(&offset.offset.to_le_bytes());
            buf.extend_from_slice(&offset.compound_info.to_le_bytes());
        }
    }
    writer.write_all(&buf)?;
    Ok(())
}

/// Serialize a record into a fresh buffer
pub fn to_bytes(record: &TermRecord) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    save(&mut buf, record)?;
    Ok(buf)
}

/// Drop tombstoned entries
pub fn compress(record: &mut TermRecord) {
    record.entries.retain(|e| !e.is_tombstone());
}

/// Stamp `term_number` as the base id of every offset of the record
pub fn populate_record_id(record: &mut TermRecord, term_number: u16) {
    for entry in &mut record.entries {
        for offset in &mut entry.offsets {
            offset.base_id = term_number;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TermRecord {
        TermRecord {
            hc: 42,
            entries: vec![
                Entry::new(
                    3,
                    0.5,
                    vec![InstanceOffset::new(0, 0, 0, 0), InstanceOffset::new(14, 1, 2, 3)],
                ),
                Entry::new(9, 1.0, vec![InstanceOffset::new(7, 0, 0, 1)]),
            ],
        }
    }

    #[test]
    fn test_parse_preserves_saved_record() {
        let record = sample_record();
        let bytes = to_bytes(&record).unwrap();
        let (parsed, layout) = parse(&bytes).unwrap();

        assert_eq!(parsed, record);
        assert_eq!(layout.stored_entries(), 2);
        assert_eq!(layout.encoded_len, bytes.len());
        // HC, then doc 3 at byte 4; doc 3 takes 4 + 4 + 1 + 2 * 8 bytes
        assert_eq!(layout.entry_positions, vec![4, 29]);
    }

    #[test]
    fn test_exact_byte_layout() {
        let record = TermRecord {
            hc: 1,
            entries: vec![Entry::new(2, 1.0, vec![InstanceOffset::new(5, 0, 1, 2)])],
        };
        let bytes = to_bytes(&record).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.push(0);
        expected.extend_from_slice(&5u32.to_le_bytes());
        expected.extend_from_slice(&(1u32 | (2 << 16)).to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_tombstones_are_dropped_but_counted() {
        let mut record = sample_record();
        record.entries[0].doc_index = TOMBSTONE_DOC;
        let bytes = to_bytes(&record).unwrap();

        let (parsed, layout) = parse(&bytes).unwrap();
        assert_eq!(parsed.docs_number(), 1);
        assert_eq!(parsed.entries[0].doc_index, 9);
        assert_eq!(layout.stored_entries(), 2);
        assert_eq!(layout.live_entries(), 1);
        assert!(layout.dead.contains(0));

        // Saving the parsed record drops the tombstone for good
        let (reparsed, relayout) = parse(&to_bytes(&parsed).unwrap()).unwrap();
        assert_eq!(reparsed, parsed);
        assert_eq!(relayout.stored_entries(), 1);
    }

    #[test]
    fn test_positions_of_skips_dead_entries() {
        let mut record = sample_record();
        record.entries.push(Entry::new(3, 0.1, vec![InstanceOffset::new(40, 0, 5, 0)]));
        record.entries[0].doc_index = TOMBSTONE_DOC;
        let (_, layout) = parse(&to_bytes(&record).unwrap()).unwrap();
        assert_eq!(layout.positions_of(3), vec![layout.entry_positions[2]]);
        assert!(layout.positions_of(77).is_empty());
    }

    #[test]
    fn test_negative_count_is_format_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        // (Count-1) = -5
        encode_varint(-5i32 as u32, &mut bytes);
        let err = parse(&bytes).unwrap_err();
        assert!(err.needs_rebuild());
    }

    #[test]
    fn test_oversized_count_is_format_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        encode_varint(i32::MAX as u32 - 1, &mut bytes);
        assert!(parse(&bytes).unwrap_err().needs_rebuild());
    }

    #[test]
    fn test_truncated_entry_is_format_error() {
        let bytes = to_bytes(&sample_record()).unwrap();
        let err = parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, IndexError::Format { .. }));
    }

    #[test]
    fn test_save_requires_entries() {
        let err = to_bytes(&TermRecord::new(5)).unwrap_err();
        assert!(matches!(err, IndexError::Precondition(_)));
    }

    #[test]
    fn test_appended_segment_parses_as_continuation() {
        let record = sample_record();
        let mut bytes = to_bytes(&record).unwrap();
        save_entries(&mut bytes, &[Entry::new(11, 0.25, vec![InstanceOffset::new(3, 0, 0, 0)])])
            .unwrap();
        let (parsed, _) = parse(&bytes).unwrap();
        assert_eq!(parsed.docs_number(), 3);
        assert_eq!(parsed.entries[2].doc_index, 11);

        let mut segment = Vec::new();
        save_entries(&mut segment, &record.entries).unwrap();
        let (entries, layout) = parse_entries(&segment).unwrap();
        assert_eq!(entries, record.entries);
        assert_eq!(layout.entry_positions[0], 0);
    }

    #[test]
    fn test_compress_and_populate() {
        let mut record = sample_record();
        record.entries[1].doc_index = TOMBSTONE_DOC;
        compress(&mut record);
        assert_eq!(record.docs_number(), 1);

        populate_record_id(&mut record, 4);
        assert!(record.entries[0].offsets.iter().all(|o| o.base_id == 4));
    }
}
