use std::cmp::Ordering;

/// Stable id of a canonical (lowercased) token
pub type TermId = i32;

/// Opaque id of the resource that owns a posting. Valid ids are `>= 0`.
pub type DocId = i32;

/// Cluster handle inside the blob store
pub type Handle = i32;

/// 3-bit id of a document section
pub type SectionId = u8;

/// On-disk marker of a removed posting
pub const TOMBSTONE_DOC: DocId = -1;

/// Version of the record format stamped into the signature cluster
pub const FORMAT_VERSION: i32 = 16;

const OFFSET_MASK: u32 = 0x00FF_FFFF;
const SECTION_SHIFT: u32 = 26;
const SECTION_MASK: u32 = 0x7;

/// Largest byte position an offset can hold
pub const MAX_OFFSET: u32 = OFFSET_MASK;

/// One occurrence of a term inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceOffset {
    /// Byte position (low 24 bits) and section id (bits 26..29)
    pub offset: u32,
    /// Sentence (low 16 bits) and token order inside it (high 16 bits)
    pub compound_info: u32,
    /// Ordinal of the query lexeme this occurrence was fetched for; not stored
    pub base_id: u16,
}

impl InstanceOffset {
    pub fn new(position: u32, section: SectionId, sentence: u16, order: u16) -> Self {
        Self {
            offset: (position & OFFSET_MASK) | ((section as u32 & SECTION_MASK) << SECTION_SHIFT),
            compound_info: (sentence as u32) | ((order as u32) << 16),
            base_id: 0,
        }
    }

    #[inline]
    pub fn offset_normal(&self) -> u32 {
        self.offset & OFFSET_MASK
    }

    #[inline]
    pub fn section_id(&self) -> SectionId {
        ((self.offset >> SECTION_SHIFT) & SECTION_MASK) as SectionId
    }

    #[inline]
    pub fn sentence(&self) -> u16 {
        (self.compound_info & 0xFFFF) as u16
    }

    #[inline]
    pub fn token_order(&self) -> u16 {
        (self.compound_info >> 16) as u16
    }

    /// Document position used to order offsets: sentence, then token order
    #[inline]
    pub fn position_key(&self) -> (u16, u16, u32) {
        (self.sentence(), self.token_order(), self.offset_normal())
    }
}

/// How closely the query terms co-occur in a matched document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Proximity {
    #[default]
    Document,
    Sentence,
    Phrase,
}

/// One document's occurrences of a term, or of a whole query after evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entry {
    pub doc_index: DocId,
    pub tf_idf: f32,
    pub offsets: Vec<InstanceOffset>,
    pub proximity: Proximity,
}

impl Entry {
    pub fn new(doc_index: DocId, tf_idf: f32, offsets: Vec<InstanceOffset>) -> Self {
        Self {
            doc_index,
            tf_idf,
            offsets,
            proximity: Proximity::Document,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.doc_index == TOMBSTONE_DOC
    }

    /// Number of distinct term spellings that contributed offsets.
    ///
    /// For a wildcard leaf this is the number of matched spellings.
    pub fn count(&self) -> usize {
        let mut ids: Vec<u16> = self.offsets.iter().map(|o| o.base_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Sort offsets by position and drop exact duplicates
    pub fn normalize_offsets(&mut self) {
        self.offsets
            .sort_by(|a, b| a.position_key().cmp(&b.position_key()).then(a.base_id.cmp(&b.base_id)));
        self.offsets.dedup();
    }
}

/// Comparer that orders entries by descending relevance, then by document
pub fn by_relevance(a: &Entry, b: &Entry) -> Ordering {
    b.tf_idf
        .partial_cmp(&a.tf_idf)
        .unwrap_or(Ordering::Equal)
        .then(a.doc_index.cmp(&b.doc_index))
}

/// All postings of one term
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TermRecord {
    /// Term id (the record's "hash code")
    pub hc: TermId,
    pub entries: Vec<Entry>,
}

impl TermRecord {
    pub fn new(hc: TermId) -> Self {
        Self {
            hc,
            entries: Vec::new(),
        }
    }

    /// Number of live documents in the record
    pub fn docs_number(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, doc: DocId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.doc_index == doc)
    }
}
