//! Section registry: section name <-> two-letter code <-> 3-bit id.

use crate::error::{IndexError, Result};
use crate::index::types::SectionId;

/// Sections fit into the 3 bits reserved in an offset
pub const MAX_SECTIONS: usize = 8;

pub const BODY: SectionId = 0;
pub const SUBJECT: SectionId = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct SectionRegistry {
    sections: Vec<Section>,
}

impl Default for SectionRegistry {
    fn default() -> Self {
        let sections = [("Body", "BO"), ("Subject", "SU"), ("Annotation", "AN"), ("Source", "SR")]
            .into_iter()
            .enumerate()
            .map(|(id, (name, code))| Section {
                id: id as SectionId,
                name: name.to_string(),
                code: code.to_string(),
            })
            .collect();
        Self { sections }
    }
}

impl SectionRegistry {
    /// Registry with no sections at all
    pub fn empty() -> Self {
        Self { sections: Vec::new() }
    }

    /// Register a section and return its id. Re-registering the same name
    /// with the same code returns the existing id.
    pub fn register(&mut self, name: &str, code: &str) -> Result<SectionId> {
        if let Some(existing) = self.by_name(name) {
            if existing.code.eq_ignore_ascii_case(code) {
                return Ok(existing.id);
            }
            return Err(IndexError::Precondition("section is already registered with another code"));
        }
        if self.by_code(code).is_some() {
            return Err(IndexError::Precondition("section code is already taken"));
        }
        if self.sections.len() >= MAX_SECTIONS {
            return Err(IndexError::Precondition("no section ids left"));
        }

        let id = self.sections.len() as SectionId;
        self.sections.push(Section {
            id,
            name: name.to_string(),
            code: code.to_ascii_uppercase(),
        });
        Ok(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Look up a section by its short code, case-insensitively
    pub fn by_code(&self, code: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.code.eq_ignore_ascii_case(code))
    }

    pub fn by_id(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
