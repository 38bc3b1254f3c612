//! Best-effort contact extraction from raw page text.

use crate::config::{CompiledPatterns, ExtractionPatterns};
use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

/// Separator between distinct matches of one contact kind.
pub const MATCH_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContactKind {
    Email,
    Phone,
    Address,
    WorkingHours,
}

impl ContactKind {
    pub const ALL: [ContactKind; 4] = [
        ContactKind::Email,
        ContactKind::Phone,
        ContactKind::Address,
        ContactKind::WorkingHours,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ContactKind::Email => "email",
            ContactKind::Phone => "phone",
            ContactKind::Address => "address",
            ContactKind::WorkingHours => "workingHours",
        }
    }

    /// Weight of this kind in the extractor's own quality score.
    fn extraction_weight(&self) -> u32 {
        match self {
            ContactKind::Email | ContactKind::Phone => 3,
            ContactKind::Address | ContactKind::WorkingHours => 0,
        }
    }
}

impl fmt::Display for ContactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Contacts found in one document.
///
/// Only kinds with at least one match are present. Each value joins the distinct
/// matches for that kind in sorted order with [`MATCH_SEPARATOR`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFindings {
    contacts: BTreeMap<ContactKind, String>,
    quality_score: u32,
    total_contacts: usize,
}

impl ContactFindings {
    fn from_contacts(contacts: BTreeMap<ContactKind, String>) -> Self {
        let quality_score = contacts.keys().map(ContactKind::extraction_weight).sum();
        let total_contacts = contacts.len();
        Self {
            contacts,
            quality_score,
            total_contacts,
        }
    }

    pub fn get(&self, kind: ContactKind) -> Option<&str> {
        self.contacts.get(&kind).map(String::as_str)
    }

    pub fn contains(&self, kind: ContactKind) -> bool {
        self.contacts.contains_key(&kind)
    }

    /// Number of distinct matches recorded for `kind`.
    pub fn match_count(&self, kind: ContactKind) -> usize {
        self.get(kind)
            .map(|value| value.split(MATCH_SEPARATOR).count())
            .unwrap_or(0)
    }

    pub fn contacts(&self) -> impl Iterator<Item = (ContactKind, &str)> {
        self.contacts.iter().map(|(kind, value)| (*kind, value.as_str()))
    }

    /// Email and phone each contribute 3.
    pub fn quality_score(&self) -> u32 {
        self.quality_score
    }

    /// Number of kinds with at least one match.
    pub fn total_contacts(&self) -> usize {
        self.total_contacts
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

static DEFAULT_EXTRACTOR: LazyLock<ContactExtractor> = LazyLock::new(|| ContactExtractor {
    patterns: ExtractionPatterns::default()
        .compile()
        .expect("built-in extraction patterns compile"),
});

/// Pure, thread-safe contact extractor. Cloning shares the compiled patterns.
#[derive(Debug, Clone)]
pub struct ContactExtractor {
    patterns: CompiledPatterns,
}

impl Default for ContactExtractor {
    fn default() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }
}

impl ContactExtractor {
    pub fn new(patterns: &ExtractionPatterns) -> Result<Self, HarvestError> {
        Ok(Self {
            patterns: patterns.compile()?,
        })
    }

    /// Scan `content` for every contact kind. Empty input yields empty findings.
    pub fn extract(&self, content: &str) -> ContactFindings {
        if content.trim().is_empty() {
            return ContactFindings::default();
        }

        let contacts = ContactKind::ALL
            .iter()
            .filter_map(|kind| {
                let regex = self.pattern(*kind);
                let matches: BTreeSet<&str> = regex
                    .find_iter(content)
                    .map(|m| m.as_str().trim())
                    .filter(|m| !m.is_empty())
                    .collect();

                if matches.is_empty() {
                    None
                } else {
                    let joined: Vec<&str> = matches.into_iter().collect();
                    Some((*kind, joined.join(MATCH_SEPARATOR)))
                }
            })
            .collect();

        ContactFindings::from_contacts(contacts)
    }

    fn pattern(&self, kind: ContactKind) -> &regex::Regex {
        match kind {
            ContactKind::Email => &self.patterns.email,
            ContactKind::Phone => &self.patterns.phone,
            ContactKind::Address => &self.patterns.address,
            ContactKind::WorkingHours => &self.patterns.working_hours,
        }
    }
}
