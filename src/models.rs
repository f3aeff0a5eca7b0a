//! Core data models used throughout the ingestion pipeline.
//!
//! These types represent the agencies and citations being tracked, the
//! upstream version metadata, and the rows the pipeline maintains
//! (checkpoint, history, snapshots).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A jurisdictional citation an agency is responsible for.
///
/// Field order is fixed: [`content_hash`](CfrReference::content_hash) is
/// computed over the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfrReference {
    pub title: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subchapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appendix: Option<String>,
}

impl CfrReference {
    pub fn title(title: u32) -> Self {
        Self {
            title,
            chapter: None,
            subchapter: None,
            subtitle: None,
            part: None,
            subpart: None,
            section: None,
            appendix: None,
        }
    }

    /// Stable SHA-256 hex digest of the reference fields.
    ///
    /// Two agencies citing the exact same slice of the corpus share a hash;
    /// the orchestrator uses it as a mutual-exclusion key.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Query filters for the versions endpoint, in upstream parameter order.
    pub fn filters(&self) -> Vec<(&'static str, &str)> {
        [
            ("chapter", &self.chapter),
            ("subchapter", &self.subchapter),
            ("part", &self.part),
            ("subpart", &self.subpart),
            ("section", &self.section),
            ("appendix", &self.appendix),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

impl std::fmt::Display for CfrReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "title {}", self.title)?;
        for (name, value) in self.filters() {
            write!(f, " {} {}", name, value)?;
        }
        Ok(())
    }
}

/// An agency with its ordered set of references.
#[derive(Debug, Clone, Serialize)]
pub struct Agency {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub short_name: Option<String>,
    pub display_name: String,
    pub sortable_name: String,
    /// Department id for sub-agencies; `None` for top-level departments.
    pub parent_id: Option<String>,
    pub references: Vec<CfrReference>,
}

/// One version entry from the upstream versions listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVersion {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub amendment_date: String,
    #[serde(default)]
    pub issue_date: String,
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub part: String,
    #[serde(default)]
    pub substantive: bool,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub subpart: Option<String>,
    pub title: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ContentVersion {
    /// Identity of the content unit this version describes.
    pub fn content_id(&self) -> String {
        format!("{}:{}", self.title, self.identifier)
    }

    /// The part number a section identifier belongs to (`"5.12"` → `"5"`).
    pub fn part_number(&self) -> &str {
        self.identifier
            .split('.')
            .next()
            .unwrap_or(self.identifier.as_str())
    }

    pub fn is_section(&self) -> bool {
        self.kind == "section"
    }
}

/// Upstream versions response.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub content_versions: Vec<ContentVersion>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// A labeled text unit produced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    /// Structural kind, e.g. `"SECTION"` or `"PART"` for headings, `"P"` for paragraphs.
    pub kind: String,
    pub identifier: String,
    pub text: String,
}

/// The singleton ingestion progress cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// `None` until the first cycle commits; the orchestrator then falls back to the epoch.
    pub next_processing_date: Option<NaiveDate>,
    pub is_caught_up: bool,
    /// Development cap on how far "present" extends.
    pub run_until: Option<NaiveDate>,
}

/// One row of an agency's word-count time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub agency_id: String,
    pub date: NaiveDate,
    pub word_count: i64,
}

/// Result of applying one content unit's diff to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryUpdate {
    pub previous_word_count: i64,
    pub current_word_count: i64,
    pub delta: i64,
    /// Whether the stored snapshot text differs from the new text.
    pub changed: bool,
}

/// Last-known extracted text for a content unit, scoped to an agency.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub agency_id: String,
    pub content_id: String,
    pub reference_hash: String,
    pub title: u32,
    pub identifier: String,
    pub kind: String,
    pub text: String,
}

/// A chunk of extracted text destined for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable_and_field_sensitive() {
        let mut a = CfrReference::title(7);
        a.chapter = Some("I".into());
        let b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);

        let mut c = a.clone();
        c.part = Some("5".into());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_filters_skip_missing_fields() {
        let mut r = CfrReference::title(40);
        r.chapter = Some("I".into());
        r.part = Some("60".into());
        assert_eq!(r.filters(), vec![("chapter", "I"), ("part", "60")]);
        assert_eq!(r.to_string(), "title 40 chapter I part 60");
    }

    #[test]
    fn test_version_parsing() {
        let json = r#"{
            "date": "2017-01-03", "amendment_date": "2017-01-03", "issue_date": "2017-01-03",
            "identifier": "5.12", "name": "§ 5.12 Scope.", "part": "5",
            "substantive": true, "removed": false, "subpart": null,
            "title": 7, "type": "section"
        }"#;
        let v: ContentVersion = serde_json::from_str(json).unwrap();
        assert!(v.is_section());
        assert_eq!(v.part_number(), "5");
        assert_eq!(v.content_id(), "7:5.12");
    }
}
