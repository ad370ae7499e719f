//! Core data types for the harvester.
//!
//! These types model the State → LGA → Ward → Polling-Unit hierarchy and the
//! records produced while walking it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::sanitize_name;

/// Fallback path component for names that sanitize to nothing.
const UNNAMED: &str = "Unnamed";

/// Level of the administrative hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    State,
    Lga,
    Ward,
    PollingUnit,
}

impl Level {
    /// Level directly below this one, `None` for polling units.
    #[must_use]
    pub fn child(self) -> Option<Self> {
        match self {
            Self::State => Some(Self::Lga),
            Self::Lga => Some(Self::Ward),
            Self::Ward => Some(Self::PollingUnit),
            Self::PollingUnit => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Lga => "lga",
            Self::Ward => "ward",
            Self::PollingUnit => "polling_unit",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the four-level hierarchy.
///
/// Children point at their parent; parents never own their children, so a
/// chain of `Arc`s cannot form a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub level: Level,
    /// Sanitized, alphanumeric-only name.
    pub name: String,
    pub source_url: String,
    pub parent: Option<Arc<HierarchyNode>>,
}

impl HierarchyNode {
    /// Create a State node (the root of every subtree).
    #[must_use]
    pub fn state(raw_name: &str, source_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            level: Level::State,
            name: clean_name(raw_name),
            source_url: source_url.into(),
            parent: None,
        })
    }

    /// Create the child of `parent` one level down.
    ///
    /// Returns `None` when `parent` is a polling unit, which is always a leaf.
    #[must_use]
    pub fn child(
        parent: &Arc<Self>,
        raw_name: &str,
        source_url: impl Into<String>,
    ) -> Option<Arc<Self>> {
        let level = parent.level.child()?;
        Some(Arc::new(Self {
            level,
            name: clean_name(raw_name),
            source_url: source_url.into(),
            parent: Some(Arc::clone(parent)),
        }))
    }

    /// Ancestor at `level`, or this node itself when it is at that level.
    #[must_use]
    pub fn ancestor(&self, level: Level) -> Option<&HierarchyNode> {
        let mut current = Some(self);
        while let Some(node) = current {
            if node.level == level {
                return Some(node);
            }
            current = node.parent.as_deref();
        }
        None
    }

    /// Names from the state down to this node.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(4);
        let mut current = Some(self);
        while let Some(node) = current {
            names.push(node.name.as_str());
            current = node.parent.as_deref();
        }
        names.reverse();
        names
    }

    /// Slash-joined hierarchy path for log messages.
    #[must_use]
    pub fn path_label(&self) -> String {
        self.names().join("/")
    }

    /// Ledger key of the ward this node belongs to.
    ///
    /// `None` above ward level.
    #[must_use]
    pub fn ward_key(&self) -> Option<WardKey> {
        let ward = self.ancestor(Level::Ward)?;
        let lga = ward.ancestor(Level::Lga)?;
        let state = lga.ancestor(Level::State)?;
        Some(WardKey {
            state: state.name.clone(),
            lga: lga.name.clone(),
            ward: ward.name.clone(),
        })
    }

    fn name_at(&self, level: Level) -> String {
        self.ancestor(level)
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }
}

fn clean_name(raw: &str) -> String {
    let name = sanitize_name(raw);
    if name.is_empty() {
        UNNAMED.to_string()
    } else {
        name
    }
}

/// Key of the failure ledger: one entry per ward.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WardKey {
    pub state: String,
    pub lga: String,
    pub ward: String,
}

impl fmt::Display for WardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} -> {}", self.state, self.lga, self.ward)
    }
}

/// Classification of a downloaded artifact by declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Image,
    Other,
}

impl ArtifactKind {
    /// Classify a `Content-Type` header value.
    ///
    /// # Examples
    /// ```
    /// use election_harvester::types::ArtifactKind;
    ///
    /// assert_eq!(ArtifactKind::from_content_type("application/pdf"), ArtifactKind::Pdf);
    /// assert_eq!(ArtifactKind::from_content_type("image/jpeg"), ArtifactKind::Image);
    /// assert_eq!(ArtifactKind::from_content_type("text/html; charset=utf-8"), ArtifactKind::Other);
    /// ```
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = media_type(content_type);
        if mime == "application/pdf" {
            Self::Pdf
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Other
        }
    }

    /// Whether the artifact may be passed to text recovery.
    #[must_use]
    pub fn is_document(self) -> bool {
        matches!(self, Self::Pdf | Self::Image)
    }

    /// File extension for a stored artifact of this kind.
    #[must_use]
    pub fn extension(self, content_type: &str) -> String {
        match self {
            Self::Pdf => "pdf".to_string(),
            Self::Image => {
                let mime = media_type(content_type);
                match mime.strip_prefix("image/").unwrap_or("img") {
                    "jpeg" | "pjpeg" => "jpg".to_string(),
                    "x-ms-bmp" | "x-bmp" => "bmp".to_string(),
                    "x-tiff" => "tiff".to_string(),
                    "svg+xml" => "svg".to_string(),
                    subtype => subtype.to_string(),
                }
            }
            Self::Other => "bin".to_string(),
        }
    }
}

/// Lowercased media type without parameters.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Outcome of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Stored on disk at `local_path`.
    Downloaded,
    /// Nothing was stored.
    Failed,
}

/// A fetched artifact for one polling unit.
///
/// Immutable once created; a re-download produces a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub node: Arc<HierarchyNode>,
    pub local_path: PathBuf,
    pub kind: ArtifactKind,
    /// Raw `Content-Type` as declared by the server.
    pub content_type: String,
    pub status: ArtifactStatus,
}

impl ArtifactRecord {
    /// Whether text recovery should run on this artifact.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.status == ArtifactStatus::Downloaded && self.kind.is_document()
    }
}

/// How text was obtained from an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMethod {
    DirectExtract,
    Ocr,
}

/// Text recovered from an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRecoveryResult {
    pub source: ArtifactRecord,
    pub text: Option<String>,
    pub method: RecoveryMethod,
    pub readable: bool,
}

/// Fields extracted from result-sheet text.
///
/// Absent means "not found in text"; a zero is a measured value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFields {
    pub number_of_voters: Option<u64>,
    pub accredited_voters: Option<u64>,
    pub spoiled_ballots: Option<u64>,
    pub rejected_ballots: Option<u64>,
    pub valid_votes: Option<u64>,
    pub party_results: BTreeMap<String, u64>,
    pub presiding_officer: Option<String>,
}

/// One row of the result table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingUnitResult {
    pub state: String,
    pub lga: String,
    pub ward: String,
    pub polling_unit: String,
    pub file_path: PathBuf,
    #[serde(flatten)]
    pub fields: ParsedFields,
}

impl PollingUnitResult {
    /// Build a row for a polling unit node.
    #[must_use]
    pub fn new(node: &HierarchyNode, file_path: PathBuf, fields: ParsedFields) -> Self {
        Self {
            state: node.name_at(Level::State),
            lga: node.name_at(Level::Lga),
            ward: node.name_at(Level::Ward),
            polling_unit: node.name_at(Level::PollingUnit),
            file_path,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polling_unit() -> Arc<HierarchyNode> {
        let state = HierarchyNode::state("Lagos State!", "https://x/state");
        let lga = HierarchyNode::child(&state, "Ikeja", "https://x/lga").unwrap();
        let ward = HierarchyNode::child(&lga, "Ward 01", "https://x/ward").unwrap();
        HierarchyNode::child(&ward, "PU-001 (School)", "https://x/pu.pdf").unwrap()
    }

    #[test]
    fn test_hierarchy_levels() {
        let pu = polling_unit();
        assert_eq!(pu.level, Level::PollingUnit);
        assert_eq!(pu.names(), vec!["LagosState", "Ikeja", "Ward01", "PU001School"]);
        assert_eq!(pu.path_label(), "LagosState/Ikeja/Ward01/PU001School");
    }

    #[test]
    fn test_polling_unit_is_leaf() {
        let pu = polling_unit();
        assert!(HierarchyNode::child(&pu, "deeper", "https://x").is_none());
    }

    #[test]
    fn test_ward_key() {
        let pu = polling_unit();
        let key = pu.ward_key().unwrap();
        assert_eq!(key.state, "LagosState");
        assert_eq!(key.lga, "Ikeja");
        assert_eq!(key.ward, "Ward01");
        assert_eq!(key.to_string(), "LagosState -> Ikeja -> Ward01");

        let state = HierarchyNode::state("Kano", "https://x");
        assert!(state.ward_key().is_none());
    }

    #[test]
    fn test_empty_name_falls_back() {
        let state = HierarchyNode::state("???", "https://x");
        assert_eq!(state.name, "Unnamed");
    }

    #[test]
    fn test_artifact_kind_classification() {
        assert_eq!(ArtifactKind::from_content_type("application/pdf"), ArtifactKind::Pdf);
        assert_eq!(
            ArtifactKind::from_content_type("Application/PDF; charset=binary"),
            ArtifactKind::Pdf
        );
        assert_eq!(ArtifactKind::from_content_type("image/png"), ArtifactKind::Image);
        assert_eq!(ArtifactKind::from_content_type("text/html"), ArtifactKind::Other);
        assert_eq!(ArtifactKind::from_content_type(""), ArtifactKind::Other);
    }

    #[test]
    fn test_artifact_extension() {
        assert_eq!(ArtifactKind::Pdf.extension("application/pdf"), "pdf");
        assert_eq!(ArtifactKind::Image.extension("image/jpeg"), "jpg");
        assert_eq!(ArtifactKind::Image.extension("image/png"), "png");
        assert_eq!(ArtifactKind::Image.extension("image/x-ms-bmp"), "bmp");
        assert_eq!(ArtifactKind::Image.extension("image/tiff"), "tiff");
    }

    #[test]
    fn test_polling_unit_result_names() {
        let pu = polling_unit();
        let row = PollingUnitResult::new(&pu, PathBuf::from("a.pdf"), ParsedFields::default());
        assert_eq!(row.state, "LagosState");
        assert_eq!(row.polling_unit, "PU001School");
        assert!(row.fields.valid_votes.is_none());
    }
}
