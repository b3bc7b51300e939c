//! Roadmap catalog model: roadmaps, meeting templates, agenda item templates.
//!
//! # Responsibility
//! - Define the read-mostly template graph that gets instantiated per student.
//! - Provide the typed `RoadmapKey` used for override identity.
//!
//! # Invariants
//! - `RoadmapKey` values are validated on construction and never empty.
//! - Template ordering is explicit: `order` first, `key` as tie-break.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a roadmap.
pub type RoadmapId = Uuid;
/// Stable identifier for a meeting template.
pub type MeetingTemplateId = Uuid;
/// Stable identifier for an agenda item template.
pub type AgendaItemTemplateId = Uuid;

static ROADMAP_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("valid roadmap key regex"));

/// Cross-reference identity used to match counselor overrides to canonical
/// task templates.
///
/// Kept as a validated newtype so a key is never confused with a free-form
/// title or identifier string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoadmapKey(String);

impl RoadmapKey {
    /// Validates and wraps one key value.
    ///
    /// Accepted shape: lowercase ascii letters, digits, `_`, `-`, `.`,
    /// starting with a letter or digit.
    pub fn new(value: impl Into<String>) -> Result<Self, RoadmapKeyError> {
        let value = value.into();
        if !ROADMAP_KEY_RE.is_match(&value) {
            return Err(RoadmapKeyError(value));
        }
        Ok(Self(value))
    }

    /// Parses a storage value, mapping the empty string to `None`.
    pub fn from_storage(value: &str) -> Result<Option<Self>, RoadmapKeyError> {
        if value.is_empty() {
            return Ok(None);
        }
        Self::new(value).map(Some)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RoadmapKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a roadmap key value is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadmapKeyError(pub String);

impl Display for RoadmapKeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid roadmap key: `{}`", self.0)
    }
}

impl Error for RoadmapKeyError {}

/// A reusable, ordered template of meetings, agenda items, and tasks for one
/// counseling track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadmap {
    pub id: RoadmapId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub active: bool,
    /// Whether the roadmap may be applied alongside or after other roadmaps.
    pub repeatable: bool,
}

impl Roadmap {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            category: String::new(),
            active: true,
            repeatable: false,
        }
    }
}

/// Catalog entry describing one meeting on a roadmap timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingTemplate {
    pub id: MeetingTemplateId,
    pub roadmap_id: Option<RoadmapId>,
    /// Stable key identifying the template independently of its title.
    pub key: String,
    /// Position on the roadmap timeline.
    pub order: i64,
    pub title: String,
    /// Half grades mark the summer transition between two grades.
    pub grade: Option<f64>,
    pub semester: Option<f64>,
    /// When false, the template is excluded from default roadmap application.
    pub create_when_applying_roadmap: bool,
    /// When false, meetings made from this template get no default agenda.
    pub use_agenda: bool,
}

impl MeetingTemplate {
    pub fn new(roadmap_id: RoadmapId, title: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            roadmap_id: Some(roadmap_id),
            key: String::new(),
            order,
            title: title.into(),
            grade: None,
            semester: None,
            create_when_applying_roadmap: true,
            use_agenda: true,
        }
    }
}

/// Catalog entry describing one agenda item a counselor can put on a meeting.
///
/// Stock agenda items reference pre- and post-meeting task templates through
/// the template graph store; counselor-defined items reference none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItemTemplate {
    pub id: AgendaItemTemplateId,
    pub meeting_template_id: Option<MeetingTemplateId>,
    /// Stable key, unique within the owning meeting template.
    pub key: String,
    pub order: i64,
    pub counselor_title: String,
    pub student_title: String,
    pub counselor_instructions: String,
    /// Inactive items are hidden from counselors but retained for audit.
    pub active: bool,
}

impl AgendaItemTemplate {
    pub fn new(
        meeting_template_id: MeetingTemplateId,
        counselor_title: impl Into<String>,
        order: i64,
    ) -> Self {
        let counselor_title = counselor_title.into();
        Self {
            id: Uuid::new_v4(),
            meeting_template_id: Some(meeting_template_id),
            key: String::new(),
            order,
            student_title: counselor_title.clone(),
            counselor_title,
            counselor_instructions: String::new(),
            active: true,
        }
    }
}

/// Whether a task template hangs off an agenda item as preparation for the
/// meeting or as follow-up work after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingPhase {
    Pre,
    Post,
}

impl MeetingPhase {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "pre" => Some(Self::Pre),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MeetingPhase, RoadmapKey};

    #[test]
    fn roadmap_key_accepts_expected_shapes() {
        for value in ["k1", "late-start.senior", "meet_2_prep", "9th"] {
            assert!(RoadmapKey::new(value).is_ok(), "key `{value}` should parse");
        }
    }

    #[test]
    fn roadmap_key_rejects_malformed_values() {
        for value in ["", "Mixed", "has space", "_leading", "trailing!"] {
            assert!(
                RoadmapKey::new(value).is_err(),
                "key `{value}` should be rejected"
            );
        }
    }

    #[test]
    fn roadmap_key_storage_maps_empty_to_none() {
        assert_eq!(RoadmapKey::from_storage("").unwrap(), None);
        assert_eq!(
            RoadmapKey::from_storage("k1").unwrap(),
            Some(RoadmapKey::new("k1").unwrap())
        );
    }

    #[test]
    fn meeting_phase_db_roundtrip() {
        for phase in [MeetingPhase::Pre, MeetingPhase::Post] {
            assert_eq!(MeetingPhase::parse_db(phase.as_db_str()), Some(phase));
        }
        assert_eq!(MeetingPhase::parse_db("mid"), None);
    }
}
