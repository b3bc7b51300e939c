//! Students, counselors, and the actors that drive lifecycle transitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a student.
pub type StudentId = Uuid;
/// Stable identifier for a counselor.
pub type CounselorId = Uuid;
/// Stable identifier for a student tracker.
pub type TrackerId = Uuid;

/// A counselor who owns students and may override canonical task templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counselor {
    pub id: CounselorId,
    pub name: String,
}

impl Counselor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A student for whom roadmaps are instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub counselor_id: Option<CounselorId>,
    /// Whether a parent account exists for notification fanout.
    pub has_parent: bool,
}

impl Student {
    pub fn new(name: impl Into<String>, counselor_id: Option<CounselorId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            counselor_id,
            has_parent: false,
        }
    }
}

/// Who initiated a lifecycle transition.
///
/// Due-date propagation and counselor notification both branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Student(StudentId),
    Parent(StudentId),
    Counselor(CounselorId),
}

impl Actor {
    /// True for the student or their parent (the "family" side).
    pub fn is_family(&self) -> bool {
        matches!(self, Self::Student(_) | Self::Parent(_))
    }
}

/// A named bag of tracked values on a student (application progress,
/// decision state, and similar), mutated by task template side-effect maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentTracker {
    pub id: TrackerId,
    pub student_id: StudentId,
    pub name: String,
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl StudentTracker {
    pub fn new(student_id: StudentId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            name: name.into(),
            values: serde_json::Map::new(),
        }
    }
}
