//! Task template and task instance model.
//!
//! # Responsibility
//! - Define the catalog `TaskTemplate` (canonical or counselor override) and
//!   the per-student `Task` instantiated from it.
//!
//! # Invariants
//! - `owner_id == None` marks a canonical template; `Some` marks an override.
//! - A completed task is immutable history and never resynced or deleted.
//! - `assigned_at` is stamped exactly once, on the transition into
//!   visibility (or immediately for non-counseling tasks).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::roadmap::{MeetingTemplateId, RoadmapKey};
use crate::model::student::{CounselorId, StudentId};

/// Stable identifier for a task template.
pub type TaskTemplateId = Uuid;
/// Stable identifier for a task.
pub type TaskId = Uuid;

/// Broad category of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Essay,
    Rec,
    SchoolResearch,
    Survey,
    Testing,
    Transcripts,
    Other,
}

impl TaskType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Essay => "essay",
            Self::Rec => "rec",
            Self::SchoolResearch => "school_research",
            Self::Survey => "survey",
            Self::Testing => "testing",
            Self::Transcripts => "transcripts",
            Self::Other => "other",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "essay" => Some(Self::Essay),
            "rec" => Some(Self::Rec),
            "school_research" => Some(Self::SchoolResearch),
            "survey" => Some(Self::Survey),
            "testing" => Some(Self::Testing),
            "transcripts" => Some(Self::Transcripts),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// What a task accepts or demands when the student turns it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSettings {
    pub allow_content: bool,
    pub require_content: bool,
    pub allow_file: bool,
    pub require_file: bool,
    pub allow_form: bool,
    pub require_form: bool,
}

/// Catalog entry a task is instantiated from.
///
/// Canonical templates (`owner_id == None`) come from the roadmap catalog;
/// a counselor-owned row with the same `roadmap_key` overrides the canonical
/// one for that counselor's students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TaskTemplateId,
    pub owner_id: Option<CounselorId>,
    pub roadmap_key: Option<RoadmapKey>,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub resource_links: Vec<String>,
    pub diagnostic_link: Option<String>,
    pub form_link: Option<String>,
    pub submission: SubmissionSettings,
    /// Tracker fields written when a tracker is attached to the task.
    pub on_assign_tracker_update: Map<String, Value>,
    /// Tracker fields written when the task completes.
    pub on_complete_tracker_update: Map<String, Value>,
    /// When non-empty, side-effect maps only replace current values that
    /// appear in this list.
    pub only_alter_tracker_values: Vec<Value>,
    pub archived_at: Option<i64>,
}

impl TaskTemplate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            roadmap_key: None,
            task_type: TaskType::Other,
            title: title.into(),
            description: String::new(),
            resource_links: Vec::new(),
            diagnostic_link: None,
            form_link: None,
            submission: SubmissionSettings::default(),
            on_assign_tracker_update: Map::new(),
            on_complete_tracker_update: Map::new(),
            only_alter_tracker_values: Vec::new(),
            archived_at: None,
        }
    }

    /// Counselor override of a canonical template sharing `roadmap_key`.
    pub fn new_override(owner_id: CounselorId, key: RoadmapKey, title: impl Into<String>) -> Self {
        let mut template = Self::new(title);
        template.owner_id = Some(owner_id);
        template.roadmap_key = Some(key);
        template
    }

    pub fn is_canonical(&self) -> bool {
        self.owner_id.is_none()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// A concrete work item assigned to one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub student_id: StudentId,
    pub task_template_id: Option<TaskTemplateId>,
    /// Reference-only link kept when no concrete meeting was created for the
    /// owning meeting template during roadmap application.
    pub meeting_template_ref: Option<MeetingTemplateId>,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub resource_links: Vec<String>,
    pub diagnostic_link: Option<String>,
    pub form_link: Option<String>,
    pub submission: SubmissionSettings,
    pub created_by_counselor: bool,
    pub due_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub archived_at: Option<i64>,
    pub visible_to_student: bool,
    /// The signal external reminder logic keys off; stamped once.
    pub assigned_at: Option<i64>,
}

impl Task {
    pub fn new(student_id: StudentId, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            task_template_id: None,
            meeting_template_ref: None,
            task_type: TaskType::Other,
            title: title.into(),
            description: String::new(),
            resource_links: Vec::new(),
            diagnostic_link: None,
            form_link: None,
            submission: SubmissionSettings::default(),
            created_by_counselor: false,
            due_at: None,
            completed_at: None,
            archived_at: None,
            visible_to_student: false,
            assigned_at: None,
        }
    }

    /// Whether this is a counseling-platform task, which defers assignment
    /// until the task becomes visible to the student.
    pub fn is_counseling(&self) -> bool {
        self.task_template_id.is_some() || self.created_by_counselor
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Copies the configuration field set from a template. Due date,
    /// completion, and assignment timestamps are never part of this set.
    pub fn sync_from_template(&mut self, template: &TaskTemplate) {
        self.task_template_id = Some(template.id);
        self.task_type = template.task_type;
        self.title = template.title.clone();
        self.description = template.description.clone();
        self.resource_links = template.resource_links.clone();
        self.diagnostic_link = template.diagnostic_link.clone();
        self.form_link = template.form_link.clone();
        self.submission = template.submission;
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskTemplate, TaskType};
    use crate::model::roadmap::RoadmapKey;
    use uuid::Uuid;

    #[test]
    fn task_type_db_roundtrip() {
        let variants = [
            TaskType::Essay,
            TaskType::Rec,
            TaskType::SchoolResearch,
            TaskType::Survey,
            TaskType::Testing,
            TaskType::Transcripts,
            TaskType::Other,
        ];
        for v in variants {
            assert_eq!(TaskType::parse_db(v.as_db_str()), Some(v));
        }
        assert_eq!(TaskType::parse_db("homework"), None);
    }

    #[test]
    fn counseling_classification_uses_template_or_creator() {
        let student = Uuid::new_v4();
        let mut task = Task::new(student, "plain");
        assert!(!task.is_counseling());

        task.created_by_counselor = true;
        assert!(task.is_counseling());

        let mut templated = Task::new(student, "templated");
        templated.task_template_id = Some(Uuid::new_v4());
        assert!(templated.is_counseling());
    }

    #[test]
    fn sync_from_template_copies_config_but_not_lifecycle_fields() {
        let student = Uuid::new_v4();
        let mut task = Task::new(student, "old title");
        task.due_at = Some(1_000);
        task.assigned_at = Some(500);

        let mut template = TaskTemplate::new_override(
            Uuid::new_v4(),
            RoadmapKey::new("k1").unwrap(),
            "new title",
        );
        template.description = "desc".to_string();
        template.resource_links = vec!["https://example.com/guide".to_string()];
        template.submission.require_file = true;

        task.sync_from_template(&template);
        assert_eq!(task.title, "new title");
        assert_eq!(task.description, "desc");
        assert_eq!(task.task_template_id, Some(template.id));
        assert!(task.submission.require_file);
        assert_eq!(task.due_at, Some(1_000));
        assert_eq!(task.assigned_at, Some(500));
    }
}
