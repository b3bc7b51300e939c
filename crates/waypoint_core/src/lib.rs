//! Core engine for roadmap instantiation and the meeting lifecycle.
//! This crate is the single source of truth for business invariants.

pub mod clock;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::meeting::{AgendaItem, AgendaItemId, Meeting, MeetingId, MeetingStatus};
pub use model::roadmap::{
    AgendaItemTemplate, AgendaItemTemplateId, MeetingPhase, MeetingTemplate, MeetingTemplateId,
    Roadmap, RoadmapId, RoadmapKey, RoadmapKeyError,
};
pub use model::student::{Actor, Counselor, CounselorId, Student, StudentId, StudentTracker};
pub use model::task::{SubmissionSettings, Task, TaskId, TaskTemplate, TaskTemplateId, TaskType};
pub use repo::{RepoError, RepoResult};
pub use service::meeting_service::{MeetingService, MeetingTransition, NewMeeting};
pub use service::roadmap_service::{AppliedRoadmap, PlannedMeeting, RoadmapService};
pub use service::task_service::{NewTask, TaskService};
pub use service::template_resolver::TemplateResolver;
pub use sync::{DomainEvent, DispatchReport, SyncDispatcher};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
