//! Roadmap application and removal.
//!
//! # Responsibility
//! - Instantiate a roadmap's template graph for one student: meetings,
//!   agenda items, and deduplicated tasks.
//! - Undo an application without touching history: completed tasks and
//!   past meetings stay.
//!
//! # Invariants
//! - Task deduplication treats a shared roadmap key as identity, so a
//!   pre-existing task from an override suppresses the canonical (and vice
//!   versa).
//! - Tasks whose owning meeting was not materialized still get created,
//!   carrying a reference to the meeting template instead of meeting links.
//! - Roadmap-instantiated tasks start invisible and unassigned.

use crate::model::meeting::{AgendaItem, Meeting};
use crate::model::roadmap::{
    AgendaItemTemplateId, MeetingTemplate, MeetingTemplateId, RoadmapId,
};
use crate::model::student::{Student, StudentId};
use crate::model::task::{Task, TaskTemplate};
use crate::repo::meeting_repo::MeetingRepository;
use crate::repo::student_repo::StudentRepository;
use crate::repo::task_repo::TaskRepository;
use crate::repo::template_repo::TemplateRepository;
use crate::repo::RepoError;
use crate::service::template_resolver::effective_template;
use log::info;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for roadmap application use-cases.
#[derive(Debug)]
pub enum RoadmapServiceError {
    RoadmapNotFound(RoadmapId),
    StudentNotFound(StudentId),
    /// Applying a non-repeatable roadmap twice.
    AlreadyApplied {
        student_id: StudentId,
        roadmap_id: RoadmapId,
    },
    /// Removing a roadmap that was never applied.
    NotApplied {
        student_id: StudentId,
        roadmap_id: RoadmapId,
    },
    /// A custom plan names a meeting template from another roadmap.
    TemplateNotOnRoadmap {
        roadmap_id: RoadmapId,
        meeting_template_id: MeetingTemplateId,
    },
    AgendaItemTemplateNotFound(AgendaItemTemplateId),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for RoadmapServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoadmapNotFound(id) => write!(f, "roadmap not found: {id}"),
            Self::StudentNotFound(id) => write!(f, "student not found: {id}"),
            Self::AlreadyApplied {
                student_id,
                roadmap_id,
            } => write!(
                f,
                "roadmap {roadmap_id} is already applied to student {student_id}"
            ),
            Self::NotApplied {
                student_id,
                roadmap_id,
            } => write!(
                f,
                "roadmap {roadmap_id} is not applied to student {student_id}"
            ),
            Self::TemplateNotOnRoadmap {
                roadmap_id,
                meeting_template_id,
            } => write!(
                f,
                "meeting template {meeting_template_id} does not belong to roadmap {roadmap_id}"
            ),
            Self::AgendaItemTemplateNotFound(id) => {
                write!(f, "agenda item template not found: {id}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RoadmapServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for RoadmapServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<crate::db::DbError> for RoadmapServiceError {
    fn from(value: crate::db::DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

/// One meeting in a counselor-customized application plan.
#[derive(Debug, Clone)]
pub struct PlannedMeeting {
    pub meeting_template_id: MeetingTemplateId,
    /// Explicit agenda selection. Empty means the template default agenda.
    pub agenda_item_template_ids: Vec<AgendaItemTemplateId>,
    pub custom_agenda_items: Vec<String>,
    pub title: Option<String>,
}

impl PlannedMeeting {
    pub fn new(meeting_template_id: MeetingTemplateId) -> Self {
        Self {
            meeting_template_id,
            agenda_item_template_ids: Vec::new(),
            custom_agenda_items: Vec::new(),
            title: None,
        }
    }
}

/// Everything one roadmap application created.
#[derive(Debug, Default)]
pub struct AppliedRoadmap {
    pub meetings: Vec<Meeting>,
    pub tasks: Vec<Task>,
}

/// Counts of what a roadmap removal deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedRoadmap {
    pub meetings_deleted: usize,
    pub tasks_deleted: usize,
}

/// Roadmap service facade over repository implementations.
pub struct RoadmapService<M, T, K, S>
where
    M: MeetingRepository,
    T: TemplateRepository,
    K: TaskRepository,
    S: StudentRepository,
{
    meetings: M,
    templates: T,
    tasks: K,
    students: S,
}

impl<M, T, K, S> RoadmapService<M, T, K, S>
where
    M: MeetingRepository,
    T: TemplateRepository,
    K: TaskRepository,
    S: StudentRepository,
{
    pub fn new(meetings: M, templates: T, tasks: K, students: S) -> Self {
        Self {
            meetings,
            templates,
            tasks,
            students,
        }
    }

    /// Applies a roadmap to a student.
    ///
    /// With no plan, every meeting template marked for default application
    /// is instantiated with its default agenda. A custom plan selects and
    /// reshapes the meetings instead. Tasks are instantiated from every
    /// template reachable through the roadmap, override-resolved and
    /// deduplicated against the student's existing tasks.
    ///
    /// # Side effects
    /// - Emits `roadmap_apply` logging events.
    pub fn apply_to_student(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
        plan: Option<&[PlannedMeeting]>,
        now: i64,
    ) -> Result<AppliedRoadmap, RoadmapServiceError> {
        let student = self
            .students
            .get_student(student_id)?
            .ok_or(RoadmapServiceError::StudentNotFound(student_id))?;
        let roadmap = self
            .templates
            .get_roadmap(roadmap_id)?
            .ok_or(RoadmapServiceError::RoadmapNotFound(roadmap_id))?;

        if !roadmap.repeatable && self.students.roadmap_is_applied(student_id, roadmap_id)? {
            return Err(RoadmapServiceError::AlreadyApplied {
                student_id,
                roadmap_id,
            });
        }

        let catalog = self.templates.meeting_templates_for_roadmap(roadmap_id)?;
        let planned = self.resolve_plan(roadmap_id, &catalog, plan)?;
        let roadmap_templates: HashSet<MeetingTemplateId> =
            catalog.iter().map(|template| template.id).collect();

        let mut applied = AppliedRoadmap::default();
        let mut represented_agenda_templates: Vec<AgendaItemTemplateId> = Vec::new();
        for (template, planned_meeting) in &planned {
            let meeting = self.materialize_meeting(
                student_id,
                template,
                planned_meeting,
                &roadmap_templates,
                &mut represented_agenda_templates,
            )?;
            applied.meetings.push(meeting);
        }

        // Tasks for agenda items that made it onto a concrete meeting.
        let candidates = self
            .templates
            .task_templates_for_agenda_item_templates(&represented_agenda_templates)?;
        let mut instantiated: HashSet<crate::model::task::TaskTemplateId> = HashSet::new();
        for candidate in &candidates {
            instantiated.insert(candidate.id);
            if let Some(task) = self.instantiate_deduped(&student, candidate, None)? {
                let meeting_ids = self
                    .meetings
                    .meetings_referencing_task_template(student_id, candidate)?;
                self.tasks.set_task_meetings(task.id, &meeting_ids)?;
                applied.tasks.push(task);
            }
        }

        // Residual templates: reachable from the roadmap but with no
        // materialized meeting. They keep a template reference instead.
        let reachable = self.templates.task_templates_for_roadmap(roadmap_id)?;
        for candidate in &reachable {
            if instantiated.contains(&candidate.id) {
                continue;
            }
            let meeting_template_ref = self
                .templates
                .meeting_template_for_task_template(candidate.id)?;
            if let Some(task) =
                self.instantiate_deduped(&student, candidate, meeting_template_ref)?
            {
                applied.tasks.push(task);
            }
        }

        self.students
            .add_applied_roadmap(student_id, roadmap_id, now)?;

        info!(
            "event=roadmap_apply module=service status=ok roadmap_id={roadmap_id} student_id={student_id} meetings={} tasks={}",
            applied.meetings.len(),
            applied.tasks.len()
        );
        Ok(applied)
    }

    /// Removes an applied roadmap from a student.
    ///
    /// Deletes the roadmap's unscheduled and future meetings and its
    /// incomplete tasks; completed tasks and past meetings are history and
    /// stay untouched.
    ///
    /// # Side effects
    /// - Emits `roadmap_unapply` logging events.
    pub fn unapply_from_student(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
        now: i64,
    ) -> Result<RemovedRoadmap, RoadmapServiceError> {
        if self.students.get_student(student_id)?.is_none() {
            return Err(RoadmapServiceError::StudentNotFound(student_id));
        }
        if !self.students.roadmap_is_applied(student_id, roadmap_id)? {
            return Err(RoadmapServiceError::NotApplied {
                student_id,
                roadmap_id,
            });
        }

        let meetings_deleted =
            self.meetings
                .delete_roadmap_meetings_ending_after(student_id, roadmap_id, now)?;
        let tasks_deleted = self
            .tasks
            .delete_incomplete_roadmap_tasks(student_id, roadmap_id)?;
        self.students
            .remove_applied_roadmap(student_id, roadmap_id)?;

        info!(
            "event=roadmap_unapply module=service status=ok roadmap_id={roadmap_id} student_id={student_id} meetings_deleted={meetings_deleted} tasks_deleted={tasks_deleted}"
        );
        Ok(RemovedRoadmap {
            meetings_deleted,
            tasks_deleted,
        })
    }

    fn resolve_plan(
        &self,
        roadmap_id: RoadmapId,
        catalog: &[MeetingTemplate],
        plan: Option<&[PlannedMeeting]>,
    ) -> Result<Vec<(MeetingTemplate, PlannedMeeting)>, RoadmapServiceError> {
        match plan {
            None => Ok(catalog
                .iter()
                .filter(|template| template.create_when_applying_roadmap)
                .map(|template| (template.clone(), PlannedMeeting::new(template.id)))
                .collect()),
            Some(planned_meetings) => {
                let mut resolved = Vec::with_capacity(planned_meetings.len());
                for planned in planned_meetings {
                    let template = catalog
                        .iter()
                        .find(|template| template.id == planned.meeting_template_id)
                        .ok_or(RoadmapServiceError::TemplateNotOnRoadmap {
                            roadmap_id,
                            meeting_template_id: planned.meeting_template_id,
                        })?;
                    resolved.push((template.clone(), planned.clone()));
                }
                Ok(resolved)
            }
        }
    }

    fn materialize_meeting(
        &self,
        student_id: StudentId,
        template: &MeetingTemplate,
        planned: &PlannedMeeting,
        roadmap_templates: &HashSet<MeetingTemplateId>,
        represented_agenda_templates: &mut Vec<AgendaItemTemplateId>,
    ) -> Result<Meeting, RoadmapServiceError> {
        let title = planned.title.clone().unwrap_or_else(|| template.title.clone());
        let meeting = Meeting::new(student_id, Some(template.id), title);
        self.meetings.create_meeting(&meeting)?;

        // Selected agenda items may come from any of this roadmap's meeting
        // templates (plans can consolidate), but never from another roadmap.
        let agenda_templates = if !planned.agenda_item_template_ids.is_empty() {
            let mut selected = Vec::with_capacity(planned.agenda_item_template_ids.len());
            for id in &planned.agenda_item_template_ids {
                let agenda_template = self
                    .templates
                    .get_agenda_item_template(*id)?
                    .filter(|item| {
                        item.meeting_template_id
                            .is_some_and(|owner| roadmap_templates.contains(&owner))
                    })
                    .ok_or(RoadmapServiceError::AgendaItemTemplateNotFound(*id))?;
                selected.push(agenda_template);
            }
            selected
        } else if template.use_agenda {
            self.templates
                .agenda_item_templates_for_meeting_template(template.id)?
        } else {
            Vec::new()
        };

        for agenda_template in &agenda_templates {
            self.meetings
                .create_agenda_item(&AgendaItem::from_template(meeting.id, agenda_template))?;
            represented_agenda_templates.push(agenda_template.id);
        }
        for title in &planned.custom_agenda_items {
            self.meetings
                .create_agenda_item(&AgendaItem::custom(meeting.id, title.clone()))?;
        }

        Ok(meeting)
    }

    /// Resolves overrides and creates one roadmap task unless the student
    /// already holds a matching one. Roadmap tasks start invisible,
    /// unassigned, and undated.
    fn instantiate_deduped(
        &self,
        student: &Student,
        candidate: &TaskTemplate,
        meeting_template_ref: Option<MeetingTemplateId>,
    ) -> Result<Option<Task>, RoadmapServiceError> {
        let resolved = effective_template(&self.templates, student, candidate)?;
        if self
            .tasks
            .student_has_task_for_template(student.id, &resolved)?
        {
            return Ok(None);
        }

        let mut task = Task::new(student.id, resolved.title.clone());
        task.sync_from_template(&resolved);
        task.meeting_template_ref = meeting_template_ref;
        self.tasks.create_task(&task)?;
        Ok(Some(task))
    }
}
