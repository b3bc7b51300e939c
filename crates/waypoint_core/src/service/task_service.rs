//! Task use-case service.
//!
//! # Responsibility
//! - Instantiate tasks from resolved templates and create custom tasks.
//! - Enforce visibility/assignment semantics and completion side effects.
//! - Apply template tracker side-effect maps to linked student trackers.
//!
//! # Invariants
//! - `assigned_at` is stamped at most once and never cleared.
//! - Completion is idempotent-guarded: completing twice is an error.
//! - Tracker side effects honor `only_alter_tracker_values`.

use crate::model::student::StudentId;
use crate::model::task::{Task, TaskId, TaskTemplate, TaskTemplateId, TaskType};
use crate::model::meeting::MeetingId;
use crate::model::student::TrackerId;
use crate::repo::student_repo::StudentRepository;
use crate::repo::task_repo::TaskRepository;
use crate::repo::template_repo::TemplateRepository;
use crate::repo::RepoError;
use crate::service::template_resolver::effective_template;
use crate::sync::{DomainEvent, Notification, NotificationKind, Recipient};
use log::info;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Service error for task use-cases.
#[derive(Debug)]
pub enum TaskServiceError {
    StudentNotFound(StudentId),
    TemplateNotFound(TaskTemplateId),
    TaskNotFound(TaskId),
    TrackerNotFound(TrackerId),
    /// Completing an already-completed task.
    AlreadyCompleted(TaskId),
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StudentNotFound(id) => write!(f, "student not found: {id}"),
            Self::TemplateNotFound(id) => write!(f, "task template not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::TrackerNotFound(id) => write!(f, "student tracker not found: {id}"),
            Self::AlreadyCompleted(id) => write!(f, "task already completed: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent task state: {details}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TaskServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<crate::db::DbError> for TaskServiceError {
    fn from(value: crate::db::DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

/// Options for instantiating a task from a template.
#[derive(Debug, Clone, Default)]
pub struct InstantiateOptions {
    pub due_at: Option<i64>,
    pub visible_to_student: bool,
    /// Meetings the new task is linked to.
    pub meeting_ids: Vec<MeetingId>,
}

/// Spec for a task created without a template.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub task_type: TaskType,
    pub description: String,
    pub due_at: Option<i64>,
    pub visible_to_student: bool,
    pub created_by_counselor: bool,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            task_type: TaskType::Other,
            description: String::new(),
            due_at: None,
            visible_to_student: true,
            created_by_counselor: false,
        }
    }
}

/// Task service facade over repository implementations.
pub struct TaskService<T, K, S>
where
    T: TemplateRepository,
    K: TaskRepository,
    S: StudentRepository,
{
    templates: T,
    tasks: K,
    students: S,
}

impl<T, K, S> TaskService<T, K, S>
where
    T: TemplateRepository,
    K: TaskRepository,
    S: StudentRepository,
{
    pub fn new(templates: T, tasks: K, students: S) -> Self {
        Self {
            templates,
            tasks,
            students,
        }
    }

    /// Instantiates one task for a student from a template, resolving
    /// counselor overrides first.
    ///
    /// # Side effects
    /// - Emits `task_create` logging events.
    pub fn instantiate_template(
        &self,
        student_id: StudentId,
        template_id: TaskTemplateId,
        options: &InstantiateOptions,
        now: i64,
    ) -> Result<Task, TaskServiceError> {
        let student = self
            .students
            .get_student(student_id)?
            .ok_or(TaskServiceError::StudentNotFound(student_id))?;
        let template = self
            .templates
            .get_task_template(template_id)?
            .ok_or(TaskServiceError::TemplateNotFound(template_id))?;
        let resolved = effective_template(&self.templates, &student, &template)?;

        let mut task = Task::new(student_id, resolved.title.clone());
        task.sync_from_template(&resolved);
        task.due_at = options.due_at;
        task.visible_to_student = options.visible_to_student;
        if !task.is_counseling() || task.visible_to_student {
            task.assigned_at = Some(now);
        }

        self.tasks.create_task(&task)?;
        if !options.meeting_ids.is_empty() {
            self.tasks.set_task_meetings(task.id, &options.meeting_ids)?;
        }

        info!(
            "event=task_create module=service status=ok task_id={} student_id={student_id} template_id={}",
            task.id, resolved.id
        );
        self.read_back(task.id)
    }

    /// Creates one task without a template.
    ///
    /// Non-counseling tasks are assigned immediately; counselor-created
    /// tasks defer assignment until they become visible.
    pub fn create_task(
        &self,
        student_id: StudentId,
        spec: &NewTask,
        now: i64,
    ) -> Result<Task, TaskServiceError> {
        if self.students.get_student(student_id)?.is_none() {
            return Err(TaskServiceError::StudentNotFound(student_id));
        }

        let mut task = Task::new(student_id, spec.title.clone());
        task.task_type = spec.task_type;
        task.description = spec.description.clone();
        task.due_at = spec.due_at;
        task.visible_to_student = spec.visible_to_student;
        task.created_by_counselor = spec.created_by_counselor;
        if !task.is_counseling() || task.visible_to_student {
            task.assigned_at = Some(now);
        }

        self.tasks.create_task(&task)?;
        info!(
            "event=task_create module=service status=ok task_id={} student_id={student_id}",
            task.id
        );
        self.read_back(task.id)
    }

    /// Changes student visibility. The first transition into visibility
    /// stamps `assigned_at`; later toggles never touch it.
    pub fn set_visible(
        &self,
        task_id: TaskId,
        visible: bool,
        now: i64,
    ) -> Result<Task, TaskServiceError> {
        let mut task = self
            .tasks
            .get_task(task_id)?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;

        task.visible_to_student = visible;
        if visible && task.assigned_at.is_none() {
            task.assigned_at = Some(now);
        }
        self.tasks.update_task(&task)?;
        self.read_back(task_id)
    }

    /// Links a tracker to a task and applies the template's on-assign
    /// side-effect map to it.
    pub fn attach_tracker(
        &self,
        task_id: TaskId,
        tracker_id: TrackerId,
    ) -> Result<(), TaskServiceError> {
        let task = self
            .tasks
            .get_task(task_id)?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;
        let mut tracker = self
            .students
            .get_tracker(tracker_id)?
            .ok_or(TaskServiceError::TrackerNotFound(tracker_id))?;

        self.students.link_task_tracker(task_id, tracker_id)?;

        if let Some(template) = self.task_template(&task)? {
            if apply_tracker_update(
                &mut tracker.values,
                &template.on_assign_tracker_update,
                &template.only_alter_tracker_values,
            ) {
                self.students.update_tracker_values(&tracker)?;
            }
        }
        Ok(())
    }

    /// Completes a task: stamps `completed_at`, applies the template's
    /// on-complete side-effect map to linked trackers, and asks for a
    /// counselor notification.
    ///
    /// # Side effects
    /// - Emits `task_complete` logging events.
    pub fn complete_task(
        &self,
        task_id: TaskId,
        now: i64,
    ) -> Result<(Task, Vec<DomainEvent>), TaskServiceError> {
        let mut task = self
            .tasks
            .get_task(task_id)?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;
        if task.is_completed() {
            return Err(TaskServiceError::AlreadyCompleted(task_id));
        }

        task.completed_at = Some(now);
        self.tasks.update_task(&task)?;

        if let Some(template) = self.task_template(&task)? {
            for mut tracker in self.students.trackers_for_task(task_id)? {
                if apply_tracker_update(
                    &mut tracker.values,
                    &template.on_complete_tracker_update,
                    &template.only_alter_tracker_values,
                ) {
                    self.students.update_tracker_values(&tracker)?;
                }
            }
        }

        let mut events = Vec::new();
        let student = self
            .students
            .get_student(task.student_id)?
            .ok_or(TaskServiceError::StudentNotFound(task.student_id))?;
        if let Some(counselor_id) = student.counselor_id {
            events.push(DomainEvent::NotificationRequested(Notification {
                recipient: Recipient::Counselor(counselor_id),
                kind: NotificationKind::TaskCompleted,
                meeting_id: None,
                task_id: Some(task_id),
            }));
        }

        info!(
            "event=task_complete module=service status=ok task_id={task_id} student_id={}",
            task.student_id
        );
        let task = self.read_back(task_id)?;
        Ok((task, events))
    }

    fn task_template(&self, task: &Task) -> Result<Option<TaskTemplate>, TaskServiceError> {
        match task.task_template_id {
            Some(template_id) => Ok(self.templates.get_task_template(template_id)?),
            None => Ok(None),
        }
    }

    fn read_back(&self, task_id: Uuid) -> Result<Task, TaskServiceError> {
        self.tasks
            .get_task(task_id)?
            .ok_or(TaskServiceError::InconsistentState(
                "task not found in read-back",
            ))
    }
}

/// Applies one side-effect map to a tracker value bag.
///
/// When `only_alter` is non-empty, a field is only replaced if its current
/// value (missing counts as null) appears in that list. Returns whether
/// anything changed.
pub fn apply_tracker_update(
    values: &mut Map<String, Value>,
    update: &Map<String, Value>,
    only_alter: &[Value],
) -> bool {
    let mut changed = false;
    for (field, new_value) in update {
        let current = values.get(field).cloned().unwrap_or(Value::Null);
        if !only_alter.is_empty() && !only_alter.contains(&current) {
            continue;
        }
        if current != *new_value {
            values.insert(field.clone(), new_value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::apply_tracker_update;
    use serde_json::{json, Map, Value};

    fn bag(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn unrestricted_update_overwrites() {
        let mut values = bag(&[("stage", json!("applied"))]);
        let update = bag(&[("stage", json!("accepted")), ("done", json!(true))]);
        assert!(apply_tracker_update(&mut values, &update, &[]));
        assert_eq!(values["stage"], json!("accepted"));
        assert_eq!(values["done"], json!(true));
    }

    #[test]
    fn only_alter_guards_existing_values() {
        let mut values = bag(&[("stage", json!("custom"))]);
        let update = bag(&[("stage", json!("accepted"))]);
        let only_alter = vec![Value::Null, json!("applied")];
        assert!(!apply_tracker_update(&mut values, &update, &only_alter));
        assert_eq!(values["stage"], json!("custom"));

        // Missing fields count as null and are eligible.
        let mut empty = Map::new();
        assert!(apply_tracker_update(&mut empty, &update, &only_alter));
        assert_eq!(empty["stage"], json!("accepted"));
    }
}
