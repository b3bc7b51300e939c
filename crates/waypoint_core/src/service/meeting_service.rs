//! Meeting lifecycle service.
//!
//! # Responsibility
//! - Create meetings (templated or ad hoc) with their agenda.
//! - Drive the Unscheduled/Scheduled/Cancelled transitions, including due
//!   date propagation into linked tasks.
//! - Describe the external side effects of each transition as domain
//!   events for the caller to dispatch after commit.
//!
//! # Invariants
//! - Scheduling requires an unscheduled meeting; rescheduling, cancelling,
//!   and unscheduling require a scheduled one. Cancellation is terminal.
//! - Due propagation only rewrites incomplete tasks whose due date is
//!   unset or still tracks the old start.
//! - Family-initiated transitions notify the counselor; counselor-initiated
//!   ones do not notify the counselor about their own action.

use crate::model::meeting::{AgendaItem, AgendaItemId, Meeting, MeetingId, MeetingStatus};
use crate::model::roadmap::{AgendaItemTemplateId, MeetingPhase, MeetingTemplateId};
use crate::model::student::{Actor, Student, StudentId};
use crate::model::task::Task;
use crate::repo::meeting_repo::MeetingRepository;
use crate::repo::student_repo::StudentRepository;
use crate::repo::task_repo::TaskRepository;
use crate::repo::template_repo::TemplateRepository;
use crate::repo::RepoError;
use crate::sync::{DomainEvent, Notification, NotificationKind, Recipient};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for meeting use-cases.
#[derive(Debug)]
pub enum MeetingServiceError {
    MeetingNotFound(MeetingId),
    StudentNotFound(StudentId),
    MeetingTemplateNotFound(MeetingTemplateId),
    AgendaItemTemplateNotFound(AgendaItemTemplateId),
    AgendaItemNotOnMeeting {
        meeting_id: MeetingId,
        agenda_item_id: AgendaItemId,
    },
    /// Scheduling a meeting that already has a window.
    AlreadyScheduled(MeetingId),
    /// Rescheduling or cancelling a meeting without a window.
    NotScheduled(MeetingId),
    /// Acting on a cancelled meeting.
    AlreadyCancelled(MeetingId),
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for MeetingServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MeetingNotFound(id) => write!(f, "meeting not found: {id}"),
            Self::StudentNotFound(id) => write!(f, "student not found: {id}"),
            Self::MeetingTemplateNotFound(id) => write!(f, "meeting template not found: {id}"),
            Self::AgendaItemTemplateNotFound(id) => {
                write!(f, "agenda item template not found: {id}")
            }
            Self::AgendaItemNotOnMeeting {
                meeting_id,
                agenda_item_id,
            } => write!(
                f,
                "agenda item {agenda_item_id} does not belong to meeting {meeting_id}"
            ),
            Self::AlreadyScheduled(id) => write!(f, "meeting already scheduled: {id}"),
            Self::NotScheduled(id) => write!(f, "meeting not scheduled: {id}"),
            Self::AlreadyCancelled(id) => write!(f, "meeting already cancelled: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent meeting state: {details}")
            }
        }
    }
}

impl Error for MeetingServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MeetingServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<crate::db::DbError> for MeetingServiceError {
    fn from(value: crate::db::DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

/// Spec for creating one meeting.
#[derive(Debug, Clone, Default)]
pub struct NewMeeting {
    pub meeting_template_id: Option<MeetingTemplateId>,
    /// Defaults to the template title when instantiating from a template.
    pub title: Option<String>,
    /// Explicit agenda selection. Empty means the template default agenda
    /// (when the template uses one).
    pub agenda_item_template_ids: Vec<AgendaItemTemplateId>,
    /// Counselor-authored agenda lines with no template behind them.
    pub custom_agenda_items: Vec<String>,
}

/// A committed transition plus the side effects it asks for.
#[derive(Debug)]
pub struct MeetingTransition {
    pub meeting: Meeting,
    pub events: Vec<DomainEvent>,
}

/// Meeting service facade over repository implementations.
pub struct MeetingService<M, T, K, S>
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

impl<M, T, K, S> MeetingService<M, T, K, S>
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

    /// Creates one meeting for a student, unscheduled, with its agenda.
    ///
    /// A templated meeting with no explicit agenda selection gets the
    /// template's active agenda items, unless the template opts out of
    /// agendas entirely.
    ///
    /// # Side effects
    /// - Emits `meeting_create` logging events.
    pub fn create_meeting(
        &self,
        student_id: StudentId,
        spec: &NewMeeting,
    ) -> Result<Meeting, MeetingServiceError> {
        if self.students.get_student(student_id)?.is_none() {
            return Err(MeetingServiceError::StudentNotFound(student_id));
        }

        let template = match spec.meeting_template_id {
            Some(template_id) => Some(
                self.templates
                    .get_meeting_template(template_id)?
                    .ok_or(MeetingServiceError::MeetingTemplateNotFound(template_id))?,
            ),
            None => None,
        };

        let title = spec
            .title
            .clone()
            .or_else(|| template.as_ref().map(|t| t.title.clone()))
            .unwrap_or_else(|| "Meeting".to_string());
        let meeting = Meeting::new(student_id, spec.meeting_template_id, title);
        self.meetings.create_meeting(&meeting)?;

        let agenda_templates = if !spec.agenda_item_template_ids.is_empty() {
            let mut selected = Vec::with_capacity(spec.agenda_item_template_ids.len());
            for id in &spec.agenda_item_template_ids {
                selected.push(
                    self.templates
                        .get_agenda_item_template(*id)?
                        .ok_or(MeetingServiceError::AgendaItemTemplateNotFound(*id))?,
                );
            }
            selected
        } else {
            match &template {
                Some(template) if template.use_agenda => self
                    .templates
                    .agenda_item_templates_for_meeting_template(template.id)?,
                _ => Vec::new(),
            }
        };

        for agenda_template in &agenda_templates {
            self.meetings
                .create_agenda_item(&AgendaItem::from_template(meeting.id, agenda_template))?;
        }
        for title in &spec.custom_agenda_items {
            self.meetings
                .create_agenda_item(&AgendaItem::custom(meeting.id, title.clone()))?;
        }

        info!(
            "event=meeting_create module=service status=ok meeting_id={} student_id={student_id} agenda_items={}",
            meeting.id,
            agenda_templates.len() + spec.custom_agenda_items.len()
        );
        self.read_back(meeting.id)
    }

    /// Schedules an unscheduled meeting.
    ///
    /// When the student themselves scheduled it, linked tasks without a due
    /// date inherit the meeting start and become visible.
    ///
    /// # Side effects
    /// - Emits `meeting_schedule` logging events.
    pub fn schedule(
        &self,
        meeting_id: MeetingId,
        start: i64,
        end: i64,
        actor: Actor,
        now: i64,
    ) -> Result<MeetingTransition, MeetingServiceError> {
        let meeting = self.load(meeting_id)?;
        match meeting.status {
            MeetingStatus::Unscheduled => {}
            MeetingStatus::Scheduled { .. } => {
                return Err(MeetingServiceError::AlreadyScheduled(meeting_id))
            }
            MeetingStatus::Cancelled { .. } => {
                return Err(MeetingServiceError::AlreadyCancelled(meeting_id))
            }
        }

        self.meetings
            .update_status(meeting_id, &MeetingStatus::Scheduled { start, end })?;

        let mut propagated = 0;
        if matches!(actor, Actor::Student(_)) {
            propagated = self
                .tasks
                .propagate_due_for_meeting(meeting_id, None, start, now)?;
        }

        let student = self.student_of(&meeting)?;
        let mut events = vec![
            DomainEvent::CalendarCreateRequested { meeting_id },
            DomainEvent::LedgerEntryCreateRequested { meeting_id },
        ];
        push_family_notifications(
            &mut events,
            &student,
            NotificationKind::MeetingScheduled,
            meeting_id,
        );
        if !matches!(actor, Actor::Counselor(_)) {
            if let Some(counselor_id) = student.counselor_id {
                events.push(DomainEvent::NotificationRequested(Notification {
                    recipient: Recipient::Counselor(counselor_id),
                    kind: NotificationKind::CounselorMeetingScheduled,
                    meeting_id: Some(meeting_id),
                    task_id: None,
                }));
            }
        }

        info!(
            "event=meeting_schedule module=service status=ok meeting_id={meeting_id} tasks_propagated={propagated}"
        );
        Ok(MeetingTransition {
            meeting: self.read_back(meeting_id)?,
            events,
        })
    }

    /// Moves a scheduled meeting to a new window.
    ///
    /// For family-initiated moves, linked tasks still tracking the old start
    /// (or with no due date) follow the new start.
    ///
    /// # Side effects
    /// - Emits `meeting_reschedule` logging events.
    pub fn reschedule(
        &self,
        meeting_id: MeetingId,
        start: i64,
        end: i64,
        actor: Actor,
        now: i64,
    ) -> Result<MeetingTransition, MeetingServiceError> {
        let meeting = self.load(meeting_id)?;
        let (old_start, _) = match meeting.status {
            MeetingStatus::Scheduled { start, end } => (start, end),
            MeetingStatus::Unscheduled => {
                return Err(MeetingServiceError::NotScheduled(meeting_id))
            }
            MeetingStatus::Cancelled { .. } => {
                return Err(MeetingServiceError::AlreadyCancelled(meeting_id))
            }
        };

        self.meetings
            .update_status(meeting_id, &MeetingStatus::Scheduled { start, end })?;

        let mut propagated = 0;
        if actor.is_family() {
            propagated =
                self.tasks
                    .propagate_due_for_meeting(meeting_id, Some(old_start), start, now)?;
        }

        let student = self.student_of(&meeting)?;
        let mut events = vec![
            DomainEvent::CalendarUpdateRequested { meeting_id },
            DomainEvent::LedgerEntryUpdateRequested { meeting_id },
        ];
        push_family_notifications(
            &mut events,
            &student,
            NotificationKind::MeetingRescheduled,
            meeting_id,
        );
        if actor.is_family() {
            if let Some(counselor_id) = student.counselor_id {
                events.push(DomainEvent::NotificationRequested(Notification {
                    recipient: Recipient::Counselor(counselor_id),
                    kind: NotificationKind::CounselorMeetingRescheduled,
                    meeting_id: Some(meeting_id),
                    task_id: None,
                }));
            }
        }

        info!(
            "event=meeting_reschedule module=service status=ok meeting_id={meeting_id} tasks_propagated={propagated}"
        );
        Ok(MeetingTransition {
            meeting: self.read_back(meeting_id)?,
            events,
        })
    }

    /// Cancels a scheduled meeting, retaining its last window.
    ///
    /// # Side effects
    /// - Emits `meeting_cancel` logging events.
    pub fn cancel(
        &self,
        meeting_id: MeetingId,
        notify_student: bool,
        now: i64,
    ) -> Result<MeetingTransition, MeetingServiceError> {
        let meeting = self.load(meeting_id)?;
        let (last_start, last_end) = match meeting.status {
            MeetingStatus::Scheduled { start, end } => (Some(start), Some(end)),
            MeetingStatus::Unscheduled => {
                return Err(MeetingServiceError::NotScheduled(meeting_id))
            }
            MeetingStatus::Cancelled { .. } => {
                return Err(MeetingServiceError::AlreadyCancelled(meeting_id))
            }
        };

        self.meetings.update_status(
            meeting_id,
            &MeetingStatus::Cancelled {
                at: now,
                last_start,
                last_end,
            },
        )?;

        let mut events = vec![
            DomainEvent::CalendarDeleteRequested { meeting_id },
            DomainEvent::LedgerEntryDeleteRequested { meeting_id },
        ];
        if notify_student {
            let student = self.student_of(&meeting)?;
            push_family_notifications(
                &mut events,
                &student,
                NotificationKind::MeetingCancelled,
                meeting_id,
            );
        }

        info!("event=meeting_cancel module=service status=ok meeting_id={meeting_id}");
        Ok(MeetingTransition {
            meeting: self.read_back(meeting_id)?,
            events,
        })
    }

    /// Clears a scheduled meeting's window without recording a cancellation.
    ///
    /// The meeting returns to unscheduled and can be scheduled again. The
    /// external calendar event and ledger entry are torn down like a
    /// cancellation, but no cancelled timestamp is written.
    pub fn unschedule(
        &self,
        meeting_id: MeetingId,
        notify_student: bool,
    ) -> Result<MeetingTransition, MeetingServiceError> {
        let meeting = self.load(meeting_id)?;
        match meeting.status {
            MeetingStatus::Scheduled { .. } => {}
            MeetingStatus::Unscheduled => {
                return Err(MeetingServiceError::NotScheduled(meeting_id))
            }
            MeetingStatus::Cancelled { .. } => {
                return Err(MeetingServiceError::AlreadyCancelled(meeting_id))
            }
        }

        self.meetings
            .update_status(meeting_id, &MeetingStatus::Unscheduled)?;

        let mut events = vec![
            DomainEvent::CalendarDeleteRequested { meeting_id },
            DomainEvent::LedgerEntryDeleteRequested { meeting_id },
        ];
        if notify_student {
            let student = self.student_of(&meeting)?;
            push_family_notifications(
                &mut events,
                &student,
                NotificationKind::MeetingCancelled,
                meeting_id,
            );
        }

        info!("event=meeting_unschedule module=service status=ok meeting_id={meeting_id}");
        Ok(MeetingTransition {
            meeting: self.read_back(meeting_id)?,
            events,
        })
    }

    /// Adds one templated agenda item to an existing meeting.
    pub fn add_agenda_item(
        &self,
        meeting_id: MeetingId,
        agenda_item_template_id: AgendaItemTemplateId,
    ) -> Result<AgendaItem, MeetingServiceError> {
        let _ = self.load(meeting_id)?;
        let template = self
            .templates
            .get_agenda_item_template(agenda_item_template_id)?
            .ok_or(MeetingServiceError::AgendaItemTemplateNotFound(
                agenda_item_template_id,
            ))?;

        let item = AgendaItem::from_template(meeting_id, &template);
        self.meetings.create_agenda_item(&item)?;
        Ok(item)
    }

    /// Adds one counselor-authored agenda item to an existing meeting.
    pub fn add_custom_agenda_item(
        &self,
        meeting_id: MeetingId,
        title: impl Into<String>,
    ) -> Result<AgendaItem, MeetingServiceError> {
        let _ = self.load(meeting_id)?;
        let item = AgendaItem::custom(meeting_id, title);
        self.meetings.create_agenda_item(&item)?;
        Ok(item)
    }

    /// Removes one agenda item, verifying it belongs to the meeting.
    pub fn remove_agenda_item(
        &self,
        meeting_id: MeetingId,
        agenda_item_id: AgendaItemId,
    ) -> Result<(), MeetingServiceError> {
        let item = self
            .meetings
            .get_agenda_item(agenda_item_id)?
            .ok_or(MeetingServiceError::AgendaItemNotOnMeeting {
                meeting_id,
                agenda_item_id,
            })?;
        if item.meeting_id != meeting_id {
            return Err(MeetingServiceError::AgendaItemNotOnMeeting {
                meeting_id,
                agenda_item_id,
            });
        }

        self.meetings.delete_agenda_item(agenda_item_id)?;
        Ok(())
    }

    pub fn agenda_items(&self, meeting_id: MeetingId) -> Result<Vec<AgendaItem>, MeetingServiceError> {
        let _ = self.load(meeting_id)?;
        Ok(self.meetings.agenda_items_for_meeting(meeting_id)?)
    }

    /// The meeting's linked preparation or follow-up tasks.
    pub fn agenda_tasks(
        &self,
        meeting_id: MeetingId,
        phase: MeetingPhase,
    ) -> Result<Vec<Task>, MeetingServiceError> {
        let _ = self.load(meeting_id)?;
        Ok(self.tasks.tasks_for_meeting_phase(meeting_id, phase)?)
    }

    /// Replaces meeting notes.
    pub fn update_notes(
        &self,
        meeting_id: MeetingId,
        private_notes: &str,
        student_notes: &str,
        finalized: bool,
    ) -> Result<Meeting, MeetingServiceError> {
        let _ = self.load(meeting_id)?;
        self.meetings
            .update_notes(meeting_id, private_notes, student_notes, finalized)?;
        self.read_back(meeting_id)
    }

    /// Sends the student-facing notes and records when they went out.
    ///
    /// # Side effects
    /// - Emits `meeting_notes_send` logging events.
    pub fn send_notes(
        &self,
        meeting_id: MeetingId,
        now: i64,
    ) -> Result<MeetingTransition, MeetingServiceError> {
        let meeting = self.load(meeting_id)?;
        let student = self.student_of(&meeting)?;

        self.meetings.mark_notes_sent(meeting_id, now)?;

        let mut events = Vec::new();
        push_family_notifications(
            &mut events,
            &student,
            NotificationKind::MeetingNotes,
            meeting_id,
        );

        info!("event=meeting_notes_send module=service status=ok meeting_id={meeting_id}");
        Ok(MeetingTransition {
            meeting: self.read_back(meeting_id)?,
            events,
        })
    }

    pub fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>, MeetingServiceError> {
        Ok(self.meetings.get_meeting(meeting_id)?)
    }

    fn load(&self, meeting_id: MeetingId) -> Result<Meeting, MeetingServiceError> {
        self.meetings
            .get_meeting(meeting_id)?
            .ok_or(MeetingServiceError::MeetingNotFound(meeting_id))
    }

    fn student_of(&self, meeting: &Meeting) -> Result<Student, MeetingServiceError> {
        self.students
            .get_student(meeting.student_id)?
            .ok_or(MeetingServiceError::StudentNotFound(meeting.student_id))
    }

    fn read_back(&self, meeting_id: MeetingId) -> Result<Meeting, MeetingServiceError> {
        self.meetings
            .get_meeting(meeting_id)?
            .ok_or(MeetingServiceError::InconsistentState(
                "meeting not found in read-back",
            ))
    }
}

fn push_family_notifications(
    events: &mut Vec<DomainEvent>,
    student: &Student,
    kind: NotificationKind,
    meeting_id: MeetingId,
) {
    events.push(DomainEvent::NotificationRequested(Notification {
        recipient: Recipient::Student(student.id),
        kind,
        meeting_id: Some(meeting_id),
        task_id: None,
    }));
    if student.has_parent {
        events.push(DomainEvent::NotificationRequested(Notification {
            recipient: Recipient::Parent(student.id),
            kind,
            meeting_id: Some(meeting_id),
            task_id: None,
        }));
    }
}
