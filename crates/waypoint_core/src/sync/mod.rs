//! Outward synchronization boundary.
//!
//! # Responsibility
//! - Define the domain events lifecycle transitions emit.
//! - Define the ports external systems plug into (calendar, billing
//!   ledger, notifications).
//! - Dispatch events best-effort: a failed side channel never rolls back
//!   or fails the committed transition.

use crate::model::meeting::{Meeting, MeetingId};
use crate::model::student::{CounselorId, StudentId};
use crate::model::task::TaskId;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod dispatcher;

pub use dispatcher::{DispatchReport, SyncDispatcher};

/// Something a lifecycle transition asks the outside world to do.
///
/// Events carry ids, not snapshots; the dispatcher re-reads current state so
/// a batch replays correctly even after later in-batch writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    CalendarCreateRequested { meeting_id: MeetingId },
    CalendarUpdateRequested { meeting_id: MeetingId },
    CalendarDeleteRequested { meeting_id: MeetingId },
    LedgerEntryCreateRequested { meeting_id: MeetingId },
    LedgerEntryUpdateRequested { meeting_id: MeetingId },
    LedgerEntryDeleteRequested { meeting_id: MeetingId },
    NotificationRequested(Notification),
}

/// Who a notification goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Student(StudentId),
    Parent(StudentId),
    Counselor(CounselorId),
}

/// What a notification is about. Rendering belongs to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    MeetingScheduled,
    CounselorMeetingScheduled,
    MeetingRescheduled,
    CounselorMeetingRescheduled,
    MeetingCancelled,
    MeetingNotes,
    TaskCompleted,
}

/// One notification request handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub meeting_id: Option<MeetingId>,
    pub task_id: Option<TaskId>,
}

/// Error reported by an external port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl SyncError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sync error {}: {}", self.code, self.message)
    }
}

impl Error for SyncError {}

/// External calendar mirror for scheduled meetings.
pub trait CalendarSync {
    /// Creates the mirrored event and returns its external id.
    fn create(&self, meeting: &Meeting) -> Result<String, SyncError>;
    fn update(&self, meeting: &Meeting, event_id: &str) -> Result<(), SyncError>;
    fn delete(&self, event_id: &str) -> Result<(), SyncError>;
}

/// Billing ledger keeping one time entry per scheduled meeting.
pub trait BillingLedger {
    fn create_entry(&self, meeting: &Meeting, hours: f64) -> Result<(), SyncError>;
    fn update_entry(&self, meeting: &Meeting, hours: f64) -> Result<(), SyncError>;
    fn delete_entry(&self, meeting_id: MeetingId) -> Result<(), SyncError>;
}

/// Delivery channel for user-facing notifications.
pub trait NotificationSink {
    fn emit(&self, notification: &Notification) -> Result<(), SyncError>;
}
