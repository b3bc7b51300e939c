//! Meeting instance model and lifecycle state.
//!
//! # Responsibility
//! - Define concrete meetings and their agenda items.
//! - Model the Unscheduled/Scheduled/Cancelled lifecycle as a tagged variant,
//!   translated to the nullable start/end/cancelled storage triple only at
//!   the persistence boundary.
//!
//! # Invariants
//! - `Cancelled` is terminal; it retains the last scheduled window for
//!   history.
//! - A stored row with exactly one of start/end set is invalid data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::roadmap::{AgendaItemTemplateId, MeetingTemplateId};
use crate::model::student::StudentId;

/// Stable identifier for a meeting.
pub type MeetingId = Uuid;
/// Stable identifier for an agenda item.
pub type AgendaItemId = Uuid;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Lifecycle state of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum MeetingStatus {
    Unscheduled,
    Scheduled {
        start: i64,
        end: i64,
    },
    /// Terminal. The last scheduled window is retained for history.
    Cancelled {
        at: i64,
        last_start: Option<i64>,
        last_end: Option<i64>,
    },
}

impl MeetingStatus {
    /// Reconstructs the status from the stored nullable triple.
    ///
    /// Returns `None` for unrepresentable combinations (exactly one of
    /// start/end present).
    pub fn from_columns(start: Option<i64>, end: Option<i64>, cancelled: Option<i64>) -> Option<Self> {
        if let Some(at) = cancelled {
            return match (start, end) {
                (Some(_), None) | (None, Some(_)) => None,
                (last_start, last_end) => Some(Self::Cancelled {
                    at,
                    last_start,
                    last_end,
                }),
            };
        }
        match (start, end) {
            (None, None) => Some(Self::Unscheduled),
            (Some(start), Some(end)) => Some(Self::Scheduled { start, end }),
            _ => None,
        }
    }

    /// Flattens the status back to the `(start, end, cancelled)` columns.
    pub fn to_columns(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match *self {
            Self::Unscheduled => (None, None, None),
            Self::Scheduled { start, end } => (Some(start), Some(end), None),
            Self::Cancelled {
                at,
                last_start,
                last_end,
            } => (last_start, last_end, Some(at)),
        }
    }

    /// The active scheduled window, when there is one.
    pub fn scheduled_range(&self) -> Option<(i64, i64)> {
        match *self {
            Self::Scheduled { start, end } => Some((start, end)),
            _ => None,
        }
    }
}

/// A concrete meeting between a counselor and one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub student_id: StudentId,
    /// `None` for ad hoc meetings created outside any roadmap.
    pub meeting_template_id: Option<MeetingTemplateId>,
    pub title: String,
    pub status: MeetingStatus,
    /// Identifier of the mirrored event in the external calendar.
    pub external_event_id: Option<String>,
    pub private_notes: String,
    pub student_notes: String,
    pub notes_finalized: bool,
    pub notes_last_sent_at: Option<i64>,
}

impl Meeting {
    pub fn new(
        student_id: StudentId,
        meeting_template_id: Option<MeetingTemplateId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            meeting_template_id,
            title: title.into(),
            status: MeetingStatus::Unscheduled,
            external_event_id: None,
            private_notes: String::new(),
            student_notes: String::new(),
            notes_finalized: false,
            notes_last_sent_at: None,
        }
    }

    /// Billable duration of the scheduled window, in hours.
    pub fn scheduled_hours(&self) -> Option<f64> {
        self.status
            .scheduled_range()
            .map(|(start, end)| (end - start) as f64 / MILLIS_PER_HOUR)
    }
}

/// One line on a meeting's agenda, from a template or counselor-authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: AgendaItemId,
    pub meeting_id: MeetingId,
    /// `None` for custom items typed in by the counselor.
    pub agenda_item_template_id: Option<AgendaItemTemplateId>,
    pub order: i64,
    pub counselor_title: String,
    pub student_title: String,
}

impl AgendaItem {
    pub fn from_template(
        meeting_id: MeetingId,
        template: &crate::model::roadmap::AgendaItemTemplate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            meeting_id,
            agenda_item_template_id: Some(template.id),
            order: template.order,
            counselor_title: template.counselor_title.clone(),
            student_title: template.student_title.clone(),
        }
    }

    pub fn custom(meeting_id: MeetingId, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: Uuid::new_v4(),
            meeting_id,
            agenda_item_template_id: None,
            order: 1,
            counselor_title: title.clone(),
            student_title: title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Meeting, MeetingStatus};
    use uuid::Uuid;

    #[test]
    fn status_column_roundtrip() {
        let states = [
            MeetingStatus::Unscheduled,
            MeetingStatus::Scheduled {
                start: 1_000,
                end: 5_000,
            },
            MeetingStatus::Cancelled {
                at: 9_000,
                last_start: Some(1_000),
                last_end: Some(5_000),
            },
        ];
        for state in states {
            let (start, end, cancelled) = state.to_columns();
            assert_eq!(MeetingStatus::from_columns(start, end, cancelled), Some(state));
        }
    }

    #[test]
    fn half_open_window_is_rejected() {
        assert_eq!(MeetingStatus::from_columns(Some(1), None, None), None);
        assert_eq!(MeetingStatus::from_columns(None, Some(1), None), None);
        assert_eq!(MeetingStatus::from_columns(Some(1), None, Some(2)), None);
    }

    #[test]
    fn scheduled_hours_reflects_window() {
        let mut meeting = Meeting::new(Uuid::new_v4(), None, "kickoff");
        assert_eq!(meeting.scheduled_hours(), None);

        meeting.status = MeetingStatus::Scheduled {
            start: 0,
            end: 5_400_000,
        };
        assert_eq!(meeting.scheduled_hours(), Some(1.5));
    }
}
