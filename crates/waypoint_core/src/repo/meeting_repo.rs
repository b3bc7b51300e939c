//! Meeting repository: meeting instances and their agenda items.
//!
//! # Responsibility
//! - Persist meetings and translate lifecycle state to and from the
//!   nullable start/end/cancelled column triple.
//! - Persist agenda items and resolve which meetings reference a task
//!   template through their agenda.
//!
//! # Invariants
//! - A stored row with exactly one of start/end set is rejected as invalid
//!   data on read.
//! - Deleting a meeting cascades to its agenda items and task links.

use crate::model::meeting::{AgendaItem, AgendaItemId, Meeting, MeetingId, MeetingStatus};
use crate::model::roadmap::{RoadmapId, RoadmapKey};
use crate::model::student::StudentId;
use crate::model::task::TaskTemplate;
use crate::repo::{
    bool_to_int, column_bool, column_uuid, column_uuid_opt, parse_uuid, RepoError, RepoResult,
};
use rusqlite::{params, Connection, Row};

const MEETING_SELECT_SQL: &str = "SELECT
    id,
    student_id,
    meeting_template_id,
    title,
    start_at,
    end_at,
    cancelled_at,
    external_event_id,
    private_notes,
    student_notes,
    notes_finalized,
    notes_last_sent_at
FROM meetings";

/// Repository interface for meetings and agenda items.
pub trait MeetingRepository {
    fn create_meeting(&self, meeting: &Meeting) -> RepoResult<()>;
    fn get_meeting(&self, id: MeetingId) -> RepoResult<Option<Meeting>>;
    /// Meetings of one student, unscheduled first, then by start time.
    fn meetings_for_student(&self, student_id: StudentId) -> RepoResult<Vec<Meeting>>;
    fn delete_meeting(&self, id: MeetingId) -> RepoResult<()>;

    /// Rewrites the lifecycle column triple for one meeting.
    fn update_status(&self, id: MeetingId, status: &MeetingStatus) -> RepoResult<()>;
    fn update_notes(
        &self,
        id: MeetingId,
        private_notes: &str,
        student_notes: &str,
        finalized: bool,
    ) -> RepoResult<()>;
    fn set_external_event_id(&self, id: MeetingId, event_id: Option<&str>) -> RepoResult<()>;
    fn mark_notes_sent(&self, id: MeetingId, now: i64) -> RepoResult<()>;

    fn create_agenda_item(&self, item: &AgendaItem) -> RepoResult<()>;
    fn get_agenda_item(&self, id: AgendaItemId) -> RepoResult<Option<AgendaItem>>;
    fn delete_agenda_item(&self, id: AgendaItemId) -> RepoResult<()>;
    /// Agenda items of one meeting, in display order.
    fn agenda_items_for_meeting(&self, meeting_id: MeetingId) -> RepoResult<Vec<AgendaItem>>;

    /// Ids of the student's meetings whose agenda references the given task
    /// template, matched by template id or by shared roadmap key.
    fn meetings_referencing_task_template(
        &self,
        student_id: StudentId,
        template: &TaskTemplate,
    ) -> RepoResult<Vec<MeetingId>>;

    /// Deletes the student's meetings instantiated from the roadmap that are
    /// unscheduled or end after `now`. Returns the number deleted.
    fn delete_roadmap_meetings_ending_after(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
        now: i64,
    ) -> RepoResult<usize>;
}

/// SQLite-backed meeting repository.
#[derive(Clone, Copy)]
pub struct SqliteMeetingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMeetingRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MeetingRepository for SqliteMeetingRepository<'_> {
    fn create_meeting(&self, meeting: &Meeting) -> RepoResult<()> {
        let (start_at, end_at, cancelled_at) = meeting.status.to_columns();
        self.conn.execute(
            "INSERT INTO meetings (
                id,
                student_id,
                meeting_template_id,
                title,
                start_at,
                end_at,
                cancelled_at,
                external_event_id,
                private_notes,
                student_notes,
                notes_finalized,
                notes_last_sent_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
            params![
                meeting.id.to_string(),
                meeting.student_id.to_string(),
                meeting.meeting_template_id.map(|id| id.to_string()),
                meeting.title,
                start_at,
                end_at,
                cancelled_at,
                meeting.external_event_id.as_deref(),
                meeting.private_notes,
                meeting.student_notes,
                bool_to_int(meeting.notes_finalized),
                meeting.notes_last_sent_at,
            ],
        )?;
        Ok(())
    }

    fn get_meeting(&self, id: MeetingId) -> RepoResult<Option<Meeting>> {
        let sql = format!("{MEETING_SELECT_SQL} WHERE id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(meeting_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn meetings_for_student(&self, student_id: StudentId) -> RepoResult<Vec<Meeting>> {
        let sql = format!(
            "{MEETING_SELECT_SQL}
             WHERE student_id = ?1
             ORDER BY start_at IS NOT NULL, start_at ASC, title ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([student_id.to_string()])?;
        let mut meetings = Vec::new();
        while let Some(row) = rows.next()? {
            meetings.push(meeting_from_row(row)?);
        }
        Ok(meetings)
    }

    fn delete_meeting(&self, id: MeetingId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM meetings WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::not_found("meeting", id));
        }
        Ok(())
    }

    fn update_status(&self, id: MeetingId, status: &MeetingStatus) -> RepoResult<()> {
        let (start_at, end_at, cancelled_at) = status.to_columns();
        let changed = self.conn.execute(
            "UPDATE meetings
             SET start_at = ?2, end_at = ?3, cancelled_at = ?4
             WHERE id = ?1;",
            params![id.to_string(), start_at, end_at, cancelled_at],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("meeting", id));
        }
        Ok(())
    }

    fn update_notes(
        &self,
        id: MeetingId,
        private_notes: &str,
        student_notes: &str,
        finalized: bool,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE meetings
             SET private_notes = ?2, student_notes = ?3, notes_finalized = ?4
             WHERE id = ?1;",
            params![
                id.to_string(),
                private_notes,
                student_notes,
                bool_to_int(finalized)
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("meeting", id));
        }
        Ok(())
    }

    fn set_external_event_id(&self, id: MeetingId, event_id: Option<&str>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE meetings SET external_event_id = ?2 WHERE id = ?1;",
            params![id.to_string(), event_id],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("meeting", id));
        }
        Ok(())
    }

    fn mark_notes_sent(&self, id: MeetingId, now: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE meetings SET notes_last_sent_at = ?2 WHERE id = ?1;",
            params![id.to_string(), now],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("meeting", id));
        }
        Ok(())
    }

    fn create_agenda_item(&self, item: &AgendaItem) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO agenda_items (
                id,
                meeting_id,
                agenda_item_template_id,
                ord,
                counselor_title,
                student_title
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                item.id.to_string(),
                item.meeting_id.to_string(),
                item.agenda_item_template_id.map(|id| id.to_string()),
                item.order,
                item.counselor_title,
                item.student_title,
            ],
        )?;
        Ok(())
    }

    fn get_agenda_item(&self, id: AgendaItemId) -> RepoResult<Option<AgendaItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meeting_id, agenda_item_template_id, ord,
                    counselor_title, student_title
             FROM agenda_items
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(agenda_item_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn delete_agenda_item(&self, id: AgendaItemId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM agenda_items WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::not_found("agenda item", id));
        }
        Ok(())
    }

    fn agenda_items_for_meeting(&self, meeting_id: MeetingId) -> RepoResult<Vec<AgendaItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meeting_id, agenda_item_template_id, ord,
                    counselor_title, student_title
             FROM agenda_items
             WHERE meeting_id = ?1
             ORDER BY ord ASC, counselor_title ASC;",
        )?;
        let mut rows = stmt.query([meeting_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(agenda_item_from_row(row)?);
        }
        Ok(items)
    }

    fn meetings_referencing_task_template(
        &self,
        student_id: StudentId,
        template: &TaskTemplate,
    ) -> RepoResult<Vec<MeetingId>> {
        let key = template.roadmap_key.as_ref().map_or("", RoadmapKey::as_str);
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.id
             FROM meetings m
             INNER JOIN agenda_items ai ON ai.meeting_id = m.id
             INNER JOIN agenda_item_task_templates link
                ON link.agenda_item_template_id = ai.agenda_item_template_id
             INNER JOIN task_templates tt ON tt.id = link.task_template_id
             WHERE m.student_id = ?1
               AND (tt.id = ?2 OR (?3 <> '' AND tt.roadmap_key = ?3))
             ORDER BY m.id ASC;",
        )?;
        let mut rows = stmt.query(params![
            student_id.to_string(),
            template.id.to_string(),
            key
        ])?;
        let mut meeting_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            meeting_ids.push(parse_uuid("meetings.id", &value)?);
        }
        Ok(meeting_ids)
    }

    fn delete_roadmap_meetings_ending_after(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
        now: i64,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "DELETE FROM meetings
             WHERE student_id = ?1
               AND (end_at IS NULL OR end_at > ?3)
               AND meeting_template_id IN (
                   SELECT id FROM meeting_templates WHERE roadmap_id = ?2
               );",
            params![student_id.to_string(), roadmap_id.to_string(), now],
        )?;
        Ok(changed)
    }
}

fn meeting_from_row(row: &Row<'_>) -> RepoResult<Meeting> {
    let id = column_uuid(row, "id")?;
    let start_at: Option<i64> = row.get("start_at")?;
    let end_at: Option<i64> = row.get("end_at")?;
    let cancelled_at: Option<i64> = row.get("cancelled_at")?;
    let status = MeetingStatus::from_columns(start_at, end_at, cancelled_at).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "meeting {id} has a half-open scheduling window in meetings"
        ))
    })?;

    Ok(Meeting {
        id,
        student_id: column_uuid(row, "student_id")?,
        meeting_template_id: column_uuid_opt(row, "meeting_template_id")?,
        title: row.get("title")?,
        status,
        external_event_id: row.get("external_event_id")?,
        private_notes: row.get("private_notes")?,
        student_notes: row.get("student_notes")?,
        notes_finalized: column_bool(row, "notes_finalized")?,
        notes_last_sent_at: row.get("notes_last_sent_at")?,
    })
}

fn agenda_item_from_row(row: &Row<'_>) -> RepoResult<AgendaItem> {
    Ok(AgendaItem {
        id: column_uuid(row, "id")?,
        meeting_id: column_uuid(row, "meeting_id")?,
        agenda_item_template_id: column_uuid_opt(row, "agenda_item_template_id")?,
        order: row.get("ord")?,
        counselor_title: row.get("counselor_title")?,
        student_title: row.get("student_title")?,
    })
}
