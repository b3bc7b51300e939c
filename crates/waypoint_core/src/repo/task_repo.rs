//! Task repository: per-student task instances and their meeting links.
//!
//! # Responsibility
//! - Persist tasks and the task/meeting link table.
//! - Run the set-level writes that keep tasks aligned with their templates
//!   and with meeting schedule changes.
//!
//! # Invariants
//! - Completed tasks are never touched by resync, due propagation, or
//!   roadmap removal.
//! - Template matching treats a shared non-empty roadmap key as identity,
//!   so overrides and canonicals interchange transparently.

use crate::model::meeting::MeetingId;
use crate::model::roadmap::{MeetingPhase, RoadmapId, RoadmapKey};
use crate::model::student::{CounselorId, StudentId};
use crate::model::task::{SubmissionSettings, Task, TaskId, TaskTemplate, TaskType};
use crate::repo::{
    bool_to_int, column_bool, column_uuid, column_uuid_opt, parse_string_array, parse_uuid,
    string_array_text, RepoError, RepoResult,
};
use rusqlite::{params, Connection, Row};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    student_id,
    task_template_id,
    meeting_template_ref,
    task_type,
    title,
    description,
    resource_links,
    diagnostic_link,
    form_link,
    allow_content,
    require_content,
    allow_file,
    require_file,
    allow_form,
    require_form,
    created_by_counselor,
    due_at,
    completed_at,
    archived_at,
    visible_to_student,
    assigned_at
FROM tasks";

/// Repository interface for task instances.
pub trait TaskRepository {
    fn create_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    fn update_task(&self, task: &Task) -> RepoResult<()>;
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
    /// Tasks of one student, unarchived, in due order (undated last).
    fn tasks_for_student(&self, student_id: StudentId) -> RepoResult<Vec<Task>>;

    /// Replaces the full set of meetings a task is linked to.
    fn set_task_meetings(&self, task_id: TaskId, meeting_ids: &[MeetingId]) -> RepoResult<()>;
    fn meetings_for_task(&self, task_id: TaskId) -> RepoResult<Vec<MeetingId>>;

    /// Whether the student already holds a task for the template, matched by
    /// template id or by shared roadmap key.
    fn student_has_task_for_template(
        &self,
        student_id: StudentId,
        template: &TaskTemplate,
    ) -> RepoResult<bool>;

    /// Tasks linked to the meeting whose templates hang off the meeting's
    /// agenda for the given phase.
    fn tasks_for_meeting_phase(
        &self,
        meeting_id: MeetingId,
        phase: MeetingPhase,
    ) -> RepoResult<Vec<Task>>;

    /// Rewrites the template-owned configuration of every incomplete task of
    /// the counselor's students whose template matches `template` by id or
    /// key. Returns the number of tasks rewritten.
    fn resync_incomplete_tasks_to_template(
        &self,
        template: &TaskTemplate,
        counselor_id: CounselorId,
    ) -> RepoResult<usize>;

    /// Applies a meeting due-date change to the meeting's incomplete tasks
    /// whose due date is unset or still equals `old_due`. Updated tasks
    /// become visible and get `assigned_at` stamped if missing. Returns the
    /// number of tasks updated.
    fn propagate_due_for_meeting(
        &self,
        meeting_id: MeetingId,
        old_due: Option<i64>,
        new_due: i64,
        now: i64,
    ) -> RepoResult<usize>;

    /// Deletes the student's incomplete tasks whose template is reachable
    /// from the roadmap, matched by id or key. Returns the number deleted.
    fn delete_incomplete_roadmap_tasks(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
    ) -> RepoResult<usize>;
}

/// SQLite-backed task repository.
#[derive(Clone, Copy)]
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tasks (
                id,
                student_id,
                task_template_id,
                meeting_template_ref,
                task_type,
                title,
                description,
                resource_links,
                diagnostic_link,
                form_link,
                allow_content,
                require_content,
                allow_file,
                require_file,
                allow_form,
                require_form,
                created_by_counselor,
                due_at,
                completed_at,
                archived_at,
                visible_to_student,
                assigned_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22);",
            params![
                task.id.to_string(),
                task.student_id.to_string(),
                task.task_template_id.map(|id| id.to_string()),
                task.meeting_template_ref.map(|id| id.to_string()),
                task.task_type.as_db_str(),
                task.title,
                task.description,
                string_array_text(&task.resource_links),
                task.diagnostic_link.as_deref(),
                task.form_link.as_deref(),
                bool_to_int(task.submission.allow_content),
                bool_to_int(task.submission.require_content),
                bool_to_int(task.submission.allow_file),
                bool_to_int(task.submission.require_file),
                bool_to_int(task.submission.allow_form),
                bool_to_int(task.submission.require_form),
                bool_to_int(task.created_by_counselor),
                task.due_at,
                task.completed_at,
                task.archived_at,
                bool_to_int(task.visible_to_student),
                task.assigned_at,
            ],
        )?;
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let sql = format!("{TASK_SELECT_SQL} WHERE id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(task_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                task_template_id = ?2,
                meeting_template_ref = ?3,
                task_type = ?4,
                title = ?5,
                description = ?6,
                resource_links = ?7,
                diagnostic_link = ?8,
                form_link = ?9,
                allow_content = ?10,
                require_content = ?11,
                allow_file = ?12,
                require_file = ?13,
                allow_form = ?14,
                require_form = ?15,
                due_at = ?16,
                completed_at = ?17,
                archived_at = ?18,
                visible_to_student = ?19,
                assigned_at = ?20
             WHERE id = ?1;",
            params![
                task.id.to_string(),
                task.task_template_id.map(|id| id.to_string()),
                task.meeting_template_ref.map(|id| id.to_string()),
                task.task_type.as_db_str(),
                task.title,
                task.description,
                string_array_text(&task.resource_links),
                task.diagnostic_link.as_deref(),
                task.form_link.as_deref(),
                bool_to_int(task.submission.allow_content),
                bool_to_int(task.submission.require_content),
                bool_to_int(task.submission.allow_file),
                bool_to_int(task.submission.require_file),
                bool_to_int(task.submission.allow_form),
                bool_to_int(task.submission.require_form),
                task.due_at,
                task.completed_at,
                task.archived_at,
                bool_to_int(task.visible_to_student),
                task.assigned_at,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::not_found("task", task.id));
        }
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::not_found("task", id));
        }
        Ok(())
    }

    fn tasks_for_student(&self, student_id: StudentId) -> RepoResult<Vec<Task>> {
        let sql = format!(
            "{TASK_SELECT_SQL}
             WHERE student_id = ?1
               AND archived_at IS NULL
             ORDER BY due_at IS NULL, due_at ASC, title ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([student_id.to_string()])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(task_from_row(row)?);
        }
        Ok(tasks)
    }

    fn set_task_meetings(&self, task_id: TaskId, meeting_ids: &[MeetingId]) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM task_meetings WHERE task_id = ?1;",
            [task_id.to_string()],
        )?;
        for meeting_id in meeting_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO task_meetings (task_id, meeting_id) VALUES (?1, ?2);",
                params![task_id.to_string(), meeting_id.to_string()],
            )?;
        }
        Ok(())
    }

    fn meetings_for_task(&self, task_id: TaskId) -> RepoResult<Vec<MeetingId>> {
        let mut stmt = self.conn.prepare(
            "SELECT meeting_id FROM task_meetings WHERE task_id = ?1 ORDER BY meeting_id ASC;",
        )?;
        let mut rows = stmt.query([task_id.to_string()])?;
        let mut meeting_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            meeting_ids.push(parse_uuid("task_meetings.meeting_id", &value)?);
        }
        Ok(meeting_ids)
    }

    fn student_has_task_for_template(
        &self,
        student_id: StudentId,
        template: &TaskTemplate,
    ) -> RepoResult<bool> {
        let key = template.roadmap_key.as_ref().map_or("", RoadmapKey::as_str);
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM tasks t
                INNER JOIN task_templates tt ON tt.id = t.task_template_id
                WHERE t.student_id = ?1
                  AND (tt.id = ?2 OR (?3 <> '' AND tt.roadmap_key = ?3))
            );",
            params![student_id.to_string(), template.id.to_string(), key],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn tasks_for_meeting_phase(
        &self,
        meeting_id: MeetingId,
        phase: MeetingPhase,
    ) -> RepoResult<Vec<Task>> {
        let sql = format!(
            "SELECT DISTINCT t.* FROM ({TASK_SELECT_SQL}) t
             INNER JOIN task_meetings tm
                ON tm.task_id = t.id AND tm.meeting_id = ?1
             INNER JOIN task_templates owned ON owned.id = t.task_template_id
             INNER JOIN agenda_item_task_templates link
                ON link.task_template_id = owned.id
                OR (owned.roadmap_key <> '' AND link.task_template_id IN (
                       SELECT id FROM task_templates
                       WHERE roadmap_key = owned.roadmap_key
                   ))
             INNER JOIN agenda_items ai
                ON ai.agenda_item_template_id = link.agenda_item_template_id
               AND ai.meeting_id = ?1
             WHERE link.phase = ?2
             ORDER BY t.title ASC, t.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![meeting_id.to_string(), phase.as_db_str()])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(task_from_row(row)?);
        }
        Ok(tasks)
    }

    fn resync_incomplete_tasks_to_template(
        &self,
        template: &TaskTemplate,
        counselor_id: CounselorId,
    ) -> RepoResult<usize> {
        let key = template.roadmap_key.as_ref().map_or("", RoadmapKey::as_str);
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                task_template_id = ?1,
                task_type = ?2,
                title = ?3,
                description = ?4,
                resource_links = ?5,
                diagnostic_link = ?6,
                form_link = ?7,
                allow_content = ?8,
                require_content = ?9,
                allow_file = ?10,
                require_file = ?11,
                allow_form = ?12,
                require_form = ?13
             WHERE completed_at IS NULL
               AND student_id IN (
                   SELECT id FROM students WHERE counselor_id = ?14
               )
               AND task_template_id IN (
                   SELECT id FROM task_templates
                   WHERE id = ?1 OR (?15 <> '' AND roadmap_key = ?15)
               );",
            params![
                template.id.to_string(),
                template.task_type.as_db_str(),
                template.title,
                template.description,
                string_array_text(&template.resource_links),
                template.diagnostic_link.as_deref(),
                template.form_link.as_deref(),
                bool_to_int(template.submission.allow_content),
                bool_to_int(template.submission.require_content),
                bool_to_int(template.submission.allow_file),
                bool_to_int(template.submission.require_file),
                bool_to_int(template.submission.allow_form),
                bool_to_int(template.submission.require_form),
                counselor_id.to_string(),
                key,
            ],
        )?;
        Ok(changed)
    }

    fn propagate_due_for_meeting(
        &self,
        meeting_id: MeetingId,
        old_due: Option<i64>,
        new_due: i64,
        now: i64,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                due_at = ?2,
                visible_to_student = 1,
                assigned_at = COALESCE(assigned_at, ?3)
             WHERE completed_at IS NULL
               AND (due_at IS NULL OR (?4 IS NOT NULL AND due_at = ?4))
               AND id IN (
                   SELECT task_id FROM task_meetings WHERE meeting_id = ?1
               );",
            params![meeting_id.to_string(), new_due, now, old_due],
        )?;
        Ok(changed)
    }

    fn delete_incomplete_roadmap_tasks(
        &self,
        student_id: StudentId,
        roadmap_id: RoadmapId,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "WITH roadmap_templates AS (
                SELECT tt.id, tt.roadmap_key
                FROM agenda_item_task_templates link
                INNER JOIN agenda_item_templates ait
                   ON ait.id = link.agenda_item_template_id
                INNER JOIN meeting_templates mt
                   ON mt.id = ait.meeting_template_id
                INNER JOIN task_templates tt
                   ON tt.id = link.task_template_id
                WHERE mt.roadmap_id = ?2
             )
             DELETE FROM tasks
             WHERE student_id = ?1
               AND completed_at IS NULL
               AND task_template_id IN (
                   SELECT id FROM task_templates
                   WHERE id IN (SELECT id FROM roadmap_templates)
                      OR (roadmap_key <> '' AND roadmap_key IN (
                          SELECT roadmap_key FROM roadmap_templates
                          WHERE roadmap_key <> ''
                      ))
               );",
            params![student_id.to_string(), roadmap_id.to_string()],
        )?;
        Ok(changed)
    }
}

fn task_from_row(row: &Row<'_>) -> RepoResult<Task> {
    let task_type_text: String = row.get("task_type")?;
    let task_type = TaskType::parse_db(&task_type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "unknown task type `{task_type_text}` in tasks.task_type"
        ))
    })?;
    let resource_links_text: String = row.get("resource_links")?;

    Ok(Task {
        id: column_uuid(row, "id")?,
        student_id: column_uuid(row, "student_id")?,
        task_template_id: column_uuid_opt(row, "task_template_id")?,
        meeting_template_ref: column_uuid_opt(row, "meeting_template_ref")?,
        task_type,
        title: row.get("title")?,
        description: row.get("description")?,
        resource_links: parse_string_array("tasks.resource_links", &resource_links_text)?,
        diagnostic_link: row.get("diagnostic_link")?,
        form_link: row.get("form_link")?,
        submission: SubmissionSettings {
            allow_content: column_bool(row, "allow_content")?,
            require_content: column_bool(row, "require_content")?,
            allow_file: column_bool(row, "allow_file")?,
            require_file: column_bool(row, "require_file")?,
            allow_form: column_bool(row, "allow_form")?,
            require_form: column_bool(row, "require_form")?,
        },
        created_by_counselor: column_bool(row, "created_by_counselor")?,
        due_at: row.get("due_at")?,
        completed_at: row.get("completed_at")?,
        archived_at: row.get("archived_at")?,
        visible_to_student: column_bool(row, "visible_to_student")?,
        assigned_at: row.get("assigned_at")?,
    })
}
