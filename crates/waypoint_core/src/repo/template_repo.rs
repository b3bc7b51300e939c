//! Template catalog repository: roadmaps, meeting templates, agenda item
//! templates, task templates, and the links between them.
//!
//! # Responsibility
//! - Persist the read-mostly template graph.
//! - Resolve override identity queries (canonical vs counselor-owned task
//!   templates sharing a roadmap key).
//!
//! # Invariants
//! - Template list queries are deterministically ordered (`ord`, then `key`).
//! - Canonical/override uniqueness is enforced by partial unique indexes on
//!   `task_templates`; archived rows never participate.

use crate::model::roadmap::{
    AgendaItemTemplate, AgendaItemTemplateId, MeetingPhase, MeetingTemplate, MeetingTemplateId,
    Roadmap, RoadmapId, RoadmapKey,
};
use crate::model::student::CounselorId;
use crate::model::task::{SubmissionSettings, TaskTemplate, TaskTemplateId};
use crate::repo::{
    bool_to_int, column_bool, column_roadmap_key, column_uuid, column_uuid_opt, json_array_text,
    json_object_text, parse_json_array, parse_json_object, parse_string_array, string_array_text,
    RepoError, RepoResult,
};
use rusqlite::{params, params_from_iter, Connection, Row};

const TASK_TEMPLATE_SELECT_SQL: &str = "SELECT
    id,
    owner_id,
    roadmap_key,
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
    on_assign_tracker_update,
    on_complete_tracker_update,
    only_alter_tracker_values,
    archived_at
FROM task_templates";

/// Repository interface for the template catalog.
pub trait TemplateRepository {
    fn create_roadmap(&self, roadmap: &Roadmap) -> RepoResult<()>;
    fn get_roadmap(&self, id: RoadmapId) -> RepoResult<Option<Roadmap>>;
    fn list_roadmaps(&self) -> RepoResult<Vec<Roadmap>>;

    fn create_meeting_template(&self, template: &MeetingTemplate) -> RepoResult<()>;
    fn get_meeting_template(&self, id: MeetingTemplateId) -> RepoResult<Option<MeetingTemplate>>;
    /// Meeting templates of one roadmap, in timeline order.
    fn meeting_templates_for_roadmap(&self, roadmap_id: RoadmapId)
        -> RepoResult<Vec<MeetingTemplate>>;

    fn create_agenda_item_template(&self, template: &AgendaItemTemplate) -> RepoResult<()>;
    fn get_agenda_item_template(
        &self,
        id: AgendaItemTemplateId,
    ) -> RepoResult<Option<AgendaItemTemplate>>;
    /// Active agenda item templates of one meeting template, in order.
    fn agenda_item_templates_for_meeting_template(
        &self,
        meeting_template_id: MeetingTemplateId,
    ) -> RepoResult<Vec<AgendaItemTemplate>>;

    fn create_task_template(&self, template: &TaskTemplate) -> RepoResult<()>;
    fn update_task_template(&self, template: &TaskTemplate) -> RepoResult<()>;
    fn get_task_template(&self, id: TaskTemplateId) -> RepoResult<Option<TaskTemplate>>;
    /// Stamps `archived_at`, releasing the template's key for reuse.
    fn archive_task_template(&self, id: TaskTemplateId, now: i64) -> RepoResult<()>;

    /// The live catalog-owned template for a key, if any.
    fn find_canonical_template(&self, key: &RoadmapKey) -> RepoResult<Option<TaskTemplate>>;
    /// The live counselor-owned template for a key, if any.
    fn find_override_template(
        &self,
        owner_id: CounselorId,
        key: &RoadmapKey,
    ) -> RepoResult<Option<TaskTemplate>>;

    /// Attaches a task template to an agenda item template for one phase.
    fn link_task_template(
        &self,
        agenda_item_template_id: AgendaItemTemplateId,
        task_template_id: TaskTemplateId,
        phase: MeetingPhase,
    ) -> RepoResult<()>;

    /// Task templates hanging off any of the given agenda item templates,
    /// both phases, deduplicated.
    fn task_templates_for_agenda_item_templates(
        &self,
        agenda_item_template_ids: &[AgendaItemTemplateId],
    ) -> RepoResult<Vec<TaskTemplate>>;

    /// Task templates attached to one agenda item template for one phase.
    fn task_templates_for_agenda_item_template(
        &self,
        agenda_item_template_id: AgendaItemTemplateId,
        phase: MeetingPhase,
    ) -> RepoResult<Vec<TaskTemplate>>;

    /// Every task template reachable from a roadmap through its meeting and
    /// agenda item templates.
    fn task_templates_for_roadmap(&self, roadmap_id: RoadmapId) -> RepoResult<Vec<TaskTemplate>>;

    /// The meeting template a task template hangs off, when there is exactly
    /// one graph path to it.
    fn meeting_template_for_task_template(
        &self,
        task_template_id: TaskTemplateId,
    ) -> RepoResult<Option<MeetingTemplateId>>;
}

/// SQLite-backed template catalog repository.
#[derive(Clone, Copy)]
pub struct SqliteTemplateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTemplateRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TemplateRepository for SqliteTemplateRepository<'_> {
    fn create_roadmap(&self, roadmap: &Roadmap) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO roadmaps (id, title, description, category, active, repeatable)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                roadmap.id.to_string(),
                roadmap.title,
                roadmap.description,
                roadmap.category,
                bool_to_int(roadmap.active),
                bool_to_int(roadmap.repeatable),
            ],
        )?;
        Ok(())
    }

    fn get_roadmap(&self, id: RoadmapId) -> RepoResult<Option<Roadmap>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, category, active, repeatable
             FROM roadmaps
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(roadmap_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_roadmaps(&self) -> RepoResult<Vec<Roadmap>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, category, active, repeatable
             FROM roadmaps
             ORDER BY category ASC, title ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut roadmaps = Vec::new();
        while let Some(row) = rows.next()? {
            roadmaps.push(roadmap_from_row(row)?);
        }
        Ok(roadmaps)
    }

    fn create_meeting_template(&self, template: &MeetingTemplate) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO meeting_templates (
                id,
                roadmap_id,
                key,
                ord,
                title,
                grade,
                semester,
                create_when_applying_roadmap,
                use_agenda
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                template.id.to_string(),
                template.roadmap_id.map(|id| id.to_string()),
                template.key,
                template.order,
                template.title,
                template.grade,
                template.semester,
                bool_to_int(template.create_when_applying_roadmap),
                bool_to_int(template.use_agenda),
            ],
        )?;
        Ok(())
    }

    fn get_meeting_template(&self, id: MeetingTemplateId) -> RepoResult<Option<MeetingTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, roadmap_id, key, ord, title, grade, semester,
                    create_when_applying_roadmap, use_agenda
             FROM meeting_templates
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(meeting_template_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn meeting_templates_for_roadmap(
        &self,
        roadmap_id: RoadmapId,
    ) -> RepoResult<Vec<MeetingTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, roadmap_id, key, ord, title, grade, semester,
                    create_when_applying_roadmap, use_agenda
             FROM meeting_templates
             WHERE roadmap_id = ?1
             ORDER BY ord ASC, key ASC;",
        )?;
        let mut rows = stmt.query([roadmap_id.to_string()])?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next()? {
            templates.push(meeting_template_from_row(row)?);
        }
        Ok(templates)
    }

    fn create_agenda_item_template(&self, template: &AgendaItemTemplate) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO agenda_item_templates (
                id,
                meeting_template_id,
                key,
                ord,
                counselor_title,
                student_title,
                counselor_instructions,
                active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                template.id.to_string(),
                template.meeting_template_id.map(|id| id.to_string()),
                template.key,
                template.order,
                template.counselor_title,
                template.student_title,
                template.counselor_instructions,
                bool_to_int(template.active),
            ],
        )?;
        Ok(())
    }

    fn get_agenda_item_template(
        &self,
        id: AgendaItemTemplateId,
    ) -> RepoResult<Option<AgendaItemTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meeting_template_id, key, ord, counselor_title,
                    student_title, counselor_instructions, active
             FROM agenda_item_templates
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(agenda_item_template_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn agenda_item_templates_for_meeting_template(
        &self,
        meeting_template_id: MeetingTemplateId,
    ) -> RepoResult<Vec<AgendaItemTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meeting_template_id, key, ord, counselor_title,
                    student_title, counselor_instructions, active
             FROM agenda_item_templates
             WHERE meeting_template_id = ?1
               AND active = 1
             ORDER BY ord ASC, key ASC;",
        )?;
        let mut rows = stmt.query([meeting_template_id.to_string()])?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next()? {
            templates.push(agenda_item_template_from_row(row)?);
        }
        Ok(templates)
    }

    fn create_task_template(&self, template: &TaskTemplate) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO task_templates (
                id,
                owner_id,
                roadmap_key,
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
                on_assign_tracker_update,
                on_complete_tracker_update,
                only_alter_tracker_values,
                archived_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19);",
            params![
                template.id.to_string(),
                template.owner_id.map(|id| id.to_string()),
                template
                    .roadmap_key
                    .as_ref()
                    .map_or("", RoadmapKey::as_str),
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
                json_object_text(&template.on_assign_tracker_update),
                json_object_text(&template.on_complete_tracker_update),
                json_array_text(&template.only_alter_tracker_values),
                template.archived_at,
            ],
        )?;
        Ok(())
    }

    fn update_task_template(&self, template: &TaskTemplate) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE task_templates
             SET
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
                require_form = ?13,
                on_assign_tracker_update = ?14,
                on_complete_tracker_update = ?15,
                only_alter_tracker_values = ?16
             WHERE id = ?1;",
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
                json_object_text(&template.on_assign_tracker_update),
                json_object_text(&template.on_complete_tracker_update),
                json_array_text(&template.only_alter_tracker_values),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::not_found("task template", template.id));
        }
        Ok(())
    }

    fn get_task_template(&self, id: TaskTemplateId) -> RepoResult<Option<TaskTemplate>> {
        let sql = format!("{TASK_TEMPLATE_SELECT_SQL} WHERE id = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(task_template_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn archive_task_template(&self, id: TaskTemplateId, now: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE task_templates
             SET archived_at = ?2
             WHERE id = ?1
               AND archived_at IS NULL;",
            params![id.to_string(), now],
        )?;

        if changed == 0 {
            return Err(RepoError::not_found("task template", id));
        }
        Ok(())
    }

    fn find_canonical_template(&self, key: &RoadmapKey) -> RepoResult<Option<TaskTemplate>> {
        let sql = format!(
            "{TASK_TEMPLATE_SELECT_SQL}
             WHERE roadmap_key = ?1
               AND owner_id IS NULL
               AND archived_at IS NULL;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([key.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(task_template_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_override_template(
        &self,
        owner_id: CounselorId,
        key: &RoadmapKey,
    ) -> RepoResult<Option<TaskTemplate>> {
        let sql = format!(
            "{TASK_TEMPLATE_SELECT_SQL}
             WHERE roadmap_key = ?1
               AND owner_id = ?2
               AND archived_at IS NULL;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![key.as_str(), owner_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(task_template_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn link_task_template(
        &self,
        agenda_item_template_id: AgendaItemTemplateId,
        task_template_id: TaskTemplateId,
        phase: MeetingPhase,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO agenda_item_task_templates
                (agenda_item_template_id, task_template_id, phase)
             VALUES (?1, ?2, ?3);",
            params![
                agenda_item_template_id.to_string(),
                task_template_id.to_string(),
                phase.as_db_str(),
            ],
        )?;
        Ok(())
    }

    fn task_templates_for_agenda_item_templates(
        &self,
        agenda_item_template_ids: &[AgendaItemTemplateId],
    ) -> RepoResult<Vec<TaskTemplate>> {
        if agenda_item_template_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; agenda_item_template_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT tt.* FROM ({TASK_TEMPLATE_SELECT_SQL}) tt
             INNER JOIN agenda_item_task_templates link
                ON link.task_template_id = tt.id
             WHERE link.agenda_item_template_id IN ({placeholders})
             ORDER BY tt.roadmap_key ASC, tt.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids: Vec<String> = agenda_item_template_ids
            .iter()
            .map(|id| id.to_string())
            .collect();
        let mut rows = stmt.query(params_from_iter(ids))?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next()? {
            templates.push(task_template_from_row(row)?);
        }
        Ok(templates)
    }

    fn task_templates_for_agenda_item_template(
        &self,
        agenda_item_template_id: AgendaItemTemplateId,
        phase: MeetingPhase,
    ) -> RepoResult<Vec<TaskTemplate>> {
        let sql = format!(
            "SELECT tt.* FROM ({TASK_TEMPLATE_SELECT_SQL}) tt
             INNER JOIN agenda_item_task_templates link
                ON link.task_template_id = tt.id
             WHERE link.agenda_item_template_id = ?1
               AND link.phase = ?2
             ORDER BY tt.roadmap_key ASC, tt.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            agenda_item_template_id.to_string(),
            phase.as_db_str()
        ])?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next()? {
            templates.push(task_template_from_row(row)?);
        }
        Ok(templates)
    }

    fn task_templates_for_roadmap(&self, roadmap_id: RoadmapId) -> RepoResult<Vec<TaskTemplate>> {
        let sql = format!(
            "SELECT DISTINCT tt.* FROM ({TASK_TEMPLATE_SELECT_SQL}) tt
             INNER JOIN agenda_item_task_templates link
                ON link.task_template_id = tt.id
             INNER JOIN agenda_item_templates ait
                ON ait.id = link.agenda_item_template_id
             INNER JOIN meeting_templates mt
                ON mt.id = ait.meeting_template_id
             WHERE mt.roadmap_id = ?1
             ORDER BY tt.roadmap_key ASC, tt.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([roadmap_id.to_string()])?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next()? {
            templates.push(task_template_from_row(row)?);
        }
        Ok(templates)
    }

    fn meeting_template_for_task_template(
        &self,
        task_template_id: TaskTemplateId,
    ) -> RepoResult<Option<MeetingTemplateId>> {
        let mut stmt = self.conn.prepare(
            "SELECT ait.meeting_template_id
             FROM agenda_item_task_templates link
             INNER JOIN agenda_item_templates ait
                ON ait.id = link.agenda_item_template_id
             WHERE link.task_template_id = ?1
               AND ait.meeting_template_id IS NOT NULL
             ORDER BY ait.ord ASC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query([task_template_id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let value: String = row.get(0)?;
                Ok(Some(super::parse_uuid(
                    "agenda_item_templates.meeting_template_id",
                    &value,
                )?))
            }
            None => Ok(None),
        }
    }
}

fn roadmap_from_row(row: &Row<'_>) -> RepoResult<Roadmap> {
    Ok(Roadmap {
        id: column_uuid(row, "id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        category: row.get("category")?,
        active: column_bool(row, "active")?,
        repeatable: column_bool(row, "repeatable")?,
    })
}

fn meeting_template_from_row(row: &Row<'_>) -> RepoResult<MeetingTemplate> {
    Ok(MeetingTemplate {
        id: column_uuid(row, "id")?,
        roadmap_id: column_uuid_opt(row, "roadmap_id")?,
        key: row.get("key")?,
        order: row.get("ord")?,
        title: row.get("title")?,
        grade: row.get("grade")?,
        semester: row.get("semester")?,
        create_when_applying_roadmap: column_bool(row, "create_when_applying_roadmap")?,
        use_agenda: column_bool(row, "use_agenda")?,
    })
}

fn agenda_item_template_from_row(row: &Row<'_>) -> RepoResult<AgendaItemTemplate> {
    Ok(AgendaItemTemplate {
        id: column_uuid(row, "id")?,
        meeting_template_id: column_uuid_opt(row, "meeting_template_id")?,
        key: row.get("key")?,
        order: row.get("ord")?,
        counselor_title: row.get("counselor_title")?,
        student_title: row.get("student_title")?,
        counselor_instructions: row.get("counselor_instructions")?,
        active: column_bool(row, "active")?,
    })
}

pub(crate) fn task_template_from_row(row: &Row<'_>) -> RepoResult<TaskTemplate> {
    let task_type_text: String = row.get("task_type")?;
    let task_type = crate::model::task::TaskType::parse_db(&task_type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "unknown task type `{task_type_text}` in task_templates.task_type"
        ))
    })?;
    let resource_links_text: String = row.get("resource_links")?;
    let on_assign_text: String = row.get("on_assign_tracker_update")?;
    let on_complete_text: String = row.get("on_complete_tracker_update")?;
    let only_alter_text: String = row.get("only_alter_tracker_values")?;

    Ok(TaskTemplate {
        id: column_uuid(row, "id")?,
        owner_id: column_uuid_opt(row, "owner_id")?,
        roadmap_key: column_roadmap_key(row, "roadmap_key")?,
        task_type,
        title: row.get("title")?,
        description: row.get("description")?,
        resource_links: parse_string_array("task_templates.resource_links", &resource_links_text)?,
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
        on_assign_tracker_update: parse_json_object(
            "task_templates.on_assign_tracker_update",
            &on_assign_text,
        )?,
        on_complete_tracker_update: parse_json_object(
            "task_templates.on_complete_tracker_update",
            &on_complete_text,
        )?,
        only_alter_tracker_values: parse_json_array(
            "task_templates.only_alter_tracker_values",
            &only_alter_text,
        )?,
        archived_at: row.get("archived_at")?,
    })
}
