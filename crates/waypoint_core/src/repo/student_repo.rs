//! Student-side repository: counselors, students, applied roadmaps, and
//! trackers.
//!
//! # Responsibility
//! - Persist people rows and the per-student applied-roadmap ledger.
//! - Persist student trackers and their task links.
//!
//! # Invariants
//! - Applying the same roadmap twice is a no-op at the storage level
//!   (`INSERT OR IGNORE`); the service layer decides whether that is an
//!   error.
//! - Tracker values are stored as one JSON object per tracker.

use crate::model::student::{
    Counselor, CounselorId, Student, StudentId, StudentTracker, TrackerId,
};
use crate::model::task::TaskId;
use crate::repo::{
    bool_to_int, column_bool, column_uuid, column_uuid_opt, json_object_text, parse_json_object,
    parse_uuid, RepoError, RepoResult,
};
use rusqlite::{params, Connection, Row};

/// Repository interface for students, counselors, and trackers.
pub trait StudentRepository {
    fn create_counselor(&self, counselor: &Counselor) -> RepoResult<()>;
    fn get_counselor(&self, id: CounselorId) -> RepoResult<Option<Counselor>>;

    fn create_student(&self, student: &Student) -> RepoResult<()>;
    fn get_student(&self, id: StudentId) -> RepoResult<Option<Student>>;
    fn update_student(&self, student: &Student) -> RepoResult<()>;

    /// Records a roadmap as applied. Returns `false` when it already was.
    fn add_applied_roadmap(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
        now: i64,
    ) -> RepoResult<bool>;
    fn remove_applied_roadmap(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
    ) -> RepoResult<bool>;
    fn roadmap_is_applied(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
    ) -> RepoResult<bool>;
    fn applied_roadmaps(
        &self,
        student_id: StudentId,
    ) -> RepoResult<Vec<crate::model::roadmap::RoadmapId>>;

    fn create_tracker(&self, tracker: &StudentTracker) -> RepoResult<()>;
    fn get_tracker(&self, id: TrackerId) -> RepoResult<Option<StudentTracker>>;
    fn update_tracker_values(&self, tracker: &StudentTracker) -> RepoResult<()>;
    fn link_task_tracker(&self, task_id: TaskId, tracker_id: TrackerId) -> RepoResult<()>;
    fn trackers_for_task(&self, task_id: TaskId) -> RepoResult<Vec<StudentTracker>>;
}

/// SQLite-backed student repository.
#[derive(Clone, Copy)]
pub struct SqliteStudentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStudentRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl StudentRepository for SqliteStudentRepository<'_> {
    fn create_counselor(&self, counselor: &Counselor) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO counselors (id, name) VALUES (?1, ?2);",
            params![counselor.id.to_string(), counselor.name],
        )?;
        Ok(())
    }

    fn get_counselor(&self, id: CounselorId) -> RepoResult<Option<Counselor>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM counselors WHERE id = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Counselor {
                id: column_uuid(row, "id")?,
                name: row.get("name")?,
            })),
            None => Ok(None),
        }
    }

    fn create_student(&self, student: &Student) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO students (id, name, counselor_id, has_parent)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                student.id.to_string(),
                student.name,
                student.counselor_id.map(|id| id.to_string()),
                bool_to_int(student.has_parent),
            ],
        )?;
        Ok(())
    }

    fn get_student(&self, id: StudentId) -> RepoResult<Option<Student>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, counselor_id, has_parent
             FROM students
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(student_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn update_student(&self, student: &Student) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE students
             SET name = ?2, counselor_id = ?3, has_parent = ?4
             WHERE id = ?1;",
            params![
                student.id.to_string(),
                student.name,
                student.counselor_id.map(|id| id.to_string()),
                bool_to_int(student.has_parent),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::not_found("student", student.id));
        }
        Ok(())
    }

    fn add_applied_roadmap(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
        now: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO applied_roadmaps (student_id, roadmap_id, applied_at)
             VALUES (?1, ?2, ?3);",
            params![student_id.to_string(), roadmap_id.to_string(), now],
        )?;
        Ok(changed > 0)
    }

    fn remove_applied_roadmap(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM applied_roadmaps WHERE student_id = ?1 AND roadmap_id = ?2;",
            params![student_id.to_string(), roadmap_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn roadmap_is_applied(
        &self,
        student_id: StudentId,
        roadmap_id: crate::model::roadmap::RoadmapId,
    ) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM applied_roadmaps
                WHERE student_id = ?1 AND roadmap_id = ?2
            );",
            params![student_id.to_string(), roadmap_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn applied_roadmaps(
        &self,
        student_id: StudentId,
    ) -> RepoResult<Vec<crate::model::roadmap::RoadmapId>> {
        let mut stmt = self.conn.prepare(
            "SELECT roadmap_id
             FROM applied_roadmaps
             WHERE student_id = ?1
             ORDER BY applied_at ASC, roadmap_id ASC;",
        )?;
        let mut rows = stmt.query([student_id.to_string()])?;
        let mut roadmap_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            roadmap_ids.push(parse_uuid("applied_roadmaps.roadmap_id", &value)?);
        }
        Ok(roadmap_ids)
    }

    fn create_tracker(&self, tracker: &StudentTracker) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO student_trackers (id, student_id, name, tracked_values)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                tracker.id.to_string(),
                tracker.student_id.to_string(),
                tracker.name,
                json_object_text(&tracker.values),
            ],
        )?;
        Ok(())
    }

    fn get_tracker(&self, id: TrackerId) -> RepoResult<Option<StudentTracker>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, name, tracked_values
             FROM student_trackers
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(tracker_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn update_tracker_values(&self, tracker: &StudentTracker) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE student_trackers SET tracked_values = ?2 WHERE id = ?1;",
            params![tracker.id.to_string(), json_object_text(&tracker.values)],
        )?;

        if changed == 0 {
            return Err(RepoError::not_found("student tracker", tracker.id));
        }
        Ok(())
    }

    fn link_task_tracker(&self, task_id: TaskId, tracker_id: TrackerId) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO task_trackers (task_id, tracker_id) VALUES (?1, ?2);",
            params![task_id.to_string(), tracker_id.to_string()],
        )?;
        Ok(())
    }

    fn trackers_for_task(&self, task_id: TaskId) -> RepoResult<Vec<StudentTracker>> {
        let mut stmt = self.conn.prepare(
            "SELECT st.id, st.student_id, st.name, st.tracked_values
             FROM task_trackers tt
             INNER JOIN student_trackers st ON st.id = tt.tracker_id
             WHERE tt.task_id = ?1
             ORDER BY st.name ASC, st.id ASC;",
        )?;
        let mut rows = stmt.query([task_id.to_string()])?;
        let mut trackers = Vec::new();
        while let Some(row) = rows.next()? {
            trackers.push(tracker_from_row(row)?);
        }
        Ok(trackers)
    }
}

fn student_from_row(row: &Row<'_>) -> RepoResult<Student> {
    Ok(Student {
        id: column_uuid(row, "id")?,
        name: row.get("name")?,
        counselor_id: column_uuid_opt(row, "counselor_id")?,
        has_parent: column_bool(row, "has_parent")?,
    })
}

fn tracker_from_row(row: &Row<'_>) -> RepoResult<StudentTracker> {
    let values_text: String = row.get("tracked_values")?;
    Ok(StudentTracker {
        id: column_uuid(row, "id")?,
        student_id: column_uuid(row, "student_id")?,
        name: row.get("name")?,
        values: parse_json_object("student_trackers.tracked_values", &values_text)?,
    })
}
