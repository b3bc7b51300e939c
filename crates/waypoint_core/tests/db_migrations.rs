use rusqlite::Connection;
use waypoint_core::db::migrations::latest_version;
use waypoint_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "counselors");
    assert_table_exists(&conn, "students");
    assert_table_exists(&conn, "roadmaps");
    assert_table_exists(&conn, "applied_roadmaps");
    assert_table_exists(&conn, "meeting_templates");
    assert_table_exists(&conn, "agenda_item_templates");
    assert_table_exists(&conn, "task_templates");
    assert_table_exists(&conn, "agenda_item_task_templates");
    assert_table_exists(&conn, "meetings");
    assert_table_exists(&conn, "agenda_items");
    assert_table_exists(&conn, "tasks");
    assert_table_exists(&conn, "task_meetings");
    assert_table_exists(&conn, "student_trackers");
    assert_table_exists(&conn, "task_trackers");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("waypoint.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "roadmaps");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn live_canonical_templates_enforce_unique_keys() {
    let conn = open_db_in_memory().unwrap();

    insert_template(&conn, "t1", None, "essay.common-app", None).unwrap();
    // A second live canonical row with the same key violates the index.
    insert_template(&conn, "t2", None, "essay.common-app", None).unwrap_err();
    // Archiving the first releases the key.
    conn.execute("UPDATE task_templates SET archived_at = 100 WHERE id = 't1';", [])
        .unwrap();
    insert_template(&conn, "t3", None, "essay.common-app", None).unwrap();
}

#[test]
fn override_keys_are_unique_per_owner() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO counselors (id, name) VALUES ('c1', 'A'), ('c2', 'B');",
        [],
    )
    .unwrap();

    insert_template(&conn, "t1", Some("c1"), "essay.common-app", None).unwrap();
    insert_template(&conn, "t2", Some("c1"), "essay.common-app", None).unwrap_err();
    // Another counselor can hold their own override for the same key.
    insert_template(&conn, "t3", Some("c2"), "essay.common-app", None).unwrap();
}

fn insert_template(
    conn: &Connection,
    id: &str,
    owner_id: Option<&str>,
    key: &str,
    archived_at: Option<i64>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO task_templates (id, owner_id, roadmap_key, title, archived_at)
         VALUES (?1, ?2, ?3, 'Essay', ?4);",
        rusqlite::params![id, owner_id, key, archived_at],
    )
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
