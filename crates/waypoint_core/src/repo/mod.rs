//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the template
//!   catalog, students, meetings, and tasks.
//! - Isolate SQL details from service orchestration.
//!
//! # Invariants
//! - Repositories never open transactions; the caller wraps multi-write
//!   operations in `db::unit_of_work`.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::roadmap::{RoadmapKey, RoadmapKeyError};
use rusqlite::Row;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod meeting_repo;
pub mod student_repo;
pub mod task_repo;
pub mod template_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound { entity: &'static str, id: Uuid },
    InvalidData(String),
}

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RoadmapKeyError> for RepoError {
    fn from(value: RoadmapKeyError) -> Self {
        Self::InvalidData(format!("{value}"))
    }
}

pub(crate) fn parse_uuid(column: &'static str, value: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn column_uuid(row: &Row<'_>, column: &'static str) -> RepoResult<Uuid> {
    let value: String = row.get(column)?;
    parse_uuid(column, &value)
}

pub(crate) fn column_uuid_opt(row: &Row<'_>, column: &'static str) -> RepoResult<Option<Uuid>> {
    let value: Option<String> = row.get(column)?;
    value.map(|v| parse_uuid(column, &v)).transpose()
}

pub(crate) fn column_bool(row: &Row<'_>, column: &'static str) -> RepoResult<bool> {
    let value: i64 = row.get(column)?;
    Ok(value != 0)
}

pub(crate) fn column_roadmap_key(
    row: &Row<'_>,
    column: &'static str,
) -> RepoResult<Option<RoadmapKey>> {
    let value: String = row.get(column)?;
    Ok(RoadmapKey::from_storage(&value)?)
}

pub(crate) fn parse_json_object(
    column: &'static str,
    value: &str,
) -> RepoResult<Map<String, Value>> {
    match serde_json::from_str(value) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(RepoError::InvalidData(format!(
            "expected JSON object in {column}"
        ))),
    }
}

pub(crate) fn parse_json_array(column: &'static str, value: &str) -> RepoResult<Vec<Value>> {
    match serde_json::from_str(value) {
        Ok(Value::Array(items)) => Ok(items),
        _ => Err(RepoError::InvalidData(format!(
            "expected JSON array in {column}"
        ))),
    }
}

pub(crate) fn parse_string_array(column: &'static str, value: &str) -> RepoResult<Vec<String>> {
    let items = parse_json_array(column, value)?;
    items
        .into_iter()
        .map(|item| match item {
            Value::String(text) => Ok(text),
            _ => Err(RepoError::InvalidData(format!(
                "expected string entries in {column}"
            ))),
        })
        .collect()
}

pub(crate) fn json_object_text(map: &Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}

pub(crate) fn json_array_text(items: &[Value]) -> String {
    Value::Array(items.to_vec()).to_string()
}

pub(crate) fn string_array_text(items: &[String]) -> String {
    Value::Array(items.iter().cloned().map(Value::String).collect()).to_string()
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}
