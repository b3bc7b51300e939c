//! Counselor override resolution for task templates.
//!
//! # Responsibility
//! - Resolve which task template actually applies to a student.
//! - Manage the override lifecycle: creating one resyncs the counselor's
//!   students onto it, removing one resyncs them back to the canonical.
//!
//! # Invariants
//! - Only canonical, keyed templates are subject to substitution; override
//!   and keyless templates always resolve to themselves.
//! - Resync only ever touches incomplete tasks.

use crate::model::student::Student;
use crate::model::task::TaskTemplate;
use crate::repo::task_repo::TaskRepository;
use crate::repo::template_repo::TemplateRepository;
use crate::repo::{RepoError, RepoResult};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for override management.
#[derive(Debug)]
pub enum OverrideError {
    /// Override templates must carry an owner.
    MissingOwner,
    /// Override templates must carry a roadmap key.
    MissingKey,
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for OverrideError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOwner => write!(f, "override template has no owner"),
            Self::MissingKey => write!(f, "override template has no roadmap key"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OverrideError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for OverrideError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<crate::db::DbError> for OverrideError {
    fn from(value: crate::db::DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

/// Resolves the template that actually applies when instantiating `template`
/// for `student`.
///
/// Substitution happens only when the template is canonical and keyed and
/// the student has a counselor holding a live override for that key. In
/// every other case the original template is returned unchanged.
pub fn effective_template<T: TemplateRepository>(
    templates: &T,
    student: &Student,
    template: &TaskTemplate,
) -> RepoResult<TaskTemplate> {
    if !template.is_canonical() {
        return Ok(template.clone());
    }
    let (Some(key), Some(counselor_id)) = (&template.roadmap_key, student.counselor_id) else {
        return Ok(template.clone());
    };

    match templates.find_override_template(counselor_id, key)? {
        Some(override_template) => Ok(override_template),
        None => Ok(template.clone()),
    }
}

/// Manages counselor override templates.
pub struct TemplateResolver<T: TemplateRepository, K: TaskRepository> {
    templates: T,
    tasks: K,
}

impl<T: TemplateRepository, K: TaskRepository> TemplateResolver<T, K> {
    pub fn new(templates: T, tasks: K) -> Self {
        Self { templates, tasks }
    }

    /// Registers `template` as a counselor override, creating it or saving
    /// the edit, and resyncs the owner's students' incomplete tasks onto it.
    /// Returns the number of tasks resynced.
    ///
    /// # Side effects
    /// - Emits `override_apply` logging events.
    pub fn apply_override(&self, template: &TaskTemplate) -> Result<usize, OverrideError> {
        let owner_id = template.owner_id.ok_or(OverrideError::MissingOwner)?;
        if template.roadmap_key.is_none() {
            return Err(OverrideError::MissingKey);
        }

        if self.templates.get_task_template(template.id)?.is_some() {
            self.templates.update_task_template(template)?;
        } else {
            self.templates.create_task_template(template)?;
        }
        let resynced = self
            .tasks
            .resync_incomplete_tasks_to_template(template, owner_id)?;

        info!(
            "event=override_apply module=service status=ok template_id={} owner_id={owner_id} resynced={resynced}",
            template.id
        );
        Ok(resynced)
    }

    /// Archives an override and resyncs affected incomplete tasks back to
    /// the canonical template for the key, when one exists. Returns the
    /// number of tasks resynced.
    ///
    /// # Side effects
    /// - Emits `override_remove` logging events.
    pub fn remove_override(
        &self,
        override_template: &TaskTemplate,
        now: i64,
    ) -> Result<usize, OverrideError> {
        let owner_id = override_template
            .owner_id
            .ok_or(OverrideError::MissingOwner)?;
        let key = override_template
            .roadmap_key
            .as_ref()
            .ok_or(OverrideError::MissingKey)?;

        self.templates
            .archive_task_template(override_template.id, now)?;

        let resynced = match self.templates.find_canonical_template(key)? {
            Some(canonical) => self
                .tasks
                .resync_incomplete_tasks_to_template(&canonical, owner_id)?,
            // No canonical to fall back to; existing tasks keep the
            // archived override's configuration.
            None => 0,
        };

        info!(
            "event=override_remove module=service status=ok template_id={} owner_id={owner_id} resynced={resynced}",
            override_template.id
        );
        Ok(resynced)
    }
}
