//! Backend collaborator surface.
//!
//! Storage, transport, and authentication live behind this trait; the core
//! only sees request/response pairs and treats every call as fallible with
//! arbitrary latency. Read filters carry the residual plain-text term from
//! the query tokenizer plus the structured predicates, never the raw user
//! input.

use thiserror::Error;

use crate::types::{
    Attachment, Category, Characteristic, KpiReport, Pm, Project, ProjectStatus, Step, Subtask,
    TaskStatus,
};

/// Backend unreachable, non-2xx, timeout - the core does not distinguish.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: String,
    pub message: String,
}

impl TransportError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectQuery {
    pub category_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub status: Option<ProjectStatus>,
    /// Residual plain-text term only.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepQuery {
    pub project_id: i64,
    pub assignee_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtaskQuery {
    pub step_id: i64,
    pub assignee_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub search: Option<String>,
}

/// Conceptual CRUD surface of the remote service. Create calls receive the
/// optimistic entity (temporary negative id included) and return the
/// authoritative one.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn list_categories(&self) -> BackendResult<Vec<Category>>;
    async fn create_category(&self, name: &str) -> BackendResult<Category>;
    async fn delete_category(&self, id: i64) -> BackendResult<()>;

    async fn list_pms(&self) -> BackendResult<Vec<Pm>>;

    async fn list_projects(&self, query: &ProjectQuery) -> BackendResult<Vec<Project>>;
    async fn create_project(&self, project: &Project) -> BackendResult<Project>;
    async fn update_project(&self, project: &Project) -> BackendResult<Project>;
    async fn delete_project(&self, id: i64) -> BackendResult<()>;

    async fn list_steps(&self, query: &StepQuery) -> BackendResult<Vec<Step>>;
    async fn create_step(&self, step: &Step) -> BackendResult<Step>;
    async fn update_step(&self, step: &Step) -> BackendResult<Step>;
    async fn delete_step(&self, id: i64) -> BackendResult<()>;
    async fn reorder_steps(&self, project_id: i64, ids: &[i64]) -> BackendResult<()>;

    async fn list_subtasks(&self, query: &SubtaskQuery) -> BackendResult<Vec<Subtask>>;
    async fn create_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask>;
    async fn update_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask>;
    async fn delete_subtask(&self, id: i64) -> BackendResult<()>;

    async fn create_attachment(&self, attachment: &Attachment) -> BackendResult<Attachment>;
    async fn delete_attachment(&self, id: i64) -> BackendResult<()>;

    async fn create_characteristic(
        &self,
        characteristic: &Characteristic,
    ) -> BackendResult<Characteristic>;
    async fn delete_characteristic(&self, id: i64) -> BackendResult<()>;

    async fn kpi_report(&self, category_id: Option<i64>) -> BackendResult<KpiReport>;

    async fn workspace_path(&self) -> BackendResult<String>;
    async fn set_workspace_path(&self, path: &str) -> BackendResult<String>;
}
