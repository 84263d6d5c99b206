use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_WEIGHT: f64 = 1.0;
pub const DEFAULT_IN_PROGRESS_COEFF: f64 = 0.5;

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

fn default_coeff() -> f64 {
    DEFAULT_IN_PROGRESS_COEFF
}

/// Status of a Step or Subtask. Blocked is a reporting distinction only; it
/// earns no progress credit, same as Todo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Done
    }

    pub fn is_blocking(self) -> bool {
        self == TaskStatus::Blocked
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            _ => Err(()),
        }
    }
}

/// Directory record for a project manager. Referenced by id from
/// `Project::owner_id` and `Step`/`Subtask::assignee_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Pm {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// File reference owned by exactly one project or one step.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Attachment {
    pub id: i64,
    pub path: String,
    pub added_at: Option<NaiveDate>,
    pub project_id: Option<i64>,
    pub step_id: Option<i64>,
}

/// Free-form key/value row on a project. Never computed over.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Characteristic {
    pub id: i64,
    pub project_id: i64,
    pub parameter: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: i64,
    pub step_id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub assignee_id: Option<i64>,
    pub target_date: Option<NaiveDate>,
    pub completed_date: Option<NaiveDate>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub order_index: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assignee_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completed_date: Option<NaiveDate>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub order_index: i64,
    pub comments: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Derived from `subtasks` by the aggregator. The value carried by a
    /// backend response is advisory and may be stale.
    #[serde(default)]
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub code: Option<String>,
    pub status: ProjectStatus,
    pub owner_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub moq: Option<f64>,
    pub base_price: Option<f64>,
    pub retail_price: Option<f64>,
    pub cover_image: Option<String>,
    pub media_path: Option<String>,
    /// Credit earned by an in-progress item when rolling up, shared by the
    /// project and every step under it.
    #[serde(default = "default_coeff")]
    pub in_progress_coeff: f64,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Derived from `steps` by the aggregator; advisory when it arrives from
    /// the backend.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub metrics: ProjectMetrics,
}

/// Step/subtask completion counts rolled up per project.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProjectMetrics {
    pub steps_total: usize,
    pub steps_done: usize,
    pub subtasks_total: usize,
    pub subtasks_done: usize,
}

/// Aggregate shape returned by the backend KPI endpoint, and recomputed
/// locally from cached projects when that endpoint is unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KpiReport {
    pub total_projects: usize,
    pub active_projects: usize,
    pub archived_projects: usize,
    pub average_progress: f64,
    pub steps_total: usize,
    pub steps_done: usize,
    pub subtasks_total: usize,
    pub subtasks_done: usize,
}

/// Boundary check for user-authored weights. The aggregator separately
/// substitutes 1.0 for any non-conforming weight that slips through via a
/// backend response.
pub fn validate_weight(weight: f64) -> Result<f64, Error> {
    if weight.is_finite() && weight > 0.0 {
        Ok(weight)
    } else {
        Err(Error::validation(
            "weight",
            format!("must be a positive number, got {weight}"),
        ))
    }
}

/// Boundary check for the in-progress coefficient: non-finite input is
/// rejected, finite input is clamped into [0, 1].
pub fn validate_coeff(coeff: f64) -> Result<f64, Error> {
    if coeff.is_finite() {
        Ok(coeff.clamp(0.0, 1.0))
    } else {
        Err(Error::validation(
            "in_progress_coeff",
            format!("must be a finite number, got {coeff}"),
        ))
    }
}

pub fn validate_name(name: &str) -> Result<String, Error> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(Error::validation("name", "cannot be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

/// An attachment belongs to exactly one project or exactly one step.
pub fn validate_attachment_owner(
    project_id: Option<i64>,
    step_id: Option<i64>,
) -> Result<(), Error> {
    match (project_id, step_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        (Some(_), Some(_)) => Err(Error::validation(
            "attachment",
            "cannot belong to both a project and a step",
        )),
        (None, None) => Err(Error::validation(
            "attachment",
            "must belong to a project or a step",
        )),
    }
}
