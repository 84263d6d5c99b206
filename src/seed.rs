//! Workspace seed snapshot.
//!
//! A JSON file with the last-known-good hierarchy. The sync controller uses
//! it as the initial fallback for every slice, and the CLI serves reads from
//! it through [`SeedBackend`] when no live backend is wired in.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendResult, ProjectQuery, StepQuery, SubtaskQuery};
use crate::progress;
use crate::types::{
    Attachment, Category, Characteristic, KpiReport, Pm, Project, Step, Subtask,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeedSnapshot {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub pms: Vec<Pm>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

impl SeedSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot '{}'", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse snapshot '{}'", path.display()))
    }

    /// Missing file reads as an empty snapshot; any other failure is real.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("invalid snapshot path '{}'", path.display()))?;
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create snapshot directory '{}'", parent.display())
        })?;

        let contents =
            serde_json::to_string_pretty(self).context("failed to serialize snapshot")?;

        let file_name = path
            .file_name()
            .with_context(|| format!("invalid snapshot file name '{}'", path.display()))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!("failed to write temporary snapshot '{}'", tmp_path.display())
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename snapshot '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }

    fn max_id(&self) -> i64 {
        let mut max = 0;
        for category in &self.categories {
            max = max.max(category.id);
        }
        for pm in &self.pms {
            max = max.max(pm.id);
        }
        for project in &self.projects {
            max = max.max(project.id);
            for attachment in &project.attachments {
                max = max.max(attachment.id);
            }
            for characteristic in &project.characteristics {
                max = max.max(characteristic.id);
            }
            for step in &project.steps {
                max = max.max(step.id);
                for attachment in &step.attachments {
                    max = max.max(attachment.id);
                }
                for subtask in &step.subtasks {
                    max = max.max(subtask.id);
                }
            }
        }
        max
    }
}

/// Backend that serves reads from a seed snapshot and confirms writes by
/// echoing them back with a freshly assigned id. Lets the CLI and the
/// controller run end-to-end with no live service.
pub struct SeedBackend {
    snapshot: SeedSnapshot,
    next_id: AtomicI64,
}

impl SeedBackend {
    pub fn new(snapshot: SeedSnapshot) -> Self {
        let next_id = AtomicI64::new(snapshot.max_id() + 1);
        Self { snapshot, next_id }
    }

    fn assign_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn scoped_projects(&self, category_id: Option<i64>) -> Vec<Project> {
        self.snapshot
            .projects
            .iter()
            .filter(|project| category_id.is_none_or(|id| project.category_id == id))
            .cloned()
            .collect()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl Backend for SeedBackend {
    async fn list_categories(&self) -> BackendResult<Vec<Category>> {
        Ok(self.snapshot.categories.clone())
    }

    async fn create_category(&self, name: &str) -> BackendResult<Category> {
        Ok(Category {
            id: self.assign_id(),
            name: name.to_string(),
        })
    }

    async fn delete_category(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn list_pms(&self) -> BackendResult<Vec<Pm>> {
        Ok(self.snapshot.pms.clone())
    }

    async fn list_projects(&self, query: &ProjectQuery) -> BackendResult<Vec<Project>> {
        Ok(self
            .scoped_projects(query.category_id)
            .into_iter()
            .filter(|project| {
                query.owner_id.is_none_or(|id| project.owner_id == Some(id))
                    && query.status.is_none_or(|status| project.status == status)
                    && query.search.as_deref().is_none_or(|term| {
                        contains_ci(&project.name, term)
                            || project
                                .code
                                .as_deref()
                                .is_some_and(|code| contains_ci(code, term))
                    })
            })
            .collect())
    }

    async fn create_project(&self, project: &Project) -> BackendResult<Project> {
        let mut confirmed = project.clone();
        confirmed.id = self.assign_id();
        Ok(confirmed)
    }

    async fn update_project(&self, project: &Project) -> BackendResult<Project> {
        Ok(project.clone())
    }

    async fn delete_project(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn list_steps(&self, query: &StepQuery) -> BackendResult<Vec<Step>> {
        let steps = self
            .snapshot
            .projects
            .iter()
            .find(|project| project.id == query.project_id)
            .map(|project| project.steps.clone())
            .unwrap_or_default();
        Ok(steps
            .into_iter()
            .filter(|step| {
                query
                    .assignee_id
                    .is_none_or(|id| step.assignee_id == Some(id))
                    && query.status.is_none_or(|status| step.status == status)
                    && query.search.as_deref().is_none_or(|term| {
                        contains_ci(&step.name, term)
                            || step
                                .description
                                .as_deref()
                                .is_some_and(|description| contains_ci(description, term))
                    })
            })
            .collect())
    }

    async fn create_step(&self, step: &Step) -> BackendResult<Step> {
        let mut confirmed = step.clone();
        confirmed.id = self.assign_id();
        Ok(confirmed)
    }

    async fn update_step(&self, step: &Step) -> BackendResult<Step> {
        Ok(step.clone())
    }

    async fn delete_step(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn reorder_steps(&self, _project_id: i64, _ids: &[i64]) -> BackendResult<()> {
        Ok(())
    }

    async fn list_subtasks(&self, query: &SubtaskQuery) -> BackendResult<Vec<Subtask>> {
        let subtasks = self
            .snapshot
            .projects
            .iter()
            .flat_map(|project| project.steps.iter())
            .find(|step| step.id == query.step_id)
            .map(|step| step.subtasks.clone())
            .unwrap_or_default();
        Ok(subtasks
            .into_iter()
            .filter(|subtask| {
                query
                    .assignee_id
                    .is_none_or(|id| subtask.assignee_id == Some(id))
                    && query.status.is_none_or(|status| subtask.status == status)
                    && query
                        .search
                        .as_deref()
                        .is_none_or(|term| contains_ci(&subtask.name, term))
            })
            .collect())
    }

    async fn create_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask> {
        let mut confirmed = subtask.clone();
        confirmed.id = self.assign_id();
        Ok(confirmed)
    }

    async fn update_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask> {
        Ok(subtask.clone())
    }

    async fn delete_subtask(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn create_attachment(&self, attachment: &Attachment) -> BackendResult<Attachment> {
        let mut confirmed = attachment.clone();
        confirmed.id = self.assign_id();
        Ok(confirmed)
    }

    async fn delete_attachment(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn create_characteristic(
        &self,
        characteristic: &Characteristic,
    ) -> BackendResult<Characteristic> {
        let mut confirmed = characteristic.clone();
        confirmed.id = self.assign_id();
        Ok(confirmed)
    }

    async fn delete_characteristic(&self, _id: i64) -> BackendResult<()> {
        Ok(())
    }

    async fn kpi_report(&self, category_id: Option<i64>) -> BackendResult<KpiReport> {
        Ok(progress::local_kpi(&self.scoped_projects(category_id)))
    }

    async fn workspace_path(&self) -> BackendResult<String> {
        Ok(self.snapshot.workspace_path.clone().unwrap_or_default())
    }

    async fn set_workspace_path(&self, path: &str) -> BackendResult<String> {
        Ok(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProjectMetrics, ProjectStatus, TaskStatus};

    fn sample_snapshot() -> SeedSnapshot {
        SeedSnapshot {
            categories: vec![Category {
                id: 1,
                name: "Kitchen".to_string(),
            }],
            pms: vec![Pm {
                id: 2,
                name: "Anna".to_string(),
            }],
            projects: vec![Project {
                id: 3,
                category_id: 1,
                name: "Oven 9000".to_string(),
                code: Some("OV-9".to_string()),
                status: ProjectStatus::Active,
                owner_id: Some(2),
                start_date: None,
                target_date: None,
                description: None,
                moq: None,
                base_price: None,
                retail_price: None,
                cover_image: None,
                media_path: None,
                in_progress_coeff: 0.5,
                steps: vec![Step {
                    id: 4,
                    project_id: 3,
                    name: "Design".to_string(),
                    description: None,
                    status: TaskStatus::InProgress,
                    assignee_id: None,
                    start_date: None,
                    target_date: None,
                    completed_date: None,
                    weight: 1.0,
                    order_index: 1,
                    comments: None,
                    subtasks: vec![Subtask {
                        id: 5,
                        step_id: 4,
                        name: "Layout".to_string(),
                        status: TaskStatus::Done,
                        assignee_id: None,
                        target_date: None,
                        completed_date: None,
                        weight: 2.0,
                        order_index: 1,
                        comment: None,
                    }],
                    attachments: Vec::new(),
                    progress: 0,
                }],
                characteristics: Vec::new(),
                attachments: Vec::new(),
                progress: 0,
                metrics: ProjectMetrics::default(),
            }],
            workspace_path: Some("/srv/tracker".to_string()),
        }
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("nested").join("snapshot.json");

        let snapshot = sample_snapshot();
        snapshot.save(&path).expect("snapshot should save");
        let loaded = SeedSnapshot::load(&path).expect("snapshot should load");

        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_snapshot_wire_form_uses_status_strings() {
        let json = serde_json::to_string(&sample_snapshot()).expect("snapshot should serialize");
        assert!(json.contains("\"in_progress\""));
        assert!(json.contains("\"active\""));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let snapshot = SeedSnapshot::load_or_default(&dir.path().join("absent.json"))
            .expect("missing file should read as empty");
        assert_eq!(snapshot, SeedSnapshot::default());
    }

    #[tokio::test]
    async fn test_seed_backend_filters_projects() {
        let backend = SeedBackend::new(sample_snapshot());

        let by_search = backend
            .list_projects(&ProjectQuery {
                search: Some("ov-9".to_string()),
                ..ProjectQuery::default()
            })
            .await
            .expect("seed backend reads are infallible");
        assert_eq!(by_search.len(), 1);

        let by_owner = backend
            .list_projects(&ProjectQuery {
                owner_id: Some(99),
                ..ProjectQuery::default()
            })
            .await
            .expect("seed backend reads are infallible");
        assert!(by_owner.is_empty());
    }

    #[tokio::test]
    async fn test_seed_backend_assigns_ids_above_snapshot_max() {
        let snapshot = sample_snapshot();
        let backend = SeedBackend::new(snapshot.clone());

        let category = backend
            .create_category("Laundry")
            .await
            .expect("create echoes back");
        assert!(category.id > 5);

        let mut subtask = snapshot.projects[0].steps[0].subtasks[0].clone();
        subtask.id = -1;
        let confirmed = backend
            .create_subtask(&subtask)
            .await
            .expect("create echoes back");
        assert!(confirmed.id > category.id);
    }

    #[tokio::test]
    async fn test_seed_backend_kpi_scopes_by_category() {
        let backend = SeedBackend::new(sample_snapshot());

        let report = backend
            .kpi_report(Some(1))
            .await
            .expect("seed backend reads are infallible");
        assert_eq!(report.total_projects, 1);

        let empty = backend
            .kpi_report(Some(42))
            .await
            .expect("seed backend reads are infallible");
        assert_eq!(empty.total_projects, 0);
    }
}
