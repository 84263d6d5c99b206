//! Resilient sync between the in-memory hierarchy and the backend.
//!
//! Each hierarchy slice (categories, projects of the selected category,
//! steps of the selected project, subtasks of the selected step) runs its own
//! load state machine; see [`slice::Slice`]. Reads degrade to the
//! last-known-good snapshot behind an advisory. Mutations apply to the local
//! slices immediately and are confirmed remotely later by `sync_pending`;
//! a failed confirmation keeps the optimistic state (last write wins, no
//! rollback). The controller is the only writer of its slices and everything
//! runs on one logical thread, suspending only at backend await points.

mod slice;

pub use slice::{DataOrigin, LoadTicket, Slice, SliceState};

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::backend::{Backend, ProjectQuery, StepQuery, SubtaskQuery, TransportError};
use crate::error::{Error, Result};
use crate::progress;
use crate::query::{self, ParsedQuery};
use crate::seed::SeedSnapshot;
use crate::types::{
    Attachment, Category, Characteristic, DEFAULT_IN_PROGRESS_COEFF, KpiReport, Pm, Project,
    ProjectStatus, Step, Subtask, validate_attachment_owner, validate_coeff, validate_name,
    validate_weight,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    CreateCategory { temp_id: i64 },
    DeleteCategory { id: i64 },
    CreateProject { temp_id: i64 },
    UpdateProject { id: i64 },
    DeleteProject { id: i64 },
    CreateStep { temp_id: i64 },
    UpdateStep { id: i64 },
    DeleteStep { id: i64 },
    ReorderSteps { project_id: i64, ids: Vec<i64> },
    CreateSubtask { temp_id: i64 },
    UpdateSubtask { id: i64 },
    DeleteSubtask { id: i64 },
    CreateAttachment { temp_id: i64 },
    DeleteAttachment { id: i64 },
    CreateCharacteristic { temp_id: i64 },
    DeleteCharacteristic { id: i64 },
}

pub struct SyncController<B: Backend> {
    backend: B,
    categories: Slice<Category>,
    pms: Slice<Pm>,
    projects: Slice<Project>,
    steps: Slice<Step>,
    subtasks: Slice<Subtask>,
    selected_category: Option<i64>,
    selected_project: Option<i64>,
    selected_step: Option<i64>,
    project_filter: ParsedQuery,
    step_filter: ParsedQuery,
    subtask_filter: ParsedQuery,
    workspace_path: Option<String>,
    pending: VecDeque<PendingOp>,
    next_temp_id: i64,
    write_advisories: Vec<String>,
}

impl<B: Backend> SyncController<B> {
    pub fn new(backend: B) -> Self {
        Self::with_seed(backend, SeedSnapshot::default())
    }

    /// Start from a seed snapshot: it becomes the initial fallback for every
    /// slice it covers.
    pub fn with_seed(backend: B, seed: SeedSnapshot) -> Self {
        let mut projects = seed.projects;
        for project in &mut projects {
            progress::annotate_project(project);
        }

        Self {
            backend,
            categories: Slice::with_seed("categories", seed.categories),
            pms: Slice::with_seed("pms", seed.pms),
            projects: Slice::with_seed("projects", projects),
            steps: Slice::new("steps"),
            subtasks: Slice::new("subtasks"),
            selected_category: None,
            selected_project: None,
            selected_step: None,
            project_filter: ParsedQuery::default(),
            step_filter: ParsedQuery::default(),
            subtask_filter: ParsedQuery::default(),
            workspace_path: seed.workspace_path,
            pending: VecDeque::new(),
            next_temp_id: -1,
            write_advisories: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Slice access and derived views
    // ------------------------------------------------------------------

    pub fn categories(&self) -> &Slice<Category> {
        &self.categories
    }

    pub fn pms(&self) -> &Slice<Pm> {
        &self.pms
    }

    pub fn projects(&self) -> &Slice<Project> {
        &self.projects
    }

    pub fn steps(&self) -> &Slice<Step> {
        &self.steps
    }

    pub fn subtasks(&self) -> &Slice<Subtask> {
        &self.subtasks
    }

    pub fn selected_category(&self) -> Option<i64> {
        self.selected_category
    }

    pub fn selected_project(&self) -> Option<i64> {
        self.selected_project
    }

    pub fn selected_step(&self) -> Option<i64> {
        self.selected_step
    }

    /// Projects of the current slice, with the current filter applied
    /// locally (the same predicates were already forwarded to the backend).
    pub fn filtered_projects(&self) -> Vec<&Project> {
        let owner_id = self.resolve_pm_id(self.project_filter.owner.as_deref());
        query::filter_projects(self.projects.items(), &self.project_filter, owner_id)
    }

    pub fn filtered_steps(&self) -> Vec<&Step> {
        let assignee_id = self.resolve_pm_id(self.step_filter.assignee.as_deref());
        query::filter_steps(self.steps.items(), &self.step_filter, assignee_id)
    }

    pub fn filtered_subtasks(&self) -> Vec<&Subtask> {
        let assignee_id = self.resolve_pm_id(self.subtask_filter.assignee.as_deref());
        query::filter_subtasks(self.subtasks.items(), &self.subtask_filter, assignee_id)
    }

    /// All advisories currently visible: per-slice fallback notices plus any
    /// write confirmations that failed.
    pub fn advisories(&self) -> Vec<String> {
        let mut advisories: Vec<String> = [
            self.categories.advisory(),
            self.pms.advisory(),
            self.projects.advisory(),
            self.steps.advisory(),
            self.subtasks.advisory(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
        advisories.extend(self.write_advisories.iter().cloned());
        advisories
    }

    /// Drain the write-path advisories after showing them.
    pub fn take_write_advisories(&mut self) -> Vec<String> {
        std::mem::take(&mut self.write_advisories)
    }

    fn resolve_pm_id(&self, name: Option<&str>) -> Option<i64> {
        name.and_then(|name| query::resolve_pm(self.pms.items(), name))
            .map(|pm| pm.id)
    }

    // ------------------------------------------------------------------
    // Reads: fetch or fall back
    // ------------------------------------------------------------------

    pub async fn refresh_categories(&mut self) {
        let ticket = self.categories.begin_load();
        let outcome = self.backend.list_categories().await;
        self.categories.finish_load(ticket, outcome);
    }

    pub async fn refresh_pms(&mut self) {
        let ticket = self.pms.begin_load();
        let outcome = self.backend.list_pms().await;
        self.pms.finish_load(ticket, outcome);
    }

    pub async fn select_category(&mut self, category_id: Option<i64>) {
        self.selected_category = category_id;
        self.reload_projects().await;
    }

    pub async fn search_projects(&mut self, raw: &str) {
        self.project_filter = ParsedQuery::parse(raw);
        self.reload_projects().await;
    }

    pub async fn select_project(&mut self, project_id: Option<i64>) {
        self.selected_project = project_id;
        self.selected_step = None;
        let cached_steps = project_id
            .and_then(|id| self.projects.items().iter().find(|p| p.id == id))
            .map(|project| project.steps.clone())
            .unwrap_or_default();
        self.steps.prime(cached_steps);
        self.subtasks.prime(Vec::new());
        if project_id.is_some() {
            self.reload_steps().await;
        }
    }

    pub async fn search_steps(&mut self, raw: &str) {
        self.step_filter = ParsedQuery::parse(raw);
        self.reload_steps().await;
    }

    pub async fn select_step(&mut self, step_id: Option<i64>) {
        self.selected_step = step_id;
        let cached_subtasks = step_id
            .and_then(|id| self.steps.items().iter().find(|s| s.id == id))
            .map(|step| step.subtasks.clone())
            .unwrap_or_default();
        self.subtasks.prime(cached_subtasks);
        if step_id.is_some() {
            self.reload_subtasks().await;
        }
    }

    pub async fn search_subtasks(&mut self, raw: &str) {
        self.subtask_filter = ParsedQuery::parse(raw);
        self.reload_subtasks().await;
    }

    /// Reload every slice relevant to the current selection.
    pub async fn refresh(&mut self) {
        self.refresh_categories().await;
        self.refresh_pms().await;
        self.reload_projects().await;
        self.reload_steps().await;
        self.reload_subtasks().await;
    }

    async fn reload_projects(&mut self) {
        let request = ProjectQuery {
            category_id: self.selected_category,
            owner_id: self.resolve_pm_id(self.project_filter.owner.as_deref()),
            status: self
                .project_filter
                .status
                .as_deref()
                .and_then(|raw| raw.parse().ok()),
            search: residual_search(&self.project_filter),
        };
        let ticket = self.projects.begin_load();
        let outcome = self.backend.list_projects(&request).await;
        if self.projects.finish_load(ticket, outcome) {
            for project in self.projects.items_mut() {
                progress::annotate_project(project);
            }
        }
    }

    async fn reload_steps(&mut self) {
        let Some(project_id) = self.selected_project else {
            return;
        };
        let request = StepQuery {
            project_id,
            assignee_id: self.resolve_pm_id(self.step_filter.assignee.as_deref()),
            status: self
                .step_filter
                .status
                .as_deref()
                .and_then(|raw| raw.parse().ok()),
            search: residual_search(&self.step_filter),
        };
        let ticket = self.steps.begin_load();
        let outcome = self.backend.list_steps(&request).await;
        if self.steps.finish_load(ticket, outcome) {
            self.steps
                .items_mut()
                .sort_by_key(|step| step.order_index);
            self.sync_descendants();
        }
    }

    async fn reload_subtasks(&mut self) {
        let Some(step_id) = self.selected_step else {
            return;
        };
        let request = SubtaskQuery {
            step_id,
            assignee_id: self.resolve_pm_id(self.subtask_filter.assignee.as_deref()),
            status: self
                .subtask_filter
                .status
                .as_deref()
                .and_then(|raw| raw.parse().ok()),
            search: residual_search(&self.subtask_filter),
        };
        let ticket = self.subtasks.begin_load();
        let outcome = self.backend.list_subtasks(&request).await;
        if self.subtasks.finish_load(ticket, outcome) {
            self.subtasks
                .items_mut()
                .sort_by_key(|subtask| subtask.order_index);
            self.sync_descendants();
        }
    }

    /// KPI aggregate: trust a non-empty backend report, otherwise compute the
    /// same shape from the cached projects.
    pub async fn kpi(&mut self, category_id: Option<i64>) -> KpiReport {
        match self.backend.kpi_report(category_id).await {
            Ok(report) if report.total_projects > 0 => report,
            Ok(_) => {
                warn!("kpi endpoint returned no data; computing locally");
                self.write_advisories
                    .push("showing locally computed KPI: backend returned no data".to_string());
                self.local_kpi(category_id)
            }
            Err(err) => {
                warn!(error = %err, "kpi endpoint failed; computing locally");
                self.write_advisories
                    .push(format!("showing locally computed KPI: {err}"));
                self.local_kpi(category_id)
            }
        }
    }

    fn local_kpi(&self, category_id: Option<i64>) -> KpiReport {
        let scoped: Vec<Project> = self
            .projects
            .items()
            .iter()
            .filter(|project| category_id.is_none_or(|id| project.category_id == id))
            .cloned()
            .collect();
        progress::local_kpi(&scoped)
    }

    pub fn cached_workspace_path(&self) -> Option<&str> {
        self.workspace_path.as_deref()
    }

    pub async fn refresh_workspace_path(&mut self) -> Option<String> {
        match self.backend.workspace_path().await {
            Ok(path) if !path.trim().is_empty() => {
                self.workspace_path = Some(path.clone());
                Some(path)
            }
            Ok(_) => self.workspace_path.clone(),
            Err(err) => {
                warn!(error = %err, "workspace path fetch failed; using cached value");
                self.workspace_path.clone()
            }
        }
    }

    /// Optimistic like every other write: the local value changes first, the
    /// remote setter is best effort.
    pub async fn set_workspace_path(&mut self, path: &str) -> Result<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("workspace_path", "cannot be empty"));
        }
        self.workspace_path = Some(trimmed.to_string());
        match self.backend.set_workspace_path(trimmed).await {
            Ok(confirmed) if !confirmed.trim().is_empty() => {
                self.workspace_path = Some(confirmed.clone());
                Ok(confirmed)
            }
            Ok(_) => Ok(trimmed.to_string()),
            Err(err) => {
                warn!(error = %err, "workspace path update not confirmed; keeping local value");
                self.write_advisories
                    .push(format!("workspace path kept locally only: {err}"));
                Ok(trimmed.to_string())
            }
        }
    }

    // ------------------------------------------------------------------
    // Optimistic mutations
    // ------------------------------------------------------------------

    fn alloc_temp_id(&mut self) -> i64 {
        let id = self.next_temp_id;
        self.next_temp_id -= 1;
        id
    }

    pub fn create_category(&mut self, name: &str) -> Result<Category> {
        let name = validate_name(name)?;
        let category = Category {
            id: self.alloc_temp_id(),
            name,
        };
        self.categories.items_mut().push(category.clone());
        self.pending.push_back(PendingOp::CreateCategory {
            temp_id: category.id,
        });
        Ok(category)
    }

    /// Removes the category and drops every cached project under it; the
    /// backend cascades the rest of the subtree on its side.
    pub fn delete_category(&mut self, id: i64) -> Result<()> {
        let Some(index) = self
            .categories
            .items()
            .iter()
            .position(|category| category.id == id)
        else {
            return Err(Error::not_found("category", id));
        };
        self.categories.items_mut().remove(index);
        self.projects
            .items_mut()
            .retain(|project| project.category_id != id);
        if self.selected_category == Some(id) {
            self.selected_category = None;
            self.selected_project = None;
            self.selected_step = None;
            self.steps.prime(Vec::new());
            self.subtasks.prime(Vec::new());
        }
        if !self.cancel_pending(&PendingOp::CreateCategory { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteCategory { id });
        }
        Ok(())
    }

    pub fn create_project(&mut self, mut project: Project) -> Result<Project> {
        project.name = validate_name(&project.name)?;
        project.in_progress_coeff = validate_coeff(project.in_progress_coeff)?;
        project.id = self.alloc_temp_id();
        progress::annotate_project(&mut project);
        self.projects.items_mut().push(project.clone());
        self.pending.push_back(PendingOp::CreateProject {
            temp_id: project.id,
        });
        Ok(project)
    }

    /// Replaces the scalar fields of a cached project. Children (steps,
    /// attachments, characteristics) are managed through their own
    /// mutations and stay untouched.
    pub fn update_project(&mut self, mut project: Project) -> Result<Project> {
        project.name = validate_name(&project.name)?;
        project.in_progress_coeff = validate_coeff(project.in_progress_coeff)?;
        let id = project.id;
        let Some(cached) = self
            .projects
            .items_mut()
            .iter_mut()
            .find(|cached| cached.id == id)
        else {
            return Err(Error::not_found("project", id));
        };
        project.steps = std::mem::take(&mut cached.steps);
        project.attachments = std::mem::take(&mut cached.attachments);
        project.characteristics = std::mem::take(&mut cached.characteristics);
        progress::annotate_project(&mut project);
        *cached = project.clone();
        self.enqueue_update_project(id);
        Ok(project)
    }

    pub fn delete_project(&mut self, id: i64) -> Result<()> {
        let Some(index) = self
            .projects
            .items()
            .iter()
            .position(|project| project.id == id)
        else {
            return Err(Error::not_found("project", id));
        };
        self.projects.items_mut().remove(index);
        if self.selected_project == Some(id) {
            self.selected_project = None;
            self.selected_step = None;
            self.steps.prime(Vec::new());
            self.subtasks.prime(Vec::new());
        }
        if !self.cancel_pending(&PendingOp::CreateProject { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteProject { id });
        }
        Ok(())
    }

    /// Archive/activate several projects at once. Every id must be cached.
    pub fn set_projects_status(&mut self, ids: &[i64], status: ProjectStatus) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::validation("ids", "cannot be empty"));
        }
        for &id in ids {
            if !self.projects.items().iter().any(|project| project.id == id) {
                return Err(Error::not_found("project", id));
            }
        }
        for &id in ids {
            if let Some(project) = self
                .projects
                .items_mut()
                .iter_mut()
                .find(|project| project.id == id)
            {
                project.status = status;
            }
            self.enqueue_update_project(id);
        }
        Ok(ids.len())
    }

    pub fn delete_projects(&mut self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::validation("ids", "cannot be empty"));
        }
        for &id in ids {
            if !self.projects.items().iter().any(|project| project.id == id) {
                return Err(Error::not_found("project", id));
            }
        }
        for &id in ids {
            self.delete_project(id)?;
        }
        Ok(ids.len())
    }

    pub fn create_step(&mut self, mut step: Step) -> Result<Step> {
        if self.selected_project != Some(step.project_id) {
            return Err(Error::not_found("project", step.project_id));
        }
        step.name = validate_name(&step.name)?;
        step.weight = validate_weight(step.weight)?;
        step.id = self.alloc_temp_id();
        step.order_index = self.steps.items().len() as i64 + 1;
        step.progress = 0;
        self.steps.items_mut().push(step.clone());
        self.sync_descendants();
        self.pending
            .push_back(PendingOp::CreateStep { temp_id: step.id });
        Ok(step)
    }

    /// Scalar update; subtasks and attachments stay as cached, order changes
    /// go through `reorder_steps`.
    pub fn update_step(&mut self, mut step: Step) -> Result<Step> {
        step.name = validate_name(&step.name)?;
        step.weight = validate_weight(step.weight)?;
        let id = step.id;
        let Some(cached) = self
            .steps
            .items_mut()
            .iter_mut()
            .find(|cached| cached.id == id)
        else {
            return Err(Error::not_found("step", id));
        };
        step.subtasks = std::mem::take(&mut cached.subtasks);
        step.attachments = std::mem::take(&mut cached.attachments);
        step.order_index = cached.order_index;
        *cached = step.clone();
        self.sync_descendants();
        self.enqueue_update_step(id);
        Ok(step)
    }

    pub fn delete_step(&mut self, id: i64) -> Result<()> {
        let Some(index) = self.steps.items().iter().position(|step| step.id == id) else {
            return Err(Error::not_found("step", id));
        };
        self.steps.items_mut().remove(index);
        renumber_steps(self.steps.items_mut());
        if self.selected_step == Some(id) {
            self.selected_step = None;
            self.subtasks.prime(Vec::new());
        }
        self.sync_descendants();
        if !self.cancel_pending(&PendingOp::CreateStep { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteStep { id });
        }
        Ok(())
    }

    /// Reorder the selected project's steps to the given id order and
    /// renumber densely from 1.
    pub fn reorder_steps(&mut self, ids: &[i64]) -> Result<()> {
        let Some(project_id) = self.selected_project else {
            return Err(Error::validation("project", "no project selected"));
        };
        let current: Vec<i64> = self.steps.items().iter().map(|step| step.id).collect();
        let mut sorted_current = current.clone();
        sorted_current.sort_unstable();
        let mut sorted_requested = ids.to_vec();
        sorted_requested.sort_unstable();
        if sorted_current != sorted_requested {
            return Err(Error::validation(
                "order",
                "ids must be a permutation of the current steps",
            ));
        }

        let mut reordered = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(index) = self.steps.items().iter().position(|step| step.id == id) {
                reordered.push(self.steps.items_mut().remove(index));
            }
        }
        *self.steps.items_mut() = reordered;
        renumber_steps(self.steps.items_mut());
        self.sync_descendants();
        self.pending.push_back(PendingOp::ReorderSteps {
            project_id,
            ids: ids.to_vec(),
        });
        Ok(())
    }

    pub fn create_subtask(&mut self, mut subtask: Subtask) -> Result<Subtask> {
        if self.selected_step != Some(subtask.step_id) {
            return Err(Error::not_found("step", subtask.step_id));
        }
        subtask.name = validate_name(&subtask.name)?;
        subtask.weight = validate_weight(subtask.weight)?;
        subtask.id = self.alloc_temp_id();
        subtask.order_index = self.subtasks.items().len() as i64 + 1;
        self.subtasks.items_mut().push(subtask.clone());
        self.sync_descendants();
        self.pending.push_back(PendingOp::CreateSubtask {
            temp_id: subtask.id,
        });
        Ok(subtask)
    }

    pub fn update_subtask(&mut self, mut subtask: Subtask) -> Result<Subtask> {
        subtask.name = validate_name(&subtask.name)?;
        subtask.weight = validate_weight(subtask.weight)?;
        let id = subtask.id;
        let Some(cached) = self
            .subtasks
            .items_mut()
            .iter_mut()
            .find(|cached| cached.id == id)
        else {
            return Err(Error::not_found("subtask", id));
        };
        subtask.order_index = cached.order_index;
        *cached = subtask.clone();
        self.sync_descendants();
        self.enqueue_update_subtask(id);
        Ok(subtask)
    }

    pub fn delete_subtask(&mut self, id: i64) -> Result<()> {
        let Some(index) = self
            .subtasks
            .items()
            .iter()
            .position(|subtask| subtask.id == id)
        else {
            return Err(Error::not_found("subtask", id));
        };
        self.subtasks.items_mut().remove(index);
        renumber_subtasks(self.subtasks.items_mut());
        self.sync_descendants();
        if !self.cancel_pending(&PendingOp::CreateSubtask { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteSubtask { id });
        }
        Ok(())
    }

    pub fn add_attachment(&mut self, mut attachment: Attachment) -> Result<Attachment> {
        validate_attachment_owner(attachment.project_id, attachment.step_id)?;
        if attachment.path.trim().is_empty() {
            return Err(Error::validation("path", "cannot be empty"));
        }
        attachment.id = self.alloc_temp_id();

        if let Some(project_id) = attachment.project_id {
            let Some(project) = self
                .projects
                .items_mut()
                .iter_mut()
                .find(|project| project.id == project_id)
            else {
                return Err(Error::not_found("project", project_id));
            };
            project.attachments.push(attachment.clone());
        } else if let Some(step_id) = attachment.step_id {
            let Some(step) = self
                .steps
                .items_mut()
                .iter_mut()
                .find(|step| step.id == step_id)
            else {
                return Err(Error::not_found("step", step_id));
            };
            step.attachments.push(attachment.clone());
            self.sync_descendants();
        }

        self.pending.push_back(PendingOp::CreateAttachment {
            temp_id: attachment.id,
        });
        Ok(attachment)
    }

    pub fn remove_attachment(&mut self, id: i64) -> Result<()> {
        let mut removed = false;
        for project in self.projects.items_mut() {
            let before = project.attachments.len();
            project.attachments.retain(|attachment| attachment.id != id);
            removed |= project.attachments.len() != before;
        }
        for step in self.steps.items_mut() {
            let before = step.attachments.len();
            step.attachments.retain(|attachment| attachment.id != id);
            removed |= step.attachments.len() != before;
        }
        if !removed {
            return Err(Error::not_found("attachment", id));
        }
        self.sync_descendants();
        if !self.cancel_pending(&PendingOp::CreateAttachment { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteAttachment { id });
        }
        Ok(())
    }

    pub fn add_characteristic(&mut self, mut characteristic: Characteristic) -> Result<Characteristic> {
        if characteristic.parameter.trim().is_empty() {
            return Err(Error::validation("parameter", "cannot be empty"));
        }
        let project_id = characteristic.project_id;
        let Some(project_idx) = self
            .projects
            .items_mut()
            .iter_mut()
            .position(|project| project.id == project_id)
        else {
            return Err(Error::not_found("project", project_id));
        };
        characteristic.id = self.alloc_temp_id();
        self.projects.items_mut()[project_idx]
            .characteristics
            .push(characteristic.clone());
        self.pending.push_back(PendingOp::CreateCharacteristic {
            temp_id: characteristic.id,
        });
        Ok(characteristic)
    }

    pub fn remove_characteristic(&mut self, id: i64) -> Result<()> {
        let mut removed = false;
        for project in self.projects.items_mut() {
            let before = project.characteristics.len();
            project
                .characteristics
                .retain(|characteristic| characteristic.id != id);
            removed |= project.characteristics.len() != before;
        }
        if !removed {
            return Err(Error::not_found("characteristic", id));
        }
        if !self.cancel_pending(&PendingOp::CreateCharacteristic { temp_id: id }) {
            self.pending.push_back(PendingOp::DeleteCharacteristic { id });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote confirmation
    // ------------------------------------------------------------------

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain queued confirmations in order. A failure keeps the optimistic
    /// state and leaves an advisory; it never rolls anything back.
    pub async fn sync_pending(&mut self) {
        while let Some(op) = self.pending.pop_front() {
            debug!(?op, "confirming optimistic change");
            if let Err(err) = self.confirm(&op).await {
                warn!(?op, error = %err, "remote confirmation failed; keeping local change");
                self.write_advisories
                    .push(format!("change kept locally only: {err}"));
            }
        }
    }

    async fn confirm(&mut self, op: &PendingOp) -> std::result::Result<(), TransportError> {
        match op {
            PendingOp::CreateCategory { temp_id } => {
                let Some(category) = self
                    .categories
                    .items()
                    .iter()
                    .find(|category| category.id == *temp_id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.create_category(&category.name).await?;
                let new_id = confirmed.id;
                if let Some(cached) = self
                    .categories
                    .items_mut()
                    .iter_mut()
                    .find(|cached| cached.id == *temp_id)
                {
                    *cached = confirmed;
                }
                self.remap_category_id(*temp_id, new_id);
                Ok(())
            }
            PendingOp::DeleteCategory { id } => self.backend.delete_category(*id).await,
            PendingOp::CreateProject { temp_id } => {
                let Some(project) = self
                    .projects
                    .items()
                    .iter()
                    .find(|project| project.id == *temp_id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.create_project(&project).await?;
                self.adopt_project(*temp_id, confirmed);
                Ok(())
            }
            PendingOp::UpdateProject { id } => {
                let Some(project) = self
                    .projects
                    .items()
                    .iter()
                    .find(|project| project.id == *id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.update_project(&project).await?;
                self.adopt_project(*id, confirmed);
                Ok(())
            }
            PendingOp::DeleteProject { id } => self.backend.delete_project(*id).await,
            PendingOp::CreateStep { temp_id } => {
                let Some(step) = self
                    .steps
                    .items()
                    .iter()
                    .find(|step| step.id == *temp_id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.create_step(&step).await?;
                self.adopt_step(*temp_id, confirmed);
                Ok(())
            }
            PendingOp::UpdateStep { id } => {
                let Some(step) = self
                    .steps
                    .items()
                    .iter()
                    .find(|step| step.id == *id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.update_step(&step).await?;
                self.adopt_step(*id, confirmed);
                Ok(())
            }
            PendingOp::DeleteStep { id } => self.backend.delete_step(*id).await,
            PendingOp::ReorderSteps { project_id, ids } => {
                self.backend.reorder_steps(*project_id, ids).await
            }
            PendingOp::CreateSubtask { temp_id } => {
                let Some(subtask) = self
                    .subtasks
                    .items()
                    .iter()
                    .find(|subtask| subtask.id == *temp_id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.create_subtask(&subtask).await?;
                self.adopt_subtask(*temp_id, confirmed);
                Ok(())
            }
            PendingOp::UpdateSubtask { id } => {
                let Some(subtask) = self
                    .subtasks
                    .items()
                    .iter()
                    .find(|subtask| subtask.id == *id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.update_subtask(&subtask).await?;
                self.adopt_subtask(*id, confirmed);
                Ok(())
            }
            PendingOp::DeleteSubtask { id } => self.backend.delete_subtask(*id).await,
            PendingOp::CreateAttachment { temp_id } => {
                let Some(attachment) = self.find_attachment(*temp_id) else {
                    return Ok(());
                };
                let confirmed = self.backend.create_attachment(&attachment).await?;
                self.adopt_attachment(*temp_id, confirmed);
                Ok(())
            }
            PendingOp::DeleteAttachment { id } => self.backend.delete_attachment(*id).await,
            PendingOp::CreateCharacteristic { temp_id } => {
                let Some(characteristic) = self
                    .projects
                    .items()
                    .iter()
                    .flat_map(|project| project.characteristics.iter())
                    .find(|characteristic| characteristic.id == *temp_id)
                    .cloned()
                else {
                    return Ok(());
                };
                let confirmed = self.backend.create_characteristic(&characteristic).await?;
                for project in self.projects.items_mut() {
                    for cached in &mut project.characteristics {
                        if cached.id == *temp_id {
                            *cached = confirmed.clone();
                        }
                    }
                }
                Ok(())
            }
            PendingOp::DeleteCharacteristic { id } => {
                self.backend.delete_characteristic(*id).await
            }
        }
    }

    // ------------------------------------------------------------------
    // Adoption of authoritative entities and id remapping
    // ------------------------------------------------------------------

    fn adopt_project(&mut self, old_id: i64, confirmed: Project) {
        let new_id = confirmed.id;
        if let Some(project) = self
            .projects
            .items_mut()
            .iter_mut()
            .find(|project| project.id == old_id)
        {
            let steps = std::mem::take(&mut project.steps);
            let attachments = std::mem::take(&mut project.attachments);
            let characteristics = std::mem::take(&mut project.characteristics);
            *project = confirmed;
            project.steps = steps;
            project.attachments = attachments;
            project.characteristics = characteristics;
            progress::annotate_project(project);
        }
        if old_id != new_id {
            self.remap_project_id(old_id, new_id);
        }
        self.sync_descendants();
    }

    fn adopt_step(&mut self, old_id: i64, confirmed: Step) {
        let new_id = confirmed.id;
        if let Some(step) = self
            .steps
            .items_mut()
            .iter_mut()
            .find(|step| step.id == old_id)
        {
            let subtasks = std::mem::take(&mut step.subtasks);
            let attachments = std::mem::take(&mut step.attachments);
            let order_index = step.order_index;
            *step = confirmed;
            step.subtasks = subtasks;
            step.attachments = attachments;
            step.order_index = order_index;
        }
        if old_id != new_id {
            self.remap_step_id(old_id, new_id);
        }
        self.sync_descendants();
    }

    fn adopt_subtask(&mut self, old_id: i64, confirmed: Subtask) {
        let new_id = confirmed.id;
        if let Some(subtask) = self
            .subtasks
            .items_mut()
            .iter_mut()
            .find(|subtask| subtask.id == old_id)
        {
            let order_index = subtask.order_index;
            *subtask = confirmed;
            subtask.order_index = order_index;
        }
        if old_id != new_id {
            for op in &mut self.pending {
                match op {
                    PendingOp::UpdateSubtask { id } | PendingOp::DeleteSubtask { id }
                        if *id == old_id =>
                    {
                        *id = new_id;
                    }
                    _ => {}
                }
            }
        }
        self.sync_descendants();
    }

    fn find_attachment(&self, id: i64) -> Option<Attachment> {
        self.projects
            .items()
            .iter()
            .flat_map(|project| project.attachments.iter())
            .chain(
                self.steps
                    .items()
                    .iter()
                    .flat_map(|step| step.attachments.iter()),
            )
            .find(|attachment| attachment.id == id)
            .cloned()
    }

    fn adopt_attachment(&mut self, old_id: i64, confirmed: Attachment) {
        for project in self.projects.items_mut() {
            for attachment in &mut project.attachments {
                if attachment.id == old_id {
                    *attachment = confirmed.clone();
                }
            }
        }
        for step in self.steps.items_mut() {
            for attachment in &mut step.attachments {
                if attachment.id == old_id {
                    *attachment = confirmed.clone();
                }
            }
        }
        for op in &mut self.pending {
            if let PendingOp::DeleteAttachment { id } = op
                && *id == old_id
            {
                *id = confirmed.id;
            }
        }
        self.sync_descendants();
    }

    fn remap_category_id(&mut self, old: i64, new: i64) {
        if self.selected_category == Some(old) {
            self.selected_category = Some(new);
        }
        for project in self.projects.items_mut() {
            if project.category_id == old {
                project.category_id = new;
            }
        }
        for op in &mut self.pending {
            if let PendingOp::DeleteCategory { id } = op
                && *id == old
            {
                *id = new;
            }
        }
    }

    fn remap_project_id(&mut self, old: i64, new: i64) {
        if self.selected_project == Some(old) {
            self.selected_project = Some(new);
        }
        for project in self.projects.items_mut() {
            if project.id == new {
                for step in &mut project.steps {
                    step.project_id = new;
                }
                for attachment in &mut project.attachments {
                    if attachment.project_id == Some(old) {
                        attachment.project_id = Some(new);
                    }
                }
                for characteristic in &mut project.characteristics {
                    if characteristic.project_id == old {
                        characteristic.project_id = new;
                    }
                }
            }
        }
        for step in self.steps.items_mut() {
            if step.project_id == old {
                step.project_id = new;
            }
        }
        for op in &mut self.pending {
            match op {
                PendingOp::UpdateProject { id } | PendingOp::DeleteProject { id }
                    if *id == old =>
                {
                    *id = new;
                }
                PendingOp::ReorderSteps { project_id, .. } if *project_id == old => {
                    *project_id = new;
                }
                _ => {}
            }
        }
    }

    fn remap_step_id(&mut self, old: i64, new: i64) {
        if self.selected_step == Some(old) {
            self.selected_step = Some(new);
        }
        for subtask in self.subtasks.items_mut() {
            if subtask.step_id == old {
                subtask.step_id = new;
            }
        }
        for step in self.steps.items_mut() {
            if step.id == new {
                for subtask in &mut step.subtasks {
                    subtask.step_id = new;
                }
                for attachment in &mut step.attachments {
                    if attachment.step_id == Some(old) {
                        attachment.step_id = Some(new);
                    }
                }
            }
        }
        for op in &mut self.pending {
            match op {
                PendingOp::UpdateStep { id } | PendingOp::DeleteStep { id } if *id == old => {
                    *id = new;
                }
                PendingOp::ReorderSteps { ids, .. } => {
                    for id in ids {
                        if *id == old {
                            *id = new;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Derived-state upkeep
    // ------------------------------------------------------------------

    fn enqueue_update_project(&mut self, id: i64) {
        if id < 0 && self.pending.contains(&PendingOp::CreateProject { temp_id: id }) {
            return;
        }
        let op = PendingOp::UpdateProject { id };
        if !self.pending.contains(&op) {
            self.pending.push_back(op);
        }
    }

    fn enqueue_update_step(&mut self, id: i64) {
        if id < 0 && self.pending.contains(&PendingOp::CreateStep { temp_id: id }) {
            return;
        }
        let op = PendingOp::UpdateStep { id };
        if !self.pending.contains(&op) {
            self.pending.push_back(op);
        }
    }

    fn enqueue_update_subtask(&mut self, id: i64) {
        if id < 0 && self.pending.contains(&PendingOp::CreateSubtask { temp_id: id }) {
            return;
        }
        let op = PendingOp::UpdateSubtask { id };
        if !self.pending.contains(&op) {
            self.pending.push_back(op);
        }
    }

    fn cancel_pending(&mut self, op: &PendingOp) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending != op);
        before != self.pending.len()
    }

    /// Mirror the subtasks slice into the selected step, the steps slice
    /// into the selected project, and recompute every derived value on the
    /// way up. Runs synchronously in the same turn as the mutation that
    /// triggered it.
    fn sync_descendants(&mut self) {
        if let Some(step_id) = self.selected_step {
            let subtasks = self.subtasks.items().to_vec();
            if let Some(step) = self
                .steps
                .items_mut()
                .iter_mut()
                .find(|step| step.id == step_id)
            {
                step.subtasks = subtasks;
            }
        }

        if let Some(project_id) = self.selected_project {
            let coeff = self
                .projects
                .items()
                .iter()
                .find(|project| project.id == project_id)
                .map(|project| project.in_progress_coeff)
                .unwrap_or(DEFAULT_IN_PROGRESS_COEFF);
            for step in self.steps.items_mut() {
                step.progress = progress::step_progress(step, coeff);
            }
            let steps = self.steps.items().to_vec();
            if let Some(project) = self
                .projects
                .items_mut()
                .iter_mut()
                .find(|project| project.id == project_id)
            {
                project.steps = steps;
                progress::annotate_project(project);
            }
        }
    }
}

fn residual_search(filter: &ParsedQuery) -> Option<String> {
    if filter.text.is_empty() {
        None
    } else {
        Some(filter.text.clone())
    }
}

fn renumber_steps(steps: &mut [Step]) {
    for (index, step) in steps.iter_mut().enumerate() {
        step.order_index = index as i64 + 1;
    }
}

fn renumber_subtasks(subtasks: &mut [Subtask]) {
    for (index, subtask) in subtasks.iter_mut().enumerate() {
        subtask.order_index = index as i64 + 1;
    }
}
