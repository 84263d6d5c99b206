//! Controller behavior against a scripted backend: fallback policy on reads,
//! optimistic writes with best-effort confirmation, and KPI degradation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use project_tracker::backend::{
    Backend, BackendResult, ProjectQuery, StepQuery, SubtaskQuery, TransportError,
};
use project_tracker::seed::SeedSnapshot;
use project_tracker::sync::{DataOrigin, SliceState, SyncController};
use project_tracker::types::{
    Attachment, Category, Characteristic, KpiReport, Pm, Project, ProjectMetrics, ProjectStatus,
    Step, Subtask, TaskStatus,
};

/// Backend with scripted read responses (per-slice queues, defaulting to an
/// empty success) and a switch that makes every write fail.
struct FakeBackend {
    categories: Mutex<VecDeque<BackendResult<Vec<Category>>>>,
    pms: Mutex<VecDeque<BackendResult<Vec<Pm>>>>,
    projects: Mutex<VecDeque<BackendResult<Vec<Project>>>>,
    steps: Mutex<VecDeque<BackendResult<Vec<Step>>>>,
    subtasks: Mutex<VecDeque<BackendResult<Vec<Subtask>>>>,
    kpi: Mutex<VecDeque<BackendResult<KpiReport>>>,
    fail_writes: AtomicBool,
    next_id: AtomicI64,
}

/// Shared, cloneable handle to a `FakeBackend`. A local newtype is required so
/// the `Backend` impl below satisfies the orphan rule (both `Backend` and
/// `Arc` are foreign to this test crate). Deref forwards field/method access to
/// the inner `FakeBackend`.
#[derive(Clone)]
struct SharedBackend(Arc<FakeBackend>);

impl std::ops::Deref for SharedBackend {
    type Target = FakeBackend;
    fn deref(&self) -> &FakeBackend {
        &self.0
    }
}

impl FakeBackend {
    fn new() -> SharedBackend {
        SharedBackend(Arc::new(Self {
            categories: Mutex::new(VecDeque::new()),
            pms: Mutex::new(VecDeque::new()),
            projects: Mutex::new(VecDeque::new()),
            steps: Mutex::new(VecDeque::new()),
            subtasks: Mutex::new(VecDeque::new()),
            kpi: Mutex::new(VecDeque::new()),
            fail_writes: AtomicBool::new(false),
            next_id: AtomicI64::new(1000),
        }))
    }

    fn push_projects(&self, outcome: BackendResult<Vec<Project>>) {
        self.projects
            .lock()
            .expect("projects queue lock")
            .push_back(outcome);
    }

    fn push_steps(&self, outcome: BackendResult<Vec<Step>>) {
        self.steps
            .lock()
            .expect("steps queue lock")
            .push_back(outcome);
    }

    fn push_subtasks(&self, outcome: BackendResult<Vec<Subtask>>) {
        self.subtasks
            .lock()
            .expect("subtasks queue lock")
            .push_back(outcome);
    }

    fn push_kpi(&self, outcome: BackendResult<KpiReport>) {
        self.kpi.lock().expect("kpi queue lock").push_back(outcome);
    }

    fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn assign_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn write_result<T>(&self, value: T) -> BackendResult<T> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(TransportError::new(
                "WRITE_FAILED",
                "backend rejected the write",
            ))
        } else {
            Ok(value)
        }
    }
}

fn pop_or_empty<T>(queue: &Mutex<VecDeque<BackendResult<Vec<T>>>>) -> BackendResult<Vec<T>> {
    queue
        .lock()
        .expect("response queue lock")
        .pop_front()
        .unwrap_or_else(|| Ok(Vec::new()))
}

impl Backend for SharedBackend {
    async fn list_categories(&self) -> BackendResult<Vec<Category>> {
        pop_or_empty(&self.categories)
    }

    async fn create_category(&self, name: &str) -> BackendResult<Category> {
        let id = self.assign_id();
        self.write_result(Category {
            id,
            name: name.to_string(),
        })
    }

    async fn delete_category(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn list_pms(&self) -> BackendResult<Vec<Pm>> {
        pop_or_empty(&self.pms)
    }

    async fn list_projects(&self, _query: &ProjectQuery) -> BackendResult<Vec<Project>> {
        pop_or_empty(&self.projects)
    }

    async fn create_project(&self, project: &Project) -> BackendResult<Project> {
        let mut confirmed = project.clone();
        confirmed.id = self.assign_id();
        self.write_result(confirmed)
    }

    async fn update_project(&self, project: &Project) -> BackendResult<Project> {
        self.write_result(project.clone())
    }

    async fn delete_project(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn list_steps(&self, _query: &StepQuery) -> BackendResult<Vec<Step>> {
        pop_or_empty(&self.steps)
    }

    async fn create_step(&self, step: &Step) -> BackendResult<Step> {
        let mut confirmed = step.clone();
        confirmed.id = self.assign_id();
        self.write_result(confirmed)
    }

    async fn update_step(&self, step: &Step) -> BackendResult<Step> {
        self.write_result(step.clone())
    }

    async fn delete_step(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn reorder_steps(&self, _project_id: i64, _ids: &[i64]) -> BackendResult<()> {
        self.write_result(())
    }

    async fn list_subtasks(&self, _query: &SubtaskQuery) -> BackendResult<Vec<Subtask>> {
        pop_or_empty(&self.subtasks)
    }

    async fn create_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask> {
        let mut confirmed = subtask.clone();
        confirmed.id = self.assign_id();
        self.write_result(confirmed)
    }

    async fn update_subtask(&self, subtask: &Subtask) -> BackendResult<Subtask> {
        self.write_result(subtask.clone())
    }

    async fn delete_subtask(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn create_attachment(&self, attachment: &Attachment) -> BackendResult<Attachment> {
        let mut confirmed = attachment.clone();
        confirmed.id = self.assign_id();
        self.write_result(confirmed)
    }

    async fn delete_attachment(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn create_characteristic(
        &self,
        characteristic: &Characteristic,
    ) -> BackendResult<Characteristic> {
        let mut confirmed = characteristic.clone();
        confirmed.id = self.assign_id();
        self.write_result(confirmed)
    }

    async fn delete_characteristic(&self, _id: i64) -> BackendResult<()> {
        self.write_result(())
    }

    async fn kpi_report(&self, _category_id: Option<i64>) -> BackendResult<KpiReport> {
        self.kpi
            .lock()
            .expect("kpi queue lock")
            .pop_front()
            .unwrap_or_else(|| Ok(KpiReport::default()))
    }

    async fn workspace_path(&self) -> BackendResult<String> {
        Ok(String::new())
    }

    async fn set_workspace_path(&self, path: &str) -> BackendResult<String> {
        self.write_result(path.to_string())
    }
}

fn subtask(id: i64, step_id: i64, name: &str, order: i64) -> Subtask {
    Subtask {
        id,
        step_id,
        name: name.to_string(),
        status: TaskStatus::Todo,
        assignee_id: None,
        target_date: None,
        completed_date: None,
        weight: 1.0,
        order_index: order,
        comment: None,
    }
}

fn step(id: i64, project_id: i64, name: &str, order: i64) -> Step {
    Step {
        id,
        project_id,
        name: name.to_string(),
        description: None,
        status: TaskStatus::InProgress,
        assignee_id: None,
        start_date: None,
        target_date: None,
        completed_date: None,
        weight: 1.0,
        order_index: order,
        comments: None,
        subtasks: Vec::new(),
        attachments: Vec::new(),
        progress: 0,
    }
}

fn project(id: i64, category_id: i64, name: &str, steps: Vec<Step>) -> Project {
    Project {
        id,
        category_id,
        name: name.to_string(),
        code: None,
        status: ProjectStatus::Active,
        owner_id: None,
        start_date: None,
        target_date: None,
        description: None,
        moq: None,
        base_price: None,
        retail_price: None,
        cover_image: None,
        media_path: None,
        in_progress_coeff: 0.5,
        steps,
        characteristics: Vec::new(),
        attachments: Vec::new(),
        progress: 0,
        metrics: ProjectMetrics::default(),
    }
}

#[tokio::test]
async fn test_steps_fetch_failure_falls_back_then_recovers() {
    let backend = FakeBackend::new();
    let mut controller = SyncController::new(backend.clone());

    backend.push_steps(Ok(vec![step(4, 3, "Design", 1)]));
    controller.select_project(Some(3)).await;
    assert_eq!(
        controller.steps().state(),
        SliceState::Ready(DataOrigin::Remote)
    );

    backend.push_steps(Err(TransportError::new(
        "CONNECT_FAILED",
        "connection refused",
    )));
    controller.search_steps("").await;

    assert_eq!(controller.steps().origin(), Some(DataOrigin::Fallback));
    assert_eq!(controller.steps().items().len(), 1);
    assert_eq!(controller.steps().items()[0].name, "Design");
    assert!(
        controller
            .steps()
            .advisory()
            .is_some_and(|advisory| advisory.contains("cached"))
    );

    backend.push_steps(Ok(vec![
        step(4, 3, "Design", 1),
        step(7, 3, "Tooling", 2),
    ]));
    controller.search_steps("").await;

    assert_eq!(controller.steps().origin(), Some(DataOrigin::Remote));
    assert_eq!(controller.steps().items().len(), 2);
    assert!(controller.steps().advisory().is_none());
}

#[tokio::test]
async fn test_empty_success_shows_cached_snapshot_not_empty_list() {
    let backend = FakeBackend::new();
    let seed = SeedSnapshot {
        projects: vec![project(3, 1, "Oven 9000", Vec::new())],
        ..SeedSnapshot::default()
    };
    let mut controller = SyncController::with_seed(backend.clone(), seed);

    backend.push_projects(Ok(Vec::new()));
    controller.select_category(Some(1)).await;

    assert_eq!(controller.projects().origin(), Some(DataOrigin::Fallback));
    assert_eq!(controller.projects().items().len(), 1);
    assert!(
        controller
            .projects()
            .advisory()
            .is_some_and(|advisory| advisory.contains("cached projects"))
    );
}

#[tokio::test]
async fn test_failed_write_keeps_optimistic_state_and_advises() {
    let backend = FakeBackend::new();
    let mut controller = SyncController::new(backend.clone());

    backend.push_steps(Ok(vec![step(4, 3, "Design", 1)]));
    controller.select_project(Some(3)).await;
    backend.push_subtasks(Ok(vec![subtask(5, 4, "Layout", 1)]));
    controller.select_step(Some(4)).await;

    backend.set_fail_writes(true);
    let created = controller
        .create_subtask(subtask(0, 4, "Wiring", 0))
        .expect("optimistic create should apply");
    assert!(created.id < 0);

    controller.sync_pending().await;

    // no rollback: the entity is still there under its temporary id
    let items = controller.subtasks().items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].id, created.id);
    assert_eq!(items[1].order_index, 2);
    let advisories = controller.take_write_advisories();
    assert_eq!(advisories.len(), 1);
    assert!(advisories[0].contains("locally only"));
}

#[tokio::test]
async fn test_successful_confirmation_adopts_authoritative_id() {
    let backend = FakeBackend::new();
    let mut controller = SyncController::new(backend.clone());

    backend.push_steps(Ok(vec![step(4, 3, "Design", 1)]));
    controller.select_project(Some(3)).await;
    backend.push_subtasks(Ok(vec![subtask(5, 4, "Layout", 1)]));
    controller.select_step(Some(4)).await;

    let created = controller
        .create_subtask(subtask(0, 4, "Wiring", 0))
        .expect("optimistic create should apply");
    assert!(created.id < 0);

    controller.sync_pending().await;

    let items = controller.subtasks().items();
    assert_eq!(items.len(), 2);
    assert!(items[1].id >= 1000);
    assert_eq!(items[1].order_index, 2);
    assert!(controller.take_write_advisories().is_empty());

    // the step in the parent slice sees the adopted subtask too
    let parent = &controller.steps().items()[0];
    assert!(parent.subtasks.iter().any(|subtask| subtask.id >= 1000));
}

#[tokio::test]
async fn test_kpi_degrades_to_local_rollup() {
    let backend = FakeBackend::new();
    let seed = SeedSnapshot {
        projects: vec![
            project(3, 1, "Oven 9000", vec![step(4, 3, "Design", 1)]),
            {
                let mut archived = project(9, 1, "Washer", Vec::new());
                archived.status = ProjectStatus::Archived;
                archived
            },
        ],
        ..SeedSnapshot::default()
    };
    let mut controller = SyncController::with_seed(backend.clone(), seed);

    backend.push_kpi(Err(TransportError::new(
        "CONNECT_FAILED",
        "connection refused",
    )));
    let report = controller.kpi(Some(1)).await;

    assert_eq!(report.total_projects, 2);
    assert_eq!(report.active_projects, 1);
    assert_eq!(report.archived_projects, 1);
    assert_eq!(report.steps_total, 1);
    let advisories = controller.take_write_advisories();
    assert!(advisories[0].contains("locally computed"));

    // an empty-but-successful report is treated the same way
    backend.push_kpi(Ok(KpiReport::default()));
    let report = controller.kpi(None).await;
    assert_eq!(report.total_projects, 2);
}

#[tokio::test]
async fn test_workspace_path_set_is_optimistic() {
    let backend = FakeBackend::new();
    let mut controller = SyncController::new(backend.clone());

    backend.set_fail_writes(true);
    let confirmed = controller
        .set_workspace_path("/srv/tracker")
        .await
        .expect("optimistic set should apply");

    assert_eq!(confirmed, "/srv/tracker");
    assert_eq!(controller.cached_workspace_path(), Some("/srv/tracker"));
    let advisories = controller.take_write_advisories();
    assert!(advisories[0].contains("workspace path"));
}

#[tokio::test]
async fn test_update_after_confirmation_targets_remote_id() {
    let backend = FakeBackend::new();
    let mut controller = SyncController::new(backend.clone());

    backend.push_steps(Ok(vec![step(4, 3, "Design", 1)]));
    controller.select_project(Some(3)).await;
    controller.select_step(Some(4)).await;

    let created = controller
        .create_subtask(subtask(0, 4, "Wiring", 0))
        .expect("optimistic create should apply");
    controller.sync_pending().await;

    let adopted = controller.subtasks().items()[0].clone();
    assert_ne!(adopted.id, created.id);

    let mut update = adopted.clone();
    update.status = TaskStatus::Done;
    controller
        .update_subtask(update)
        .expect("update should apply");
    controller.sync_pending().await;

    assert_eq!(controller.subtasks().items()[0].status, TaskStatus::Done);
    assert!(controller.take_write_advisories().is_empty());
}
