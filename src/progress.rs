//! Weighted progress roll-ups.
//!
//! The same rule applies at both levels: a step aggregates its subtasks, a
//! project aggregates its steps. Each item earns a fractional credit from its
//! status (Done = 1, InProgress = the owning project's coefficient, Todo and
//! Blocked = 0), weighted by the item's weight. Nothing here mutates status.

use crate::types::{
    DEFAULT_IN_PROGRESS_COEFF, DEFAULT_WEIGHT, KpiReport, Project, ProjectMetrics, ProjectStatus,
    Step, TaskStatus,
};

pub fn status_credit(status: TaskStatus, coeff: f64) -> f64 {
    match status {
        TaskStatus::Done => 1.0,
        TaskStatus::InProgress => sanitize_coeff(coeff),
        TaskStatus::Todo | TaskStatus::Blocked => 0.0,
    }
}

fn sanitize_coeff(coeff: f64) -> f64 {
    if coeff.is_finite() {
        coeff.clamp(0.0, 1.0)
    } else {
        DEFAULT_IN_PROGRESS_COEFF
    }
}

/// Weights are validated at the mutation boundary, but backend responses can
/// still carry anything; a non-positive or non-finite weight counts as 1 so a
/// single bad row cannot poison the denominator.
pub fn effective_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        DEFAULT_WEIGHT
    }
}

/// Round-half-up percentage over `(weight, credit)` pairs. An empty
/// collection reads as "nothing started" and yields 0.
pub fn weighted_percent(items: impl IntoIterator<Item = (f64, f64)>) -> u8 {
    let mut earned = 0.0;
    let mut total = 0.0;
    for (weight, credit) in items {
        let weight = effective_weight(weight);
        earned += weight * credit.clamp(0.0, 1.0);
        total += weight;
    }

    if total <= 0.0 {
        return 0;
    }

    (100.0 * earned / total).round().clamp(0.0, 100.0) as u8
}

/// Progress of one step from its subtasks. `coeff` is the owning project's
/// in-progress coefficient; steps carry no coefficient of their own.
pub fn step_progress(step: &Step, coeff: f64) -> u8 {
    weighted_percent(
        step.subtasks
            .iter()
            .map(|subtask| (subtask.weight, status_credit(subtask.status, coeff))),
    )
}

/// Progress of a project from the statuses of its steps.
pub fn project_progress(project: &Project) -> u8 {
    weighted_percent(project.steps.iter().map(|step| {
        (
            step.weight,
            status_credit(step.status, project.in_progress_coeff),
        )
    }))
}

pub fn project_metrics(project: &Project) -> ProjectMetrics {
    let mut metrics = ProjectMetrics {
        steps_total: project.steps.len(),
        ..ProjectMetrics::default()
    };
    for step in &project.steps {
        if step.status.is_terminal() {
            metrics.steps_done += 1;
        }
        metrics.subtasks_total += step.subtasks.len();
        metrics.subtasks_done += step
            .subtasks
            .iter()
            .filter(|subtask| subtask.status.is_terminal())
            .count();
    }
    metrics
}

/// Recompute every derived field on a project in place: per-step progress,
/// project progress, completion metrics.
pub fn annotate_project(project: &mut Project) {
    let coeff = project.in_progress_coeff;
    for step in &mut project.steps {
        step.progress = step_progress(step, coeff);
    }
    project.progress = project_progress(project);
    project.metrics = project_metrics(project);
}

/// KPI rollup computed from local projects. Serves as the fallback when the
/// backend KPI endpoint is unavailable; `average_progress` is the unweighted
/// mean of project progress over the given scope.
pub fn local_kpi(projects: &[Project]) -> KpiReport {
    let mut report = KpiReport {
        total_projects: projects.len(),
        ..KpiReport::default()
    };

    let mut progress_sum = 0.0;
    for project in projects {
        match project.status {
            ProjectStatus::Active => report.active_projects += 1,
            ProjectStatus::Archived => report.archived_projects += 1,
        }
        progress_sum += f64::from(project_progress(project));
        let metrics = project_metrics(project);
        report.steps_total += metrics.steps_total;
        report.steps_done += metrics.steps_done;
        report.subtasks_total += metrics.subtasks_total;
        report.subtasks_done += metrics.subtasks_done;
    }

    if !projects.is_empty() {
        report.average_progress = progress_sum / projects.len() as f64;
    }
    report
}
