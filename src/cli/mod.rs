//! Headless JSON command surface over the workspace snapshot.
//!
//! Every command loads the seed snapshot, drives the sync controller against
//! a seed-backed backend, and prints one schema-versioned JSON document, so
//! scripts and agents can consume the output without scraping.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::{Value, json};

use crate::query::{ParsedQuery, WeightOp};
use crate::seed::{SeedBackend, SeedSnapshot};
use crate::settings::Settings;
use crate::sync::SyncController;
use crate::types::Project;

const SCHEMA_VERSION: &str = "cli.v1";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    Kpi(KpiArgs),
    Query(QueryArgs),
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProjectCommand {
    List(ProjectListArgs),
    Show(ProjectShowArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ProjectListArgs {
    #[arg(long, value_name = "ID")]
    pub category_id: Option<i64>,

    /// Free-text query; supports status:/owner:/has:files/weight tokens.
    #[arg(long, value_name = "TEXT", default_value = "")]
    pub search: String,
}

#[derive(Debug, Clone, Args)]
pub struct ProjectShowArgs {
    #[arg(value_name = "ID")]
    pub id: i64,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CategoryCommand {
    List,
}

#[derive(Debug, Clone, Args)]
pub struct KpiArgs {
    #[arg(long, value_name = "ID")]
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Raw search input to tokenize; nothing is matched, the parsed
    /// structure is printed.
    #[arg(value_name = "INPUT")]
    pub input: String,
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkspaceCommand {
    Get,
    Set {
        #[arg(value_name = "DIR")]
        path: String,
    },
}

pub async fn run(command: RootCommand, settings: &Settings) -> Result<Value> {
    let snapshot = SeedSnapshot::load_or_default(&settings.snapshot_path())?;
    let backend = SeedBackend::new(snapshot.clone());
    let mut controller = SyncController::with_seed(backend, snapshot);

    match command {
        RootCommand::Project { command } => match command {
            ProjectCommand::List(args) => {
                controller.select_category(args.category_id).await;
                controller.search_projects(&args.search).await;
                let rows: Vec<Value> = controller
                    .filtered_projects()
                    .into_iter()
                    .map(project_row)
                    .collect();
                Ok(json!({
                    "schema": SCHEMA_VERSION,
                    "projects": rows,
                    "advisories": controller.advisories(),
                }))
            }
            ProjectCommand::Show(args) => {
                controller.select_category(None).await;
                let project = controller
                    .projects()
                    .items()
                    .iter()
                    .find(|project| project.id == args.id)
                    .ok_or_else(|| anyhow::anyhow!("project {} not found", args.id))?;
                Ok(json!({
                    "schema": SCHEMA_VERSION,
                    "project": serde_json::to_value(project)?,
                }))
            }
        },
        RootCommand::Category { command } => match command {
            CategoryCommand::List => {
                controller.refresh_categories().await;
                Ok(json!({
                    "schema": SCHEMA_VERSION,
                    "categories": serde_json::to_value(controller.categories().items())?,
                }))
            }
        },
        RootCommand::Kpi(args) => {
            controller.select_category(args.category_id).await;
            let report = controller.kpi(args.category_id).await;
            Ok(json!({
                "schema": SCHEMA_VERSION,
                "kpi": serde_json::to_value(report)?,
                "advisories": controller.advisories(),
            }))
        }
        RootCommand::Query(args) => {
            let parsed = ParsedQuery::parse(&args.input);
            Ok(json!({
                "schema": SCHEMA_VERSION,
                "query": query_value(&parsed),
            }))
        }
        RootCommand::Workspace { command } => match command {
            WorkspaceCommand::Get => {
                let remote = controller.refresh_workspace_path().await;
                Ok(json!({
                    "schema": SCHEMA_VERSION,
                    "workspace_path": remote
                        .unwrap_or_else(|| settings.workspace_dir().display().to_string()),
                }))
            }
            WorkspaceCommand::Set { path } => {
                let confirmed = controller.set_workspace_path(&path).await?;
                let mut updated = settings.clone();
                updated.workspace_path = Some(confirmed.clone());
                updated.save()?;
                Ok(json!({
                    "schema": SCHEMA_VERSION,
                    "workspace_path": confirmed,
                    "advisories": controller.advisories(),
                }))
            }
        },
    }
}

fn project_row(project: &Project) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "code": project.code,
        "status": project.status.as_str(),
        "owner_id": project.owner_id,
        "progress": project.progress,
        "steps_total": project.metrics.steps_total,
        "steps_done": project.metrics.steps_done,
        "subtasks_total": project.metrics.subtasks_total,
        "subtasks_done": project.metrics.subtasks_done,
    })
}

fn query_value(parsed: &ParsedQuery) -> Value {
    json!({
        "text": parsed.text,
        "status": parsed.status,
        "owner": parsed.owner,
        "assignee": parsed.assignee,
        "has_files": parsed.has_files,
        "weight": parsed.weight.map(|filter| {
            json!({
                "op": match filter.op {
                    WeightOp::Gt => ">",
                    WeightOp::Lt => "<",
                    WeightOp::Eq => "=",
                },
                "threshold": filter.threshold,
            })
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Category, Project, ProjectMetrics, ProjectStatus, Step, TaskStatus,
    };

    fn sample_settings(dir: &std::path::Path) -> (Settings, SeedSnapshot) {
        let settings = Settings {
            workspace_path: Some(dir.display().to_string()),
            ..Settings::default()
        };
        let snapshot = SeedSnapshot {
            categories: vec![Category {
                id: 1,
                name: "Kitchen".to_string(),
            }],
            pms: Vec::new(),
            projects: vec![Project {
                id: 2,
                category_id: 1,
                name: "Oven 9000".to_string(),
                code: Some("OV-9".to_string()),
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
                steps: vec![Step {
                    id: 3,
                    project_id: 2,
                    name: "Design".to_string(),
                    description: None,
                    status: TaskStatus::Done,
                    assignee_id: None,
                    start_date: None,
                    target_date: None,
                    completed_date: None,
                    weight: 1.0,
                    order_index: 1,
                    comments: None,
                    subtasks: Vec::new(),
                    attachments: Vec::new(),
                    progress: 0,
                }],
                characteristics: Vec::new(),
                attachments: Vec::new(),
                progress: 0,
                metrics: ProjectMetrics::default(),
            }],
            workspace_path: None,
        };
        snapshot
            .save(&settings.snapshot_path())
            .expect("snapshot should save");
        (settings, snapshot)
    }

    #[tokio::test]
    async fn test_project_list_reports_progress() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (settings, _snapshot) = sample_settings(dir.path());

        let output = run(
            RootCommand::Project {
                command: ProjectCommand::List(ProjectListArgs {
                    category_id: Some(1),
                    search: String::new(),
                }),
            },
            &settings,
        )
        .await
        .expect("project list should succeed");

        assert_eq!(output["schema"], SCHEMA_VERSION);
        let rows = output["projects"].as_array().expect("projects array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Oven 9000");
        assert_eq!(rows[0]["progress"], 100);
        assert_eq!(rows[0]["steps_done"], 1);
    }

    #[tokio::test]
    async fn test_project_list_applies_search_tokens() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (settings, _snapshot) = sample_settings(dir.path());

        let output = run(
            RootCommand::Project {
                command: ProjectCommand::List(ProjectListArgs {
                    category_id: None,
                    search: "status:archived".to_string(),
                }),
            },
            &settings,
        )
        .await
        .expect("project list should succeed");

        let rows = output["projects"].as_array().expect("projects array");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_query_command_prints_parsed_tokens() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (settings, _snapshot) = sample_settings(dir.path());

        let output = run(
            RootCommand::Query(QueryArgs {
                input: "oven status:in_progress weight>0.5".to_string(),
            }),
            &settings,
        )
        .await
        .expect("query command should succeed");

        assert_eq!(output["query"]["text"], "oven");
        assert_eq!(output["query"]["status"], "in_progress");
        assert_eq!(output["query"]["weight"]["op"], ">");
    }

    #[tokio::test]
    async fn test_kpi_command_reports_totals() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let (settings, _snapshot) = sample_settings(dir.path());

        let output = run(
            RootCommand::Kpi(KpiArgs { category_id: None }),
            &settings,
        )
        .await
        .expect("kpi command should succeed");

        assert_eq!(output["kpi"]["total_projects"], 1);
        assert_eq!(output["kpi"]["steps_done"], 1);
    }
}
