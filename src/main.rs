use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use project_tracker::{
    cli::{self, RootCommand},
    logging::init_logging,
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(
    name = "project-tracker",
    about = "Work hierarchy tracker: weighted progress roll-ups, tokenized search, resilient sync",
    version = env!("PROJECT_TRACKER_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Workspace directory override; the snapshot and logs live here.
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load();
    if let Some(dir) = cli.workspace {
        settings.workspace_path = Some(dir.to_string_lossy().to_string());
    }

    if let Err(err) = init_logging(&settings.logs_dir()) {
        eprintln!("warning: failed to initialize logging: {err}");
    }

    let output = cli::run(cli.command, &settings).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
