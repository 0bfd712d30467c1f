//! Orchestrate CLI: a thin front-end over the Pipeline Controller (§6 "CLI
//! surface"). Every subcommand loads the project configuration, wires a
//! `GitHubClient` and a `ClaudeCliGenerator` into a `PipelineController`, and
//! exits 0 on success or 1 on any handled error.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrate_claude::ClaudeCliGenerator;
use orchestrate_core::{
    parse_identifier, Config, HostingService, MergeStrategy, PipelineController, ProcessOptions,
    StateStore, WorkflowStatus,
};
use orchestrate_github::GitHubClient;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize logging with the requested verbosity.
fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("orchestrate={level}").parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_file(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
    Ok(())
}

#[derive(Parser)]
#[command(name = "orchestrate")]
#[command(about = "Automates the issue-to-PR lifecycle: fetch, implement, open a PR, and drive its review cycle to merge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a minimal `.auto/config.yaml` skeleton for this project.
    Init,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the status of one or all tracked workflows.
    Status {
        /// Issue identifier (`123`, `#123`, `PROJ-45`); omit to list all.
        issue: Option<String>,
    },

    /// Remove persisted state for workflows in a terminal status.
    Cleanup,

    /// List issues from the hosting service.
    #[command(alias = "ls")]
    Issues {
        /// Filter by label.
        #[arg(long)]
        label: Vec<String>,
        /// Filter by assignee.
        #[arg(long)]
        assignee: Option<String>,
        /// Filter by state (`open`, `closed`).
        #[arg(long)]
        state: Option<String>,
    },

    /// Show the persisted workflow record for an issue.
    Show {
        issue: String,
    },

    /// Fetch an issue and initialize (or resume) its workflow record.
    Fetch {
        issue: String,
    },

    /// Run the code generator against the issue's worktree.
    Implement {
        issue: String,
    },

    /// Drive an issue all the way through fetch, implement, PR, and review.
    Process {
        issue: String,
        #[arg(long)]
        skip_implement: bool,
        #[arg(long)]
        skip_pr: bool,
        #[arg(long)]
        skip_review: bool,
        #[arg(long)]
        resume: bool,
    },

    /// Run the review cycle for an issue with an already-open PR.
    Review {
        issue: String,
    },

    /// Run the update cycle against the PR's current unresolved comments.
    Update {
        issue: String,
    },

    /// Merge the issue's PR and clean up its worktree.
    Merge {
        issue: String,
        #[arg(long, default_value = "squash")]
        strategy: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a single configuration value.
    Get { key: String },
    /// Set is not supported on the resolved, read-only view; use `.auto/config.yaml` directly.
    Set { key: String, value: String },
    /// List every resolved configuration value.
    List,
    /// Print the full resolved configuration.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match run(cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(orchestrate_core::Error::AuthRequired(_)) = e.downcast_ref::<orchestrate_core::Error>() {
                eprintln!("hint: authenticate the hosting-service CLI (e.g. `gh auth login`) and retry");
            }
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let project_root = std::env::current_dir().context("resolving project root")?;

    match command {
        Commands::Init => {
            let path = orchestrate_core::config::init_project_config(&project_root)?;
            println!("wrote {}", path.display());
        }
        Commands::Config { action } => {
            let config = Config::load(&project_root)?;
            match action {
                ConfigAction::Get { key } => match config.as_map().get(&key) {
                    Some(v) => println!("{v}"),
                    None => println!("(unset)"),
                },
                ConfigAction::Set { key, value } => {
                    println!("config is read-only via this command; edit .auto/config.yaml to set {key} = {value}");
                }
                ConfigAction::List => {
                    for (k, v) in config.as_map() {
                        println!("{k} = {v}");
                    }
                }
                ConfigAction::Show => {
                    println!("{:#?}", config);
                }
            }
        }
        Commands::Status { issue } => {
            let store = state_store(&project_root)?;
            match issue {
                Some(issue) => {
                    let id = parse_identifier(&issue)?;
                    let record = store.load(&id.value)?;
                    print_record_summary(&record);
                }
                None => {
                    let records = store.list()?;
                    if records.is_empty() {
                        println!("no tracked workflows");
                    }
                    for record in records {
                        print_record_summary(&record);
                    }
                }
            }
        }
        Commands::Cleanup => {
            let store = state_store(&project_root)?;
            let removed = store.purge_terminal()?;
            println!("removed {removed} completed/failed workflow record(s)");
        }
        Commands::Issues { label, assignee, state } => {
            let hosting = hosting_service(&project_root)?;
            let filter = orchestrate_core::IssueFilter { labels: label, assignee, state };
            let issues = hosting.list_issues(&filter).await?;
            for issue in issues {
                println!("{}\t{}\t{}", issue.id, issue.issue_type.as_str(), issue.title);
            }
        }
        Commands::Show { issue } => {
            let store = state_store(&project_root)?;
            let id = parse_identifier(&issue)?;
            let record = store.load(&id.value)?;
            println!("{}", serde_yaml::to_string(&record)?);
        }
        Commands::Fetch { issue } => {
            let controller = controller(&project_root).await?;
            let id = parse_identifier(&issue)?;
            let mut record = controller
                .state_store
                .try_load(&id.value)?
                .unwrap_or_else(|| blank_record(&id));
            let cancel = orchestrate_core::CancellationToken::new();
            cancel.check()?;
            orchestrate_core::stages::run_fetch(&mut record, &id, controller.hosting.as_ref()).await?;
            controller.state_store.save(&record)?;
            print_record_summary(&record);
        }
        Commands::Implement { issue } => {
            let controller = controller(&project_root).await?;
            let id = parse_identifier(&issue)?;
            let mut record = controller.state_store.load(&id.value)?;
            orchestrate_core::stages::run_implement(&mut record, controller.generator.as_ref(), &controller.config).await?;
            controller.state_store.save(&record)?;
            print_record_summary(&record);
        }
        Commands::Process { issue, skip_implement, skip_pr, skip_review, resume } => {
            let controller = controller(&project_root).await?;
            let cancel = orchestrate_core::CancellationToken::new();
            let opts = ProcessOptions { skip_implement, skip_pr, skip_review, resume };
            let record = controller.process(&issue, opts, &cancel).await?;
            print_record_summary(&record);
        }
        Commands::Review { issue } => {
            let controller = controller(&project_root).await?;
            let id = parse_identifier(&issue)?;
            let mut record = controller.state_store.load(&id.value)?;
            let cancel = orchestrate_core::CancellationToken::new();
            controller.run_review_cycle(&mut record, &cancel).await?;
            controller.state_store.save(&record)?;
            print_record_summary(&record);
        }
        Commands::Update { issue } => {
            let controller = controller(&project_root).await?;
            let id = parse_identifier(&issue)?;
            let mut record = controller.state_store.load(&id.value)?;
            let pr_number = record
                .pr_number
                .ok_or_else(|| orchestrate_core::Error::PreconditionFailed("no open PR for this issue".into()))?;
            let comments = controller.hosting.get_pr_comments(pr_number).await?;
            let unresolved: Vec<_> = comments.into_iter().filter(|c| !c.resolved).collect();
            let results = controller.run_update_cycle(&mut record, &unresolved).await?;
            controller.state_store.save(&record)?;
            for result in results {
                println!("{}\t{:?}", result.plan_id, result.status);
            }
        }
        Commands::Merge { issue, strategy, force } => {
            let controller = controller(&project_root).await?;
            let id = parse_identifier(&issue)?;
            let mut record = controller.state_store.load(&id.value)?;
            let strategy = MergeStrategy::from_str(&strategy)?;
            orchestrate_core::stages::run_merge(&mut record, controller.hosting.as_ref(), force, strategy).await?;
            orchestrate_core::stages::run_cleanup(&mut record, &controller.config).await?;
            controller.state_store.save(&record)?;
            print_record_summary(&record);
        }
    }

    Ok(())
}

fn state_store(project_root: &std::path::Path) -> Result<StateStore> {
    Ok(StateStore::new(project_root.join(".auto").join("state"))?)
}

fn hosting_service(_project_root: &std::path::Path) -> Result<Arc<GitHubClient>> {
    let repository = orchestrate_core::stages::detect_repository()?;
    Ok(Arc::new(GitHubClient::new(repository.owner, repository.name)))
}

async fn controller(project_root: &std::path::Path) -> Result<PipelineController> {
    let config = Config::load(project_root)?;
    let hosting = hosting_service(project_root)?;
    let generator: Arc<dyn orchestrate_core::Generator> = Arc::new(ClaudeCliGenerator::new(config.ai_command.clone()));
    let store = state_store(project_root)?;
    Ok(PipelineController::new(hosting, generator, store, config, project_root.to_path_buf()))
}

fn blank_record(id: &orchestrate_core::IssueId) -> orchestrate_core::WorkflowRecord {
    let repository = orchestrate_core::stages::detect_repository().unwrap_or(orchestrate_core::Repository {
        owner: "unknown".into(),
        name: "unknown".into(),
        default_branch: "main".into(),
        remote_url: String::new(),
    });
    let issue = orchestrate_core::Issue {
        id: id.value.clone(),
        provider: id.provider,
        title: String::new(),
        description: String::new(),
        status: orchestrate_core::IssueStatus::Open,
        issue_type: orchestrate_core::IssueType::Unknown,
        assignee: None,
        labels: vec![],
        url: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    orchestrate_core::WorkflowRecord::new(id.value.clone(), repository, issue)
}

fn print_record_summary(record: &orchestrate_core::WorkflowRecord) {
    let status = format_status(record.status);
    println!("{}\t{}\t{}", record.issue_id, status, record.issue.title);
}

fn format_status(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Fetching => "fetching",
        WorkflowStatus::Implementing => "implementing",
        WorkflowStatus::CreatingPr => "creating_pr",
        WorkflowStatus::InReview => "in_review",
        WorkflowStatus::ReadyToMerge => "ready_to_merge",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Failed => "failed",
    }
}
