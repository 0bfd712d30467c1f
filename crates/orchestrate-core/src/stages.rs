//! Stage Runners (C6): Fetch, Implement, OpenPR, Merge, Cleanup.
//!
//! Each stage inspects the record on entry and skips work already completed,
//! so stages are individually resumable.

use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::comment_analyzer;
use crate::config::Config;
use crate::generator::{Generator, GeneratorRequest};
use crate::hosting::HostingService;
use crate::identifier::IssueId;
use crate::pr::{truncate_pr_body, PrMetadata};
use crate::prompt::{build_context, resolve_prompt, PromptOverrides};
use crate::response_parser::{parse_response, ResponseFormat};
use crate::workflow::{AiStatus, Repository, WorkflowRecord, WorkflowStatus};
use crate::worktree::{create_issue_worktree, remove_worktree, render_branch_name};
use crate::{Error, Result};

/// Detect the repository this invocation runs inside, by shelling out to git.
pub fn detect_repository() -> Result<Repository> {
    let remote_url = run_git(&["remote", "get-url", "origin"])?;
    let default_branch = run_git(&["symbolic-ref", "refs/remotes/origin/HEAD"])
        .ok()
        .and_then(|s| s.rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| "main".to_string());

    let (owner, name) = parse_owner_repo(&remote_url).unwrap_or(("unknown".into(), "unknown".into()));

    Ok(Repository { owner, name, default_branch, remote_url })
}

fn run_git(args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).output()?;
    if !output.status.success() {
        return Err(Error::external(false, format!("git {:?} failed", args)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn parse_owner_repo(remote_url: &str) -> Option<(String, String)> {
    let trimmed = remote_url.trim_end_matches(".git");
    let tail = trimmed.rsplit_once(':').map(|(_, t)| t).unwrap_or(trimmed);
    let tail = tail.rsplit_once('/').map(|(prefix, name)| {
        let owner = prefix.rsplit('/').next().unwrap_or(prefix);
        (owner.to_string(), name.to_string())
    });
    tail
}

#[instrument(skip(hosting))]
pub async fn run_fetch(
    record: &mut WorkflowRecord,
    id: &IssueId,
    hosting: &dyn HostingService,
) -> Result<()> {
    if record.status.is_at_least(WorkflowStatus::Implementing) {
        info!(issue_id = %record.issue_id, "fetch already completed, skipping");
        return Ok(());
    }

    record.set_status(WorkflowStatus::Fetching)?;
    let issue = hosting.fetch_issue(id).await?;
    record.issue = issue;
    record.set_status(WorkflowStatus::Implementing)?;
    Ok(())
}

#[instrument(skip(generator, config))]
pub async fn run_implement(record: &mut WorkflowRecord, generator: &dyn Generator, config: &Config) -> Result<()> {
    if record.ai_status == AiStatus::Implemented {
        info!(issue_id = %record.issue_id, "implementation already completed, skipping");
        return Ok(());
    }

    if record.worktree_path.is_none() {
        let branch = render_branch_name(&config.branch_naming, record.issue.issue_type.as_str(), &record.issue_id);
        let worktree = create_issue_worktree(&record.issue_id, &branch, &record.repository.default_branch, &config.worktree_dir)?;
        record.worktree_path = Some(worktree.path);
        record.branch = Some(worktree.branch_name);
    }

    record.ai_status = AiStatus::InProgress;
    record.touch();

    let branch = record.branch.clone().unwrap_or_default();
    let context = build_context(
        &record.issue_id,
        &record.issue.title,
        &record.issue.description,
        &record.issue.labels,
        record.issue.assignee.as_deref(),
        &record.repository.name,
        &branch,
    );

    let prompt = resolve_prompt(&config.ai_implementation_prompt, &PromptOverrides::default(), &Default::default(), &context)?;

    let response_result = invoke_with_retry(
        generator,
        GeneratorRequest {
            agent: config.ai_implementation_agent.clone(),
            prompt,
            timeout: Duration::from_secs(config.ai_timeout_secs),
            max_retries: config.ai_max_retries,
        },
    )
    .await;

    match response_result {
        Ok(response) => {
            let format = if config.ai_response_format == "freeform" { ResponseFormat::Freeform } else { ResponseFormat::Structured };
            let parsed = parse_response(&response.raw_output, format);
            record.last_response_summary = Some(parsed.summary);
            record.last_file_changes = parsed.file_changes;
            record.ai_status = AiStatus::Implemented;
            record.touch();
            Ok(())
        }
        Err(e) => {
            record.ai_status = AiStatus::Failed;
            record.fail(e.to_string());
            Err(e)
        }
    }
}

/// Retry a generator invocation on transient failure with exponential backoff.
async fn invoke_with_retry(
    generator: &dyn Generator,
    request: GeneratorRequest,
) -> Result<crate::generator::AiResponse> {
    let max_retries = request.max_retries.max(1);
    let mut last_err = None;

    for attempt in 0..max_retries {
        match generator.invoke(request.clone_for_retry()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt + 1 < max_retries => {
                warn!(attempt, error = %e, "generator call failed transiently, retrying");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                last_err = Some(e);
            }
            Err(e) => return Err(Error::GeneratorFailed(e.to_string())),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::GeneratorFailed("generator exhausted retries".into())))
}

impl GeneratorRequest {
    fn clone_for_retry(&self) -> Self {
        Self {
            agent: self.agent.clone(),
            prompt: self.prompt.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
        }
    }
}

#[instrument(skip(hosting, config))]
pub async fn run_open_pr(record: &mut WorkflowRecord, hosting: &dyn HostingService, config: &Config) -> Result<()> {
    if record.pr_number.is_some() {
        info!(issue_id = %record.issue_id, "pr already opened, skipping");
        return Ok(());
    }

    record.set_status(WorkflowStatus::CreatingPr)?;

    let branch = record.branch.clone().ok_or_else(|| Error::PreconditionFailed("no branch to open a PR from".into()))?;

    commit_and_push(&record.worktree_path, &branch, &config.implementation_commit_message, &record.issue_id)?;

    let title = format!("{} {}", record.issue.issue_type.title_prefix(), record.issue.title);
    let body = build_pr_body(record, config);
    let body = truncate_pr_body(&body);
    let labels = determine_labels(record);

    let created = hosting
        .create_pr(&title, &body, &branch, &record.repository.default_branch, false)
        .await?;

    if !labels.is_empty() {
        hosting.set_labels(created.number, &labels).await?;
    }
    if let Some(reviewer) = &config.github_default_reviewer {
        hosting.request_reviewers(created.number, std::slice::from_ref(reviewer)).await?;
    }

    record.pr_number = Some(created.number);
    record.pr_metadata = Some(PrMetadata::new(title, body).with_labels(labels));
    record.set_status(WorkflowStatus::InReview)?;
    Ok(())
}

fn commit_and_push(worktree_path: &Option<String>, branch: &str, message_template: &str, issue_id: &str) -> Result<()> {
    let path = worktree_path.clone().ok_or_else(|| Error::PreconditionFailed("no worktree to commit from".into()))?;
    let message = message_template.replace("{issue_id}", issue_id);

    let add = Command::new("git").current_dir(&path).args(["add", "-A"]).output()?;
    if !add.status.success() {
        return Err(Error::external(false, "git add failed"));
    }

    let status = Command::new("git").current_dir(&path).args(["status", "--porcelain"]).output()?;
    if !String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        let commit = Command::new("git").current_dir(&path).args(["commit", "-m", &message]).output()?;
        if !commit.status.success() {
            return Err(Error::external(false, format!("git commit failed: {}", String::from_utf8_lossy(&commit.stderr))));
        }
    }

    let push = Command::new("git").current_dir(&path).args(["push", "-u", "origin", branch]).output()?;
    if !push.status.success() {
        return Err(Error::external(true, format!("git push failed: {}", String::from_utf8_lossy(&push.stderr))));
    }
    Ok(())
}

fn build_pr_body(record: &WorkflowRecord, config: &Config) -> String {
    let mut body = String::new();
    if let Some(summary) = &record.last_response_summary {
        body.push_str(summary);
    } else {
        body.push_str(&format!("Implements {}.", record.issue.title));
    }
    body.push_str(&format!("\n\nCloses {}\n", record.issue_id));
    if let Some(test_cmd) = &config.test_command {
        body.push_str(&format!("\n## Testing\n- [ ] `{test_cmd}` passes\n"));
    }
    body
}

/// SPEC_FULL §2b "PR label inference": beyond copying the issue's own
/// labels, infer `tests`/`documentation` from the generator's file-changes
/// list so a PR that only touched docs or specs is labeled as such.
fn determine_labels(record: &WorkflowRecord) -> Vec<String> {
    let mut labels = record.issue.labels.clone();
    labels.push("ai-implemented".to_string());

    let touches_tests = record.last_file_changes.iter().any(|c| {
        let lower = c.path.to_ascii_lowercase();
        lower.contains("test") || lower.contains("spec")
    });
    let touches_docs = record.last_file_changes.iter().any(|c| {
        let lower = c.path.to_ascii_lowercase();
        lower.contains("readme") || lower.contains("docs/") || lower.ends_with(".md")
    });

    if touches_tests && !labels.iter().any(|l| l == "tests") {
        labels.push("tests".to_string());
    }
    if touches_docs && !labels.iter().any(|l| l == "documentation") {
        labels.push("documentation".to_string());
    }
    labels
}

#[instrument(skip(hosting))]
pub async fn run_merge(
    record: &mut WorkflowRecord,
    hosting: &dyn HostingService,
    force: bool,
    strategy: crate::pr::MergeStrategy,
) -> Result<()> {
    let pr_number = record.pr_number.ok_or_else(|| Error::PreconditionFailed("no open PR to merge".into()))?;

    if !force {
        let status = hosting.get_pr_status(pr_number).await?;
        if status.review_decision.as_deref() != Some("approved") {
            return Err(Error::PreconditionFailed("PR is not approved".into()));
        }
        if status.checks_passing == Some(false) {
            return Err(Error::PreconditionFailed("PR checks are not green".into()));
        }
    }

    record.set_status(WorkflowStatus::ReadyToMerge)?;
    hosting.merge_pr(pr_number, strategy).await?;
    record.set_status(WorkflowStatus::Completed)?;
    Ok(())
}

#[instrument]
pub async fn run_cleanup(record: &mut WorkflowRecord, config: &Config) -> Result<()> {
    if let Some(path) = record.worktree_path.clone() {
        let branch = record.branch.clone().unwrap_or_default();
        let mut worktree = crate::worktree::Worktree::new(&record.issue_id, path, branch, &record.repository.default_branch);
        remove_worktree(&mut worktree, true)?;
        record.worktree_path = None;
    }
    if config.delete_branch_after_merge {
        if let Some(branch) = &record.branch {
            delete_remote_branch(branch)?;
        }
    }
    record.touch();
    Ok(())
}

/// Delete the pushed remote branch. Idempotent: a branch that is already
/// gone (or was never pushed) is not an error.
fn delete_remote_branch(branch: &str) -> Result<()> {
    let output = Command::new("git").args(["push", "origin", "--delete", branch]).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("remote ref does not exist") {
            return Ok(());
        }
        return Err(Error::external(true, format!("failed to delete remote branch {branch}: {stderr}")));
    }
    Ok(())
}

/// Auto-resolve trivial review threads, gated by configuration (§2b supplement).
pub fn threads_eligible_for_auto_resolution(
    processed: &[comment_analyzer::ProcessedComment],
    enabled: bool,
) -> Vec<String> {
    if !enabled {
        return vec![];
    }
    processed.iter().filter(|p| p.auto_resolvable).map(|p| p.comment_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_owner_repo_handles_ssh_remote() {
        let (owner, name) = parse_owner_repo("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(name, "widgets");
    }

    #[test]
    fn parse_owner_repo_handles_https_remote() {
        let (owner, name) = parse_owner_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(name, "widgets");
    }

    #[test]
    fn auto_resolution_is_disabled_by_default() {
        let result = threads_eligible_for_auto_resolution(&[], false);
        assert!(result.is_empty());
    }

    fn sample_record() -> WorkflowRecord {
        let repository = Repository {
            owner: "acme".into(),
            name: "widgets".into(),
            default_branch: "main".into(),
            remote_url: "git@github.com:acme/widgets.git".into(),
        };
        let issue = crate::workflow::Issue {
            id: "#1".into(),
            provider: crate::identifier::Provider::Github,
            title: "title".into(),
            description: "desc".into(),
            status: crate::workflow::IssueStatus::Open,
            issue_type: crate::workflow::IssueType::Bug,
            assignee: None,
            labels: vec!["priority:high".to_string()],
            url: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        WorkflowRecord::new("#1", repository, issue)
    }

    #[test]
    fn labels_infer_tests_and_documentation_from_file_changes() {
        use crate::generator::{FileAction, FileChange};

        let mut record = sample_record();
        record.last_file_changes = vec![
            FileChange { path: "tests/widget_test.rs".into(), action: FileAction::Create, description: None },
            FileChange { path: "README.md".into(), action: FileAction::Modify, description: None },
        ];

        let labels = determine_labels(&record);
        assert!(labels.contains(&"ai-implemented".to_string()));
        assert!(labels.contains(&"tests".to_string()));
        assert!(labels.contains(&"documentation".to_string()));
        assert!(labels.contains(&"priority:high".to_string()));
    }

    #[test]
    fn labels_do_not_infer_tests_or_docs_without_matching_file_changes() {
        use crate::generator::{FileAction, FileChange};

        let mut record = sample_record();
        record.last_file_changes = vec![FileChange { path: "src/lib.rs".into(), action: FileAction::Modify, description: None }];

        let labels = determine_labels(&record);
        assert!(!labels.contains(&"tests".to_string()));
        assert!(!labels.contains(&"documentation".to_string()));
    }
}
