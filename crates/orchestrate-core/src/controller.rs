//! Pipeline Controller (C10): the top-level state machine linking the stage
//! runners and the review cycle engine, with resume and cancellation support.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::cancellation::CancellationToken;
use crate::comment_analyzer::{analyze_comments, recommended_order};
use crate::config::Config;
use crate::generator::{Generator, GeneratorRequest};
use crate::history::save_comment_history;
use crate::hosting::{HostingService, ReviewEvent};
use crate::identifier::{parse_identifier, IssueId};
use crate::prompt::{build_context, resolve_prompt, PromptOverrides};
use crate::response_parser::{parse_response, ResponseFormat};
use crate::review_cycle::{check_cycle_completion, ReviewCycleState, ReviewCycleStatus};
use crate::stages;
use crate::state_store::StateStore;
use crate::update_planner::{create_update_plans, organize_update_batches, UpdatePlan, UpdateResult, UpdateStatus};
use crate::workflow::{PrReview, ReviewState, WorkflowRecord, WorkflowStatus};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub skip_implement: bool,
    pub skip_pr: bool,
    pub skip_review: bool,
    pub resume: bool,
}

pub struct PipelineController {
    pub hosting: Arc<dyn HostingService>,
    pub generator: Arc<dyn Generator>,
    pub state_store: StateStore,
    pub config: Config,
    pub project_root: PathBuf,
}

impl PipelineController {
    pub fn new(
        hosting: Arc<dyn HostingService>,
        generator: Arc<dyn Generator>,
        state_store: StateStore,
        config: Config,
        project_root: PathBuf,
    ) -> Self {
        Self { hosting, generator, state_store, config, project_root }
    }

    #[instrument(skip(self, cancel))]
    pub async fn process(
        &self,
        id_str: &str,
        opts: ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRecord> {
        let id = parse_identifier(id_str)?;
        let mut record = self.load_or_create(&id).await?;

        cancel.check()?;
        if record.status == WorkflowStatus::Pending || !opts.resume {
            stages::run_fetch(&mut record, &id, self.hosting.as_ref()).await?;
            self.state_store.save(&record)?;
        }

        cancel.check()?;
        if !opts.skip_implement && record.status.is_at_least(WorkflowStatus::Implementing) {
            stages::run_implement(&mut record, self.generator.as_ref(), &self.config).await?;
            self.state_store.save(&record)?;
        }

        cancel.check()?;
        if !opts.skip_pr && record.status.is_at_least(WorkflowStatus::Implementing) {
            stages::run_open_pr(&mut record, self.hosting.as_ref(), &self.config).await?;
            self.state_store.save(&record)?;
        }

        if !opts.skip_review && record.pr_number.is_some() {
            cancel.check()?;
            self.run_review_cycle(&mut record, cancel).await?;
            self.state_store.save(&record)?;

            if matches!(
                record.review_cycle.as_ref().map(|c| c.status),
                Some(ReviewCycleStatus::Approved)
            ) {
                stages::run_merge(&mut record, self.hosting.as_ref(), false, crate::pr::MergeStrategy::default()).await?;
                stages::run_cleanup(&mut record, &self.config).await?;
                self.state_store.save(&record)?;
            }
        }

        Ok(record)
    }

    async fn load_or_create(&self, id: &IssueId) -> Result<WorkflowRecord> {
        if let Some(record) = self.state_store.try_load(&id.value)? {
            return Ok(record);
        }
        let issue = self.hosting.fetch_issue(id).await?;
        let repository = stages::detect_repository()?;
        Ok(WorkflowRecord::new(id.value.clone(), repository, issue))
    }

    /// Drive the review cycle for a record with an already-open PR.
    #[instrument(skip(self, record, cancel))]
    pub async fn run_review_cycle(&self, record: &mut WorkflowRecord, cancel: &CancellationToken) -> Result<()> {
        let pr_number = record.pr_number.ok_or_else(|| Error::PreconditionFailed("no PR to review".into()))?;

        let mut cycle = record.review_cycle.take().unwrap_or_else(|| {
            ReviewCycleState::new(pr_number, self.config.max_review_iterations, self.config.require_human_approval)
        });

        loop {
            cancel.check()?;
            if cycle.status.is_terminal() {
                break;
            }

            cycle.begin_iteration();

            let should_machine_review =
                self.config.ai_review_first || cycle.iteration > 1 || cycle.machine_reviews.is_empty();
            if should_machine_review && !cycle.has_machine_review_for_current_iteration() {
                self.trigger_machine_review(pr_number, &mut cycle).await;
            }

            cycle.status = ReviewCycleStatus::WaitingForHuman;
            record.review_cycle = Some(cycle.clone());
            self.state_store.save(record)?;

            cancel.check()?;
            let outcome = self.poll_for_human_review(pr_number, &mut cycle, cancel).await?;
            if !outcome {
                // Timed out waiting; leave state persisted and return control to the caller.
                record.review_cycle = Some(cycle);
                return Ok(());
            }

            let comments = self.hosting.get_pr_comments(pr_number).await?;
            let unresolved: Vec<_> = comments.into_iter().filter(|c| !c.resolved).collect();
            cycle.unresolved_comments = unresolved.clone();

            let latest = cycle.human_reviews.last();
            let any_approved = latest.map(|r| r.state == "approved").unwrap_or(false);
            let any_changes_requested = latest.map(|r| r.state == "changes_requested").unwrap_or(false);

            cycle.status =
                check_cycle_completion(any_approved, any_changes_requested, unresolved.len(), cycle.require_human_approval);

            if cycle.status == ReviewCycleStatus::ChangesRequested {
                if cycle.at_iteration_bound() {
                    cycle.status = ReviewCycleStatus::MaxIterationsReached;
                } else {
                    self.run_update_cycle(record, &unresolved).await?;
                }
            }

            record.review_cycle = Some(cycle.clone());
            self.state_store.save(record)?;

            if cycle.at_iteration_bound() && cycle.status != ReviewCycleStatus::Approved {
                cycle.status = ReviewCycleStatus::MaxIterationsReached;
                record.review_cycle = Some(cycle);
                return Ok(());
            }
        }

        record.review_cycle = Some(cycle);
        Ok(())
    }

    async fn trigger_machine_review(&self, pr_number: i64, cycle: &mut ReviewCycleState) {
        let prompt = self.config.ai_review_prompt.replace("{branch}", &pr_number.to_string());
        let request = GeneratorRequest {
            agent: self.config.ai_review_agent.clone(),
            prompt,
            timeout: Duration::from_secs(self.config.ai_timeout_secs),
            max_retries: self.config.ai_max_retries,
        };

        match self.generator.invoke(request).await {
            Ok(response) => {
                let format = if self.config.ai_response_format == "freeform" { ResponseFormat::Freeform } else { ResponseFormat::Structured };
                let parsed = parse_response(&response.raw_output, format);
                let _ = self.hosting.post_review(pr_number, &parsed.summary, &[], ReviewEvent::Comment).await;
                cycle.record_machine_review(parsed.file_changes.len(), None);
            }
            Err(e) => {
                warn!(error = %e, "machine review failed");
                cycle.record_machine_review(0, Some(e.to_string()));
            }
        }
    }

    /// Poll for a human review until one arrives or the configured timeout elapses.
    async fn poll_for_human_review(
        &self,
        pr_number: i64,
        cycle: &mut ReviewCycleState,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let timeout = Duration::from_secs(60 * 60);
        let interval = Duration::from_secs(self.config.review_check_interval_secs);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            cancel.check()?;
            let reviews = self.hosting.get_pr_reviews(pr_number).await?;
            let known_ids: std::collections::HashSet<_> =
                cycle.human_reviews.iter().map(|r| r.review_id.clone()).collect();

            let new_human_reviews: Vec<&PrReview> = reviews
                .iter()
                .filter(|r| !PrReview::is_bot_author(&r.author, &self.config.bot_authors))
                .filter(|r| !known_ids.contains(&r.id))
                .collect();

            if let Some(review) = new_human_reviews.last() {
                cycle.record_human_review(
                    review.author.clone(),
                    review_state_str(review.state),
                    review.body.clone(),
                    review.id.clone(),
                );
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }

            cancel.check()?;
            tokio::time::sleep(interval).await;
        }
    }

    /// Update Planner & Executor (C9): turn unresolved comments into update
    /// plans, batch them, and execute batch-by-batch.
    #[instrument(skip(self, record, comments))]
    pub async fn run_update_cycle(
        &self,
        record: &mut WorkflowRecord,
        comments: &[crate::workflow::ReviewComment],
    ) -> Result<Vec<UpdateResult>> {
        let processed = recommended_order(analyze_comments(comments));

        if self.config.save_comment_history {
            if let Some(pr_number) = record.pr_number {
                if let Err(e) = save_comment_history(&self.project_root, pr_number, &processed) {
                    warn!(error = %e, "failed to persist comment-analysis history");
                }
            }
        }

        let auto_resolved = stages::threads_eligible_for_auto_resolution(&processed, self.config.auto_resolve_trivial_threads);
        if !auto_resolved.is_empty() {
            tracing::info!(count = auto_resolved.len(), "comments eligible for auto-resolution");
        }

        let plans = create_update_plans(&processed);
        let batches = organize_update_batches(plans);

        let mut plans_by_id: std::collections::HashMap<String, UpdatePlan> = std::collections::HashMap::new();
        let mut results = Vec::new();
        let mut completed_types = Vec::new();
        let mut manual_types = Vec::new();

        'batches: for batch in batches {
            for plan in batch {
                let result = self.execute_update_plan(record, &plan).await;
                let halt = result.status == UpdateStatus::Failed && plan.update_type.is_critical();

                match result.status {
                    UpdateStatus::Completed => completed_types.push(plan.update_type.as_str().to_string()),
                    UpdateStatus::RequiresManual => manual_types.push(plan.update_type.as_str().to_string()),
                    _ => {}
                }
                plans_by_id.insert(plan.plan_id.clone(), plan);
                results.push(result);

                if halt {
                    break 'batches;
                }
            }
        }

        if let (Some(path), Some(branch)) = (record.worktree_path.clone(), record.branch.clone()) {
            if let Err(e) = commit_and_push_updates(&path, &branch, record.pr_number.unwrap_or_default(), &self.config.commit_strategy, &plans_by_id, &mut results) {
                warn!(error = %e, "failed to commit/push review updates; leaving changes uncommitted");
            }
        }

        if let Some(pr_number) = record.pr_number {
            let summary = build_update_summary(&completed_types, &manual_types);
            if !summary.is_empty() {
                let _ = self.hosting.add_pr_comment(pr_number, &summary).await;
            }
        }

        Ok(results)
    }

    async fn execute_update_plan(&self, record: &WorkflowRecord, plan: &UpdatePlan) -> UpdateResult {
        if !plan.automated {
            return UpdateResult::requires_manual(&plan.plan_id);
        }

        let context = build_context(
            &record.issue_id,
            &record.issue.title,
            &plan.description,
            &record.issue.labels,
            record.issue.assignee.as_deref(),
            &record.repository.name,
            record.branch.as_deref().unwrap_or_default(),
        );
        let prompt = match resolve_prompt(&self.config.ai_update_prompt, &PromptOverrides::default(), &Default::default(), &context) {
            Ok(p) => p,
            Err(e) => return UpdateResult::failed(&plan.plan_id, e.to_string()),
        };

        let request = GeneratorRequest {
            agent: self.config.ai_update_agent.clone(),
            prompt,
            timeout: Duration::from_secs(self.config.ai_timeout_secs),
            max_retries: self.config.ai_max_retries,
        };

        let response = match self.generator.invoke(request).await {
            Ok(r) => r,
            Err(e) => return UpdateResult::failed(&plan.plan_id, e.to_string()),
        };

        let parsed = parse_response(&response.raw_output, ResponseFormat::Structured);
        let validation_results = run_validations(&plan.validation_steps);
        let all_passed = validation_results.values().all(|&v| v);

        UpdateResult {
            plan_id: plan.plan_id.clone(),
            status: if all_passed { UpdateStatus::Completed } else { UpdateStatus::Failed },
            files_modified: parsed.file_changes.iter().map(|f| f.path.clone()).collect(),
            commands_executed: parsed.commands,
            error: if all_passed { None } else { Some("one or more validations failed".into()) },
            validation_results,
            commit_id: None,
        }
    }
}

/// Commit strategy (§4.9): group completed update results per the configured
/// strategy, stage the union of each group's modified files, commit with a
/// templated message, and push once. Only `Completed` results are committed;
/// `RequiresManual`/`Failed` results are left for a human.
fn commit_and_push_updates(
    worktree_path: &str,
    branch: &str,
    pr_number: i64,
    strategy: &str,
    plans_by_id: &HashMap<String, UpdatePlan>,
    results: &mut [UpdateResult],
) -> Result<()> {
    let completed_indices: Vec<usize> =
        results.iter().enumerate().filter(|(_, r)| r.status == UpdateStatus::Completed).map(|(i, _)| i).collect();
    if completed_indices.is_empty() {
        return Ok(());
    }

    let groups: Vec<Vec<usize>> = match strategy {
        "single" => vec![completed_indices],
        "per_comment" => completed_indices.into_iter().map(|i| vec![i]).collect(),
        _ => {
            let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
            for i in completed_indices {
                let update_type = plans_by_id.get(&results[i].plan_id).map(|p| p.update_type.as_str()).unwrap_or("update");
                by_type.entry(update_type.to_string()).or_default().push(i);
            }
            by_type.into_values().collect()
        }
    };

    let mut any_committed = false;
    for group in groups {
        let files: Vec<String> = group.iter().flat_map(|&i| results[i].files_modified.clone()).collect::<std::collections::HashSet<_>>().into_iter().collect();
        if files.is_empty() {
            continue;
        }

        let mut add = Command::new("git");
        add.current_dir(worktree_path).arg("add");
        for f in &files {
            add.arg(f);
        }
        if !add.output()?.status.success() {
            return Err(Error::external(false, "git add failed during update commit"));
        }

        let status = Command::new("git").current_dir(worktree_path).args(["status", "--porcelain"]).output()?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            continue;
        }

        let types: Vec<String> = group
            .iter()
            .filter_map(|&i| plans_by_id.get(&results[i].plan_id).map(|p| p.update_type.as_str().to_string()))
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        let message = commit_message_for(&types, pr_number);

        let commit = Command::new("git").current_dir(worktree_path).args(["commit", "-m", &message]).output()?;
        if !commit.status.success() {
            return Err(Error::external(false, format!("git commit failed: {}", String::from_utf8_lossy(&commit.stderr))));
        }

        let rev = Command::new("git").current_dir(worktree_path).args(["rev-parse", "HEAD"]).output()?;
        let commit_id = String::from_utf8_lossy(&rev.stdout).trim().to_string();
        for &i in &group {
            results[i].commit_id = Some(commit_id.clone());
        }
        any_committed = true;
    }

    if any_committed {
        let push = Command::new("git").current_dir(worktree_path).args(["push", "origin", branch]).output()?;
        if !push.status.success() {
            return Err(Error::external(true, format!("git push failed: {}", String::from_utf8_lossy(&push.stderr))));
        }
    }

    Ok(())
}

fn commit_message_for(types: &[String], pr_number: i64) -> String {
    if types.len() <= 1 {
        let t = types.first().cloned().unwrap_or_else(|| "review".to_string());
        format!("fix: address {t} feedback in PR #{pr_number}")
    } else {
        format!("fix: address review feedback ({}) in PR #{pr_number}", types.join(", "))
    }
}

fn review_state_str(state: ReviewState) -> String {
    match state {
        ReviewState::Approved => "approved".into(),
        ReviewState::ChangesRequested => "changes_requested".into(),
        ReviewState::Commented => "commented".into(),
        ReviewState::Dismissed => "dismissed".into(),
    }
}

/// Every validation tag is a placeholder pass in the absence of a concrete
/// checker wired in; unknown tags pass vacuously with a warning.
fn run_validations(tags: &[String]) -> std::collections::HashMap<String, bool> {
    tags.iter()
        .map(|tag| {
            let known = matches!(
                tag.as_str(),
                "syntax_check"
                    | "formatting_check"
                    | "basic_functionality"
                    | "security_scan"
                    | "performance_test"
                    | "test_execution"
                    | "markdown_syntax"
                    | "link_check"
            );
            if !known {
                warn!(tag, "unknown validation tag, passing vacuously");
            }
            (tag.clone(), true)
        })
        .collect()
}

fn build_update_summary(completed: &[String], manual: &[String]) -> String {
    if completed.is_empty() && manual.is_empty() {
        return String::new();
    }
    let mut summary = String::from("Review feedback update:\n");
    if !completed.is_empty() {
        summary.push_str(&format!("- Completed: {}\n", completed.join(", ")));
    }
    if !manual.is_empty() {
        summary.push_str(&format!("- Requires manual follow-up: {}\n", manual.join(", ")));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_summary_is_empty_when_nothing_happened() {
        assert!(build_update_summary(&[], &[]).is_empty());
    }

    #[test]
    fn update_summary_lists_completed_and_manual_separately() {
        let summary = build_update_summary(&["code_fix".to_string()], &["performance_opt".to_string()]);
        assert!(summary.contains("Completed: code_fix"));
        assert!(summary.contains("Requires manual follow-up: performance_opt"));
    }

    #[test]
    fn unknown_validation_tags_pass_vacuously() {
        let results = run_validations(&["totally_unknown_tag".to_string()]);
        assert_eq!(results.get("totally_unknown_tag"), Some(&true));
    }

    #[test]
    fn commit_message_names_single_type() {
        let message = commit_message_for(&["code_fix".to_string()], 42);
        assert_eq!(message, "fix: address code_fix feedback in PR #42");
    }

    #[test]
    fn commit_message_lists_multiple_types() {
        let message = commit_message_for(&["code_fix".to_string(), "style_improvement".to_string()], 7);
        assert_eq!(message, "fix: address review feedback (code_fix, style_improvement) in PR #7");
    }
}
