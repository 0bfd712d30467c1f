//! End-to-end tests for the pipeline controller and review cycle engine,
//! exercised against in-memory fakes of the hosting service and the
//! generator. Stages that would shell out to `git` (worktree creation, PR
//! branch push) are steered around by pre-populating `worktree_path`/`branch`
//! on the workflow record, since those stages are no-ops once that state is
//! already present.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use orchestrate_core::{
    stages, AiResponse, AiStatus, CancellationToken, CommentSide, Config, CreatedPr, Error,
    FileAction, FileChange, Generator, GeneratorRequest, HostingService, Issue, IssueFilter,
    IssueStatus, IssueType, MergeStrategy, PipelineController, PrReview, PrStatusInfo, Provider,
    Repository, Result as CoreResult, ReviewComment, ReviewCycleStatus, ReviewEvent, ReviewState,
    StateStore, WorkflowRecord, WorkflowStatus,
};

fn sample_repository() -> Repository {
    Repository {
        owner: "acme".into(),
        name: "widgets".into(),
        default_branch: "main".into(),
        remote_url: "git@github.com:acme/widgets.git".into(),
    }
}

fn sample_issue() -> Issue {
    Issue {
        id: "#42".into(),
        provider: Provider::Github,
        title: "Widget explodes on click".into(),
        description: "Clicking the widget throws an unhandled exception.".into(),
        status: IssueStatus::Open,
        issue_type: IssueType::Bug,
        assignee: None,
        labels: vec!["bug".into()],
        url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn in_review_record() -> WorkflowRecord {
    let mut record = WorkflowRecord::new("#42", sample_repository(), sample_issue());
    record.set_status(WorkflowStatus::Fetching).unwrap();
    record.set_status(WorkflowStatus::Implementing).unwrap();
    record.set_status(WorkflowStatus::CreatingPr).unwrap();
    record.set_status(WorkflowStatus::InReview).unwrap();
    record.pr_number = Some(101);
    record
}

fn sample_review(state: ReviewState, author: &str, id: &str) -> PrReview {
    PrReview { id: id.into(), state, body: String::new(), author: author.into(), submitted_at: Utc::now() }
}

fn sample_comment(id: &str, body: &str, resolved: bool) -> ReviewComment {
    ReviewComment {
        id: id.into(),
        body: body.into(),
        path: Some("src/widget.rs".into()),
        line: Some(10),
        start_line: None,
        side: CommentSide::Right,
        author: "reviewer".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        resolved,
    }
}

/// A scripted `HostingService`: each call to `get_pr_reviews`/`get_pr_comments`
/// pops the next scripted value off its queue and repeats the last one once
/// the queue is drained, so a review cycle that runs a few extra polling
/// passes doesn't panic on an empty queue.
#[derive(Default)]
struct FakeHosting {
    review_batches: Mutex<VecDeque<Vec<PrReview>>>,
    comment_batches: Mutex<VecDeque<Vec<ReviewComment>>>,
    pr_status: Mutex<Option<PrStatusInfo>>,
    merge_calls: Mutex<Vec<MergeStrategy>>,
    posted_reviews: Mutex<u32>,
    posted_comments: Mutex<Vec<String>>,
}

impl FakeHosting {
    fn with_reviews(mut self, batches: Vec<Vec<PrReview>>) -> Self {
        self.review_batches = Mutex::new(batches.into());
        self
    }

    fn with_comments(mut self, batches: Vec<Vec<ReviewComment>>) -> Self {
        self.comment_batches = Mutex::new(batches.into());
        self
    }

    fn with_pr_status(mut self, status: PrStatusInfo) -> Self {
        self.pr_status = Mutex::new(Some(status));
        self
    }

    fn pop_or_repeat<T: Clone>(queue: &Mutex<VecDeque<Vec<T>>>) -> Vec<T> {
        let mut guard = queue.lock().unwrap();
        match guard.pop_front() {
            Some(batch) => {
                if guard.is_empty() {
                    guard.push_back(batch.clone());
                }
                batch
            }
            None => vec![],
        }
    }
}

#[async_trait]
impl HostingService for FakeHosting {
    async fn fetch_issue(&self, _id: &orchestrate_core::IssueId) -> CoreResult<Issue> {
        Ok(sample_issue())
    }

    async fn list_issues(&self, _filter: &IssueFilter) -> CoreResult<Vec<Issue>> {
        Ok(vec![sample_issue()])
    }

    async fn create_pr(&self, _title: &str, _body: &str, _head: &str, _base: &str, _draft: bool) -> CoreResult<CreatedPr> {
        Ok(CreatedPr { number: 101, url: "https://github.com/acme/widgets/pull/101".into() })
    }

    async fn set_labels(&self, _pr: i64, _labels: &[String]) -> CoreResult<()> {
        Ok(())
    }

    async fn set_assignees(&self, _pr: i64, _users: &[String]) -> CoreResult<()> {
        Ok(())
    }

    async fn request_reviewers(&self, _pr: i64, _users: &[String]) -> CoreResult<()> {
        Ok(())
    }

    async fn get_pr_reviews(&self, _pr: i64) -> CoreResult<Vec<PrReview>> {
        Ok(Self::pop_or_repeat(&self.review_batches))
    }

    async fn get_pr_comments(&self, _pr: i64) -> CoreResult<Vec<ReviewComment>> {
        Ok(Self::pop_or_repeat(&self.comment_batches))
    }

    async fn post_review(&self, _pr: i64, body: &str, _comments: &[(String, u32, String)], _event: ReviewEvent) -> CoreResult<PrReview> {
        *self.posted_reviews.lock().unwrap() += 1;
        let mut review = sample_review(ReviewState::Commented, "ai-reviewer[bot]", "machine-review");
        review.body = body.to_string();
        Ok(review)
    }

    async fn update_pr_body(&self, _pr: i64, _body: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn get_pr_status(&self, _pr: i64) -> CoreResult<PrStatusInfo> {
        self.pr_status.lock().unwrap().clone().ok_or_else(|| Error::NotFound("no pr status scripted".into()))
    }

    async fn merge_pr(&self, _pr: i64, method: MergeStrategy) -> CoreResult<()> {
        self.merge_calls.lock().unwrap().push(method);
        Ok(())
    }

    async fn add_pr_comment(&self, _pr: i64, body: &str) -> CoreResult<()> {
        self.posted_comments.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

enum ScriptedOutcome {
    Transient,
    Success(String),
}

/// A scripted `Generator`: pops one outcome per call, repeating the last
/// scripted outcome once the script is exhausted.
struct FakeGenerator {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Mutex<u32>,
}

impl FakeGenerator {
    fn new(script: Vec<ScriptedOutcome>) -> Self {
        Self { script: Mutex::new(script.into()), calls: Mutex::new(0) }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn invoke(&self, _request: GeneratorRequest) -> CoreResult<AiResponse> {
        *self.calls.lock().unwrap() += 1;
        let mut guard = self.script.lock().unwrap();
        let outcome = if guard.len() > 1 { guard.pop_front().unwrap() } else {
            match guard.front() {
                Some(ScriptedOutcome::Success(s)) => ScriptedOutcome::Success(s.clone()),
                _ => ScriptedOutcome::Transient,
            }
        };
        match outcome {
            ScriptedOutcome::Transient => Err(Error::external(true, "ai backend briefly unavailable")),
            ScriptedOutcome::Success(raw) => Ok(AiResponse {
                success: true,
                summary: "scripted summary".into(),
                file_changes: vec![FileChange { path: "src/widget.rs".into(), action: FileAction::Modify, description: None }],
                commands: vec![],
                raw_output: raw,
            }),
        }
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.ai_command = "true".into();
    config
}

fn controller_with(hosting: FakeHosting, generator: FakeGenerator, config: Config) -> (PipelineController, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = StateStore::new(tmp.path().join(".auto").join("state")).unwrap();
    let controller = PipelineController::new(
        std::sync::Arc::new(hosting),
        std::sync::Arc::new(generator),
        store,
        config,
        tmp.path().to_path_buf(),
    );
    (controller, tmp)
}

#[tokio::test]
async fn happy_path_approves_on_first_iteration() {
    let hosting = FakeHosting::default()
        .with_reviews(vec![vec![sample_review(ReviewState::Approved, "alice", "r1")]])
        .with_comments(vec![vec![]]);
    let generator = FakeGenerator::new(vec![ScriptedOutcome::Success("machine review: looks fine".into())]);
    let (controller, _tmp) = controller_with(hosting, generator, test_config());

    let mut record = in_review_record();
    let cancel = CancellationToken::new();
    controller.run_review_cycle(&mut record, &cancel).await.unwrap();

    let cycle = record.review_cycle.expect("cycle state persisted");
    assert_eq!(cycle.status, ReviewCycleStatus::Approved);
    assert_eq!(cycle.iteration, 1);
}

#[tokio::test]
async fn changes_requested_triggers_update_cycle_then_approves_next_iteration() {
    let hosting = FakeHosting::default()
        .with_reviews(vec![
            vec![sample_review(ReviewState::ChangesRequested, "alice", "r1")],
            vec![sample_review(ReviewState::Approved, "alice", "r2")],
        ])
        .with_comments(vec![vec![sample_comment("c1", "please rename this variable", false)], vec![]]);
    let generator = FakeGenerator::new(vec![ScriptedOutcome::Success(
        "**IMPLEMENTATION SUMMARY:**\naddressed review feedback\n**FILES MODIFIED:**\n- src/widget.rs - modify\n".into(),
    )]);
    let mut config = test_config();
    config.max_review_iterations = 5;
    let (controller, _tmp) = controller_with(hosting, generator, config);

    let mut record = in_review_record();
    let cancel = CancellationToken::new();
    controller.run_review_cycle(&mut record, &cancel).await.unwrap();

    let cycle = record.review_cycle.expect("cycle state persisted");
    assert_eq!(cycle.status, ReviewCycleStatus::Approved);
    assert_eq!(cycle.iteration, 2);
}

#[tokio::test]
async fn unresolved_comments_exhaust_the_iteration_bound() {
    let hosting = FakeHosting::default()
        .with_reviews(vec![
            vec![sample_review(ReviewState::ChangesRequested, "alice", "r1")],
            vec![sample_review(ReviewState::ChangesRequested, "alice", "r2")],
        ])
        .with_comments(vec![
            vec![sample_comment("c1", "still broken", false)],
            vec![sample_comment("c2", "still broken", false)],
        ]);
    let generator = FakeGenerator::new(vec![ScriptedOutcome::Success("machine review: nit".into())]);
    let mut config = test_config();
    config.max_review_iterations = 2;
    let (controller, _tmp) = controller_with(hosting, generator, config);

    let mut record = in_review_record();
    let cancel = CancellationToken::new();
    controller.run_review_cycle(&mut record, &cancel).await.unwrap();

    let cycle = record.review_cycle.expect("cycle state persisted");
    assert_eq!(cycle.status, ReviewCycleStatus::MaxIterationsReached);
    assert_eq!(cycle.iteration, 2);
    assert!(record.pr_number.is_some(), "pr is left open, not merged, when the bound is hit");
}

#[tokio::test]
async fn resumed_record_round_trips_through_the_state_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = StateStore::new(tmp.path().join(".auto").join("state")).unwrap();

    let mut record = in_review_record();
    record.review_cycle = Some(orchestrate_core::ReviewCycleState::new(101, 10, true));
    record.review_cycle.as_mut().unwrap().begin_iteration();
    record.review_cycle.as_mut().unwrap().status = ReviewCycleStatus::WaitingForHuman;
    store.save(&record).unwrap();

    // A fresh `StateStore` pointed at the same directory stands in for a
    // crashed-and-restarted process picking the workflow back up.
    let reloaded_store = StateStore::new(tmp.path().join(".auto").join("state")).unwrap();
    let reloaded = reloaded_store.load(&record.issue_id).unwrap();

    assert_eq!(reloaded.status, WorkflowStatus::InReview);
    let cycle = reloaded.review_cycle.unwrap();
    assert_eq!(cycle.iteration, 1);
    assert_eq!(cycle.status, ReviewCycleStatus::WaitingForHuman);
}

#[tokio::test]
async fn transient_generator_failures_are_retried_until_success() {
    let generator = FakeGenerator::new(vec![
        ScriptedOutcome::Transient,
        ScriptedOutcome::Transient,
        ScriptedOutcome::Success("**IMPLEMENTATION SUMMARY:**\nfixed the widget\n".into()),
    ]);
    let mut config = test_config();
    config.ai_max_retries = 3;

    let mut record = WorkflowRecord::new("#42", sample_repository(), sample_issue());
    record.set_status(WorkflowStatus::Fetching).unwrap();
    record.set_status(WorkflowStatus::Implementing).unwrap();
    record.worktree_path = Some("/tmp/does-not-need-to-exist".into());
    record.branch = Some("auto/bug/#42".into());

    stages::run_implement(&mut record, &generator, &config).await.unwrap();

    assert_eq!(record.ai_status, AiStatus::Implemented);
    assert_eq!(generator.call_count(), 3);
}

#[tokio::test]
async fn exhausting_all_retries_fails_the_implement_stage() {
    let generator = FakeGenerator::new(vec![ScriptedOutcome::Transient]);
    let mut config = test_config();
    config.ai_max_retries = 2;

    let mut record = WorkflowRecord::new("#42", sample_repository(), sample_issue());
    record.set_status(WorkflowStatus::Fetching).unwrap();
    record.set_status(WorkflowStatus::Implementing).unwrap();
    record.worktree_path = Some("/tmp/does-not-need-to-exist".into());
    record.branch = Some("auto/bug/#42".into());

    let result = stages::run_implement(&mut record, &generator, &config).await;

    assert!(result.is_err());
    assert_eq!(record.ai_status, AiStatus::Failed);
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn malformed_generator_output_falls_back_to_freeform_without_failing_the_stage() {
    let generator = FakeGenerator::new(vec![ScriptedOutcome::Success(
        "I modified the file src/widget.rs to fix the null check. Run `cargo test` to verify.".into(),
    )]);
    let config = test_config();

    let mut record = WorkflowRecord::new("#42", sample_repository(), sample_issue());
    record.set_status(WorkflowStatus::Fetching).unwrap();
    record.set_status(WorkflowStatus::Implementing).unwrap();
    record.worktree_path = Some("/tmp/does-not-need-to-exist".into());
    record.branch = Some("auto/bug/#42".into());

    stages::run_implement(&mut record, &generator, &config).await.unwrap();

    assert_eq!(record.ai_status, AiStatus::Implemented);
    assert!(record.last_response_summary.is_some());
}

#[tokio::test]
async fn merge_is_blocked_without_approval_unless_forced() {
    let hosting = FakeHosting::default().with_pr_status(PrStatusInfo {
        state: "open".into(),
        mergeable: Some(true),
        review_decision: None,
        checks_passing: Some(true),
    });

    let mut record = in_review_record();

    let blocked = stages::run_merge(&mut record, &hosting, false, MergeStrategy::Squash).await;
    assert!(blocked.is_err());
    assert_eq!(record.status, WorkflowStatus::InReview);

    stages::run_merge(&mut record, &hosting, true, MergeStrategy::Squash).await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
}
