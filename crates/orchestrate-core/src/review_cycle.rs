//! Review Cycle Engine (C7): the bounded iterative loop between opening and
//! merging a PR. This module holds the persisted state and the pure decision
//! logic; the actual polling/dispatch lives in the pipeline controller, which
//! owns the hosting-service and generator clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::ReviewComment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCycleStatus {
    Pending,
    MachineReviewInProgress,
    WaitingForHuman,
    HumanReviewReceived,
    MachineUpdateInProgress,
    ChangesRequested,
    Approved,
    MaxIterationsReached,
    Failed,
}

impl ReviewCycleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewCycleStatus::Approved | ReviewCycleStatus::Failed | ReviewCycleStatus::MaxIterationsReached)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReviewRecord {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub comments_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanReviewRecord {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub state: String,
    pub body: String,
    pub review_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycleState {
    pub pr_number: i64,
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: ReviewCycleStatus,
    pub machine_reviews: Vec<MachineReviewRecord>,
    pub human_reviews: Vec<HumanReviewRecord>,
    pub unresolved_comments: Vec<ReviewComment>,
    pub last_activity: DateTime<Utc>,
    /// §9 resolution: when false, a PR can be approved with zero human
    /// approvals as long as no reviewer requested changes and no comments
    /// are unresolved.
    pub require_human_approval: bool,
}

impl ReviewCycleState {
    pub fn new(pr_number: i64, max_iterations: u32, require_human_approval: bool) -> Self {
        Self {
            pr_number,
            iteration: 0,
            max_iterations,
            status: ReviewCycleStatus::Pending,
            machine_reviews: vec![],
            human_reviews: vec![],
            unresolved_comments: vec![],
            last_activity: Utc::now(),
            require_human_approval,
        }
    }

    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.last_activity = Utc::now();
        self.iteration
    }

    pub fn at_iteration_bound(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn record_machine_review(&mut self, comments_count: usize, error: Option<String>) {
        self.machine_reviews.push(MachineReviewRecord {
            iteration: self.iteration,
            timestamp: Utc::now(),
            comments_count,
            error,
        });
        self.last_activity = Utc::now();
    }

    /// True once a machine review has already been posted for the current
    /// iteration, so re-entry after a crash does not double-post.
    pub fn has_machine_review_for_current_iteration(&self) -> bool {
        self.machine_reviews.iter().any(|r| r.iteration == self.iteration)
    }

    pub fn record_human_review(&mut self, author: String, state: String, body: String, review_id: String) {
        self.human_reviews.push(HumanReviewRecord {
            iteration: self.iteration,
            timestamp: Utc::now(),
            author,
            state,
            body,
            review_id,
        });
        self.last_activity = Utc::now();
    }
}

/// Decide the next status given the latest review signal. `any_approved` and
/// `any_changes_requested` summarize the latest review per non-bot author.
pub fn check_cycle_completion(
    any_approved: bool,
    any_changes_requested: bool,
    unresolved_comment_count: usize,
    require_human_approval: bool,
) -> ReviewCycleStatus {
    let approval_satisfied = if require_human_approval { any_approved } else { true };

    if approval_satisfied && !any_changes_requested && unresolved_comment_count == 0 {
        return ReviewCycleStatus::Approved;
    }
    if any_changes_requested || unresolved_comment_count > 0 {
        return ReviewCycleStatus::ChangesRequested;
    }
    ReviewCycleStatus::WaitingForHuman
}
