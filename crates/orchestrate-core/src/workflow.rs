//! Core data model: issues, repositories, and the per-issue workflow record
//! that the whole pipeline reads and mutates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generator::FileChange;
use crate::identifier::Provider;
use crate::pr::PrMetadata;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Feature,
    Bug,
    Enhancement,
    Hotfix,
    Task,
    Unknown,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Feature => "feature",
            IssueType::Bug => "bug",
            IssueType::Enhancement => "enhancement",
            IssueType::Hotfix => "hotfix",
            IssueType::Task => "task",
            IssueType::Unknown => "unknown",
        }
    }

    /// Conventional-commit style prefix used by PR titles and commit messages.
    pub fn title_prefix(&self) -> &'static str {
        match self {
            IssueType::Feature => "feat:",
            IssueType::Bug => "fix:",
            IssueType::Enhancement => "enhance:",
            IssueType::Hotfix => "hotfix:",
            IssueType::Task => "chore:",
            IssueType::Unknown => "chore:",
        }
    }
}

/// An issue fetched from the hosting service. Read-only within this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub provider: Provider,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
    pub issue_type: IssueType,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The repository a workflow operates against, detected once per workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub remote_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Fetching,
    Implementing,
    CreatingPr,
    InReview,
    ReadyToMerge,
    Completed,
    Failed,
}

impl WorkflowStatus {
    fn rank(&self) -> u8 {
        match self {
            WorkflowStatus::Pending => 0,
            WorkflowStatus::Fetching => 1,
            WorkflowStatus::Implementing => 2,
            WorkflowStatus::CreatingPr => 3,
            WorkflowStatus::InReview => 4,
            WorkflowStatus::ReadyToMerge => 5,
            WorkflowStatus::Completed => 6,
            WorkflowStatus::Failed => 7,
        }
    }

    /// True when moving from `self` to `next` respects the monotone chain
    /// (or is the single allowed `-> failed` edge).
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        if next == WorkflowStatus::Failed {
            return *self != WorkflowStatus::Completed && *self != WorkflowStatus::Failed;
        }
        next.rank() >= self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// True when this status has already reached or passed `other` in the
    /// pipeline's forward order (used by stage runners to skip finished work).
    pub fn is_at_least(&self, other: WorkflowStatus) -> bool {
        self.rank() >= other.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    NotStarted,
    InProgress,
    Implemented,
    Failed,
}

/// Persisted, per-issue workflow state. One record is the unit of durability
/// and the unit of locking in the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub issue_id: String,
    pub repository: Repository,
    pub issue: Issue,
    pub status: WorkflowStatus,
    pub ai_status: AiStatus,
    pub worktree_path: Option<String>,
    pub branch: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_metadata: Option<PrMetadata>,
    pub last_response_summary: Option<String>,
    #[serde(default)]
    pub last_file_changes: Vec<FileChange>,
    pub review_cycle: Option<crate::review_cycle::ReviewCycleState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl WorkflowRecord {
    pub fn new(issue_id: impl Into<String>, repository: Repository, issue: Issue) -> Self {
        let now = Utc::now();
        Self {
            issue_id: issue_id.into(),
            repository,
            issue,
            status: WorkflowStatus::Pending,
            ai_status: AiStatus::NotStarted,
            worktree_path: None,
            branch: None,
            pr_number: None,
            pr_metadata: None,
            last_response_summary: None,
            last_file_changes: Vec::new(),
            review_cycle: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Advance `status`, enforcing the monotone-transition invariant.
    pub fn set_status(&mut self, status: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::Internal(format!(
                "invalid workflow transition: {:?} -> {:?}",
                self.status, status
            )));
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.metadata.insert("error".to_string(), message.into());
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSide {
    Left,
    Right,
}

/// A review comment as fetched from the hosting service. Treated as an
/// immutable snapshot once read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u32>,
    pub start_line: Option<u32>,
    pub side: CommentSide,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrReview {
    pub id: String,
    pub state: ReviewState,
    pub body: String,
    pub author: String,
    pub submitted_at: DateTime<Utc>,
}

impl PrReview {
    /// The documented bot-author suffix, plus the one hardcoded hosting-service bot login.
    pub fn is_bot_author(author: &str, extra_allowlist: &[String]) -> bool {
        author.ends_with("[bot]") || extra_allowlist.iter().any(|a| a == author)
    }
}
