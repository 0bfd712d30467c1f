//! Abstract hosting-service interface (§6). A concrete implementation shells
//! out to a provider CLI; this crate only depends on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identifier::IssueId;
use crate::pr::MergeStrategy;
use crate::workflow::{Issue, PrReview, ReviewComment};
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPr {
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewEvent {
    Comment,
    Approve,
    RequestChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrStatusInfo {
    pub state: String,
    pub mergeable: Option<bool>,
    pub review_decision: Option<String>,
    pub checks_passing: Option<bool>,
}

/// The hosting-service RPC surface the rest of the system is written against.
#[async_trait]
pub trait HostingService: Send + Sync {
    async fn fetch_issue(&self, id: &IssueId) -> Result<Issue>;
    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    #[allow(clippy::too_many_arguments)]
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        draft: bool,
    ) -> Result<CreatedPr>;

    async fn set_labels(&self, pr: i64, labels: &[String]) -> Result<()>;
    async fn set_assignees(&self, pr: i64, users: &[String]) -> Result<()>;
    async fn request_reviewers(&self, pr: i64, users: &[String]) -> Result<()>;
    async fn get_pr_reviews(&self, pr: i64) -> Result<Vec<PrReview>>;
    async fn get_pr_comments(&self, pr: i64) -> Result<Vec<ReviewComment>>;

    async fn post_review(
        &self,
        pr: i64,
        body: &str,
        comments: &[(String, u32, String)],
        event: ReviewEvent,
    ) -> Result<PrReview>;

    async fn update_pr_body(&self, pr: i64, body: &str) -> Result<()>;
    async fn get_pr_status(&self, pr: i64) -> Result<PrStatusInfo>;
    async fn merge_pr(&self, pr: i64, method: MergeStrategy) -> Result<()>;
    async fn add_pr_comment(&self, pr: i64, body: &str) -> Result<()>;
}
