//! GitHub hosting-service client, implemented as a thin wrapper around the
//! `gh` CLI. Every operation shells out and parses `gh`'s JSON output.

use std::process::Command;

use async_trait::async_trait;
use chrono::Utc;
use orchestrate_core::hosting::{CreatedPr, HostingService, IssueFilter, PrStatusInfo, ReviewEvent};
use orchestrate_core::identifier::{IssueId, Provider};
use orchestrate_core::pr::MergeStrategy;
use orchestrate_core::workflow::{CommentSide, Issue, IssueStatus, IssueType, PrReview, ReviewComment, ReviewState};
use orchestrate_core::{Error, Result};
use serde::Deserialize;

pub struct GitHubClient {
    pub owner: String,
    pub repo: String,
}

impl GitHubClient {
    /// Build a client by asking `gh` for the repository it is currently
    /// authenticated against.
    pub fn from_current_repo() -> Result<Self> {
        #[derive(Deserialize)]
        struct RepoInfo {
            owner: Owner,
            name: String,
        }
        #[derive(Deserialize)]
        struct Owner {
            login: String,
        }

        let output = run_gh(&["repo", "view", "--json", "owner,name"])?;
        let info: RepoInfo = serde_json::from_str(&output)
            .map_err(|e| Error::external(false, format!("unparseable gh repo view output: {e}")))?;
        Ok(Self { owner: info.owner.login, repo: info.name })
    }

    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self { owner: owner.into(), repo: repo.into() }
    }
}

fn run_gh(args: &[&str]) -> Result<String> {
    let output = Command::new("gh")
        .args(args)
        .output()
        .map_err(|e| Error::external(false, format!("failed to invoke gh: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let transient = stderr.contains("rate limit") || stderr.contains("timeout") || stderr.contains("502") || stderr.contains("503");
        return Err(Error::external(transient, format!("gh {args:?} failed: {stderr}")));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Deserialize)]
struct GhIssue {
    number: i64,
    title: String,
    body: Option<String>,
    state: String,
    labels: Vec<GhLabel>,
    assignees: Vec<GhUser>,
    url: String,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

fn infer_issue_type(labels: &[String]) -> IssueType {
    for label in labels {
        let lower = label.to_ascii_lowercase();
        match lower.as_str() {
            "bug" => return IssueType::Bug,
            "enhancement" => return IssueType::Enhancement,
            "feature" => return IssueType::Feature,
            "hotfix" => return IssueType::Hotfix,
            "task" | "chore" => return IssueType::Task,
            _ => {}
        }
    }
    IssueType::Unknown
}

fn gh_issue_into_issue(gh: GhIssue) -> Issue {
    let labels: Vec<String> = gh.labels.into_iter().map(|l| l.name).collect();
    let issue_type = infer_issue_type(&labels);
    Issue {
        id: format!("#{}", gh.number),
        provider: Provider::Github,
        title: gh.title,
        description: gh.body.unwrap_or_default(),
        status: if gh.state.eq_ignore_ascii_case("open") { IssueStatus::Open } else { IssueStatus::Closed },
        issue_type,
        assignee: gh.assignees.into_iter().next().map(|u| u.login),
        labels,
        url: Some(gh.url),
        created_at: gh.created_at,
        updated_at: gh.updated_at,
    }
}

#[async_trait]
impl HostingService for GitHubClient {
    async fn fetch_issue(&self, id: &IssueId) -> Result<Issue> {
        if id.provider != Provider::Github {
            return Err(Error::PreconditionFailed(format!("{} requires the github provider", id.value)));
        }
        let number = id.value.trim_start_matches('#');
        let raw = run_gh(&[
            "issue", "view", number,
            "--json", "number,title,body,state,labels,assignees,url,createdAt,updatedAt",
        ])?;
        let gh: GhIssue = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable issue payload: {e}")))?;
        Ok(gh_issue_into_issue(gh))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut args = vec![
            "issue".to_string(), "list".to_string(),
            "--json".to_string(), "number,title,body,state,labels,assignees,url,createdAt,updatedAt".to_string(),
        ];
        if let Some(state) = &filter.state {
            args.push("--state".into());
            args.push(state.clone());
        }
        if let Some(assignee) = &filter.assignee {
            args.push("--assignee".into());
            args.push(assignee.clone());
        }
        for label in &filter.labels {
            args.push("--label".into());
            args.push(label.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let raw = run_gh(&arg_refs)?;
        let issues: Vec<GhIssue> = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable issue list payload: {e}")))?;
        Ok(issues.into_iter().map(gh_issue_into_issue).collect())
    }

    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str, draft: bool) -> Result<CreatedPr> {
        let mut args = vec!["pr", "create", "--title", title, "--body", body, "--base", base, "--head", head];
        if draft {
            args.push("--draft");
        }
        run_gh(&args)?;

        let raw = run_gh(&["pr", "view", head, "--json", "number,url"])?;
        #[derive(Deserialize)]
        struct Created {
            number: i64,
            url: String,
        }
        let created: Created = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable pr view payload: {e}")))?;
        Ok(CreatedPr { number: created.number, url: created.url })
    }

    async fn set_labels(&self, pr: i64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let joined = labels.join(",");
        run_gh(&["pr", "edit", &pr.to_string(), "--add-label", &joined])?;
        Ok(())
    }

    async fn set_assignees(&self, pr: i64, users: &[String]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        let joined = users.join(",");
        run_gh(&["pr", "edit", &pr.to_string(), "--add-assignee", &joined])?;
        Ok(())
    }

    async fn request_reviewers(&self, pr: i64, users: &[String]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        let joined = users.join(",");
        run_gh(&["pr", "edit", &pr.to_string(), "--add-reviewer", &joined])?;
        Ok(())
    }

    async fn get_pr_reviews(&self, pr: i64) -> Result<Vec<PrReview>> {
        #[derive(Deserialize)]
        struct GhReview {
            id: String,
            state: String,
            body: String,
            author: GhUser,
            #[serde(rename = "submittedAt")]
            submitted_at: Option<chrono::DateTime<Utc>>,
        }

        let raw = run_gh(&["pr", "view", &pr.to_string(), "--json", "reviews"])?;
        #[derive(Deserialize)]
        struct ReviewsPayload {
            reviews: Vec<GhReview>,
        }
        let payload: ReviewsPayload = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable reviews payload: {e}")))?;

        Ok(payload
            .reviews
            .into_iter()
            .map(|r| PrReview {
                id: r.id,
                state: parse_review_state(&r.state),
                body: r.body,
                author: r.author.login,
                submitted_at: r.submitted_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn get_pr_comments(&self, pr: i64) -> Result<Vec<ReviewComment>> {
        #[derive(Deserialize)]
        struct GhComment {
            id: String,
            body: String,
            path: Option<String>,
            line: Option<u32>,
            #[serde(rename = "startLine")]
            start_line: Option<u32>,
            author: GhUser,
            #[serde(rename = "createdAt")]
            created_at: chrono::DateTime<Utc>,
            #[serde(rename = "updatedAt")]
            updated_at: chrono::DateTime<Utc>,
            #[serde(rename = "isResolved", default)]
            is_resolved: bool,
        }

        let raw = run_gh(&["pr", "view", &pr.to_string(), "--json", "comments"])?;
        #[derive(Deserialize)]
        struct CommentsPayload {
            comments: Vec<GhComment>,
        }
        let payload: CommentsPayload = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable comments payload: {e}")))?;

        Ok(payload
            .comments
            .into_iter()
            .map(|c| ReviewComment {
                id: c.id,
                body: c.body,
                path: c.path,
                line: c.line,
                start_line: c.start_line,
                side: CommentSide::Right,
                author: c.author.login,
                created_at: c.created_at,
                updated_at: c.updated_at,
                resolved: c.is_resolved,
            })
            .collect())
    }

    async fn post_review(
        &self,
        pr: i64,
        body: &str,
        _comments: &[(String, u32, String)],
        event: ReviewEvent,
    ) -> Result<PrReview> {
        let event_arg = match event {
            ReviewEvent::Comment => "--comment",
            ReviewEvent::Approve => "--approve",
            ReviewEvent::RequestChanges => "--request-changes",
        };
        run_gh(&["pr", "review", &pr.to_string(), event_arg, "--body", body])?;

        Ok(PrReview {
            id: format!("review-{pr}-{}", Utc::now().timestamp()),
            state: match event {
                ReviewEvent::Comment => ReviewState::Commented,
                ReviewEvent::Approve => ReviewState::Approved,
                ReviewEvent::RequestChanges => ReviewState::ChangesRequested,
            },
            body: body.to_string(),
            author: "machine-reviewer".to_string(),
            submitted_at: Utc::now(),
        })
    }

    async fn update_pr_body(&self, pr: i64, body: &str) -> Result<()> {
        run_gh(&["pr", "edit", &pr.to_string(), "--body", body])?;
        Ok(())
    }

    async fn get_pr_status(&self, pr: i64) -> Result<PrStatusInfo> {
        #[derive(Deserialize)]
        struct GhStatus {
            state: String,
            mergeable: Option<String>,
            #[serde(rename = "reviewDecision")]
            review_decision: Option<String>,
        }
        let raw = run_gh(&["pr", "view", &pr.to_string(), "--json", "state,mergeable,reviewDecision"])?;
        let status: GhStatus = serde_json::from_str(&raw)
            .map_err(|e| Error::external(false, format!("unparseable pr status payload: {e}")))?;

        let checks_raw = run_gh(&["pr", "checks", &pr.to_string(), "--json", "conclusion"]).ok();
        let checks_passing = checks_raw.map(|raw| {
            #[derive(Deserialize)]
            struct CheckRow {
                conclusion: Option<String>,
            }
            serde_json::from_str::<Vec<CheckRow>>(&raw)
                .map(|checks| checks.iter().all(|c| c.conclusion.as_deref() == Some("SUCCESS")))
                .unwrap_or(true)
        });

        Ok(PrStatusInfo {
            state: status.state,
            mergeable: status.mergeable.map(|m| m.eq_ignore_ascii_case("mergeable")),
            review_decision: status.review_decision.map(|d| d.to_ascii_lowercase()),
            checks_passing,
        })
    }

    async fn merge_pr(&self, pr: i64, method: MergeStrategy) -> Result<()> {
        let strategy_flag = match method {
            MergeStrategy::Squash => "--squash",
            MergeStrategy::Rebase => "--rebase",
            MergeStrategy::Merge => "--merge",
        };
        run_gh(&["pr", "merge", &pr.to_string(), strategy_flag])?;
        Ok(())
    }

    async fn add_pr_comment(&self, pr: i64, body: &str) -> Result<()> {
        run_gh(&["pr", "comment", &pr.to_string(), "--body", body])?;
        Ok(())
    }
}

fn parse_review_state(state: &str) -> ReviewState {
    match state.to_ascii_uppercase().as_str() {
        "APPROVED" => ReviewState::Approved,
        "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
        "DISMISSED" => ReviewState::Dismissed,
        _ => ReviewState::Commented,
    }
}
