//! Pull request metadata attached to a workflow record.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Strategy used when merging a PR via the hosting service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Merge,
    Squash,
    Rebase,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Squash => "squash",
            MergeStrategy::Rebase => "rebase",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(MergeStrategy::Merge),
            "squash" => Ok(MergeStrategy::Squash),
            "rebase" => Ok(MergeStrategy::Rebase),
            _ => Err(Error::Internal(format!("unknown merge strategy: {s}"))),
        }
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Squash
    }
}

/// The metadata passed to the hosting service when opening or updating a PR.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrMetadata {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
    pub draft: bool,
}

impl PrMetadata {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { title: title.into(), body: body.into(), ..Default::default() }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_assignees(mut self, assignees: Vec<String>) -> Self {
        self.assignees = assignees;
        self
    }

    pub fn with_reviewers(mut self, reviewers: Vec<String>) -> Self {
        self.reviewers = reviewers;
        self
    }
}

/// GitHub's documented PR body length cap.
pub const MAX_PR_BODY_LENGTH: usize = 65000;

/// Truncate a PR body to fit the hosting service's length cap, cutting at the
/// last newline boundary when one is within 1000 characters of the cap, and
/// appending a documented truncation notice.
pub fn truncate_pr_body(body: &str) -> String {
    if body.chars().count() <= MAX_PR_BODY_LENGTH {
        return body.to_string();
    }

    let notice_len = truncation_notice(body.chars().count()).chars().count();
    let budget = MAX_PR_BODY_LENGTH.saturating_sub(notice_len);

    let chars: Vec<char> = body.chars().collect();
    let mut cut = budget.min(chars.len());
    if let Some(last_newline) = chars[..cut].iter().rposition(|&c| c == '\n') {
        if cut - last_newline < 1000 {
            cut = last_newline;
        }
    }

    let truncated: String = chars[..cut].iter().collect();
    format!("{truncated}{}", truncation_notice(body.chars().count()))
}

fn truncation_notice(original_len: usize) -> String {
    format!(
        "\n\n---\n\n**Note:** This PR description was truncated from {original_len} characters to fit GitHub's 65536 character limit."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_strategy_round_trips_through_strings() {
        for s in [MergeStrategy::Merge, MergeStrategy::Squash, MergeStrategy::Rebase] {
            assert_eq!(MergeStrategy::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn short_body_is_unchanged() {
        let body = "a short PR description";
        assert_eq!(truncate_pr_body(body), body);
    }

    #[test]
    fn long_body_is_truncated_with_notice() {
        let body = "x".repeat(MAX_PR_BODY_LENGTH + 500);
        let truncated = truncate_pr_body(&body);
        assert!(truncated.len() <= MAX_PR_BODY_LENGTH + 200);
        assert!(truncated.contains("**Note:** This PR description was truncated"));
    }

    #[test]
    fn truncation_cuts_at_newline_boundary_when_close() {
        let mut body = "y".repeat(MAX_PR_BODY_LENGTH - 200);
        body.push('\n');
        body.push_str(&"z".repeat(800));
        let truncated = truncate_pr_body(&body);
        assert!(!truncated.contains("zzz"));
    }
}
