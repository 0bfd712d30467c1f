//! Isolated working-copy (worktree) management for issue workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

use crate::{Error, Result};

/// Status of a worktree owned by a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Active,
    Removed,
}

/// An isolated checkout of the repository, associated with one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub issue_id: String,
    pub path: String,
    pub branch_name: String,
    pub base_branch: String,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl Worktree {
    pub fn new(
        issue_id: impl Into<String>,
        path: impl Into<String>,
        branch_name: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            path: path.into(),
            branch_name: branch_name.into(),
            base_branch: base_branch.into(),
            status: WorktreeStatus::Active,
            created_at: Utc::now(),
            removed_at: None,
        }
    }

    pub fn mark_removed(&mut self) {
        self.status = WorktreeStatus::Removed;
        self.removed_at = Some(Utc::now());
    }

    pub fn is_usable(&self) -> bool {
        self.status == WorktreeStatus::Active
    }

    pub fn exists(&self) -> bool {
        self.status == WorktreeStatus::Active && PathBuf::from(&self.path).is_dir()
    }
}

/// Render the configured branch-name template (e.g. `auto/{issue_type}/{id}`).
pub fn render_branch_name(template: &str, issue_type: &str, issue_id: &str) -> String {
    template
        .replace("{issue_type}", issue_type)
        .replace("{id}", issue_id)
}

/// Create a worktree for an issue's implementation branch, based off `base_branch`.
///
/// `base_branch` must be the repository's detected default branch (or an explicit
/// override), never a literal constant: commit-ahead checks and worktree creation
/// must agree on the same base.
pub fn create_issue_worktree(
    issue_id: &str,
    branch_name: &str,
    base_branch: &str,
    worktree_dir: &str,
) -> Result<Worktree> {
    let dir_name = sanitize_for_path(issue_id);
    let worktree_path = PathBuf::from(worktree_dir).join(dir_name);

    std::fs::create_dir_all(worktree_dir)?;

    let _ = Command::new("git").args(["fetch", "origin", base_branch]).output();
    let _ = Command::new("git").args(["worktree", "prune"]).output();

    let add_output = Command::new("git")
        .args([
            "worktree",
            "add",
            "-b",
            branch_name,
            worktree_path.to_str().ok_or_else(|| {
                Error::Internal("worktree path is not valid UTF-8".into())
            })?,
            &format!("origin/{}", base_branch),
        ])
        .output()?;

    if !add_output.status.success() {
        let force_output = Command::new("git")
            .args([
                "worktree",
                "add",
                "-f",
                "-b",
                branch_name,
                worktree_path.to_str().unwrap(),
                &format!("origin/{}", base_branch),
            ])
            .output()?;

        if !force_output.status.success() {
            return Err(Error::external(
                false,
                format!(
                    "failed to create worktree: {}",
                    String::from_utf8_lossy(&force_output.stderr)
                ),
            ));
        }
    }

    Ok(Worktree::new(
        issue_id,
        worktree_path.to_string_lossy().to_string(),
        branch_name,
        base_branch,
    ))
}

/// Remove a worktree. Idempotent: a missing path is not an error.
pub fn remove_worktree(worktree: &mut Worktree, force: bool) -> Result<()> {
    if !PathBuf::from(&worktree.path).exists() {
        worktree.mark_removed();
        return Ok(());
    }

    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&worktree.path);

    let output = Command::new("git").args(&args).output()?;
    if !output.status.success() && !force {
        return Err(Error::external(
            false,
            format!(
                "failed to remove worktree: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }

    worktree.mark_removed();
    Ok(())
}

fn sanitize_for_path(issue_id: &str) -> String {
    issue_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_worktree_is_active_and_usable() {
        let wt = Worktree::new("#42", "/tmp/test", "auto/feature/#42", "main");
        assert_eq!(wt.branch_name, "auto/feature/#42");
        assert_eq!(wt.base_branch, "main");
        assert!(wt.is_usable());
    }

    #[test]
    fn mark_removed_sets_timestamp() {
        let mut wt = Worktree::new("#42", "/tmp/test", "auto/feature/#42", "main");
        wt.mark_removed();
        assert_eq!(wt.status, WorktreeStatus::Removed);
        assert!(wt.removed_at.is_some());
        assert!(!wt.is_usable());
    }

    #[test]
    fn branch_name_template_substitutes_both_fields() {
        let name = render_branch_name("auto/{issue_type}/{id}", "feature", "#42");
        assert_eq!(name, "auto/feature/#42");
    }

    #[test]
    fn base_branch_is_never_hardcoded_to_main() {
        let wt = Worktree::new("#7", "/tmp/test", "auto/bug/#7", "trunk");
        assert_eq!(wt.base_branch, "trunk");
    }

    #[test]
    fn sanitize_for_path_replaces_hash_and_slash() {
        assert_eq!(sanitize_for_path("PROJ-45"), "PROJ-45");
        assert_eq!(sanitize_for_path("#42"), "_42");
    }
}
