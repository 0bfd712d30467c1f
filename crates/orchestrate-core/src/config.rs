//! Hierarchical configuration: a user-level file merged under a project-level
//! file, project values overriding user values key-by-key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubConfig {
    pub default_branch: Option<String>,
    pub default_reviewer: Option<String>,
    pub pr_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiConfig {
    pub command: Option<String>,
    pub implementation_agent: Option<String>,
    pub review_agent: Option<String>,
    pub update_agent: Option<String>,
    pub implementation_prompt: Option<String>,
    pub review_prompt: Option<String>,
    pub update_prompt: Option<String>,
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowsConfig {
    pub branch_naming: Option<String>,
    pub max_review_iterations: Option<u32>,
    pub review_check_interval: Option<u64>,
    pub ai_review_first: Option<bool>,
    pub require_human_approval: Option<bool>,
    pub test_command: Option<String>,
    pub implementation_commit_message: Option<String>,
    pub auto_resolve_trivial_threads: Option<bool>,
    pub save_comment_history: Option<bool>,
    pub worktree_dir: Option<String>,
    pub delete_branch_after_merge: Option<bool>,
    pub bot_authors: Option<Vec<String>>,
    pub commit_strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
}

/// Resolved configuration with every documented default applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_default_branch: String,
    pub github_default_reviewer: Option<String>,
    pub github_pr_template: Option<String>,
    pub ai_command: String,
    pub ai_implementation_agent: String,
    pub ai_review_agent: String,
    pub ai_update_agent: String,
    pub ai_implementation_prompt: String,
    pub ai_review_prompt: String,
    pub ai_update_prompt: String,
    pub ai_timeout_secs: u64,
    pub ai_max_retries: u32,
    pub ai_response_format: String,
    pub branch_naming: String,
    pub max_review_iterations: u32,
    pub review_check_interval_secs: u64,
    pub ai_review_first: bool,
    pub require_human_approval: bool,
    pub test_command: Option<String>,
    pub implementation_commit_message: String,
    pub auto_resolve_trivial_threads: bool,
    pub save_comment_history: bool,
    pub worktree_dir: String,
    pub delete_branch_after_merge: bool,
    pub bot_authors: Vec<String>,
    /// One of `single`, `per_comment`, `grouped` (§4.9 "Commit strategy").
    pub commit_strategy: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_default_branch: "main".into(),
            github_default_reviewer: None,
            github_pr_template: None,
            ai_command: "claude".into(),
            ai_implementation_agent: "implementer".into(),
            ai_review_agent: "reviewer".into(),
            ai_update_agent: "updater".into(),
            ai_implementation_prompt: "Implement issue {issue_id}: {issue_title}\n\n{issue_description}".into(),
            ai_review_prompt: "Review the changes on branch {branch} for issue {issue_id}.".into(),
            ai_update_prompt: "Address this review feedback on {branch}: {issue_description}".into(),
            ai_timeout_secs: 300,
            ai_max_retries: 3,
            ai_response_format: "structured".into(),
            branch_naming: "auto/{issue_type}/{id}".into(),
            max_review_iterations: 10,
            review_check_interval_secs: 60,
            ai_review_first: true,
            require_human_approval: true,
            test_command: None,
            implementation_commit_message: "feat: implement {issue_id}".into(),
            auto_resolve_trivial_threads: false,
            save_comment_history: true,
            worktree_dir: ".worktrees".into(),
            delete_branch_after_merge: true,
            bot_authors: vec!["github-actions[bot]".into()],
            commit_strategy: "grouped".into(),
        }
    }
}

impl Config {
    /// Load user config (`~/.auto/config.yaml`) merged under project config
    /// (`.auto/config.yaml`), project values taking precedence.
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut config = Config::default();

        let user_path = shellexpand::tilde("~/.auto/config.yaml").into_owned();
        if let Some(raw) = read_raw(Path::new(&user_path))? {
            config.merge(raw);
        }

        let project_path = project_root.join(".auto").join("config.yaml");
        if let Some(raw) = read_raw(&project_path)? {
            config.merge(raw);
        }

        Ok(config)
    }

    fn merge(&mut self, raw: RawConfig) {
        if let Some(v) = raw.github.default_branch {
            self.github_default_branch = v;
        }
        if let Some(v) = raw.github.default_reviewer {
            self.github_default_reviewer = Some(v);
        }
        if let Some(v) = raw.github.pr_template {
            self.github_pr_template = Some(v);
        }
        if let Some(v) = raw.ai.command {
            self.ai_command = v;
        }
        if let Some(v) = raw.ai.implementation_agent {
            self.ai_implementation_agent = v;
        }
        if let Some(v) = raw.ai.review_agent {
            self.ai_review_agent = v;
        }
        if let Some(v) = raw.ai.update_agent {
            self.ai_update_agent = v;
        }
        if let Some(v) = raw.ai.implementation_prompt {
            self.ai_implementation_prompt = v;
        }
        if let Some(v) = raw.ai.review_prompt {
            self.ai_review_prompt = v;
        }
        if let Some(v) = raw.ai.update_prompt {
            self.ai_update_prompt = v;
        }
        if let Some(v) = raw.ai.timeout {
            self.ai_timeout_secs = v;
        }
        if let Some(v) = raw.ai.max_retries {
            self.ai_max_retries = v;
        }
        if let Some(v) = raw.ai.response_format {
            self.ai_response_format = v;
        }
        if let Some(v) = raw.workflows.branch_naming {
            self.branch_naming = v;
        }
        if let Some(v) = raw.workflows.max_review_iterations {
            self.max_review_iterations = v;
        }
        if let Some(v) = raw.workflows.review_check_interval {
            self.review_check_interval_secs = v;
        }
        if let Some(v) = raw.workflows.ai_review_first {
            self.ai_review_first = v;
        }
        if let Some(v) = raw.workflows.require_human_approval {
            self.require_human_approval = v;
        }
        if let Some(v) = raw.workflows.test_command {
            self.test_command = Some(v);
        }
        if let Some(v) = raw.workflows.implementation_commit_message {
            self.implementation_commit_message = v;
        }
        if let Some(v) = raw.workflows.auto_resolve_trivial_threads {
            self.auto_resolve_trivial_threads = v;
        }
        if let Some(v) = raw.workflows.save_comment_history {
            self.save_comment_history = v;
        }
        if let Some(v) = raw.workflows.worktree_dir {
            self.worktree_dir = v;
        }
        if let Some(v) = raw.workflows.delete_branch_after_merge {
            self.delete_branch_after_merge = v;
        }
        if let Some(v) = raw.workflows.bot_authors {
            self.bot_authors = v;
        }
        if let Some(v) = raw.workflows.commit_strategy {
            self.commit_strategy = v;
        }
    }

    pub fn as_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("github.default_branch".into(), self.github_default_branch.clone());
        m.insert("ai.command".into(), self.ai_command.clone());
        m.insert("ai.response_format".into(), self.ai_response_format.clone());
        m.insert("workflows.branch_naming".into(), self.branch_naming.clone());
        m.insert("workflows.max_review_iterations".into(), self.max_review_iterations.to_string());
        m.insert("workflows.require_human_approval".into(), self.require_human_approval.to_string());
        m
    }
}

fn read_raw(path: &Path) -> Result<Option<RawConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_yaml::from_str(&raw)?))
}

/// Write a minimal config skeleton to `<project_root>/.auto/config.yaml`.
pub fn init_project_config(project_root: &Path) -> Result<PathBuf> {
    let dir = project_root.join(".auto");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.yaml");
    if !path.exists() {
        std::fs::write(&path, "github:\n  default_branch: main\nai:\n  command: claude\nworkflows: {}\n")?;
    }
    Ok(path)
}
