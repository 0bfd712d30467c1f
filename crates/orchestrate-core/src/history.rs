//! Comment-processing history (§2b supplement): persists each Comment
//! Analyzer run to `.auto/history/comments/<pr>-<timestamp>.json` for audit,
//! gated by `workflows.save_comment_history`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::comment_analyzer::ProcessedComment;
use crate::Result;

#[derive(Debug, Serialize)]
struct CommentHistoryEntry<'a> {
    pr_number: i64,
    recorded_at: chrono::DateTime<Utc>,
    comments: &'a [ProcessedComment],
}

pub fn save_comment_history(project_root: &Path, pr_number: i64, comments: &[ProcessedComment]) -> Result<PathBuf> {
    let dir = project_root.join(".auto").join("history").join("comments");
    std::fs::create_dir_all(&dir)?;

    let recorded_at = Utc::now();
    let path = dir.join(format!("{pr_number}-{}.json", recorded_at.timestamp()));
    let entry = CommentHistoryEntry { pr_number, recorded_at, comments };
    std::fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
    Ok(path)
}
