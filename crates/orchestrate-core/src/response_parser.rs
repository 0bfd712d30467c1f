//! Response Parser (C4): turns raw generator output into a typed [`AiResponse`].
//!
//! Mirrors the structured/free-form split and fallback behavior of the
//! original `execute_ai_command` response handling: a structured-mode parse
//! failure falls through to free-form rather than failing the stage.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::generator::{AiResponse, FileAction, FileChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Structured,
    Freeform,
}

static SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\*\*IMPLEMENTATION SUMMARY:\*\*\s*(.*?)(?:\*\*FILES MODIFIED|\*\*COMMANDS TO RUN|\*\*NOTES|\z)").unwrap()
});
static FILES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\*\*FILES MODIFIED:\*\*\s*(.*?)(?:\*\*COMMANDS TO RUN|\*\*NOTES|\z)").unwrap()
});
static COMMANDS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\*\*COMMANDS TO RUN:\*\*\s*(.*?)(?:\*\*NOTES|\z)").unwrap()
});

static FREEFORM_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:creat\w*|modif\w*|updat\w*|edit\w*)\s+(?:the\s+file\s+)?[`']?([\w./-]+\.\w+)[`']?").unwrap()
});
static FREEFORM_COMMAND_BACKTICK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\n]{2,120})`").unwrap());
static FREEFORM_COMMAND_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:run|execute)\s+[`']?([\w./-][\w./\- ]{1,80})[`']?").unwrap()
});

/// Parse a generator's raw textual output into a typed response.
pub fn parse_response(raw: &str, format: ResponseFormat) -> AiResponse {
    match format {
        ResponseFormat::Structured => {
            parse_structured(raw).unwrap_or_else(|| parse_freeform(raw))
        }
        ResponseFormat::Freeform => parse_freeform(raw),
    }
}

fn parse_structured(raw: &str) -> Option<AiResponse> {
    let summary = SUMMARY_RE.captures(raw).map(|c| c[1].trim().to_string())?;

    let file_changes = FILES_RE
        .captures(raw)
        .map(|c| parse_file_changes(c[1].trim()))
        .unwrap_or_default();

    let commands = COMMANDS_RE
        .captures(raw)
        .map(|c| parse_commands_block(c[1].trim()))
        .unwrap_or_default();

    Some(AiResponse { success: true, summary, file_changes, commands, raw_output: raw.to_string() })
}

fn parse_file_changes(block: &str) -> Vec<FileChange> {
    block
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            if line.is_empty() {
                return None;
            }
            let parts: Vec<&str> = line.splitn(3, " - ").collect();
            let path = parts.first()?.trim().to_string();
            let action = parts
                .get(1)
                .map(|a| normalize_action(a.trim()))
                .unwrap_or(FileAction::Modify);
            let description = parts.get(2).map(|d| d.trim().to_string());
            Some(FileChange { path, action, description })
        })
        .collect()
}

fn normalize_action(raw: &str) -> FileAction {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("creat") || lower.contains("new") || lower.contains("add") {
        FileAction::Create
    } else if lower.contains("delet") || lower.contains("remov") {
        FileAction::Delete
    } else {
        FileAction::Modify
    }
}

fn parse_commands_block(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            if line.is_empty() {
                return None;
            }
            if let Some(cmd) = strip_quotes(line, '`').or_else(|| strip_quotes(line, '"')) {
                Some(cmd)
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

fn strip_quotes(line: &str, quote: char) -> Option<String> {
    let mut chars = line.chars();
    if chars.next()? != quote {
        return None;
    }
    let rest: String = chars.collect();
    rest.strip_suffix(quote).map(|s| s.to_string())
}

/// Heuristic extraction used when no structured sections are present.
fn parse_freeform(raw: &str) -> AiResponse {
    let summary = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();

    let mut file_changes: Vec<FileChange> = FREEFORM_FILE_RE
        .captures_iter(raw)
        .map(|c| FileChange { path: c[1].to_string(), action: FileAction::Modify, description: None })
        .collect();
    file_changes.dedup_by(|a, b| a.path == b.path);

    let mut commands: Vec<String> = FREEFORM_COMMAND_BACKTICK_RE
        .captures_iter(raw)
        .map(|c| c[1].trim().to_string())
        .collect();
    for c in FREEFORM_COMMAND_VERB_RE.captures_iter(raw) {
        let cmd = c[1].trim().to_string();
        if !commands.contains(&cmd) {
            commands.push(cmd);
        }
    }

    AiResponse { success: true, summary, file_changes, commands, raw_output: raw.to_string() }
}
