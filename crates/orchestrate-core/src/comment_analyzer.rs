//! Comment Analyzer (C8): categorize, prioritize, and order review comments.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::workflow::ReviewComment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Question,
    Testing,
    Documentation,
    Nitpick,
    Bug,
    Performance,
    Style,
    Suggestion,
    CodeQuality,
}

impl Category {
    fn rank(&self) -> u8 {
        match self {
            Category::Security => 0,
            Category::Bug => 1,
            Category::Performance => 2,
            Category::Testing => 3,
            Category::Style => 4,
            Category::Documentation => 5,
            Category::Suggestion => 6,
            Category::Question => 7,
            Category::Nitpick => 8,
            Category::CodeQuality => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
    Suggestion,
    LineComment,
    FileComment,
    ChangeRequest,
    GeneralComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Quick,
    Medium,
    Significant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedComment {
    pub comment_id: String,
    pub category: Category,
    pub priority: Priority,
    pub comment_type: CommentType,
    pub actionable: bool,
    pub requires_code_change: bool,
    pub suggested_change: Option<String>,
    pub complexity: u8,
    pub effort: Effort,
    pub related_files: Vec<String>,
    pub auto_resolvable: bool,
    pub keywords: std::collections::BTreeSet<String>,
    pub dependencies: Vec<String>,
}

macro_rules! lexicon {
    ($name:ident, [$($word:expr),+ $(,)?]) => {
        static $name: Lazy<Regex> = Lazy::new(|| {
            let pattern = format!(r"(?i)\b({})\b", [$($word),+].join("|"));
            Regex::new(&pattern).unwrap()
        });
    };
}

lexicon!(SECURITY_RE, ["security", "vulnerable", "vulnerability", "xss", "csrf", "sql injection", "auth", "sanitize", "exploit"]);
lexicon!(TESTING_RE, ["test", "tests", "spec", "coverage", "mock"]);
lexicon!(DOC_CONTEXT_RE, ["readme", "docs", "docstring"]);
lexicon!(DOC_WORD_RE, ["document", "documentation", "documented"]);
lexicon!(NITPICK_RE, ["nit", "nitpick", "minor", "tiny"]);
lexicon!(BUG_RE, ["bug", "broken", "fails", "failing", "incorrect", "wrong", "crash", "error"]);
lexicon!(BREAKAGE_RE, ["break", "breaks", "broken", "fail", "fails", "crash", "doesn't work", "does not work"]);
lexicon!(PERFORMANCE_RE, ["performance", "slow", "latency", "memory leak", "inefficient", "optimi"]);
lexicon!(STYLE_RE, ["style", "formatting", "indentation", "naming convention"]);
lexicon!(SUGGESTION_RE, ["suggest", "recommend", "consider", "maybe", "could"]);
lexicon!(CRITICAL_RE, ["critical", "urgent", "blocking", "broken", "security"]);
lexicon!(IMPORTANT_RE, ["important", "should", "must", "required"]);
lexicon!(LOW_RE, ["nit", "minor", "optional"]);
lexicon!(PRAISE_RE, ["nice", "great", "looks good", "lgtm", "awesome", "well done"]);
lexicon!(CONTRASTIVE_RE, ["but", "however", "should", "could", "might", "consider"]);
lexicon!(IMPERATIVE_RE, ["must", "required", "needs", "should fix"]);
lexicon!(CHANGE_VERB_RE, ["fix", "change", "update", "modify", "refactor", "remove", "add", "replace", "correct", "adjust"]);
lexicon!(REFACTOR_RE, ["refactor", "redesign", "architecture"]);
lexicon!(TYPO_RE, ["typo", "spacing", "format"]);

static QUESTION_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(why|what|how|when|where|should we|could we)\b").unwrap());
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```suggestion\s*(.*?)```").unwrap());
static ANY_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\w*\s*(.*?)```").unwrap());

fn categorize(body: &str) -> Category {
    let is_security = SECURITY_RE.is_match(body);
    let is_question = body.trim_end().ends_with('?') || QUESTION_WORD_RE.is_match(body);
    let is_testing = TESTING_RE.is_match(body);
    let is_documentation = DOC_CONTEXT_RE.is_match(body);
    let is_nitpick = NITPICK_RE.is_match(body);
    let is_bug = BUG_RE.is_match(body);
    let is_performance = PERFORMANCE_RE.is_match(body);
    let is_style = STYLE_RE.is_match(body);
    let is_doc_fallback = DOC_WORD_RE.is_match(body);
    let is_suggestion = SUGGESTION_RE.is_match(body);

    if is_security {
        return Category::Security;
    }
    if is_question {
        return Category::Question;
    }
    if is_testing {
        return Category::Testing;
    }
    if is_documentation {
        return Category::Documentation;
    }
    if is_nitpick {
        return Category::Nitpick;
    }
    if is_bug && is_performance {
        return if BREAKAGE_RE.is_match(body) { Category::Bug } else { Category::Performance };
    }
    if is_bug {
        return Category::Bug;
    }
    if is_performance {
        return Category::Performance;
    }
    if is_style {
        return Category::Style;
    }
    if is_doc_fallback {
        return Category::Documentation;
    }
    if is_suggestion {
        return Category::Suggestion;
    }
    Category::CodeQuality
}

fn priority(body: &str, category: Category) -> Priority {
    if CRITICAL_RE.is_match(body) || matches!(category, Category::Bug | Category::Security) {
        return Priority::Critical;
    }
    if IMPORTANT_RE.is_match(body) || category == Category::Performance {
        return Priority::High;
    }
    if LOW_RE.is_match(body) || matches!(category, Category::Nitpick | Category::Question) {
        return Priority::Low;
    }
    Priority::Medium
}

fn comment_type(body: &str, comment: &ReviewComment) -> CommentType {
    if FENCE_RE.is_match(body) {
        CommentType::Suggestion
    } else if comment.line.is_some() {
        CommentType::LineComment
    } else if comment.path.is_some() {
        CommentType::FileComment
    } else if IMPERATIVE_RE.is_match(body) {
        CommentType::ChangeRequest
    } else {
        CommentType::GeneralComment
    }
}

fn is_actionable(body: &str, category: Category) -> bool {
    let is_praise = PRAISE_RE.is_match(body) && !CONTRASTIVE_RE.is_match(body);
    if is_praise {
        return false;
    }
    if category == Category::Question && !IMPERATIVE_RE.is_match(body) {
        return false;
    }
    if category == Category::Nitpick {
        return false;
    }
    true
}

fn requires_code_change(body: &str, comment_type: CommentType) -> bool {
    let is_praise = PRAISE_RE.is_match(body) && !CONTRASTIVE_RE.is_match(body);
    if is_praise {
        return false;
    }
    matches!(comment_type, CommentType::Suggestion | CommentType::ChangeRequest) || CHANGE_VERB_RE.is_match(body)
}

fn complexity(body: &str, category: Category) -> u8 {
    let mut score: i32 = 5;
    score += match category {
        Category::Bug => 2,
        Category::Security => 3,
        Category::Performance => 2,
        Category::Style => -2,
        Category::Nitpick => -3,
        _ => 0,
    };
    if REFACTOR_RE.is_match(body) {
        score += 3;
    }
    if TESTING_RE.is_match(body) {
        score += 1;
    }
    if TYPO_RE.is_match(body) {
        score -= 2;
    }
    if body.len() > 200 {
        score += 1;
    }
    score.clamp(1, 10) as u8
}

fn effort_for(complexity: u8) -> Effort {
    if complexity <= 3 {
        Effort::Quick
    } else if complexity <= 6 {
        Effort::Medium
    } else {
        Effort::Significant
    }
}

fn extract_suggestion(body: &str) -> Option<String> {
    FENCE_RE
        .captures(body)
        .or_else(|| ANY_FENCE_RE.captures(body))
        .map(|c| c[1].trim().to_string())
}

/// Pull out the lexicon words that actually matched, for downstream search
/// and prioritization without re-running the regex set.
fn extract_keywords(body: &str) -> std::collections::BTreeSet<String> {
    let mut keywords = std::collections::BTreeSet::new();
    for re in [
        &*SECURITY_RE,
        &*TESTING_RE,
        &*DOC_CONTEXT_RE,
        &*DOC_WORD_RE,
        &*NITPICK_RE,
        &*BUG_RE,
        &*PERFORMANCE_RE,
        &*STYLE_RE,
        &*SUGGESTION_RE,
        &*REFACTOR_RE,
        &*TYPO_RE,
    ] {
        for m in re.find_iter(body) {
            keywords.insert(m.as_str().to_ascii_lowercase());
        }
    }
    keywords
}

/// Classify one review comment.
pub fn analyze_comment(comment: &ReviewComment) -> ProcessedComment {
    let body = &comment.body;
    let category = categorize(body);
    let priority = priority(body, category);
    let comment_type = comment_type(body, comment);
    let actionable = is_actionable(body, category);
    let requires_code_change = requires_code_change(body, comment_type);
    let complexity = complexity(body, category);
    let effort = effort_for(complexity);
    let auto_resolvable =
        !matches!(priority, Priority::Critical | Priority::High) && category != Category::Bug && !requires_code_change;

    ProcessedComment {
        comment_id: comment.id.clone(),
        category,
        priority,
        comment_type,
        actionable,
        requires_code_change,
        suggested_change: extract_suggestion(body),
        complexity,
        effort,
        related_files: comment.path.clone().into_iter().collect(),
        auto_resolvable,
        keywords: extract_keywords(body),
        dependencies: vec![],
    }
}

/// Analyze a whole PR's comments and wire up cross-comment dependencies:
/// within the same file, a code-change comment depends on the preceding
/// code-change comment in recommended-order so updates to one file are
/// planned (and later batched by the Update Planner) in a stable sequence
/// rather than racing each other.
pub fn analyze_comments(comments: &[ReviewComment]) -> Vec<ProcessedComment> {
    let mut processed: Vec<ProcessedComment> = comments.iter().map(analyze_comment).collect();

    let mut by_file: std::collections::BTreeMap<String, Vec<usize>> = std::collections::BTreeMap::new();
    for (idx, p) in processed.iter().enumerate() {
        if !p.requires_code_change {
            continue;
        }
        if let Some(file) = p.related_files.first() {
            by_file.entry(file.clone()).or_default().push(idx);
        }
    }

    for indices in by_file.into_values() {
        let mut ordered = indices;
        ordered.sort_by(|&a, &b| {
            processed[b]
                .priority
                .cmp(&processed[a].priority)
                .then_with(|| processed[a].category.rank().cmp(&processed[b].category.rank()))
                .then_with(|| processed[a].complexity.cmp(&processed[b].complexity))
        });
        for window in ordered.windows(2) {
            let (prev, next) = (window[0], window[1]);
            let dep = processed[prev].comment_id.clone();
            processed[next].dependencies.push(dep);
        }
    }

    processed
}

/// Sort processed comments by (priority desc, category rank, complexity asc);
/// only actionable comments make the recommended order.
pub fn recommended_order(mut processed: Vec<ProcessedComment>) -> Vec<ProcessedComment> {
    processed.retain(|p| p.actionable);
    processed.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.category.rank().cmp(&b.category.rank()))
            .then_with(|| a.complexity.cmp(&b.complexity))
    });
    processed
}

/// Group comments into threads: same-path comments within 10 lines of each
/// other merge; path-less comments are each their own thread.
pub fn group_into_threads(comments: &[ReviewComment]) -> Vec<Vec<String>> {
    let mut by_path: std::collections::BTreeMap<String, Vec<&ReviewComment>> = std::collections::BTreeMap::new();
    let mut standalone = Vec::new();

    for c in comments {
        match &c.path {
            Some(path) => by_path.entry(path.clone()).or_default().push(c),
            None => standalone.push(vec![c.id.clone()]),
        }
    }

    let mut threads = Vec::new();
    for (_, mut group) in by_path {
        group.sort_by_key(|c| c.line.unwrap_or(0));
        let mut current: Vec<String> = Vec::new();
        let mut last_line: Option<u32> = None;
        for c in group {
            let line = c.line.unwrap_or(0);
            if let Some(prev) = last_line {
                if line.saturating_sub(prev) > 10 {
                    threads.push(std::mem::take(&mut current));
                }
            }
            current.push(c.id.clone());
            last_line = Some(line);
        }
        if !current.is_empty() {
            threads.push(current);
        }
    }
    threads.extend(standalone);
    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(body: &str) -> ReviewComment {
        ReviewComment {
            id: "c1".into(),
            body: body.into(),
            path: Some("src/lib.rs".into()),
            line: Some(10),
            start_line: None,
            side: crate::workflow::CommentSide::Right,
            author: "reviewer".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved: false,
        }
    }

    #[test]
    fn security_wording_is_critical() {
        let processed = analyze_comment(&comment("This has a security vulnerability via XSS"));
        assert_eq!(processed.category, Category::Security);
        assert_eq!(processed.priority, Priority::Critical);
    }

    #[test]
    fn nitpick_is_low_and_not_actionable() {
        let processed = analyze_comment(&comment("nit: extra space here"));
        assert_eq!(processed.category, Category::Nitpick);
        assert_eq!(processed.priority, Priority::Low);
        assert!(!processed.actionable);
    }

    #[test]
    fn breakage_wins_bug_vs_performance_tie() {
        let processed = analyze_comment(&comment("this bug breaks performance under load"));
        assert_eq!(processed.category, Category::Bug);
    }

    #[test]
    fn performance_wins_when_no_breakage_wording() {
        let processed = analyze_comment(&comment("this has a bug affecting performance but still works"));
        assert_eq!(processed.category, Category::Performance);
    }

    #[test]
    fn praise_without_contrast_is_not_actionable() {
        let processed = analyze_comment(&comment("Nice work, looks good!"));
        assert!(!processed.actionable);
        assert!(!processed.requires_code_change);
    }

    #[test]
    fn change_verbs_require_code_change() {
        let processed = analyze_comment(&comment("Please fix the null check here"));
        assert!(processed.requires_code_change);
    }

    #[test]
    fn complexity_is_clamped_to_range() {
        let long_refactor = "refactor ".repeat(50) + "security vulnerability";
        let processed = analyze_comment(&comment(&long_refactor));
        assert!(processed.complexity <= 10);
    }

    #[test]
    fn recommended_order_drops_non_actionable_and_sorts_by_priority() {
        let critical = analyze_comment(&comment("critical security vulnerability"));
        let nit = analyze_comment(&comment("nit: spacing"));
        let ordered = recommended_order(vec![nit, critical.clone()]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].comment_id, critical.comment_id);
    }

    #[test]
    fn threads_group_nearby_line_comments_in_same_file() {
        let mut a = comment("fix this");
        a.id = "a".into();
        a.line = Some(10);
        let mut b = comment("also fix this");
        b.id = "b".into();
        b.line = Some(15);
        let mut c = comment("separate issue");
        c.id = "c".into();
        c.line = Some(40);
        let threads = group_into_threads(&[a, b, c]);
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn doc_context_without_document_word_is_still_documentation() {
        let processed = analyze_comment(&comment("please update the README"));
        assert_eq!(processed.category, Category::Documentation);
    }

    #[test]
    fn doc_word_without_context_falls_back_to_documentation() {
        let processed = analyze_comment(&comment("this function needs to be documented"));
        assert_eq!(processed.category, Category::Documentation);
    }

    #[test]
    fn complexity_modifiers_are_additive_not_exclusive() {
        let base = analyze_comment(&comment("please look at this"));
        let refactor_and_test = analyze_comment(&comment("refactor the test for this"));
        assert!(refactor_and_test.complexity >= base.complexity + 4);
    }

    #[test]
    fn dependencies_chain_code_change_comments_in_the_same_file_by_priority() {
        let mut bug = comment("this is a critical bug, please fix it");
        bug.id = "bug".into();
        let mut style = comment("please fix the formatting here");
        style.id = "style".into();

        let processed = analyze_comments(&[style, bug]);
        let bug_processed = processed.iter().find(|p| p.comment_id == "bug").unwrap();
        let style_processed = processed.iter().find(|p| p.comment_id == "style").unwrap();

        assert!(bug_processed.dependencies.is_empty());
        assert_eq!(style_processed.dependencies, vec!["bug".to_string()]);
    }

    #[test]
    fn keywords_capture_the_matched_lexicon_words() {
        let processed = analyze_comment(&comment("this has a security vulnerability"));
        assert!(processed.keywords.contains("security"));
    }
}
