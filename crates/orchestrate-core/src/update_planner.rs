//! Update Planner & Executor (C9): turns processed comments into update
//! plans, batches them by dependency, and records execution results.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::comment_analyzer::{Category, Effort, ProcessedComment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    CodeFix,
    StyleImprovement,
    PerformanceOpt,
    SecurityFix,
    Documentation,
    TestAddition,
    Refactoring,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::CodeFix => "code_fix",
            UpdateType::StyleImprovement => "style_improvement",
            UpdateType::PerformanceOpt => "performance_opt",
            UpdateType::SecurityFix => "security_fix",
            UpdateType::Documentation => "documentation",
            UpdateType::TestAddition => "test_addition",
            UpdateType::Refactoring => "refactoring",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, UpdateType::CodeFix | UpdateType::SecurityFix)
    }

    fn from_category(category: Category) -> Self {
        match category {
            Category::Bug => UpdateType::CodeFix,
            Category::Security => UpdateType::SecurityFix,
            Category::Performance => UpdateType::PerformanceOpt,
            Category::Style => UpdateType::StyleImprovement,
            Category::Testing => UpdateType::TestAddition,
            Category::Documentation => UpdateType::Documentation,
            _ => UpdateType::CodeFix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    RequiresManual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub plan_id: String,
    pub update_type: UpdateType,
    pub description: String,
    pub target_files: Vec<String>,
    pub related_comment_ids: Vec<String>,
    pub effort: Effort,
    pub dependencies: Vec<String>,
    pub automated: bool,
    pub validation_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub plan_id: String,
    pub status: UpdateStatus,
    pub files_modified: Vec<String>,
    pub commands_executed: Vec<String>,
    pub error: Option<String>,
    pub validation_results: HashMap<String, bool>,
    pub commit_id: Option<String>,
}

impl UpdateResult {
    pub fn requires_manual(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: UpdateStatus::RequiresManual,
            files_modified: vec![],
            commands_executed: vec![],
            error: None,
            validation_results: HashMap::new(),
            commit_id: None,
        }
    }

    pub fn failed(plan_id: &str, error: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: UpdateStatus::Failed,
            files_modified: vec![],
            commands_executed: vec![],
            error: Some(error.into()),
            validation_results: HashMap::new(),
            commit_id: None,
        }
    }
}

fn default_validation_steps(update_type: UpdateType) -> Vec<String> {
    let mut steps = vec!["syntax_check".to_string(), "basic_functionality".to_string()];
    match update_type {
        UpdateType::SecurityFix => steps.push("security_scan".to_string()),
        UpdateType::PerformanceOpt => steps.push("performance_test".to_string()),
        UpdateType::TestAddition => steps.push("test_execution".to_string()),
        UpdateType::StyleImprovement => steps.push("formatting_check".to_string()),
        UpdateType::Documentation => steps = vec!["markdown_syntax".to_string(), "link_check".to_string()],
        _ => {}
    }
    steps
}

/// Create one plan per (file, update-type) combination found among actionable,
/// code-change-requiring comments, plus general documentation/test plans for
/// comments with no associated file.
pub fn create_update_plans(processed: &[ProcessedComment]) -> Vec<UpdatePlan> {
    let mut by_file: HashMap<String, Vec<&ProcessedComment>> = HashMap::new();
    let mut general: Vec<&ProcessedComment> = Vec::new();

    for p in processed {
        if !p.actionable {
            continue;
        }
        if let Some(file) = p.related_files.first() {
            by_file.entry(file.clone()).or_default().push(p);
        } else {
            general.push(p);
        }
    }

    let mut plans = Vec::new();

    for (file, comments) in by_file {
        let mut by_type: HashMap<UpdateType, Vec<&ProcessedComment>> = HashMap::new();
        for c in &comments {
            by_type.entry(UpdateType::from_category(c.category)).or_default().push(c);
        }
        for (update_type, group) in by_type {
            let performance_count = group.iter().filter(|c| c.category == Category::Performance).count();
            let automated = !(update_type == UpdateType::PerformanceOpt && performance_count > 2);
            let effort = worst_effort(group.iter().map(|c| c.effort));
            plans.push(UpdatePlan {
                plan_id: format!("{}-{}", update_type.as_str(), Uuid::new_v4()),
                update_type,
                description: format!("Address {} feedback in {file}", update_type.as_str()),
                target_files: vec![file.clone()],
                related_comment_ids: group.iter().map(|c| c.comment_id.clone()).collect(),
                effort,
                dependencies: vec![],
                automated,
                validation_steps: default_validation_steps(update_type),
            });
        }
    }

    if !general.is_empty() {
        let doc_comments: Vec<&&ProcessedComment> =
            general.iter().filter(|c| c.category == Category::Documentation).collect();
        let test_comments: Vec<&&ProcessedComment> =
            general.iter().filter(|c| c.category == Category::Testing).collect();

        if !doc_comments.is_empty() {
            plans.push(general_plan(UpdateType::Documentation, &doc_comments));
        }
        if !test_comments.is_empty() {
            plans.push(general_plan(UpdateType::TestAddition, &test_comments));
        }
    }

    resolve_plan_dependencies(&mut plans, processed);
    plans
}

/// Thread each `ProcessedComment`'s comment-id dependencies through to the
/// plan-id dependencies the Update Planner's batching actually consumes: a
/// plan depends on another plan iff any of its comments depends on a comment
/// that landed in that other plan.
fn resolve_plan_dependencies(plans: &mut [UpdatePlan], processed: &[ProcessedComment]) {
    let comment_deps: HashMap<&str, &[String]> =
        processed.iter().map(|p| (p.comment_id.as_str(), p.dependencies.as_slice())).collect();

    let plan_of_comment: HashMap<&str, &str> = plans
        .iter()
        .flat_map(|plan| plan.related_comment_ids.iter().map(move |c| (c.as_str(), plan.plan_id.as_str())))
        .collect();

    let resolved: Vec<Vec<String>> = plans
        .iter()
        .map(|plan| {
            let mut deps: HashSet<String> = HashSet::new();
            for comment_id in &plan.related_comment_ids {
                let Some(comment_dependencies) = comment_deps.get(comment_id.as_str()) else { continue };
                for dep_comment_id in comment_dependencies.iter() {
                    if let Some(&dep_plan_id) = plan_of_comment.get(dep_comment_id.as_str()) {
                        if dep_plan_id != plan.plan_id {
                            deps.insert(dep_plan_id.to_string());
                        }
                    }
                }
            }
            deps.into_iter().collect()
        })
        .collect();

    for (plan, deps) in plans.iter_mut().zip(resolved) {
        plan.dependencies = deps;
    }
}

fn general_plan(update_type: UpdateType, comments: &[&&ProcessedComment]) -> UpdatePlan {
    let effort = worst_effort(comments.iter().map(|c| c.effort));
    UpdatePlan {
        plan_id: format!("{}-{}", update_type.as_str(), Uuid::new_v4()),
        update_type,
        description: format!("Address general {} feedback", update_type.as_str()),
        target_files: vec![],
        related_comment_ids: comments.iter().map(|c| c.comment_id.clone()).collect(),
        effort,
        dependencies: vec![],
        automated: true,
        validation_steps: default_validation_steps(update_type),
    }
}

fn worst_effort(efforts: impl Iterator<Item = Effort>) -> Effort {
    let mut worst = Effort::Quick;
    for e in efforts {
        worst = match (worst, e) {
            (_, Effort::Significant) | (Effort::Significant, _) => Effort::Significant,
            (_, Effort::Medium) | (Effort::Medium, _) => Effort::Medium,
            _ => Effort::Quick,
        };
    }
    worst
}

/// Batch plans by dependency satisfaction. Plans with no dependencies form the
/// first batch. If no remaining plan becomes ready, one plan is forced through
/// with its dependencies cleared (and a warning logged) to guarantee progress.
pub fn organize_update_batches(plans: Vec<UpdatePlan>) -> Vec<Vec<UpdatePlan>> {
    let mut remaining = plans;
    let mut batches = Vec::new();
    let mut satisfied: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let (ready, mut not_ready): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|p| p.dependencies.iter().all(|d| satisfied.contains(d)));

        if ready.is_empty() {
            warn!("no update plan is ready; forcing progress by clearing one plan's dependencies");
            let mut forced = not_ready.remove(0);
            forced.dependencies.clear();
            satisfied.insert(forced.plan_id.clone());
            batches.push(vec![forced]);
            remaining = not_ready;
            continue;
        }

        for p in &ready {
            satisfied.insert(p.plan_id.clone());
        }
        batches.push(ready);
        remaining = not_ready.drain(..).collect();
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment_analyzer::{CommentType, Priority};

    fn processed(category: Category, file: Option<&str>) -> ProcessedComment {
        ProcessedComment {
            comment_id: Uuid::new_v4().to_string(),
            category,
            priority: Priority::High,
            comment_type: CommentType::LineComment,
            actionable: true,
            requires_code_change: true,
            suggested_change: None,
            complexity: 4,
            effort: Effort::Medium,
            related_files: file.into_iter().map(String::from).collect(),
            auto_resolvable: false,
            keywords: std::collections::BTreeSet::new(),
            dependencies: vec![],
        }
    }

    #[test]
    fn bug_comments_produce_code_fix_plans() {
        let plans = create_update_plans(&[processed(Category::Bug, Some("src/lib.rs"))]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].update_type, UpdateType::CodeFix);
        assert_eq!(plans[0].target_files, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn many_performance_comments_in_one_file_are_not_automated() {
        let comments: Vec<_> = (0..3).map(|_| processed(Category::Performance, Some("src/hot.rs"))).collect();
        let plans = create_update_plans(&comments);
        assert_eq!(plans.len(), 1);
        assert!(!plans[0].automated);
    }

    #[test]
    fn documentation_comments_without_file_become_general_plan() {
        let plans = create_update_plans(&[processed(Category::Documentation, None)]);
        assert_eq!(plans.len(), 1);
        assert!(plans[0].target_files.is_empty());
    }

    #[test]
    fn independent_plans_batch_before_dependents() {
        let mut independent = processed(Category::Bug, Some("a.rs"));
        independent.comment_id = "c1".into();
        let plans = create_update_plans(&[independent]);
        let mut with_dep = plans[0].clone();
        with_dep.plan_id = "dependent".into();
        with_dep.dependencies = vec![plans[0].plan_id.clone()];

        let batches = organize_update_batches(vec![plans[0].clone(), with_dep]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].plan_id, plans[0].plan_id);
    }

    #[test]
    fn cyclic_dependencies_are_forced_through_with_a_cleared_dependency() {
        let mut a = processed(Category::Bug, Some("a.rs"));
        a.comment_id = "a".into();
        let mut b = processed(Category::Bug, Some("b.rs"));
        b.comment_id = "b".into();
        let mut plan_a = create_update_plans(&[a]).remove(0);
        let mut plan_b = create_update_plans(&[b]).remove(0);
        plan_a.plan_id = "plan-a".into();
        plan_b.plan_id = "plan-b".into();
        plan_a.dependencies = vec!["plan-b".into()];
        plan_b.dependencies = vec!["plan-a".into()];

        let batches = organize_update_batches(vec![plan_a, plan_b]);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn comment_dependencies_are_threaded_into_plan_dependencies() {
        let mut bug = processed(Category::Bug, Some("src/lib.rs"));
        bug.comment_id = "bug".into();
        let mut style = processed(Category::Style, Some("src/lib.rs"));
        style.comment_id = "style".into();
        style.dependencies = vec!["bug".into()];

        let plans = create_update_plans(&[bug, style]);
        let bug_plan = plans.iter().find(|p| p.update_type == UpdateType::CodeFix).unwrap();
        let style_plan = plans.iter().find(|p| p.update_type == UpdateType::StyleImprovement).unwrap();

        assert_eq!(style_plan.dependencies, vec![bug_plan.plan_id.clone()]);
        assert!(bug_plan.dependencies.is_empty());
    }
}
