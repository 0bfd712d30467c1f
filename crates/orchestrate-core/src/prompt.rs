//! Prompt Resolver (C3): resolves the final prompt text handed to the generator.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct PromptOverrides {
    pub literal: Option<String>,
    pub file: Option<String>,
    pub named_template: Option<String>,
    pub append: Option<String>,
}

/// Resolve the final prompt: override (literal) > file > named-template > base,
/// then interpolate `{key}` placeholders from `context`, then append.
pub fn resolve_prompt(
    base_template: &str,
    overrides: &PromptOverrides,
    named_templates: &HashMap<String, String>,
    context: &HashMap<String, String>,
) -> Result<String> {
    let mut text = if let Some(literal) = &overrides.literal {
        literal.clone()
    } else if let Some(path) = &overrides.file {
        std::fs::read_to_string(Path::new(path))?
    } else if let Some(name) = &overrides.named_template {
        named_templates
            .get(name)
            .cloned()
            .unwrap_or_else(|| base_template.to_string())
    } else {
        base_template.to_string()
    };

    text = interpolate(&text, context);

    if let Some(append) = &overrides.append {
        text.push_str(append);
    }

    Ok(text)
}

fn interpolate(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let key = &template[i + 1..i + end];
                if key.chars().all(|c| c.is_alphanumeric() || c == '_') && !key.is_empty() {
                    match context.get(key) {
                        Some(value) => {
                            out.push_str(value);
                            i += end + 1;
                            continue;
                        }
                        None => {
                            warn!(key, "prompt placeholder has no matching context value");
                        }
                    }
                }
            }
        }
        out.push(template[i..].chars().next().unwrap());
        i += template[i..].chars().next().unwrap().len_utf8();
    }
    out
}

/// Build the standard context map (issue + repository fields) used to
/// interpolate implementation/review/update prompt templates.
pub fn build_context(
    issue_id: &str,
    issue_title: &str,
    issue_description: &str,
    labels: &[String],
    assignee: Option<&str>,
    repository: &str,
    branch: &str,
) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("issue_id".to_string(), issue_id.to_string());
    ctx.insert("issue_title".to_string(), issue_title.to_string());
    ctx.insert("issue_description".to_string(), issue_description.to_string());
    ctx.insert("labels".to_string(), labels.join(", "));
    ctx.insert("assignee".to_string(), assignee.unwrap_or("unassigned").to_string());
    ctx.insert("repository".to_string(), repository.to_string());
    ctx.insert("branch".to_string(), branch.to_string());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_override_wins_over_base() {
        let overrides = PromptOverrides { literal: Some("use this exact prompt".into()), ..Default::default() };
        let resolved = resolve_prompt("base", &overrides, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(resolved, "use this exact prompt");
    }

    #[test]
    fn named_template_is_used_when_no_literal_or_file() {
        let mut named = HashMap::new();
        named.insert("custom".to_string(), "named template text".to_string());
        let overrides = PromptOverrides { named_template: Some("custom".into()), ..Default::default() };
        let resolved = resolve_prompt("base", &overrides, &named, &HashMap::new()).unwrap();
        assert_eq!(resolved, "named template text");
    }

    #[test]
    fn interpolates_known_keys_and_leaves_unknown_keys_literal() {
        let mut ctx = HashMap::new();
        ctx.insert("issue_title".to_string(), "Widget explodes".to_string());
        let resolved =
            resolve_prompt("Fix: {issue_title} ({missing})", &PromptOverrides::default(), &HashMap::new(), &ctx)
                .unwrap();
        assert_eq!(resolved, "Fix: Widget explodes ({missing})");
    }

    #[test]
    fn append_is_concatenated_after_interpolation() {
        let overrides = PromptOverrides { append: Some("\nAlways add tests.".into()), ..Default::default() };
        let resolved = resolve_prompt("base prompt", &overrides, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(resolved, "base prompt\nAlways add tests.");
    }
}
