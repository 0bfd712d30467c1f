//! Parsing of user-supplied issue handles into a provider-qualified identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Github,
    Linear,
}

/// A parsed, provider-qualified issue identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueId {
    pub provider: Provider,
    /// Canonical display form, e.g. `#123` or `PROJ-45`.
    pub value: String,
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Parse `#123`, bare `123`, or `PROJ-45` into an [`IssueId`].
pub fn parse_identifier(input: &str) -> Result<IssueId> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::IdentifierInvalid("empty identifier".into()));
    }

    if let Some(digits) = trimmed.strip_prefix('#') {
        return parse_github_number(digits, trimmed);
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Ok(IssueId { provider: Provider::Github, value: format!("#{trimmed}") });
    }

    if let Some(dash) = trimmed.find('-') {
        let (prefix, rest) = trimmed.split_at(dash);
        let number = &rest[1..];
        if !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_alphabetic())
            && !number.is_empty()
            && number.chars().all(|c| c.is_ascii_digit())
        {
            return Ok(IssueId {
                provider: Provider::Linear,
                value: format!("{}-{}", prefix.to_ascii_uppercase(), number),
            });
        }
    }

    Err(Error::IdentifierInvalid(format!("unrecognized issue identifier: {input}")))
}

fn parse_github_number(digits: &str, original: &str) -> Result<IssueId> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::IdentifierInvalid(format!("unrecognized issue identifier: {original}")));
    }
    Ok(IssueId { provider: Provider::Github, value: format!("#{digits}") })
}
