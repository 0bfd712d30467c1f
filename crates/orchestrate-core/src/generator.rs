//! Abstract code-generator interface. A concrete implementation invokes a
//! configured executable as a subprocess; this crate depends only on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

#[derive(Debug, Clone)]
pub struct GeneratorRequest {
    pub agent: String,
    pub prompt: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    pub description: Option<String>,
}

/// The parsed, typed shape of a generator invocation's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub success: bool,
    pub summary: String,
    pub file_changes: Vec<FileChange>,
    pub commands: Vec<String>,
    pub raw_output: String,
}

/// The code-generating assistant the system delegates all code changes to.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn invoke(&self, request: GeneratorRequest) -> Result<AiResponse>;
}
