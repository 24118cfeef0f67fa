//! Workflow settings: default paths and the subtask template list.
//!
//! Optionally loaded from a TOML file:
//!
//! ```toml
//! [workflow]
//! default_area_path = "Team-A"
//! default_iteration_path = "Team-A\\Sprint 1"
//! task_templates = ["Design", "Implement", "Test"]
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_PATH: &str = "Devops-Automation";

pub const STANDARD_TASKS: [&str; 5] = [
    "1. Requirements & Grooming",
    "2. Design & Approach",
    "3. Implementation",
    "4. Testing & QA",
    "5. Deployment & Documentation",
];

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Used when an `item_created` payload carries no area path.
    pub default_area_path: String,
    /// Used when an `item_created` payload carries no iteration path.
    pub default_iteration_path: String,
    /// Titles of the subtasks created under each story, in creation order.
    pub task_templates: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_area_path: DEFAULT_PATH.to_string(),
            default_iteration_path: DEFAULT_PATH.to_string(),
            task_templates: STANDARD_TASKS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl WorkflowConfig {
    /// Load and validate a `[workflow]` table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read workflow config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => {
                Error::Config(format!("bad workflow config {}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: WorkflowFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        file.workflow.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.task_templates.is_empty() {
            return Err(Error::Config("task_templates must not be empty".to_string()));
        }
        if self.task_templates.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config("task_templates must not contain blank titles".to_string()));
        }
        Ok(self)
    }
}
