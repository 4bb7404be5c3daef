//! Subcommand implementations.

pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use stratus_plan::Plan;

/// Reads and parses a JSON plan file.
pub fn read_plan(path: &Path) -> Result<Plan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse plan file {}", path.display()))
}
