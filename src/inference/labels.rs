use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Load a label file: one label per line, trimmed, blank lines skipped.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    let labels = parse_labels(&raw);
    if labels.is_empty() {
        return Err(anyhow!("label file {} has no labels", path.display()));
    }
    Ok(labels)
}

pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
