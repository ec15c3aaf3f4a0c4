/// Run configuration loading from JSON files
use crate::config::types::{EngineError, Result, RunConfig};
use std::path::Path;

/// Load a [`RunConfig`] from a JSON file.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::InvalidConfig(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_run_config(&content).map_err(|e| match e {
        EngineError::InvalidConfig(msg) => {
            EngineError::InvalidConfig(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Parse a [`RunConfig`] from JSON text.
pub fn parse_run_config(json: &str) -> Result<RunConfig> {
    serde_json::from_str(json)
        .map_err(|e| EngineError::InvalidConfig(format!("Failed to parse config JSON: {}", e)))
}
