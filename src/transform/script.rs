//! Migration script loading.
//!
//! A script is a JSON object with a `selector` and a `transform`:
//!
//! ```json
//! {
//!   "selector": {"type": "invoice"},
//!   "transform": [{"op": "multiply", "path": "/total", "by": 100}]
//! }
//! ```
//!
//! `transform` may also be given as a string holding the program text.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::Transform;
use crate::error::{DocshiftError, Result};
use crate::provider::Selector;

pub const DEFAULT_SCRIPT_PATH: &str = "migrate.json";

#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub selector: Selector,
    pub transform: Transform,
}

/// Read and validate the script at `path`
pub fn load_script(path: impl AsRef<Path>) -> Result<MigrationScript> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|_| {
        DocshiftError::configuration(format!(
            "migration script {} does not exist",
            path.display()
        ))
    })?;
    if !metadata.is_file() {
        return Err(DocshiftError::configuration(format!(
            "migration script {} is not a file",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(path)?;
    let script = parse_script(&text).map_err(|e| match e {
        DocshiftError::ConfigurationError(msg) => {
            DocshiftError::configuration(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;

    debug!(
        path = %path.display(),
        steps = script.transform.len(),
        "Loaded migration script"
    );
    Ok(script)
}

/// Validate script text already in memory
pub fn parse_script(text: &str) -> Result<MigrationScript> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DocshiftError::configuration(format!("script is not valid JSON: {e}")))?;
    let Value::Object(object) = value else {
        return Err(DocshiftError::configuration(
            "script must be an object exposing `selector` and `transform`",
        ));
    };

    let transform_source = match object.get("transform") {
        Some(Value::String(source)) => source.clone(),
        Some(program @ Value::Array(_)) => program.to_string(),
        Some(_) => {
            return Err(DocshiftError::configuration(
                "`transform` must be an array of steps",
            ))
        }
        None => return Err(DocshiftError::configuration("`transform` is missing")),
    };
    let transform = Transform::compile(&transform_source)
        .map_err(|e| DocshiftError::configuration(e.to_string()))?;

    let selector = object
        .get("selector")
        .ok_or_else(|| DocshiftError::configuration("`selector` is missing"))?;
    let selector =
        Selector::parse(selector).map_err(|e| DocshiftError::configuration(e.to_string()))?;

    Ok(MigrationScript {
        selector,
        transform,
    })
}
