//! Structural JSON diffs between applied and desired configuration.

use anyhow::{Context, Result};
pub use json_patch::Patch;
use serde_json::Value;

/// Computes the JSON Patch transforming `prior` into `desired`.
///
/// Returns `None` when the documents are equal so callers can skip
/// propagation entirely.
pub fn diff(prior: &Value, desired: &Value) -> Option<Patch> {
    let patch = json_patch::diff(prior, desired);
    if patch.0.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Parses a stored configuration payload. Blank payloads are an empty object.
pub fn parse_config(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).context("invalid JSON configuration")
}
