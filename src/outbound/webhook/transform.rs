//! User-defined payload transforms.
//!
//! A transform reshapes the event envelope before it is signed and sent.
//! Any implementation of [`PayloadTransformer`] can be plugged into the
//! dispatcher; the built-in [`MappingTransformer`] evaluates a JSON mapping
//! template instead of executing arbitrary code.
//!
//! Template rules:
//! - `"$"` is replaced by the whole input
//! - `"$.lead.email"` / `"$.items.0"` is replaced by the value at that path
//! - `"$$..."` is the literal string with one leading `$` removed
//! - objects and arrays are evaluated element by element
//! - every other value is copied as-is
//!
//! The result must be an object or an array.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("Transform script is not valid JSON: {0}")]
    Syntax(String),

    #[error("Path '{0}' does not resolve against the payload")]
    MissingPath(String),

    #[error("Transform must produce an object or an array, got {0}")]
    NotStructured(&'static str),

    #[error("Transform exceeded {0:?}")]
    Timeout(Duration),

    #[error("Transform aborted: {0}")]
    Aborted(String),
}

/// Reshapes a payload according to a user-supplied script.
pub trait PayloadTransformer: Send + Sync {
    fn transform(&self, payload: &Value, script: &str) -> Result<Value, TransformError>;
}

/// Evaluates JSON mapping templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingTransformer;

impl PayloadTransformer for MappingTransformer {
    fn transform(&self, payload: &Value, script: &str) -> Result<Value, TransformError> {
        let template: Value =
            serde_json::from_str(script).map_err(|e| TransformError::Syntax(e.to_string()))?;

        let output = evaluate(&template, payload)?;
        match output {
            Value::Object(_) | Value::Array(_) => Ok(output),
            other => Err(TransformError::NotStructured(kind(&other))),
        }
    }
}

fn evaluate(template: &Value, input: &Value) -> Result<Value, TransformError> {
    match template {
        Value::String(s) => {
            if let Some(literal) = s.strip_prefix("$$") {
                return Ok(Value::String(format!("${literal}")));
            }
            if s == "$" {
                return Ok(input.clone());
            }
            match s.strip_prefix("$.") {
                Some(path) => resolve(input, path)
                    .cloned()
                    .ok_or_else(|| TransformError::MissingPath(s.clone())),
                None => Ok(template.clone()),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, input))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, value) in fields {
                out.insert(key.clone(), evaluate(value, input)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(template.clone()),
    }
}

fn resolve<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(input, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Run a transform off the async runtime, bounded by `timeout`.
///
/// Panics and timeouts are reported as errors; the caller decides on the
/// fallback.
pub async fn run_transform(
    transformer: Arc<dyn PayloadTransformer>,
    payload: Value,
    script: String,
    timeout: Duration,
) -> Result<Value, TransformError> {
    let task = tokio::task::spawn_blocking(move || transformer.transform(&payload, &script));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(TransformError::Aborted(join_error.to_string())),
        Err(_) => Err(TransformError::Timeout(timeout)),
    }
}

/// Transform `payload`, falling back to the original on any failure.
pub async fn transform_or_original(
    transformer: Arc<dyn PayloadTransformer>,
    payload: &Value,
    script: &str,
    timeout: Duration,
) -> Value {
    match run_transform(transformer, payload.clone(), script.to_string(), timeout).await {
        Ok(transformed) => transformed,
        Err(e) => {
            warn!(error = %e, "Payload transform failed – sending original payload");
            payload.clone()
        }
    }
}
