//! # Declarative Transforms
//!
//! A transform is a JSON array of steps applied in order to a copy of each
//! document. Paths are JSON pointers; `""` addresses the whole document and is
//! only accepted by `call`.
//!
//! ```json
//! [
//!   {"op": "multiply", "path": "/v", "by": 10},
//!   {"op": "rename", "from": "/name", "to": "/title"},
//!   {"op": "default", "path": "/tags", "value": []},
//!   {"op": "call", "function": "strip_nulls"}
//! ]
//! ```
//!
//! Steps that read a missing field (`rename`, `copy`, `call`) are skipped, so
//! one transform can run over documents of uneven shape. `multiply` on a
//! missing field is an error; `increment` starts from zero.
//!
//! `_id` and `_rev` are never writable: the transformed document must keep
//! the identity and revision it was fetched with.

pub mod registry;
pub mod script;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::diff::pointer;
use crate::error::{DocshiftError, Result};
use crate::provider::{ID_FIELD, REV_FIELD};

pub use registry::{FunctionRegistry, TransformFn};
pub use script::{load_script, MigrationScript, DEFAULT_SCRIPT_PATH};

/// One step of a transform program, as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Set { path: String, value: Value },
    Unset { path: String },
    Rename { from: String, to: String },
    Copy { from: String, to: String },
    Multiply { path: String, by: Number },
    Increment { path: String, by: Number },
    Append { path: String, value: Value },
    Default { path: String, value: Value },
    Call {
        function: String,
        #[serde(default)]
        path: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Unset { .. } => "unset",
            Self::Rename { .. } => "rename",
            Self::Copy { .. } => "copy",
            Self::Multiply { .. } => "multiply",
            Self::Increment { .. } => "increment",
            Self::Append { .. } => "append",
            Self::Default { .. } => "default",
            Self::Call { .. } => "call",
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    operation: Operation,
    function: Option<TransformFn>,
}

/// A compiled transform program
#[derive(Debug, Clone)]
pub struct Transform {
    source: String,
    steps: Vec<Step>,
}

impl Transform {
    /// Compile against the built-in function registry
    pub fn compile(source: &str) -> Result<Self> {
        Self::compile_with(source, &FunctionRegistry::builtin())
    }

    pub fn compile_with(source: &str, registry: &FunctionRegistry) -> Result<Self> {
        let operations: Vec<Operation> = serde_json::from_str(source)
            .map_err(|e| DocshiftError::transform(format!("invalid transform program: {e}")))?;

        let steps = operations
            .into_iter()
            .enumerate()
            .map(|(index, operation)| compile_step(index, operation, registry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    /// The program text this transform was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step to a deep copy of `document`
    pub fn apply(&self, document: &Value) -> Result<Value> {
        let mut output = document.clone();

        for (index, step) in self.steps.iter().enumerate() {
            run_step(&mut output, step).map_err(|reason| {
                DocshiftError::transform(format!(
                    "step {index} ({}) failed: {reason}",
                    step.operation.name()
                ))
            })?;
        }

        for field in [ID_FIELD, REV_FIELD] {
            if document.get(field) != output.get(field) {
                return Err(DocshiftError::transform(format!(
                    "transform must not change {field}"
                )));
            }
        }

        Ok(output)
    }
}

fn compile_step(index: usize, operation: Operation, registry: &FunctionRegistry) -> Result<Step> {
    let invalid = |reason: String| {
        DocshiftError::transform(format!(
            "step {index} ({}) is invalid: {reason}",
            operation.name()
        ))
    };

    match &operation {
        Operation::Set { path, .. }
        | Operation::Unset { path }
        | Operation::Multiply { path, .. }
        | Operation::Increment { path, .. }
        | Operation::Append { path, .. }
        | Operation::Default { path, .. } => check_target(path).map_err(invalid)?,
        Operation::Rename { from, to } | Operation::Copy { from, to } => {
            check_source(from).map_err(invalid)?;
            check_target(to).map_err(invalid)?;
            if matches!(operation, Operation::Rename { .. }) {
                check_target(from).map_err(invalid)?;
            }
        }
        Operation::Call { path, .. } => {
            if !path.is_empty() {
                check_target(path).map_err(invalid)?;
            }
        }
    }

    let function = match &operation {
        Operation::Call { function, .. } => Some(
            registry
                .get(function)
                .ok_or_else(|| {
                    invalid(format!(
                        "unknown function {function:?} (registered: {})",
                        registry.names().join(", ")
                    ))
                })?,
        ),
        _ => None,
    };

    Ok(Step {
        operation,
        function,
    })
}

fn check_source(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(format!("{path:?} is not a field pointer"));
    }
    Ok(())
}

fn check_target(path: &str) -> std::result::Result<(), String> {
    check_source(path)?;
    let first = path[1..].split('/').next().map(pointer::unescape);
    if matches!(first.as_deref(), Some(ID_FIELD) | Some(REV_FIELD)) {
        return Err(format!("{path} is read-only"));
    }
    Ok(())
}

fn run_step(document: &mut Value, step: &Step) -> std::result::Result<(), String> {
    match &step.operation {
        Operation::Set { path, value } => set(document, path, value.clone()),
        Operation::Unset { path } => {
            remove(document, path)?;
            Ok(())
        }
        Operation::Rename { from, to } => match remove(document, from)? {
            Some(value) => set(document, to, value),
            None => Ok(()),
        },
        Operation::Copy { from, to } => match document.pointer(from).cloned() {
            Some(value) => set(document, to, value),
            None => Ok(()),
        },
        Operation::Multiply { path, by } => {
            let current = match document.pointer(path) {
                Some(Value::Number(n)) => n.clone(),
                _ => return Err(format!("{path} is not a number")),
            };
            let product = arithmetic(&current, by, i64::checked_mul, |a, b| a * b)
                .ok_or_else(|| format!("{path} overflowed"))?;
            set(document, path, Value::Number(product))
        }
        Operation::Increment { path, by } => {
            let current = match document.pointer(path) {
                None | Some(Value::Null) => Number::from(0),
                Some(Value::Number(n)) => n.clone(),
                Some(other) => return Err(format!("{path} is not a number: {other}")),
            };
            let sum = arithmetic(&current, by, i64::checked_add, |a, b| a + b)
                .ok_or_else(|| format!("{path} overflowed"))?;
            set(document, path, Value::Number(sum))
        }
        Operation::Append { path, value } => match document.pointer_mut(path) {
            Some(Value::Array(items)) => {
                items.push(value.clone());
                Ok(())
            }
            Some(other) => Err(format!("{path} is not an array: {other}")),
            None => set(document, path, Value::Array(vec![value.clone()])),
        },
        Operation::Default { path, value } => match document.pointer(path) {
            Some(_) => Ok(()),
            None => set(document, path, value.clone()),
        },
        Operation::Call { path, function, .. } => {
            let Some(function_impl) = step.function else {
                return Err(format!("function {function:?} was not resolved"));
            };
            if path.is_empty() {
                let input = std::mem::take(document);
                *document = function_impl(input)?;
                return Ok(());
            }
            match remove(document, path)? {
                Some(input) => set(document, path, function_impl(input)?),
                None => Ok(()),
            }
        }
    }
}

fn arithmetic(
    left: &Number,
    right: &Number,
    integer: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Option<Number> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return integer(a, b).map(Number::from);
    }
    Number::from_f64(float(left.as_f64()?, right.as_f64()?))
}

/// Write `value` at `path`, creating missing intermediate objects
fn set(document: &mut Value, path: &str, value: Value) -> std::result::Result<(), String> {
    let (parent_path, last) = pointer::split_last(path).map_err(|e| e.to_string())?;
    let mut current = document;
    for token in parent_path.split('/').skip(1).map(pointer::unescape) {
        current = match current {
            Value::Object(map) => map
                .entry(token)
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = pointer::parse_index(&token, path).map_err(|e| e.to_string())?;
                items
                    .get_mut(index)
                    .ok_or_else(|| format!("index {index} out of bounds in {path}"))?
            }
            other => return Err(format!("cannot descend into {other} at {path}")),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last, value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let index = pointer::parse_index(&last, path).map_err(|e| e.to_string())?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => {
                    return Err(format!("index {index} out of bounds in {path}"))
                }
            }
            Ok(())
        }
        other => Err(format!("cannot set a member of {other} at {path}")),
    }
}

fn remove(document: &mut Value, path: &str) -> std::result::Result<Option<Value>, String> {
    let (parent_path, last) = pointer::split_last(path).map_err(|e| e.to_string())?;
    Ok(match document.pointer_mut(parent_path) {
        Some(Value::Object(map)) => map.remove(&last),
        Some(Value::Array(items)) => match pointer::parse_index(&last, path) {
            Ok(index) if index < items.len() => Some(items.remove(index)),
            _ => None,
        },
        _ => None,
    })
}
