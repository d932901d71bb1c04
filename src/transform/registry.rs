//! Named functions reachable from a `call` step.
//!
//! The table is compiled into every worker, so a transform can only name
//! functions both sides already know.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// A pure value-to-value function
pub type TransformFn = fn(Value) -> Result<Value, String>;

#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, TransformFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry holding the built-in functions
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("identity", identity);
        registry.register("strip_nulls", strip_nulls);
        registry.register("lowercase", lowercase);
        registry.register("uppercase", uppercase);
        registry.register("trim", trim);
        registry.register("to_string", to_string);
        registry.register("to_number", to_number);
        registry
    }

    pub fn register(&mut self, name: &'static str, function: TransformFn) {
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn identity(value: Value) -> Result<Value, String> {
    Ok(value)
}

/// Drop `null` object members at every depth
fn strip_nulls(value: Value) -> Result<Value, String> {
    Ok(match value {
        Value::Object(map) => {
            let mut stripped = Map::with_capacity(map.len());
            for (key, item) in map {
                if !item.is_null() {
                    stripped.insert(key, strip_nulls(item)?);
                }
            }
            Value::Object(stripped)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(strip_nulls)
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

fn expect_string(value: Value, function: &str) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(format!("{function} expects a string, got {other}")),
    }
}

fn lowercase(value: Value) -> Result<Value, String> {
    Ok(Value::String(expect_string(value, "lowercase")?.to_lowercase()))
}

fn uppercase(value: Value) -> Result<Value, String> {
    Ok(Value::String(expect_string(value, "uppercase")?.to_uppercase()))
}

fn trim(value: Value) -> Result<Value, String> {
    Ok(Value::String(expect_string(value, "trim")?.trim().to_string()))
}

fn to_string(value: Value) -> Result<Value, String> {
    Ok(match value {
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    })
}

fn to_number(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Ok(Value::from(integer));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("to_number cannot parse {s:?}"))
        }
        other => Err(format!("to_number expects a string or number, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = FunctionRegistry::builtin();
        assert!(registry.contains("identity"));
        assert!(!registry.contains("eval"));
        assert_eq!(registry.names().first(), Some(&"identity"));
    }

    #[test]
    fn test_strip_nulls_recurses() {
        let stripped = strip_nulls(json!({"a": null, "b": {"c": null, "d": 1}, "e": [{"f": null}]}))
            .unwrap();
        assert_eq!(stripped, json!({"b": {"d": 1}, "e": [{}]}));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(lowercase(json!("AbC")).unwrap(), json!("abc"));
        assert_eq!(uppercase(json!("AbC")).unwrap(), json!("ABC"));
        assert_eq!(trim(json!("  x ")).unwrap(), json!("x"));
        assert!(lowercase(json!(1)).is_err());
        assert_eq!(to_string(json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(json!("42")).unwrap(), json!(42));
        assert_eq!(to_number(json!("2.5")).unwrap(), json!(2.5));
        assert!(to_number(json!("nope")).is_err());
        assert!(to_number(json!(null)).is_err());
    }

    #[test]
    fn test_custom_registration() {
        fn zero(_: Value) -> Result<Value, String> {
            Ok(json!(0))
        }
        let mut registry = FunctionRegistry::empty();
        registry.register("zero", zero);
        assert_eq!(registry.get("zero").unwrap()(json!("x")).unwrap(), json!(0));
    }
}
