//! Mango-style selector evaluation.
//!
//! Supported: implicit field equality, `$eq $ne $gt $gte $lt $lte $in $nin
//! $exists`, the combinators `$and $or $not`, and nested fields via dotted
//! paths or nested objects. `{}` matches every document.
//!
//! A predicate on a missing field is false, except `$exists: false`.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{ProviderError, ProviderResult};

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Field {
        path: Vec<String>,
        predicate: Predicate,
    },
}

/// A compiled selector
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: Value,
    root: Condition,
}

impl Selector {
    pub fn parse(source: &Value) -> ProviderResult<Self> {
        let object = source.as_object().ok_or_else(|| {
            ProviderError::InvalidSelector(format!("selector must be an object, got {source}"))
        })?;
        let root = parse_object(object, &[])?;
        Ok(Self {
            source: source.clone(),
            root,
        })
    }

    /// Selector that matches every document
    pub fn all() -> Self {
        Self {
            source: Value::Object(Map::new()),
            root: Condition::And(Vec::new()),
        }
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn matches(&self, document: &Value) -> bool {
        evaluate(&self.root, document)
    }
}

fn parse_object(object: &Map<String, Value>, prefix: &[String]) -> ProviderResult<Condition> {
    let mut conditions = Vec::with_capacity(object.len());
    for (key, value) in object {
        if let Some(operator) = key.strip_prefix('$') {
            conditions.push(parse_combinator(operator, value, prefix)?);
        } else {
            let mut path = prefix.to_vec();
            path.extend(key.split('.').map(str::to_string));
            conditions.push(parse_field(path, value)?);
        }
    }
    Ok(match conditions.len() {
        1 => conditions.remove(0),
        _ => Condition::And(conditions),
    })
}

fn parse_combinator(operator: &str, value: &Value, prefix: &[String]) -> ProviderResult<Condition> {
    match operator {
        "and" | "or" => {
            let items = value.as_array().ok_or_else(|| {
                ProviderError::InvalidSelector(format!("${operator} expects an array"))
            })?;
            let parsed = items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| {
                            ProviderError::InvalidSelector(format!(
                                "${operator} members must be objects"
                            ))
                        })
                        .and_then(|object| parse_object(object, prefix))
                })
                .collect::<ProviderResult<Vec<_>>>()?;
            Ok(if operator == "and" {
                Condition::And(parsed)
            } else {
                Condition::Or(parsed)
            })
        }
        "not" => {
            let object = value
                .as_object()
                .ok_or_else(|| ProviderError::InvalidSelector("$not expects an object".into()))?;
            Ok(Condition::Not(Box::new(parse_object(object, prefix)?)))
        }
        other => Err(ProviderError::InvalidSelector(format!(
            "unsupported operator ${other}"
        ))),
    }
}

fn parse_field(path: Vec<String>, value: &Value) -> ProviderResult<Condition> {
    let Some(object) = value.as_object() else {
        return Ok(Condition::Field {
            path,
            predicate: Predicate::Eq(value.clone()),
        });
    };

    if object.is_empty() {
        return Ok(Condition::Field {
            path,
            predicate: Predicate::Eq(value.clone()),
        });
    }

    let operator_keys = object.keys().filter(|key| key.starts_with('$')).count();
    if operator_keys == 0 {
        return parse_object(object, &path);
    }
    if operator_keys != object.len() {
        return Err(ProviderError::InvalidSelector(format!(
            "field {} mixes operators and sub-fields",
            path.join(".")
        )));
    }

    let mut conditions = Vec::with_capacity(object.len());
    for (key, operand) in object {
        let condition = match key.as_str() {
            "$not" => {
                let inner = parse_field(path.clone(), operand)?;
                Condition::Not(Box::new(inner))
            }
            "$and" | "$or" => parse_combinator(&key[1..], operand, &path)?,
            _ => Condition::Field {
                path: path.clone(),
                predicate: parse_predicate(key, operand)?,
            },
        };
        conditions.push(condition);
    }
    Ok(match conditions.len() {
        1 => conditions.remove(0),
        _ => Condition::And(conditions),
    })
}

fn parse_predicate(operator: &str, operand: &Value) -> ProviderResult<Predicate> {
    let list = |name: &str| {
        operand
            .as_array()
            .cloned()
            .ok_or_else(|| ProviderError::InvalidSelector(format!("{name} expects an array")))
    };
    Ok(match operator {
        "$eq" => Predicate::Eq(operand.clone()),
        "$ne" => Predicate::Ne(operand.clone()),
        "$gt" => Predicate::Gt(operand.clone()),
        "$gte" => Predicate::Gte(operand.clone()),
        "$lt" => Predicate::Lt(operand.clone()),
        "$lte" => Predicate::Lte(operand.clone()),
        "$in" => Predicate::In(list("$in")?),
        "$nin" => Predicate::Nin(list("$nin")?),
        "$exists" => Predicate::Exists(operand.as_bool().ok_or_else(|| {
            ProviderError::InvalidSelector("$exists expects a boolean".to_string())
        })?),
        other => {
            return Err(ProviderError::InvalidSelector(format!(
                "unsupported operator {other}"
            )))
        }
    })
}

fn evaluate(condition: &Condition, document: &Value) -> bool {
    match condition {
        Condition::And(all) => all.iter().all(|c| evaluate(c, document)),
        Condition::Or(any) => any.iter().any(|c| evaluate(c, document)),
        Condition::Not(inner) => !evaluate(inner, document),
        Condition::Field { path, predicate } => {
            let field = lookup(document, path);
            match (predicate, field) {
                (Predicate::Exists(expected), field) => field.is_some() == *expected,
                (_, None) => false,
                (predicate, Some(field)) => test(predicate, field),
            }
        }
    }
}

fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn test(predicate: &Predicate, field: &Value) -> bool {
    match predicate {
        Predicate::Eq(expected) => values_equal(field, expected),
        Predicate::Ne(expected) => !values_equal(field, expected),
        Predicate::Gt(bound) => compare(field, bound) == Some(Ordering::Greater),
        Predicate::Gte(bound) => matches!(
            compare(field, bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Predicate::Lt(bound) => compare(field, bound) == Some(Ordering::Less),
        Predicate::Lte(bound) => {
            matches!(compare(field, bound), Some(Ordering::Less | Ordering::Equal))
        }
        Predicate::In(options) => options.iter().any(|option| values_equal(field, option)),
        Predicate::Nin(options) => !options.iter().any(|option| values_equal(field, option)),
        Predicate::Exists(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Ordering between values of the same kind; mixed kinds never compare
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
