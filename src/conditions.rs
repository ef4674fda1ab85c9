//! # Conditions — Trigger Rule Matching
//!
//! A trigger rule's `conditions` column holds a JSON object mapping event field
//! names to either a literal or an operator map:
//!
//! ```json
//! { "kind": "trade_closed", "pnl": { "$gt": 500, "$lt": 10000 } }
//! ```
//!
//! The JSON is parsed once into a [`ConditionTree`] so evaluation is an
//! exhaustive match over [`FieldCondition`] instead of ad hoc value inspection.
//!
//! ## Semantics
//!
//! - Every field and every operator must hold (logical AND). The first failing
//!   check short-circuits to `false`.
//! - A literal requires exact equality with the event value.
//! - Fields named in the condition but absent from the event are skipped. This
//!   permissive pass-through is how rules have always behaved; rules that need
//!   a field to exist must not rely on its absence failing the match.
//! - Numbers compare numerically (`1` equals `1.0`), strings lexicographically,
//!   booleans with `false < true`. Any other pairing (including `null`) fails
//!   the comparison.

use crate::error::{OpsError, OpsResult};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "$gt" => Some(CompareOp::Gt),
            "$lt" => Some(CompareOp::Lt),
            "$eq" => Some(CompareOp::Eq),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Gt => "$gt",
            CompareOp::Lt => "$lt",
            CompareOp::Eq => "$eq",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub value: Value,
}

impl Comparison {
    /// Apply `actual <op> self.value`.
    pub fn holds(&self, actual: &Value) -> bool {
        match self.op {
            CompareOp::Eq => values_equal(actual, &self.value),
            CompareOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            CompareOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Literal(Value),
    Compare(Vec<Comparison>),
}

impl FieldCondition {
    fn parse(field: &str, raw: &Value) -> OpsResult<Self> {
        let Value::Object(map) = raw else {
            return Ok(FieldCondition::Literal(raw.clone()));
        };
        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(FieldCondition::Literal(raw.clone()));
        }
        if operator_keys != map.len() {
            return Err(OpsError::InvalidCondition(format!(
                "field '{}' mixes operators with plain keys",
                field
            )));
        }
        let mut comparisons = Vec::with_capacity(map.len());
        for (token, value) in map {
            let op = CompareOp::parse(token).ok_or_else(|| {
                OpsError::InvalidCondition(format!(
                    "unsupported operator '{}' on field '{}'",
                    token, field
                ))
            })?;
            comparisons.push(Comparison {
                op,
                value: value.clone(),
            });
        }
        Ok(FieldCondition::Compare(comparisons))
    }

    pub fn holds(&self, actual: &Value) -> bool {
        match self {
            FieldCondition::Literal(expected) => values_equal(actual, expected),
            FieldCondition::Compare(comparisons) => comparisons.iter().all(|c| c.holds(actual)),
        }
    }
}

/// A parsed rule condition: field name to the check applied to that field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionTree {
    fields: Vec<(String, FieldCondition)>,
}

impl ConditionTree {
    /// Parse a rule's `conditions` JSON. `null` is treated as an empty tree.
    pub fn parse(raw: &Value) -> OpsResult<Self> {
        let map = match raw {
            Value::Object(map) => map,
            Value::Null => return Ok(ConditionTree::default()),
            other => {
                return Err(OpsError::InvalidCondition(format!(
                    "conditions must be an object, got {}",
                    json_kind(other)
                )))
            }
        };
        let mut fields = Vec::with_capacity(map.len());
        for (field, cond) in map {
            fields.push((field.clone(), FieldCondition::parse(field, cond)?));
        }
        Ok(ConditionTree { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn matches(&self, event: &Map<String, Value>) -> bool {
        self.fields.iter().all(|(field, cond)| match event.get(field) {
            Some(actual) => cond.holds(actual),
            None => true,
        })
    }
}

/// Parse `condition` and match it against `event`. An unparsable condition
/// never matches.
pub fn matches(event: &Map<String, Value>, condition: &Value) -> bool {
    match ConditionTree::parse(condition) {
        Ok(tree) => tree.matches(event),
        Err(_) => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Integers compare exactly across the whole i64/u64 range; f64 only when
/// either side is a float.
fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    match (integer(x), integer(y)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
