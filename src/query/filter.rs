//! Filter trees: `{field: literal}`, `{field: {$op: value}}`, `$and`, `$or`.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::model::Value;
use crate::{Error, Result};
use super::operator::{CompiledRegex, Operator};

/// A single `field <op> value` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    #[serde(skip)]
    regex: CompiledRegex,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self { field: field.into(), operator, value: value.into(), regex: CompiledRegex::default() }
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.operator.evaluate_cached(row.lookup(&self.field), &self.value, &self.regex)
    }
}

/// Boolean composition of conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    Condition(Condition),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl From<Condition> for FilterExpr {
    fn from(c: Condition) -> Self {
        FilterExpr::Condition(c)
    }
}

impl FilterExpr {
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            FilterExpr::Condition(c) => c.matches(row),
            FilterExpr::And(all) => all.iter().all(|f| f.matches(row)),
            FilterExpr::Or(any) => any.iter().any(|f| f.matches(row)),
        }
    }

    /// Visit every leaf condition.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            FilterExpr::Condition(c) => out.push(c),
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}

/// Evaluate a condition list as an implicit AND.
pub fn matches_all(filters: &[FilterExpr], row: &Value) -> bool {
    filters.iter().all(|f| f.matches(row))
}

/// Parse a DSL filter object into an implicit-AND list.
pub fn parse_filter(json: &Json) -> Result<Vec<FilterExpr>> {
    let obj = json.as_object().ok_or_else(|| {
        Error::InvalidQuery(format!("filter must be an object, got {json}"))
    })?;

    let mut out = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        match key.as_str() {
            "$and" => out.push(FilterExpr::And(parse_group(key, value)?)),
            "$or" => out.push(FilterExpr::Or(parse_group(key, value)?)),
            k if k.starts_with('$') => return Err(Error::UnknownOperator(k.to_string())),
            field => out.extend(parse_field(field, value)?),
        }
    }
    Ok(out)
}

fn parse_group(key: &str, value: &Json) -> Result<Vec<FilterExpr>> {
    let items = value.as_array().ok_or_else(|| {
        Error::InvalidQuery(format!("{key} expects an array of filters"))
    })?;
    items
        .iter()
        .map(|item| {
            let mut parts = parse_filter(item)?;
            Ok(if parts.len() == 1 { parts.remove(0) } else { FilterExpr::And(parts) })
        })
        .collect()
}

fn parse_field(field: &str, value: &Json) -> Result<Vec<FilterExpr>> {
    let operator_map = value
        .as_object()
        .filter(|m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')));

    let Some(ops) = operator_map else {
        return Ok(vec![Condition::new(field, Operator::Eq, Value::from(value)).into()]);
    };

    ops.iter()
        .map(|(name, operand)| {
            let operator = Operator::parse(name)?;
            let operand = Value::from(operand);
            operator.check_operand(&operand)?;
            Ok(Condition::new(field.to_string(), operator, operand).into())
        })
        .collect()
}
