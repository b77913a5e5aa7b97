//! Comparison operators shared by query filters and pattern constraints.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Value;
use crate::{Error, Result};

/// The closed operator vocabulary.
///
/// Unknown names are rejected when a query or pattern is built, never
/// while it is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Regex,
    ];

    /// Parse an operator name, with or without the `$` prefix.
    pub fn parse(name: &str) -> Result<Self> {
        let bare = name.strip_prefix('$').unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|op| op.name() == bare)
            .ok_or_else(|| Error::UnknownOperator(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Regex => "regex",
        }
    }

    /// Whether the operator only makes sense against string/list data.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Regex
        )
    }

    /// Check that `expected` is a usable operand for this operator.
    ///
    /// Regex literals are compiled here so that a bad pattern fails the
    /// query up front.
    pub fn check_operand(&self, expected: &Value) -> Result<()> {
        match self {
            Operator::Regex => {
                let pattern = expected.as_str().ok_or_else(|| {
                    Error::InvalidQuery(format!("regex operand must be a string, got {}", expected.type_name()))
                })?;
                Regex::new(pattern)
                    .map(|_| ())
                    .map_err(|e| Error::InvalidQuery(format!("invalid regex '{pattern}': {e}")))
            }
            Operator::StartsWith | Operator::EndsWith if !expected.is_string() => Err(Error::InvalidQuery(
                format!("{} operand must be a string, got {}", self.name(), expected.type_name()),
            )),
            _ => Ok(()),
        }
    }

    /// Evaluate `actual <op> expected`. A missing field behaves as NULL.
    ///
    /// Compiles a regex operand on every call; conditions evaluated
    /// repeatedly go through [`evaluate_cached`](Self::evaluate_cached).
    pub fn evaluate(&self, actual: Option<&Value>, expected: &Value) -> bool {
        self.evaluate_cached(actual, expected, &CompiledRegex::default())
    }

    /// Like [`evaluate`](Self::evaluate), compiling a regex operand at most
    /// once into `compiled`.
    pub fn evaluate_cached(&self, actual: Option<&Value>, expected: &Value, compiled: &CompiledRegex) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Operator::Eq => actual.loose_eq(expected),
            Operator::Neq => !actual.loose_eq(expected),
            Operator::Gt => actual.compare(expected) == Some(Ordering::Greater),
            Operator::Gte => matches!(actual.compare(expected), Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => actual.compare(expected) == Some(Ordering::Less),
            Operator::Lte => matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Equal)),
            Operator::Contains => match (actual, expected) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::List(items), needle) => items.iter().any(|item| item.loose_eq(needle)),
                _ => false,
            },
            Operator::StartsWith => match (actual, expected) {
                (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            Operator::EndsWith => match (actual, expected) {
                (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
                _ => false,
            },
            Operator::Regex => match (actual, expected) {
                (Value::String(s), Value::String(pattern)) => {
                    compiled.get(pattern).is_some_and(|re| re.is_match(s))
                }
                _ => false,
            },
        }
    }
}

/// A regex operand compiled on first use. Clones share the compiled form.
///
/// Ignored by equality and serialization, so it can sit next to the
/// operand it caches.
#[derive(Clone, Default)]
pub struct CompiledRegex(Arc<OnceLock<Option<Regex>>>);

impl CompiledRegex {
    fn get(&self, pattern: &str) -> Option<&Regex> {
        self.0.get_or_init(|| Regex::new(pattern).ok()).as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.0.get().is_some()
    }
}

impl PartialEq for CompiledRegex {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl std::fmt::Debug for CompiledRegex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompiledRegex").field(&self.is_compiled()).finish()
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_prefix() {
        assert_eq!(Operator::parse("$gt").unwrap(), Operator::Gt);
        assert_eq!(Operator::parse("startsWith").unwrap(), Operator::StartsWith);
        assert_eq!(
            Operator::parse("$between"),
            Err(Error::UnknownOperator("$between".into()))
        );
    }

    #[test]
    fn test_numeric_comparisons() {
        let age = Value::Int(30);
        assert!(Operator::Gt.evaluate(Some(&age), &Value::Int(18)));
        assert!(Operator::Gte.evaluate(Some(&age), &Value::Float(30.0)));
        assert!(!Operator::Lt.evaluate(Some(&age), &Value::Int(30)));
        assert!(!Operator::Gt.evaluate(None, &Value::Int(0)));
    }

    #[test]
    fn test_string_operators() {
        let name = Value::from("Alice");
        assert!(Operator::Contains.evaluate(Some(&name), &Value::from("lic")));
        assert!(Operator::StartsWith.evaluate(Some(&name), &Value::from("Al")));
        assert!(Operator::EndsWith.evaluate(Some(&name), &Value::from("ce")));
        assert!(Operator::Regex.evaluate(Some(&name), &Value::from("^A.*e$")));
        assert!(!Operator::Regex.evaluate(Some(&name), &Value::from("^B")));
    }

    #[test]
    fn test_list_contains() {
        let tags = Value::from(vec!["rust", "graph"]);
        assert!(Operator::Contains.evaluate(Some(&tags), &Value::from("graph")));
        assert!(!Operator::Contains.evaluate(Some(&tags), &Value::from("go")));
    }

    #[test]
    fn test_neq_on_missing_field() {
        assert!(Operator::Neq.evaluate(None, &Value::from("x")));
        assert!(Operator::Eq.evaluate(None, &Value::Null));
    }

    #[test]
    fn test_regex_compiled_once_and_shared() {
        let compiled = CompiledRegex::default();
        let shared = compiled.clone();
        assert!(!shared.is_compiled());

        let pattern = Value::from("^A.*e$");
        assert!(Operator::Regex.evaluate_cached(Some(&Value::from("Alice")), &pattern, &compiled));
        assert!(shared.is_compiled());
        assert!(!Operator::Regex.evaluate_cached(Some(&Value::from("Bob")), &pattern, &shared));
        assert!(!Operator::Gt.evaluate_cached(Some(&Value::Int(1)), &Value::Int(2), &CompiledRegex::default()));
    }

    #[test]
    fn test_bad_regex_operand_rejected() {
        assert!(Operator::Regex.check_operand(&Value::from("(")).is_err());
        assert!(Operator::Regex.check_operand(&Value::Int(1)).is_err());
        assert!(Operator::Eq.check_operand(&Value::Int(1)).is_ok());
    }
}
