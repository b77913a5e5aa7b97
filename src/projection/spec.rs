//! Projection specifications.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

/// Target type for output coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Some(FieldType::String),
            "integer" | "int" => Some(FieldType::Integer),
            "float" | "number" => Some(FieldType::Float),
            "boolean" | "bool" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    /// Convert a value; anything that does not convert becomes `Null`.
    pub fn coerce(&self, value: &Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::String, Value::String(_)) => value.clone(),
            (FieldType::String, v) => Value::String(match v {
                Value::DateTime(dt) => dt.to_rfc3339(),
                other => other.to_string(),
            }),
            (FieldType::Integer, Value::Int(_)) => value.clone(),
            (FieldType::Integer, Value::Float(f)) if f.is_finite() => Value::Int(f.trunc() as i64),
            (FieldType::Integer, Value::Bool(b)) => Value::Int(i64::from(*b)),
            (FieldType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| s.trim().parse::<f64>().map(|f| Value::Int(f.trunc() as i64)))
                .unwrap_or(Value::Null),
            (FieldType::Float, Value::Float(_)) => value.clone(),
            (FieldType::Float, Value::Int(i)) => Value::Float(*i as f64),
            (FieldType::Float, Value::Bool(b)) => Value::Float(if *b { 1.0 } else { 0.0 }),
            (FieldType::Float, Value::String(s)) => {
                s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
            }
            (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Value::Bool(true),
                "false" | "no" | "0" | "" => Value::Bool(false),
                _ => Value::Null,
            },
            (FieldType::Boolean, v) => Value::Bool(v.is_truthy()),
            _ => Value::Null,
        }
    }
}

/// Computes a field from the original row and the fields projected so far.
pub type ComputeFn = Arc<dyn Fn(&Value, &PropertyMap) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ComputedField {
    pub name: String,
    pub compute: ComputeFn,
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField").field("name", &self.name).finish_non_exhaustive()
    }
}

/// What to extract from each row and how to name it.
///
/// ```ignore
/// let spec = ProjectionSpec::new()
///     .fields(["id", "properties.name"])
///     .alias("properties.name", "name")
///     .coerce("id", FieldType::String);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProjectionSpec {
    /// Dot paths to extract. `None` is rejected by the projector.
    pub fields: Option<Vec<String>>,
    /// Path to output-name renames.
    pub aliases: Vec<(String, String)>,
    pub computed: Vec<ComputedField>,
    /// Output name to target type.
    pub coercions: Vec<(String, FieldType)>,
}

impl ProjectionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn alias(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.aliases.push((path.into(), name.into()));
        self
    }

    pub fn computed<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Value, &PropertyMap) -> Result<Value> + Send + Sync + 'static,
    {
        self.computed.push(ComputedField { name: name.into(), compute: Arc::new(compute) });
        self
    }

    pub fn coerce(mut self, name: impl Into<String>, to: FieldType) -> Self {
        self.coercions.push((name.into(), to));
        self
    }

    /// Output key for a path.
    pub fn output_name<'a>(&'a self, path: &'a str) -> &'a str {
        self.aliases
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map_or(path, |(_, name)| name.as_str())
    }

    /// Read `{fields, aliases?, coerce?}` from JSON. Computed fields have
    /// no JSON form.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let invalid = |msg: String| Error::InvalidSpec(msg);
        let obj = json
            .as_object()
            .ok_or_else(|| invalid("projection spec must be an object".into()))?;

        let mut spec = ProjectionSpec::new();
        if let Some(fields) = obj.get("fields") {
            let list = fields
                .as_array()
                .ok_or_else(|| invalid("fields must be an array".into()))?;
            let names = list
                .iter()
                .map(|f| f.as_str().map(str::to_string).ok_or_else(|| invalid(format!("field {f} is not a string"))))
                .collect::<Result<Vec<_>>>()?;
            spec.fields = Some(names);
        }
        if let Some(aliases) = obj.get("aliases").and_then(|a| a.as_object()) {
            for (path, name) in aliases {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid(format!("alias for {path} must be a string")))?;
                spec = spec.alias(path.clone(), name);
            }
        }
        if let Some(coerce) = obj.get("coerce").and_then(|c| c.as_object()) {
            for (name, ty) in coerce {
                let ty = ty
                    .as_str()
                    .and_then(FieldType::parse)
                    .ok_or_else(|| invalid(format!("unknown type {ty} for {name}")))?;
                spec = spec.coerce(name.clone(), ty);
            }
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce() {
        assert_eq!(FieldType::Integer.coerce(&Value::from("42")), Value::Int(42));
        assert_eq!(FieldType::Integer.coerce(&Value::Float(3.9)), Value::Int(3));
        assert_eq!(FieldType::Integer.coerce(&Value::from("abc")), Value::Null);
        assert_eq!(FieldType::Float.coerce(&Value::Int(2)), Value::Float(2.0));
        assert_eq!(FieldType::String.coerce(&Value::Int(7)), Value::from("7"));
        assert_eq!(FieldType::Boolean.coerce(&Value::from("yes")), Value::Bool(true));
        assert_eq!(FieldType::Boolean.coerce(&Value::Int(0)), Value::Bool(false));
        assert_eq!(FieldType::Float.coerce(&Value::List(vec![])), Value::Null);
    }

    #[test]
    fn test_from_json() {
        let spec = ProjectionSpec::from_json(&json!({
            "fields": ["properties.name", "id"],
            "aliases": {"properties.name": "name"},
            "coerce": {"id": "integer"}
        }))
        .unwrap();
        assert_eq!(spec.fields.as_deref(), Some(&["properties.name".to_string(), "id".to_string()][..]));
        assert_eq!(spec.output_name("properties.name"), "name");
        assert_eq!(spec.output_name("id"), "id");
        assert_eq!(spec.coercions, vec![("id".to_string(), FieldType::Integer)]);

        assert!(ProjectionSpec::from_json(&json!({"coerce": {"id": "uuid"}})).is_err());
    }
}
