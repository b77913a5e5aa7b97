//! # Result Projection
//!
//! Reshapes result rows into caller-chosen shapes: dot-path field
//! selection, aliasing, computed fields, `field.*` wildcards, flattening
//! and type coercion.
//!
//! Paths are compiled once into an [`Accessor`] and cached on the
//! [`Projector`], since the same spec is normally applied to many rows.

mod spec;

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

pub use spec::{ComputeFn, ComputedField, FieldType, ProjectionSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Depth used by `project_flattened` when none is given.
    pub flatten_max_depth: usize,
    pub cache_accessors: bool,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self { flatten_max_depth: 5, cache_accessors: true }
    }
}

/// Projected rows plus the output field names in spec order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub data: Vec<Value>,
    pub fields: Vec<String>,
    pub count: usize,
    pub projection_time_ms: f64,
}

// ============================================================================
// Accessors
// ============================================================================

/// A compiled dot path. Numeric segments also index into lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    path: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    key: String,
    index: Option<usize>,
}

impl Accessor {
    pub fn compile(path: &str) -> Self {
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| Segment { key: s.to_string(), index: s.parse().ok() })
            .collect();
        Self { path: path.to_string(), segments }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get<'v>(&self, row: &'v Value) -> Option<&'v Value> {
        self.segments.iter().try_fold(row, |current, seg| match current {
            Value::Map(m) => m.get(&seg.key),
            Value::List(l) => seg.index.and_then(|i| l.get(i)),
            _ => None,
        })
    }
}

// ============================================================================
// Projector
// ============================================================================

#[derive(Debug, Default)]
pub struct Projector {
    config: ProjectorConfig,
    accessors: RwLock<HashMap<String, Arc<Accessor>>>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProjectorConfig) -> Self {
        Self { config, accessors: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Paths with a compiled accessor in the cache, sorted.
    pub fn cached_accessors(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.accessors.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn clear_cache(&self) {
        self.accessors.write().clear();
    }

    fn accessor(&self, path: &str) -> Arc<Accessor> {
        if !self.config.cache_accessors {
            return Arc::new(Accessor::compile(path));
        }
        if let Some(acc) = self.accessors.read().get(path) {
            return Arc::clone(acc);
        }
        let mut cache = self.accessors.write();
        Arc::clone(
            cache
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Accessor::compile(path))),
        )
    }

    /// Project every row through `spec`.
    pub fn project(&self, rows: &[Value], spec: &ProjectionSpec) -> Result<Projection> {
        let started = Instant::now();
        let paths = spec
            .fields
            .as_ref()
            .ok_or_else(|| Error::InvalidSpec("projection spec has no fields".into()))?;

        let accessors: Vec<(Arc<Accessor>, String)> = paths
            .iter()
            .map(|p| (self.accessor(p), spec.output_name(p).to_string()))
            .collect();

        let mut fields: Vec<String> = Vec::with_capacity(accessors.len() + spec.computed.len());
        for name in accessors.iter().map(|(_, n)| n).chain(spec.computed.iter().map(|c| &c.name)) {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }

        let data: Vec<Value> = rows
            .iter()
            .map(|row| Value::Map(self.project_row(row, &accessors, spec)))
            .collect();

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        debug!(rows = data.len(), fields = fields.len(), elapsed_ms = elapsed, "projected rows");
        Ok(Projection { count: data.len(), data, fields, projection_time_ms: elapsed })
    }

    fn project_row(&self, row: &Value, accessors: &[(Arc<Accessor>, String)], spec: &ProjectionSpec) -> PropertyMap {
        let mut out = PropertyMap::with_capacity(accessors.len() + spec.computed.len());
        for (acc, name) in accessors {
            out.insert(name.clone(), acc.get(row).cloned().unwrap_or(Value::Null));
        }
        for field in &spec.computed {
            let value = run_computed(field, row, &out);
            out.insert(field.name.clone(), value);
        }
        for (name, ty) in &spec.coercions {
            if let Some(v) = out.get_mut(name) {
                *v = ty.coerce(v);
            }
        }
        out
    }

    /// Like [`project`](Self::project), after expanding `path.*` (and a
    /// bare `*`) into the keys found at that path in the first row.
    ///
    /// Keys present only in later rows are not picked up.
    pub fn project_with_patterns(&self, rows: &[Value], spec: &ProjectionSpec) -> Result<Projection> {
        let paths = spec
            .fields
            .as_ref()
            .ok_or_else(|| Error::InvalidSpec("projection spec has no fields".into()))?;

        let mut expanded = Vec::with_capacity(paths.len());
        for path in paths {
            let prefix = if path == "*" {
                Some("")
            } else {
                path.strip_suffix(".*")
            };
            let Some(prefix) = prefix else {
                expanded.push(path.clone());
                continue;
            };
            let target = match (rows.first(), prefix) {
                (Some(row), "") => Some(row),
                (Some(row), p) => self.accessor(p).get(row),
                (None, _) => None,
            };
            let mut keys: Vec<&String> = target.and_then(Value::as_map).map(|m| m.keys().collect()).unwrap_or_default();
            keys.sort();
            expanded.extend(keys.into_iter().map(|k| {
                if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") }
            }));
        }

        let mut expanded_spec = spec.clone();
        expanded_spec.fields = Some(expanded);
        self.project(rows, &expanded_spec)
    }

    /// Flatten nested maps into `a.b.c` keys, at most `max_depth` levels
    /// deep (config default when `None`). Lists and scalars are leaves;
    /// maps below the depth limit are kept whole.
    pub fn project_flattened(&self, rows: &[Value], max_depth: Option<usize>) -> Projection {
        let started = Instant::now();
        let depth = max_depth.unwrap_or(self.config.flatten_max_depth).max(1);

        let mut fields = BTreeSet::new();
        let data: Vec<Value> = rows
            .iter()
            .map(|row| {
                let mut out = PropertyMap::new();
                match row {
                    Value::Map(_) => flatten_into(row, "", depth, &mut out),
                    other => {
                        out.insert("value".to_string(), other.clone());
                    }
                }
                fields.extend(out.keys().cloned());
                Value::Map(out)
            })
            .collect();

        Projection {
            count: data.len(),
            data,
            fields: fields.into_iter().collect(),
            projection_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

fn flatten_into(value: &Value, prefix: &str, depth: usize, out: &mut PropertyMap) {
    match value {
        Value::Map(m) if depth > 0 => {
            for (k, v) in m {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_into(v, &key, depth - 1, out);
            }
        }
        _ => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}

/// Errors and panics in a computed field yield `Null` for that field.
fn run_computed(field: &ComputedField, row: &Value, projected: &PropertyMap) -> Value {
    match catch_unwind(AssertUnwindSafe(|| (field.compute)(row, projected))) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(field = %field.name, error = %e, "computed field failed");
            Value::Null
        }
        Err(_) => {
            warn!(field = %field.name, "computed field panicked");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::props;
    use pretty_assertions::assert_eq;

    fn row(id: i64, name: &str, age: i64) -> Value {
        Value::Map(props([
            ("id", Value::Int(id)),
            ("properties", Value::Map(props([("name", Value::from(name)), ("age", Value::Int(age))]))),
        ]))
    }

    #[test]
    fn test_alias_example() {
        let rows = vec![Value::Map(props([
            ("id", Value::Int(1)),
            ("properties", Value::Map(props([("name", "x")]))),
        ]))];
        let spec = ProjectionSpec::new().fields(["properties.name"]).alias("properties.name", "name");
        let out = Projector::new().project(&rows, &spec).unwrap();
        assert_eq!(out.data, vec![Value::Map(props([("name", "x")]))]);
        assert_eq!(out.fields, vec!["name"]);
        assert_eq!(out.count, 1);
    }

    #[test]
    fn test_missing_fields_is_invalid() {
        let err = Projector::new().project(&[], &ProjectionSpec::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn test_computed_and_coerce() {
        let spec = ProjectionSpec::new()
            .fields(["id", "properties.age"])
            .alias("properties.age", "age")
            .computed("adult", |_, so_far| {
                Ok(Value::Bool(so_far.get("age").and_then(Value::as_int).unwrap_or(0) >= 18))
            })
            .computed("broken", |_, _| Err(Error::InvalidSpec("nope".into())))
            .computed("panics", |_, _| panic!("computed field panic"))
            .coerce("id", FieldType::String);
        let out = Projector::new().project(&[row(1, "Ada", 36), row(2, "Bob", 12)], &spec).unwrap();

        assert_eq!(out.fields, vec!["id", "age", "adult", "broken", "panics"]);
        let first = out.data[0].as_map().unwrap();
        assert_eq!(first["id"], Value::from("1"));
        assert_eq!(first["adult"], Value::Bool(true));
        assert_eq!(first["broken"], Value::Null);
        assert_eq!(first["panics"], Value::Null);
        assert_eq!(out.data[1].get_path("adult"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_accessor_cache() {
        let projector = Projector::new();
        let spec = ProjectionSpec::new().fields(["properties.name", "missing.path", "tags.1"]);
        let mut r = row(1, "Ada", 36);
        if let Value::Map(m) = &mut r {
            m.insert("tags".into(), Value::from(vec!["a", "b"]));
        }
        let out = projector.project(&[r.clone(), r], &spec).unwrap();
        assert_eq!(out.data[0].as_map().unwrap()["missing.path"], Value::Null);
        assert_eq!(out.data[0].as_map().unwrap()["tags.1"], Value::from("b"));
        assert_eq!(projector.cached_accessors(), vec!["missing.path", "properties.name", "tags.1"]);
    }

    #[test]
    fn test_wildcard_uses_first_row() {
        let mut second = row(2, "Bob", 20);
        if let Value::Map(m) = &mut second {
            if let Some(Value::Map(p)) = m.get_mut("properties") {
                p.insert("extra".into(), Value::Bool(true));
            }
        }
        let spec = ProjectionSpec::new().fields(["id", "properties.*"]);
        let out = Projector::new().project_with_patterns(&[row(1, "Ada", 36), second], &spec).unwrap();
        assert_eq!(out.fields, vec!["id", "properties.age", "properties.name"]);
        assert!(out.data[1].as_map().unwrap().get("properties.extra").is_none());
    }

    #[test]
    fn test_flatten() {
        let nested = Value::Map(props([(
            "a",
            Value::Map(props([("b", Value::Map(props([("c", 1)]))), ("l", Value::from(vec![1, 2]))])),
        )]));
        let projector = Projector::new();
        let deep = projector.project_flattened(std::slice::from_ref(&nested), None);
        assert_eq!(deep.fields, vec!["a.b.c", "a.l"]);

        let shallow = projector.project_flattened(&[nested], Some(2));
        assert_eq!(shallow.fields, vec!["a.b", "a.l"]);
        assert_eq!(shallow.data[0].as_map().unwrap()["a.b"], Value::Map(props([("c", 1)])));
    }
}
