//! DSL → plan tree.
//!
//! Steps are built bottom-up: select → traverse → filter → aggregate →
//! sort → limit, each optional step wrapping the previous one as its
//! sole child.

use serde_json::{Map, Value as Json};

use crate::model::{Direction, NodeId, PropertyMap, Value};
use crate::{Error, Result};
use super::filter::parse_filter;
use super::plan::*;

const DSL_KEYS: [&str; 6] = ["select", "traverse", "filter", "aggregate", "sort", "limit"];

/// Build the (unoptimized) step tree for a DSL record.
pub fn build_tree(dsl: &Json) -> Result<QueryNode> {
    let record = dsl.as_object().ok_or_else(|| {
        Error::InvalidQuery(format!("query must be an object, got {}", json_type(dsl)))
    })?;

    if let Some(unknown) = record.keys().find(|k| !DSL_KEYS.contains(&k.as_str())) {
        return Err(Error::InvalidQuery(format!("unknown query clause '{unknown}'")));
    }

    let select = record
        .get("select")
        .ok_or_else(|| Error::InvalidQuery("missing 'select' clause".into()))?;
    let mut node = QueryNode::new(QueryStep::Select(SelectConfig {
        selector: parse_selector(select)?,
    }));

    if let Some(traverse) = present(record, "traverse") {
        node = QueryNode::new(QueryStep::Traverse(parse_traverse(traverse)?)).with_child(node);
    }
    if let Some(filter) = present(record, "filter") {
        let conditions = parse_filter(filter)?;
        if !conditions.is_empty() {
            node = QueryNode::new(QueryStep::Filter(FilterConfig { conditions })).with_child(node);
        }
    }
    if let Some(aggregate) = present(record, "aggregate") {
        node = QueryNode::new(QueryStep::Aggregate(parse_aggregate(aggregate)?)).with_child(node);
    }
    if let Some(sort) = present(record, "sort") {
        node = QueryNode::new(QueryStep::Sort(parse_sort(sort)?)).with_child(node);
    }
    if let Some(limit) = present(record, "limit") {
        node = QueryNode::new(QueryStep::Limit(parse_limit(limit)?)).with_child(node);
    }
    Ok(node)
}

fn present<'a>(record: &'a Map<String, Json>, key: &str) -> Option<&'a Json> {
    record.get(key).filter(|v| !v.is_null())
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

// ============================================================================
// select
// ============================================================================

fn parse_selector(select: &Json) -> Result<Selector> {
    match select {
        Json::String(s) if s.is_empty() => Err(Error::InvalidQuery("'select' must not be empty".into())),
        Json::String(s) if s == "*" => Ok(Selector::All),
        Json::String(s) => match s.strip_prefix("label:") {
            Some("") => Err(Error::InvalidQuery("'select' label pattern names no label".into())),
            Some(label) => Ok(Selector::Label(label.to_string())),
            None => Ok(Selector::Id(NodeId::from(s.as_str()))),
        },
        Json::Array(items) => {
            if items.is_empty() {
                return Err(Error::InvalidQuery("'select' id list is empty".into()));
            }
            items
                .iter()
                .map(|item| {
                    item.as_str().map(NodeId::from).ok_or_else(|| {
                        Error::InvalidQuery(format!("'select' ids must be strings, got {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Selector::Ids)
        }
        Json::Object(criteria) => parse_criteria(criteria),
        other => Err(Error::InvalidQuery(format!(
            "'select' must be an id, id list, pattern or criteria object, got {}",
            json_type(other)
        ))),
    }
}

fn parse_criteria(criteria: &Map<String, Json>) -> Result<Selector> {
    let mut labels = Vec::new();
    let mut properties = PropertyMap::new();

    for (key, value) in criteria {
        match key.as_str() {
            "label" => labels.push(
                value
                    .as_str()
                    .ok_or_else(|| Error::InvalidQuery("'label' must be a string".into()))?
                    .to_string(),
            ),
            "labels" => {
                let list = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidQuery("'labels' must be an array".into()))?;
                for label in list {
                    labels.push(
                        label
                            .as_str()
                            .ok_or_else(|| Error::InvalidQuery("labels must be strings".into()))?
                            .to_string(),
                    );
                }
            }
            "properties" => {
                let map = value
                    .as_object()
                    .ok_or_else(|| Error::InvalidQuery("'properties' must be an object".into()))?;
                properties.extend(map.iter().map(|(k, v)| (k.clone(), Value::from(v))));
            }
            field => {
                properties.insert(field.to_string(), Value::from(value));
            }
        }
    }

    if labels.is_empty() && properties.is_empty() {
        return Err(Error::InvalidQuery("'select' criteria object is empty".into()));
    }
    Ok(Selector::Criteria { labels, properties })
}

// ============================================================================
// traverse
// ============================================================================

fn parse_traverse(traverse: &Json) -> Result<TraverseConfig> {
    let spec = traverse
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("'traverse' must be an object".into()))?;
    let mut config = TraverseConfig::default();

    if let Some(dir) = spec.get("direction") {
        let name = dir.as_str().unwrap_or_default();
        config.direction = Direction::parse(name).ok_or_else(|| {
            Error::InvalidQuery(format!("invalid traverse direction {dir}; expected out, in or both"))
        })?;
    }

    if let Some(edge_type) = spec.get("edgeType").or_else(|| spec.get("type")) {
        let name = edge_type
            .as_str()
            .ok_or_else(|| Error::InvalidQuery("traverse edge type must be a string".into()))?;
        config.edge_type = (name != "*" && !name.is_empty()).then(|| name.to_string());
    }

    if let Some(depth) = spec.get("depth").or_else(|| spec.get("maxDepth")) {
        config.max_depth = parse_count(depth, "traverse depth")?;
    }
    if let Some(min) = spec.get("minDepth") {
        config.min_depth = parse_count(min, "traverse minDepth")?;
    }
    if config.max_depth == 0 || config.min_depth > config.max_depth {
        return Err(Error::InvalidQuery(format!(
            "traverse depth range {}..{} is empty",
            config.min_depth, config.max_depth
        )));
    }

    if let Some(filter) = spec.get("filter").filter(|f| !f.is_null()) {
        config.filter = parse_filter(filter)?;
    }
    Ok(config)
}

fn parse_count(v: &Json, what: &str) -> Result<usize> {
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::InvalidQuery(format!("{what} must be a non-negative integer, got {v}")))
}

// ============================================================================
// aggregate / sort / limit
// ============================================================================

fn parse_aggregate(aggregate: &Json) -> Result<AggregateConfig> {
    let spec = aggregate
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("'aggregate' must be an object".into()))?;

    let mut aggregations = Vec::with_capacity(spec.len());
    for (field, op) in spec {
        let aggregation = match op {
            Json::String(name) => Aggregation {
                field: field.clone(),
                op: AggregateOp::parse(field, name)?,
                alias: format!("{field}_{name}"),
            },
            Json::Object(obj) => {
                let name = obj.get("op").and_then(Json::as_str).ok_or_else(|| {
                    Error::InvalidQuery(format!("aggregate for '{field}' needs an 'op'"))
                })?;
                let op = AggregateOp::parse(field, name)?;
                let alias = match obj.get("as") {
                    Some(Json::String(alias)) => alias.clone(),
                    Some(other) => {
                        return Err(Error::InvalidQuery(format!("aggregate alias must be a string, got {other}")))
                    }
                    None => format!("{field}_{name}"),
                };
                Aggregation { field: field.clone(), op, alias }
            }
            other => {
                return Err(Error::InvalidQuery(format!(
                    "aggregate for '{field}' must be an operation name or {{op, as}}, got {other}"
                )))
            }
        };
        aggregations.push(aggregation);
    }

    if aggregations.is_empty() {
        return Err(Error::InvalidQuery("'aggregate' names no fields".into()));
    }
    Ok(AggregateConfig { aggregations })
}

fn parse_sort(sort: &Json) -> Result<SortConfig> {
    let keys = match sort {
        Json::String(field) => vec![SortKey { field: field.clone(), order: SortOrder::Asc }],
        Json::Array(fields) => fields
            .iter()
            .map(|f| {
                f.as_str()
                    .map(|field| SortKey { field: field.to_string(), order: SortOrder::Asc })
                    .ok_or_else(|| Error::InvalidQuery(format!("sort fields must be strings, got {f}")))
            })
            .collect::<Result<Vec<_>>>()?,
        Json::Object(map) => map
            .iter()
            .map(|(field, dir)| {
                let order = match dir.as_i64() {
                    Some(1) => SortOrder::Asc,
                    Some(-1) => SortOrder::Desc,
                    _ => {
                        return Err(Error::InvalidQuery(format!(
                            "sort direction for '{field}' must be 1 or -1, got {dir}"
                        )))
                    }
                };
                Ok(SortKey { field: field.clone(), order })
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(Error::InvalidQuery(format!(
                "'sort' must be a field, field list or field→direction map, got {}",
                json_type(other)
            )))
        }
    };

    if keys.is_empty() {
        return Err(Error::InvalidQuery("'sort' names no fields".into()));
    }
    Ok(SortConfig { keys })
}

fn parse_limit(limit: &Json) -> Result<LimitConfig> {
    Ok(LimitConfig { count: parse_count(limit, "'limit'")? })
}
