//! End-to-end tests for reshaping query results.

use graph_engine::{props, Engine, Error, FieldType, MemoryBackend, Node, ProjectionSpec, StorageBackend, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn team() -> Engine<MemoryBackend> {
    let backend = MemoryBackend::new();
    for (id, name, age) in [("u1", "Ada", 36), ("u2", "Bob", 17), ("u3", "Cy", 52)] {
        backend
            .add_node(
                Node::new(id)
                    .with_labels(["User"])
                    .with_property("name", name)
                    .with_property("age", age),
            )
            .await
            .unwrap();
    }
    Engine::with_backend(backend)
}

#[test]
fn test_alias_on_plain_rows() {
    let rows = vec![Value::Map(props([
        ("id", Value::Int(1)),
        ("properties", Value::Map(props([("name", "x")]))),
    ]))];
    let spec = ProjectionSpec::new().fields(["properties.name"]).alias("properties.name", "name");
    let projection = graph_engine::Projector::new().project(&rows, &spec).unwrap();

    assert_eq!(projection.data, vec![Value::Map(props([("name", "x")]))]);
    assert_eq!(projection.fields, vec!["name"]);
}

#[tokio::test]
async fn test_spec_from_json_over_query_rows() {
    let engine = team().await;
    let spec = ProjectionSpec::from_json(&json!({
        "fields": ["id", "properties.age"],
        "aliases": {"properties.age": "age"},
        "coerce": {"age": "string"}
    }))
    .unwrap();

    let projection = engine
        .query_projected(&json!({"select": "label:User", "sort": {"age": 1}}), &spec)
        .await
        .unwrap();
    assert_eq!(projection.fields, vec!["id", "age"]);
    assert_eq!(
        projection.data,
        vec![
            Value::Map(props([("id", "u2"), ("age", "17")])),
            Value::Map(props([("id", "u1"), ("age", "36")])),
            Value::Map(props([("id", "u3"), ("age", "52")])),
        ]
    );
    assert!(projection.projection_time_ms >= 0.0);
}

#[tokio::test]
async fn test_wildcard_and_flatten_over_nodes() {
    let engine = team().await;
    let result = engine.query(&json!({"select": "u1"})).await.unwrap();

    let spec = ProjectionSpec::new().fields(["id", "properties.*"]).coerce("properties.age", FieldType::Float);
    let expanded = engine.projector().project_with_patterns(&result.items, &spec).unwrap();
    assert_eq!(expanded.fields, vec!["id", "properties.age", "properties.name"]);
    assert_eq!(expanded.data[0].get_path("properties.age"), None);
    assert_eq!(expanded.data[0].as_map().unwrap()["properties.age"], Value::Float(36.0));

    let flat = engine.projector().project_flattened(&result.items, None);
    assert_eq!(flat.fields, vec!["id", "labels", "properties.age", "properties.name"]);
    assert_eq!(flat.data[0].as_map().unwrap()["labels"], Value::from(vec!["User"]));
}

#[test]
fn test_invalid_specs() {
    assert!(matches!(ProjectionSpec::from_json(&json!(["id"])), Err(Error::InvalidSpec(_))));
    assert!(matches!(
        ProjectionSpec::from_json(&json!({"fields": ["id"], "coerce": {"id": "uuid"}})),
        Err(Error::InvalidSpec(_))
    ));
    let no_fields = ProjectionSpec::from_json(&json!({"aliases": {"a": "b"}})).unwrap();
    assert!(matches!(
        graph_engine::Projector::new().project(&[], &no_fields),
        Err(Error::InvalidSpec(_))
    ));
}
