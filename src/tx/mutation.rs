//! Queued mutations and the prior state needed to undo them.

use serde::{Deserialize, Serialize};

use crate::model::{Edge, EdgeKey, Node, NodeId, PropertyMap, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// A forward operation against storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    AddNode { node: Node },
    RemoveNode { id: NodeId },
    UpdateNode { id: NodeId, updates: PropertyMap },
    AddEdge { edge: Edge },
    RemoveEdge { key: EdgeKey },
    UpdateEdge { key: EdgeKey, updates: PropertyMap },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddNode { .. } => "addNode",
            Mutation::RemoveNode { .. } => "removeNode",
            Mutation::UpdateNode { .. } => "updateNode",
            Mutation::AddEdge { .. } => "addEdge",
            Mutation::RemoveEdge { .. } => "removeEdge",
            Mutation::UpdateEdge { .. } => "updateEdge",
        }
    }

    /// Id of the node this mutation creates, if any.
    pub(crate) fn created_node(&self) -> Option<&NodeId> {
        match self {
            Mutation::AddNode { node } => Some(&node.id),
            _ => None,
        }
    }

    pub(crate) fn created_edge(&self) -> Option<EdgeKey> {
        match self {
            Mutation::AddEdge { edge } => Some(edge.key()),
            _ => None,
        }
    }

    pub async fn apply<B: StorageBackend + ?Sized>(&self, backend: &B) -> Result<()> {
        match self {
            Mutation::AddNode { node } => backend.add_node(node.clone()).await,
            Mutation::RemoveNode { id } => {
                if backend.remove_node(id).await? {
                    Ok(())
                } else {
                    Err(Error::NotFound(format!("node {id}")))
                }
            }
            Mutation::UpdateNode { id, updates } => backend.update_node(id, updates.clone()).await,
            Mutation::AddEdge { edge } => backend.add_edge(edge.clone()).await,
            Mutation::RemoveEdge { key } => {
                if backend.remove_edge(key).await? {
                    Ok(())
                } else {
                    Err(Error::NotFound(format!("edge {key}")))
                }
            }
            Mutation::UpdateEdge { key, updates } => backend.update_edge(key, updates.clone()).await,
        }
    }
}

/// Prior state captured when a mutation is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RollbackData {
    /// Additions are undone from the forward operation alone.
    Nothing,
    /// The target is created earlier in the same transaction; undoing
    /// that creation also undoes this change.
    CreatedInTransaction,
    /// A removed node and every edge that touched it.
    RemovedNode { node: Node, edges: Vec<Edge> },
    RemovedEdge { edge: Edge },
    /// Previous values of the updated keys; `Null` marks a key that was absent.
    PreviousProperties { previous: PropertyMap },
}

/// One entry of the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOp {
    pub mutation: Mutation,
    pub rollback: RollbackData,
}

impl MutationOp {
    pub fn name(&self) -> &'static str {
        self.mutation.name()
    }

    /// Revert this (applied) mutation.
    pub async fn undo<B: StorageBackend + ?Sized>(&self, backend: &B) -> Result<()> {
        match (&self.mutation, &self.rollback) {
            (_, RollbackData::CreatedInTransaction) => Ok(()),
            (Mutation::AddNode { node }, _) => backend.remove_node(&node.id).await.map(drop),
            (Mutation::AddEdge { edge }, _) => backend.remove_edge(&edge.key()).await.map(drop),
            (Mutation::RemoveNode { .. }, RollbackData::RemovedNode { node, edges }) => {
                if backend.get_node(&node.id).await?.is_none() {
                    backend.add_node(node.clone()).await?;
                }
                for edge in edges {
                    restore_edge(backend, edge).await?;
                }
                Ok(())
            }
            (Mutation::RemoveEdge { .. }, RollbackData::RemovedEdge { edge }) => restore_edge(backend, edge).await,
            (Mutation::UpdateNode { id, .. }, RollbackData::PreviousProperties { previous }) => {
                backend.update_node(id, previous.clone()).await
            }
            (Mutation::UpdateEdge { key, .. }, RollbackData::PreviousProperties { previous }) => {
                backend.update_edge(key, previous.clone()).await
            }
            (mutation, rollback) => Err(Error::StorageError(format!(
                "no rollback data for {} (captured {rollback:?})",
                mutation.name()
            ))),
        }
    }
}

/// Re-add an edge when both endpoints exist and the key is free.
async fn restore_edge<B: StorageBackend + ?Sized>(backend: &B, edge: &Edge) -> Result<()> {
    let endpoints_exist =
        backend.get_node(&edge.from).await?.is_some() && backend.get_node(&edge.to).await?.is_some();
    if endpoints_exist && backend.get_edge(&edge.key()).await?.is_none() {
        backend.add_edge(edge.clone()).await?;
    }
    Ok(())
}

/// Previous values of `updates`' keys in `current`.
pub(crate) fn previous_values(current: &PropertyMap, updates: &PropertyMap) -> PropertyMap {
    updates
        .keys()
        .map(|k| (k.clone(), current.get(k).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::props;
    use crate::storage::MemoryBackend;

    #[tokio::test]
    async fn test_update_undo_restores_and_removes() {
        let backend = MemoryBackend::new();
        backend.add_node(Node::new("a").with_property("name", "Ada")).await.unwrap();

        let updates = props([("name", Value::from("Grace")), ("age", Value::from(40))]);
        let node = backend.get_node(&"a".into()).await.unwrap().unwrap();
        let op = MutationOp {
            rollback: RollbackData::PreviousProperties { previous: previous_values(&node.properties, &updates) },
            mutation: Mutation::UpdateNode { id: "a".into(), updates },
        };
        op.mutation.apply(&backend).await.unwrap();
        op.undo(&backend).await.unwrap();

        let node = backend.get_node(&"a".into()).await.unwrap().unwrap();
        assert_eq!(node.properties, props([("name", "Ada")]));
    }

    #[tokio::test]
    async fn test_remove_node_undo_restores_edges() {
        let backend = MemoryBackend::new();
        for id in ["a", "b"] {
            backend.add_node(Node::new(id)).await.unwrap();
        }
        backend.add_edge(Edge::new("a", "b", "KNOWS")).await.unwrap();

        let node = backend.get_node(&"a".into()).await.unwrap().unwrap();
        let edges = backend.edges_for_node(&"a".into()).await.unwrap();
        let op = MutationOp {
            mutation: Mutation::RemoveNode { id: "a".into() },
            rollback: RollbackData::RemovedNode { node, edges },
        };
        op.mutation.apply(&backend).await.unwrap();
        assert_eq!(backend.edge_count(), 0);
        op.undo(&backend).await.unwrap();
        assert_eq!(backend.node_count(), 2);
        assert_eq!(backend.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let result = Mutation::RemoveNode { id: "ghost".into() }.apply(&backend).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
