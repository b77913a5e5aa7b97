//! Index hints.
//!
//! The query parser reports which indexes would speed a plan up. Hints
//! are advisory only: no plan requires an index to produce correct rows.

use serde::{Deserialize, Serialize};

/// Type of index a hint asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexType {
    /// Label → node ids.
    Label,
    /// B-tree on a property, for equality and range predicates.
    Property,
    /// Ordered index serving a sort key.
    Sort,
    /// Edge type → edges.
    EdgeType,
    /// Full-text index for substring / regex predicates.
    FullText,
}

impl IndexType {
    fn prefix(&self) -> &'static str {
        match self {
            IndexType::Label => "label",
            IndexType::Property => "property",
            IndexType::Sort => "sort",
            IndexType::EdgeType => "edge_type",
            IndexType::FullText => "fulltext",
        }
    }
}

/// A named index suggestion, e.g. `property:age`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexHint {
    pub name: String,
    pub index_type: IndexType,
}

impl IndexHint {
    pub fn new(index_type: IndexType, target: &str) -> Self {
        Self {
            name: format!("{}:{target}", index_type.prefix()),
            index_type,
        }
    }
}

impl std::fmt::Display for IndexHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_names() {
        assert_eq!(IndexHint::new(IndexType::Property, "age").name, "property:age");
        assert_eq!(IndexHint::new(IndexType::EdgeType, "KNOWS").name, "edge_type:KNOWS");
    }
}
