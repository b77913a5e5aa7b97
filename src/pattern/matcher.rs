//! Pattern execution against a storage backend.
//!
//! Matching proceeds segment by segment over a set of partial matches;
//! each partial carries its bindings and the node it currently stands on.
//! Variable-length segments run a breadth-first expansion with a visited
//! set, so a path never re-enters a node it has already reached. Cyclic
//! paths through an already-visited node are therefore not reported.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Node, NodeId, Path};
use crate::storage::StorageBackend;
use crate::Result;
use super::{
    Binding, Bindings, MatchOptions, MatchResult, MatcherConfig, NodePattern, PathPattern,
    RelationshipPattern,
};

/// Reached paths of one breadth-first expansion.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Paths from the start node, shortest first. Each ends on a distinct node.
    pub paths: Vec<Path>,
    /// Edges inspected along the way.
    pub edges_examined: usize,
}

/// Breadth-first expansion from `start` along edges accepted by `rel`.
///
/// Returns every node first reached at a depth within `min..=max`, with
/// the path that reached it. Stops once `limit` paths are collected.
pub async fn expand<B: StorageBackend + ?Sized>(
    backend: &B,
    start: &Node,
    rel: &RelationshipPattern,
    min: usize,
    max: usize,
    limit: usize,
) -> Result<Expansion> {
    let mut out = Expansion::default();
    if min == 0 {
        out.paths.push(Path::single(start.clone()));
    }

    let mut visited: HashSet<NodeId> = HashSet::from([start.id.clone()]);
    let mut frontier = vec![Path::single(start.clone())];

    for depth in 1..=max {
        let mut next = Vec::new();
        for path in &frontier {
            let Some(tail) = path.end() else { continue };
            for edge in backend.edges_in_direction(&tail.id, rel.direction).await? {
                out.edges_examined += 1;
                if !rel.matches_edge(&edge) {
                    continue;
                }
                let Some(other) = edge.other_node(&tail.id).cloned() else { continue };
                if !visited.insert(other.clone()) {
                    continue;
                }
                let Some(node) = backend.get_node(&other).await? else { continue };

                let mut extended = path.clone();
                extended.append(edge, node);
                if depth >= min {
                    out.paths.push(extended.clone());
                    if out.paths.len() >= limit {
                        return Ok(out);
                    }
                }
                next.push(extended);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(out)
}

/// One partial match: bindings so far plus the node to continue from.
struct Partial {
    bindings: Bindings,
    current: Node,
    hops: usize,
}

/// Executes [`PathPattern`]s against a backend.
pub struct PatternMatcher<B: StorageBackend> {
    backend: Arc<B>,
    config: MatcherConfig,
}

impl<B: StorageBackend> PatternMatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, MatcherConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: MatcherConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Match one pattern, best score first, then `offset`/`limit`.
    pub async fn match_pattern(&self, pattern: &PathPattern, options: &MatchOptions) -> Result<Vec<MatchResult>> {
        let cap = self.config.max_results_per_pattern;
        let mut partials = self.start_candidates(&pattern.start, &options.initial_bindings).await?;
        debug!(candidates = partials.len(), segments = pattern.segments.len(), "pattern start");

        for (index, (rel, node_pattern)) in pattern.segments.iter().enumerate() {
            let mut next = Vec::new();
            for partial in &partials {
                if rel.is_variable_length() {
                    self.extend_variable(partial, rel, node_pattern, &mut next).await?;
                } else {
                    self.extend_single(partial, rel, node_pattern, &mut next).await?;
                }
                if next.len() >= cap {
                    next.truncate(cap);
                    break;
                }
            }
            debug!(segment = index, partials = next.len(), "pattern segment");
            partials = next;
            if partials.is_empty() {
                break;
            }
        }

        let base = pattern.specificity();
        let mut results: Vec<MatchResult> = partials
            .into_iter()
            .map(|p| {
                let score = 1.0 + base + 0.5 * p.hops as f64 + 0.25 * p.bindings.len() as f64;
                MatchResult { bindings: p.bindings, score }
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        let page = results.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(n) => page.take(n).collect(),
            None => page.collect(),
        })
    }

    /// Inner join: each pattern's results seed the next pattern's
    /// bindings; scores add up. An empty step ends the join early.
    pub async fn match_multiple(&self, patterns: &[PathPattern], options: &MatchOptions) -> Result<Vec<MatchResult>> {
        let mut acc = vec![MatchResult { bindings: options.initial_bindings.clone(), score: 0.0 }];

        for pattern in patterns {
            let mut joined = Vec::new();
            for seed in &acc {
                let seeded = MatchOptions { initial_bindings: seed.bindings.clone(), ..MatchOptions::default() };
                for found in self.match_pattern(pattern, &seeded).await? {
                    let mut bindings = seed.bindings.clone();
                    if bindings.join(&found.bindings) {
                        joined.push(MatchResult { bindings, score: seed.score + found.score });
                    }
                }
            }
            if joined.is_empty() {
                debug!("pattern join produced no rows");
                return Ok(Vec::new());
            }
            acc = joined;
        }

        acc.sort_by(|a, b| b.score.total_cmp(&a.score));
        let page = acc.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(n) => page.take(n).collect(),
            None => page.collect(),
        })
    }

    async fn start_candidates(&self, pattern: &NodePattern, initial: &Bindings) -> Result<Vec<Partial>> {
        if let Some(bound) = pattern.variable.as_deref().and_then(|v| initial.get(v)) {
            let fresh = match bound.as_node() {
                Some(node) => self.backend.get_node(&node.id).await?,
                None => None,
            };
            return Ok(fresh
                .filter(|n| pattern.matches(n))
                .map(|current| Partial { bindings: initial.clone(), current, hops: 0 })
                .into_iter()
                .collect());
        }

        let capabilities = self.backend.capabilities();
        let nodes = match pattern.labels.first() {
            Some(label) if capabilities.label_index || !capabilities.full_scan => {
                self.backend.nodes_by_label(label).await?
            }
            _ => self.backend.all_nodes().await?,
        };

        Ok(nodes
            .into_iter()
            .filter(|n| pattern.matches(n))
            .take(self.config.max_results_per_pattern)
            .map(|current| {
                let mut bindings = initial.clone();
                if let Some(var) = &pattern.variable {
                    bindings.insert(var.clone(), Binding::Node(current.clone()));
                }
                Partial { bindings, current, hops: 0 }
            })
            .collect())
    }

    async fn extend_single(
        &self,
        partial: &Partial,
        rel: &RelationshipPattern,
        node_pattern: &NodePattern,
        out: &mut Vec<Partial>,
    ) -> Result<()> {
        let from = &partial.current.id;
        for edge in self.backend.edges_in_direction(from, rel.direction).await? {
            if !rel.matches_edge(&edge) {
                continue;
            }
            let Some(other) = edge.other_node(from).cloned() else { continue };
            let Some(node) = self.backend.get_node(&other).await? else { continue };
            if !node_pattern.matches(&node) {
                continue;
            }

            let mut bindings = partial.bindings.clone();
            if !bind(&mut bindings, rel.variable.as_deref(), Binding::Edge(edge))
                || !bind(&mut bindings, node_pattern.variable.as_deref(), Binding::Node(node.clone()))
            {
                continue;
            }
            out.push(Partial { bindings, current: node, hops: partial.hops + 1 });
        }
        Ok(())
    }

    async fn extend_variable(
        &self,
        partial: &Partial,
        rel: &RelationshipPattern,
        node_pattern: &NodePattern,
        out: &mut Vec<Partial>,
    ) -> Result<()> {
        let (min, max) = rel.hop_range(self.config.max_var_length_hops);
        let expansion = expand(
            self.backend.as_ref(),
            &partial.current,
            rel,
            min,
            max,
            self.config.max_results_per_pattern,
        )
        .await?;

        for path in expansion.paths {
            let Some(node) = path.end().cloned() else { continue };
            if !node_pattern.matches(&node) {
                continue;
            }
            let hops = path.len();
            let mut bindings = partial.bindings.clone();
            if !bind(&mut bindings, rel.variable.as_deref(), Binding::Path(path))
                || !bind(&mut bindings, node_pattern.variable.as_deref(), Binding::Node(node.clone()))
            {
                continue;
            }
            out.push(Partial { bindings, current: node, hops: partial.hops + hops });
        }
        Ok(())
    }
}

/// Bind `var` unless it is already bound to a different element.
fn bind(bindings: &mut Bindings, var: Option<&str>, binding: Binding) -> bool {
    let Some(var) = var else { return true };
    match bindings.get(var) {
        Some(existing) => existing.same_element(&binding),
        None => {
            bindings.insert(var, binding);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Edge};
    use crate::storage::MemoryBackend;

    async fn chain() -> Arc<MemoryBackend> {
        let backend = MemoryBackend::new();
        for id in ["a", "b", "c", "d"] {
            backend.add_node(Node::new(id).with_labels(["Stop"])).await.unwrap();
        }
        for (from, to) in [("a", "b"), ("b", "c"), ("c", "d")] {
            backend.add_edge(Edge::new(from, to, "NEXT")).await.unwrap();
        }
        Arc::new(backend)
    }

    #[tokio::test]
    async fn test_expand_exact_depth() {
        let backend = chain().await;
        let start = backend.get_node(&"a".into()).await.unwrap().unwrap();
        let rel = RelationshipPattern::outgoing().edge_type("NEXT");
        let expansion = expand(backend.as_ref(), &start, &rel, 2, 2, 100).await.unwrap();
        let ends: Vec<&str> = expansion.paths.iter().filter_map(|p| p.end()).map(|n| n.id.as_str()).collect();
        assert_eq!(ends, vec!["c"]);
        assert_eq!(expansion.paths[0].len(), 2);
    }

    #[tokio::test]
    async fn test_expand_does_not_revisit() {
        let backend = chain().await;
        backend.add_edge(Edge::new("d", "a", "NEXT")).await.unwrap();
        let start = backend.get_node(&"a".into()).await.unwrap().unwrap();
        let rel = RelationshipPattern::outgoing();
        let expansion = expand(backend.as_ref(), &start, &rel, 1, 10, 100).await.unwrap();
        assert_eq!(expansion.paths.len(), 3);
    }

    fn reached(results: &[MatchResult]) -> Vec<&str> {
        let mut ids: Vec<&str> = results.iter().filter_map(|r| r.bindings.node_id("t")).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_explicit_hops_ignore_cap() {
        let config = MatcherConfig { max_var_length_hops: 1, ..MatcherConfig::default() };
        let matcher = PatternMatcher::with_config(chain().await, config);
        let from_a = MatchOptions::default().bind("s", Binding::Node(Node::new("a")));
        let path = |min, max| {
            PathPattern::new(NodePattern::var("s"))
                .then(RelationshipPattern::outgoing().edge_type("NEXT").hops(min, max), NodePattern::var("t"))
        };

        let explicit = matcher.match_pattern(&path(Some(1), Some(3)), &from_a).await.unwrap();
        assert_eq!(reached(&explicit), vec!["b", "c", "d"]);

        let open = matcher.match_pattern(&path(Some(1), None), &from_a).await.unwrap();
        assert_eq!(reached(&open), vec!["b"]);

        // an open range starting past the cap still reaches its minimum
        let past_cap = matcher.match_pattern(&path(Some(3), None), &from_a).await.unwrap();
        assert_eq!(reached(&past_cap), vec!["d"]);
    }

    #[tokio::test]
    async fn test_incoming_single_hop() {
        let backend = chain().await;
        let matcher = PatternMatcher::new(backend);
        let pattern = PathPattern::new(NodePattern::var("x"))
            .then(RelationshipPattern::new(Direction::Incoming).var("e"), NodePattern::var("y"));
        let options = MatchOptions::default().bind("x", Binding::Node(Node::new("c")));
        let results = matcher.match_pattern(&pattern, &options).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bindings.node_id("y"), Some("b"));
        assert_eq!(results[0].bindings.get("e").and_then(Binding::as_edge).map(|e| e.from.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn test_repeated_variable_must_agree() {
        let backend = chain().await;
        backend.add_edge(Edge::new("b", "a", "BACK")).await.unwrap();
        let matcher = PatternMatcher::new(backend);
        let pattern = PathPattern::parse("(x)-[:NEXT]->(y)-[:BACK]->(x)").unwrap();
        let results = matcher.match_pattern(&pattern, &MatchOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bindings.node_id("x"), Some("a"));
    }

    #[tokio::test]
    async fn test_offset_and_limit() {
        let matcher = PatternMatcher::new(chain().await);
        let pattern = PathPattern::parse("(s:Stop)").unwrap();
        let all = matcher.match_pattern(&pattern, &MatchOptions::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        let page = matcher
            .match_pattern(&pattern, &MatchOptions::default().offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
