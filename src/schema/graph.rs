//! Directed join graph over a database's tables and relationships.
//!
//! Nodes are qualified table names (`schema.table`); edges carry the join
//! columns and a weight that favours explicit foreign keys over inferred
//! ones, per [`crate::schema::model::RelationshipKind::weight`]. Shortest
//! join paths are found with Dijkstra rather than BFS because the graph is
//! weighted.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::model::{Relationship, RelationshipKind, Table};

#[derive(Debug, Clone)]
pub struct JoinEdge {
    pub from_column: String,
    pub to_column: String,
    pub kind: RelationshipKind,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct JoinStep {
    pub from_table: String,
    pub to_table: String,
    pub from_column: String,
    pub to_column: String,
    pub is_inferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone)]
pub struct JoinComplexityReport {
    pub complexity: JoinComplexity,
    pub tables_involved: usize,
    pub join_count: usize,
    pub original_tables: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub is_weakly_connected: bool,
    pub component_count: usize,
    pub average_degree: f64,
    pub density: f64,
    pub has_cycles: bool,
    pub hub_tables: Vec<(String, usize)>,
    pub isolated_tables: Vec<String>,
    pub most_central_tables: Vec<(String, f64)>,
}

/// A directed, weighted join graph for one database schema snapshot.
pub struct JoinGraph {
    graph: DiGraph<String, JoinEdge>,
    index_of: HashMap<String, NodeIndex>,
}

impl JoinGraph {
    /// Builds a join graph from a table/relationship set. Tables with no
    /// relationships still appear as isolated nodes.
    pub fn build(tables: &[Table], relationships: &[Relationship]) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for t in tables {
            let name = t.qualified_name();
            let idx = graph.add_node(name.clone());
            index_of.insert(name, idx);
        }

        for r in relationships {
            let from = r.from_qualified();
            let to = r.to_qualified();
            let from_idx = *index_of
                .entry(from.clone())
                .or_insert_with(|| graph.add_node(from.clone()));
            let to_idx = *index_of
                .entry(to.clone())
                .or_insert_with(|| graph.add_node(to.clone()));

            graph.add_edge(
                from_idx,
                to_idx,
                JoinEdge {
                    from_column: r.from_column.clone(),
                    to_column: r.to_column.clone(),
                    kind: r.kind,
                    weight: r.kind.weight(),
                },
            );
        }

        Self { graph, index_of }
    }

    fn normalize<'a>(&self, table: &'a str) -> std::borrow::Cow<'a, str> {
        if table.contains('.') {
            std::borrow::Cow::Borrowed(table)
        } else {
            std::borrow::Cow::Owned(format!("public.{table}"))
        }
    }

    fn node(&self, table: &str) -> Option<NodeIndex> {
        self.index_of.get(self.normalize(table).as_ref()).copied()
    }

    /// Finds the lowest-weight join path between two tables, capped at
    /// `max_hops` edges. Returns `None` if the tables are unknown, no path
    /// exists, or the shortest path exceeds `max_hops`.
    pub fn shortest_join_path(&self, from: &str, to: &str, max_hops: usize) -> Option<Vec<JoinStep>> {
        let from_idx = self.node(from)?;
        let to_idx = self.node(to)?;

        // dijkstra() gives distances, not the path itself; reconstruct the
        // path by walking predecessors found via a second local Dijkstra run
        // that also records the edge used into each node.
        let path = dijkstra_path(&self.graph, from_idx, to_idx)?;
        if path.len() - 1 > max_hops {
            return None;
        }

        let mut steps = Vec::with_capacity(path.len() - 1);
        for window in path.windows(2) {
            let (a, b) = (window[0], window[1]);
            let edge = self
                .graph
                .edges_connecting(a, b)
                .min_by(|x, y| x.weight().weight.partial_cmp(&y.weight().weight).unwrap())?;
            steps.push(JoinStep {
                from_table: self.graph[a].clone(),
                to_table: self.graph[b].clone(),
                from_column: edge.weight().from_column.clone(),
                to_column: edge.weight().to_column.clone(),
                is_inferred: matches!(edge.weight().kind, RelationshipKind::Inferred),
            });
        }
        Some(steps)
    }

    /// Direct neighbours (either direction), plus nodes reachable within
    /// `depth` hops on the undirected graph, excluding direct neighbours.
    pub fn related_tables(&self, table: &str, depth: usize) -> Option<(Vec<String>, Vec<String>)> {
        let idx = self.node(table)?;

        let mut direct: std::collections::HashSet<NodeIndex> = std::collections::HashSet::new();
        for e in self.graph.edges_directed(idx, Direction::Outgoing) {
            direct.insert(e.target());
        }
        for e in self.graph.edges_directed(idx, Direction::Incoming) {
            direct.insert(e.source());
        }

        let mut indirect = std::collections::HashSet::new();
        if depth > 1 {
            let mut frontier = vec![idx];
            let mut seen: std::collections::HashSet<NodeIndex> = [idx].into_iter().collect();
            for _ in 0..depth {
                let mut next = Vec::new();
                for n in &frontier {
                    for e in self.graph.edges_directed(*n, Direction::Outgoing) {
                        if seen.insert(e.target()) {
                            next.push(e.target());
                        }
                    }
                    for e in self.graph.edges_directed(*n, Direction::Incoming) {
                        if seen.insert(e.source()) {
                            next.push(e.source());
                        }
                    }
                }
                frontier = next;
            }
            for n in seen {
                if n != idx && !direct.contains(&n) {
                    indirect.insert(n);
                }
            }
        }

        Some((
            direct.into_iter().map(|n| self.graph[n].clone()).collect(),
            indirect.into_iter().map(|n| self.graph[n].clone()).collect(),
        ))
    }

    /// The `top_n` tables by total (in + out) degree.
    pub fn hub_tables(&self, top_n: usize) -> Vec<(String, usize)> {
        let mut degrees: Vec<(String, usize)> = self
            .graph
            .node_indices()
            .map(|n| {
                let degree = self.graph.edges_directed(n, Direction::Outgoing).count()
                    + self.graph.edges_directed(n, Direction::Incoming).count();
                (self.graph[n].clone(), degree)
            })
            .collect();
        degrees.sort_by(|a, b| b.1.cmp(&a.1));
        degrees.truncate(top_n);
        degrees
    }

    /// Tables with zero relationships in either direction.
    pub fn isolated_tables(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|n| {
                self.graph.edges_directed(*n, Direction::Outgoing).count() == 0
                    && self.graph.edges_directed(*n, Direction::Incoming).count() == 0
            })
            .map(|n| self.graph[n].clone())
            .collect()
    }

    pub fn metrics(&self) -> GraphMetrics {
        let total_nodes = self.graph.node_count();
        let total_edges = self.graph.edge_count();

        let component_count = weakly_connected_components(&self.graph);
        let average_degree = if total_nodes > 0 {
            (2 * total_edges) as f64 / total_nodes as f64
        } else {
            0.0
        };
        let max_edges = if total_nodes > 1 {
            (total_nodes * (total_nodes - 1)) as f64
        } else {
            1.0
        };

        GraphMetrics {
            total_nodes,
            total_edges,
            is_weakly_connected: component_count <= 1,
            component_count,
            average_degree,
            density: total_edges as f64 / max_edges,
            has_cycles: petgraph::algo::is_cyclic_directed(&self.graph),
            hub_tables: self.hub_tables(5),
            isolated_tables: self.isolated_tables(),
            most_central_tables: self.betweenness_centrality_top(5),
        }
    }

    /// Brandes' betweenness centrality, unweighted. `top_n` highest-scoring
    /// nodes are returned in descending order.
    fn betweenness_centrality_top(&self, top_n: usize) -> Vec<(String, f64)> {
        let n = self.graph.node_count();
        if n == 0 {
            return Vec::new();
        }
        let mut centrality: HashMap<NodeIndex, f64> =
            self.graph.node_indices().map(|n| (n, 0.0)).collect();

        for s in self.graph.node_indices() {
            let mut stack = Vec::new();
            let mut preds: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
            let mut sigma: HashMap<NodeIndex, f64> =
                self.graph.node_indices().map(|n| (n, 0.0)).collect();
            let mut dist: HashMap<NodeIndex, i64> =
                self.graph.node_indices().map(|n| (n, -1)).collect();
            sigma.insert(s, 1.0);
            dist.insert(s, 0);

            let mut queue = std::collections::VecDeque::new();
            queue.push_back(s);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for w in self.graph.neighbors_undirected(v) {
                    if dist[&w] < 0 {
                        dist.insert(w, dist[&v] + 1);
                        queue.push_back(w);
                    }
                    if dist[&w] == dist[&v] + 1 {
                        *sigma.get_mut(&w).unwrap() += sigma[&v];
                        preds.entry(w).or_default().push(v);
                    }
                }
            }

            let mut delta: HashMap<NodeIndex, f64> =
                self.graph.node_indices().map(|n| (n, 0.0)).collect();
            while let Some(w) = stack.pop() {
                if let Some(ps) = preds.get(&w) {
                    for &v in ps {
                        *delta.get_mut(&v).unwrap() += (sigma[&v] / sigma[&w]) * (1.0 + delta[&w]);
                    }
                }
                if w != s {
                    *centrality.get_mut(&w).unwrap() += delta[&w];
                }
            }
        }

        let mut scored: Vec<(String, f64)> = centrality
            .into_iter()
            .map(|(n, score)| (self.graph[n].clone(), score))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(top_n);
        scored
    }

    /// Classifies the difficulty of joining `tables` by how many
    /// intermediate tables the minimal connecting subgraph needs.
    pub fn join_complexity(&self, tables: &[String]) -> JoinComplexityReport {
        if tables.len() < 2 {
            return JoinComplexityReport {
                complexity: JoinComplexity::Trivial,
                tables_involved: tables.len(),
                join_count: 0,
                original_tables: tables.len(),
            };
        }

        let mut subgraph: std::collections::HashSet<String> = tables.iter().cloned().collect();
        for i in 0..tables.len() {
            for j in (i + 1)..tables.len() {
                if let Some(path) = self.shortest_join_path(&tables[i], &tables[j], usize::MAX) {
                    subgraph.insert(tables[i].clone());
                    for step in &path {
                        subgraph.insert(step.from_table.clone());
                        subgraph.insert(step.to_table.clone());
                    }
                }
            }
        }

        let complexity = if subgraph.len() == tables.len() {
            JoinComplexity::Simple
        } else if (subgraph.len() as f64) <= tables.len() as f64 * 1.5 {
            JoinComplexity::Moderate
        } else {
            JoinComplexity::Complex
        };

        JoinComplexityReport {
            complexity,
            tables_involved: subgraph.len(),
            join_count: subgraph.len().saturating_sub(1),
            original_tables: tables.len(),
        }
    }

    /// Orders `tables` starting from the one most connected to the others
    /// in the set, breaking ties by ascending row estimate so small tables
    /// are probed first.
    pub fn suggest_join_order(&self, tables: &[String], row_estimates: &HashMap<String, i64>) -> Vec<String> {
        if tables.len() <= 2 {
            return tables.to_vec();
        }

        let mut connection_counts: HashMap<&str, usize> = HashMap::new();
        for t in tables {
            let count = tables
                .iter()
                .filter(|other| {
                    *other != t
                        && (self.has_edge(t, other) || self.has_edge(other, t))
                })
                .count();
            connection_counts.insert(t.as_str(), count);
        }

        let mut ordered = tables.to_vec();
        ordered.sort_by(|a, b| {
            let ca = connection_counts[a.as_str()];
            let cb = connection_counts[b.as_str()];
            cb.cmp(&ca).then_with(|| {
                let ra = row_estimates.get(a).copied().unwrap_or(0);
                let rb = row_estimates.get(b).copied().unwrap_or(0);
                ra.cmp(&rb)
            })
        });
        ordered
    }

    fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.node(from), self.node(to)) {
            (Some(a), Some(b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }
}

fn dijkstra_path(
    graph: &DiGraph<String, JoinEdge>,
    from: NodeIndex,
    to: NodeIndex,
) -> Option<Vec<NodeIndex>> {
    use std::cmp::Ordering;
    use std::collections::BinaryHeap;

    #[derive(PartialEq)]
    struct State {
        cost: f64,
        node: NodeIndex,
    }
    impl Eq for State {}
    impl Ord for State {
        fn cmp(&self, other: &Self) -> Ordering {
            other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
        }
    }
    impl PartialOrd for State {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    let mut dist: HashMap<NodeIndex, f64> = HashMap::new();
    let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(from, 0.0);
    heap.push(State { cost: 0.0, node: from });

    while let Some(State { cost, node }) = heap.pop() {
        if node == to {
            let mut path = vec![to];
            let mut cur = to;
            while let Some(&p) = prev.get(&cur) {
                path.push(p);
                cur = p;
            }
            path.reverse();
            return Some(path);
        }
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for edge in graph.edges(node) {
            let next = edge.target();
            let next_cost = cost + edge.weight().weight;
            if next_cost < *dist.get(&next).unwrap_or(&f64::INFINITY) {
                dist.insert(next, next_cost);
                prev.insert(next, node);
                heap.push(State { cost: next_cost, node: next });
            }
        }
    }
    None
}

fn weakly_connected_components(graph: &DiGraph<String, JoinEdge>) -> usize {
    let mut seen: std::collections::HashSet<NodeIndex> = std::collections::HashSet::new();
    let mut components = 0;
    for start in graph.node_indices() {
        if seen.contains(&start) {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        seen.insert(start);
        while let Some(n) = stack.pop() {
            for neighbor in graph.neighbors_undirected(n) {
                if seen.insert(neighbor) {
                    stack.push(neighbor);
                }
            }
        }
    }
    components
}

/// Importance score blending connection count (0.5), relative size (0.3)
/// and primary-key presence (0.2), each normalised against the maximum
/// observed in the same table set.
pub fn importance_scores(tables: &[Table], relationships: &[Relationship]) -> HashMap<String, f64> {
    let mut connections: HashMap<String, usize> = HashMap::new();
    for r in relationships {
        *connections.entry(r.from_qualified()).or_insert(0) += 1;
        *connections.entry(r.to_qualified()).or_insert(0) += 1;
    }

    let max_connections = connections.values().copied().max().unwrap_or(1).max(1) as f64;
    let max_rows = tables.iter().map(|t| t.row_estimate).max().unwrap_or(1).max(1) as f64;

    tables
        .iter()
        .map(|t| {
            let name = t.qualified_name();
            let connection_score =
                (*connections.get(&name).unwrap_or(&0) as f64 / max_connections) * 0.5;
            let size_score = (t.row_estimate.max(0) as f64 / max_rows) * 0.3;
            let pk_score = if t.has_primary_key { 0.2 } else { 0.0 };
            (name, (connection_score + size_score + pk_score).min(1.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Column, ColumnType};

    fn table(schema: &str, name: &str, row_estimate: i64, has_pk: bool) -> Table {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
            row_estimate,
            byte_size: 0,
            has_primary_key: has_pk,
            importance_score: 0.0,
            columns: vec![Column {
                name: "id".to_string(),
                data_type: ColumnType("integer".to_string()),
                nullable: false,
                default: None,
                is_primary_key: true,
                is_foreign_key: false,
                is_unique: true,
                ordinal_position: 1,
            }],
            indexes: vec![],
        }
    }

    fn fk(from: &str, to: &str) -> Relationship {
        Relationship {
            from_schema: "public".to_string(),
            from_table: from.to_string(),
            from_column: format!("{to}_id"),
            to_schema: "public".to_string(),
            to_table: to.to_string(),
            to_column: "id".to_string(),
            kind: RelationshipKind::ForeignKey,
            on_delete: None,
            on_update: None,
        }
    }

    #[test]
    fn finds_shortest_join_path_over_two_hops() {
        let tables = vec![
            table("public", "orders", 100, true),
            table("public", "customers", 10, true),
            table("public", "regions", 5, true),
        ];
        let rels = vec![fk("orders", "customers"), fk("customers", "regions")];
        let graph = JoinGraph::build(&tables, &rels);

        let path = graph
            .shortest_join_path("public.orders", "public.regions", 4)
            .expect("path should exist");
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].from_table, "public.orders");
        assert_eq!(path[1].to_table, "public.regions");
    }

    #[test]
    fn path_exceeding_max_hops_is_none() {
        let tables = vec![
            table("public", "a", 1, true),
            table("public", "b", 1, true),
            table("public", "c", 1, true),
        ];
        let rels = vec![fk("a", "b"), fk("b", "c")];
        let graph = JoinGraph::build(&tables, &rels);
        assert!(graph.shortest_join_path("public.a", "public.c", 1).is_none());
    }

    #[test]
    fn isolated_tables_have_no_edges() {
        let tables = vec![table("public", "orphan", 1, true), table("public", "orders", 1, true)];
        let graph = JoinGraph::build(&tables, &[]);
        assert_eq!(graph.isolated_tables().len(), 2);
    }

    #[test]
    fn importance_score_rewards_pk_and_connections() {
        let tables = vec![
            table("public", "hub", 1000, true),
            table("public", "leaf", 1, false),
        ];
        let rels = vec![fk("leaf", "hub")];
        let scores = importance_scores(&tables, &rels);
        assert!(scores["public.hub"] > scores["public.leaf"]);
    }
}
