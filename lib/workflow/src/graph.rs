//! Workflow graph implementation using petgraph.
//!
//! A workflow graph is a tree rooted at the root node, plus zero or more join
//! trees. Edges go from a node to the nodes it triggers, in declaration order.
//! Joins are not connected by edges to their sources; they reference them by
//! ref.
//!
//! The graph is serialized as a nested tree (`node` with `triggers`, plus
//! `joins`) and stored as JSONB next to the per-node rows.

use crate::error::WorkflowError;
use crate::hook::NodeHook;
use crate::node::Node;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The node graph of a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "WorkflowDataRepr", into = "WorkflowDataRepr")]
pub struct WorkflowData {
    graph: DiGraph<Node, ()>,
    root: Option<NodeIndex>,
    joins: Vec<NodeIndex>,
}

impl WorkflowData {
    /// Creates a graph with the given root node.
    #[must_use]
    pub fn new(root: Node) -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(root);
        Self {
            graph,
            root: Some(root),
            joins: Vec::new(),
        }
    }

    /// Returns the root node index.
    #[must_use]
    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    /// Returns the root node.
    #[must_use]
    pub fn root_node(&self) -> Option<&Node> {
        self.root.map(|idx| &self.graph[idx])
    }

    /// Returns a mutable reference to the root node.
    pub fn root_node_mut(&mut self) -> Option<&mut Node> {
        let root = self.root?;
        self.graph.node_weight_mut(root)
    }

    /// Returns the join node indices, in declaration order.
    #[must_use]
    pub fn joins(&self) -> &[NodeIndex] {
        &self.joins
    }

    /// Whether the index is one of the join trees' roots.
    #[must_use]
    pub fn is_join(&self, idx: NodeIndex) -> bool {
        self.joins.contains(&idx)
    }

    /// Adds a node triggered by `parent`.
    pub fn add_child(&mut self, parent: NodeIndex, node: Node) -> NodeIndex {
        let child = self.graph.add_node(node);
        self.graph.add_edge(parent, child, ());
        child
    }

    /// Adds a join tree root.
    pub fn add_join(&mut self, node: Node) -> NodeIndex {
        let idx = self.graph.add_node(node);
        self.joins.push(idx);
        idx
    }

    /// Returns the node at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` does not belong to this graph.
    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.graph[idx]
    }

    /// Returns the node at `idx` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `idx` does not belong to this graph.
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.graph[idx]
    }

    /// Returns the nodes triggered by `idx`, in declaration order.
    #[must_use]
    pub fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (edge.id(), edge.target()))
            .collect();
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    /// Returns the node triggering `idx`.
    #[must_use]
    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
    }

    /// Flattens the graph into pre-order: the root tree first, then every
    /// join tree in declaration order.
    ///
    /// Indices stay valid for the life of the graph, so mutating through
    /// [`node_mut`](Self::node_mut) mutates the tree.
    #[must_use]
    pub fn flatten(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.graph.node_count());
        for start in self.root.iter().chain(self.joins.iter()) {
            let mut stack = vec![*start];
            while let Some(idx) = stack.pop() {
                order.push(idx);
                stack.extend(self.children(idx).into_iter().rev());
            }
        }
        order
    }

    /// Returns all nodes in flattened order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.flatten().into_iter().map(|idx| &self.graph[idx])
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Finds a node by ref, falling back to its name.
    #[must_use]
    pub fn find_by_ref(&self, reference: &str) -> Option<NodeIndex> {
        self.flatten()
            .into_iter()
            .find(|idx| self.graph[*idx].effective_ref() == reference)
    }

    /// Returns the set of node refs.
    #[must_use]
    pub fn refs(&self) -> HashSet<&str> {
        self.graph
            .node_weights()
            .map(Node::effective_ref)
            .collect()
    }

    /// Clears every storage id.
    pub fn reset_ids(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.id = None;
        }
    }

    /// Returns every hook with the node carrying it.
    #[must_use]
    pub fn hooks(&self) -> Vec<(&Node, &NodeHook)> {
        self.nodes()
            .flat_map(|node| node.hooks.iter().map(move |hook| (node, hook)))
            .collect()
    }

    /// Returns the `(parent name, child name)` pairs in flattened order.
    #[must_use]
    pub fn edge_names(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for idx in self.flatten() {
            for child in self.children(idx) {
                edges.push((self.graph[idx].name.clone(), self.graph[child].name.clone()));
            }
        }
        edges
    }

    /// Checks that every join declares at least one source.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first join without sources.
    pub fn check_join_cardinality(&self) -> Result<(), WorkflowError> {
        for idx in &self.joins {
            let join = &self.graph[*idx];
            if join.join_sources.is_empty() {
                return Err(WorkflowError::JoinWithoutSources {
                    join: join.effective_ref().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks that every join source matches a node ref.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first dangling source.
    pub fn check_join_sources(&self) -> Result<(), WorkflowError> {
        let refs = self.refs();
        for idx in &self.joins {
            let join = &self.graph[*idx];
            if let Some(source) = join
                .join_sources
                .iter()
                .find(|source| !refs.contains(source.as_str()))
            {
                return Err(WorkflowError::UnknownJoinSource {
                    join: join.effective_ref().to_string(),
                    source: source.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct WorkflowDataRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node: Option<NodeTree>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    joins: Vec<NodeTree>,
}

#[derive(Serialize, Deserialize)]
struct NodeTree {
    #[serde(flatten)]
    node: Node,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    triggers: Vec<NodeTree>,
}

impl NodeTree {
    fn from_graph(data: &WorkflowData, idx: NodeIndex) -> Self {
        Self {
            node: data.graph[idx].clone(),
            triggers: data
                .children(idx)
                .into_iter()
                .map(|child| Self::from_graph(data, child))
                .collect(),
        }
    }

    fn insert_into(self, data: &mut WorkflowData, parent: Option<NodeIndex>) -> NodeIndex {
        let idx = match parent {
            Some(parent) => data.add_child(parent, self.node),
            None => data.graph.add_node(self.node),
        };
        for trigger in self.triggers {
            trigger.insert_into(data, Some(idx));
        }
        idx
    }
}

impl From<WorkflowDataRepr> for WorkflowData {
    fn from(repr: WorkflowDataRepr) -> Self {
        let mut data = Self::default();
        let root = repr.node.map(|tree| tree.insert_into(&mut data, None));
        data.root = root;
        for join in repr.joins {
            let idx = join.insert_into(&mut data, None);
            data.joins.push(idx);
        }
        data
    }
}

impl From<WorkflowData> for WorkflowDataRepr {
    fn from(data: WorkflowData) -> Self {
        Self {
            node: data.root.map(|idx| NodeTree::from_graph(&data, idx)),
            joins: data
                .joins
                .iter()
                .map(|idx| NodeTree::from_graph(&data, *idx))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn sample() -> WorkflowData {
        let mut data = WorkflowData::new(Node::pipeline("build").with_name("build"));
        let root = data.root().unwrap();
        let test = data.add_child(root, Node::pipeline("test").with_name("test"));
        data.add_child(test, Node::pipeline("lint").with_name("lint"));
        data.add_child(root, Node::pipeline("package").with_name("package"));
        let join = data.add_join(Node::join(["test", "package"]).with_name("join"));
        data.add_child(join, Node::pipeline("deploy").with_name("deploy"));
        data
    }

    fn names(data: &WorkflowData) -> Vec<String> {
        data.nodes().map(|n| n.name.clone()).collect()
    }

    #[test]
    fn flatten_is_pre_order_root_then_joins() {
        let data = sample();
        assert_eq!(
            names(&data),
            vec!["build", "test", "lint", "package", "join", "deploy"]
        );
    }

    #[test]
    fn flatten_indices_mutate_the_tree() {
        let mut data = sample();
        for idx in data.flatten() {
            data.node_mut(idx).reference = format!("ref-{}", data.node(idx).name);
        }
        assert!(data.nodes().all(|n| n.reference.starts_with("ref-")));
    }

    #[test]
    fn parent_and_children() {
        let data = sample();
        let root = data.root().unwrap();
        let children = data.children(root);
        assert_eq!(children.len(), 2);
        assert_eq!(data.node(children[0]).name, "test");
        assert_eq!(data.parent(children[1]), Some(root));
        assert_eq!(data.parent(root), None);
    }

    #[test]
    fn serde_preserves_shape() {
        let data = sample();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["node"]["triggers"][0]["name"], "test");
        assert_eq!(json["joins"][0]["join_sources"][1], "package");

        let back: WorkflowData = serde_json::from_value(json).unwrap();
        assert_eq!(names(&back), names(&data));
        assert_eq!(back.edge_names(), data.edge_names());
        assert_eq!(back.joins().len(), 1);
    }

    #[test]
    fn reset_ids_clears_every_node() {
        let mut data = sample();
        for (i, idx) in data.flatten().into_iter().enumerate() {
            data.node_mut(idx).id = Some(NodeId::new(i as i64 + 1));
        }
        data.reset_ids();
        assert!(data.nodes().all(|n| n.id.is_none()));
    }

    #[test]
    fn join_checks() {
        let data = sample();
        assert!(data.check_join_cardinality().is_ok());
        assert!(data.check_join_sources().is_ok());

        let mut dangling = sample();
        dangling.add_join(Node::join(["nope"]).with_name("join_2"));
        assert_eq!(
            dangling.check_join_sources(),
            Err(WorkflowError::UnknownJoinSource {
                join: "join_2".to_string(),
                source: "nope".to_string(),
            })
        );

        let mut empty = sample();
        empty.add_join(Node::join(Vec::<String>::new()).with_name("join_2"));
        assert!(matches!(
            empty.check_join_cardinality(),
            Err(WorkflowError::JoinWithoutSources { .. })
        ));
    }

    #[test]
    fn find_by_ref_falls_back_to_name() {
        let mut data = sample();
        let idx = data.find_by_ref("lint").unwrap();
        data.node_mut(idx).reference = "style".to_string();
        assert_eq!(data.find_by_ref("style"), Some(idx));
        assert_eq!(data.find_by_ref("lint"), None);
    }
}
