//! Node-type classification.
//!
//! Runs once before any other component looks at a graph. Join tree roots
//! are joins; untyped nodes get a type from their content (a pipeline
//! reference makes a pipeline node, an outgoing hook context makes an
//! outgoing hook node, anything else is a fork). Afterwards every node must
//! have a [`NodeKind`](crate::node::NodeKind).

use crate::error::WorkflowError;
use crate::graph::WorkflowData;
use crate::node::{Node, NodeType};

fn infer(node: &Node) -> NodeType {
    if node.context.has_pipeline() {
        NodeType::Pipeline
    } else if node.outgoing_hook.as_ref().is_some_and(|ctx| ctx.has_model()) {
        NodeType::OutgoingHook
    } else {
        NodeType::Fork
    }
}

/// Assigns a type to every untyped node and checks declared types.
///
/// # Errors
///
/// Returns [`WorkflowError::WrongNodeType`] listing every node whose type
/// does not match its content or position.
pub fn classify(data: &mut WorkflowData) -> Result<(), WorkflowError> {
    let mut wrong = Vec::new();

    for idx in data.flatten() {
        let is_join = data.is_join(idx);
        let node = data.node_mut(idx);

        let node_type = match (node.node_type, is_join) {
            (None, true) => NodeType::Join,
            (None, false) => infer(node),
            (Some(node_type), _) => node_type,
        };
        node.node_type = Some(node_type);

        let positioned = (node_type == NodeType::Join) == is_join;
        if !positioned || node.kind().is_none() {
            wrong.push(node.effective_ref().to_string());
        }
    }

    if wrong.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::WrongNodeType { nodes: wrong })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn untyped_nodes_are_inferred() {
        let mut data = WorkflowData::new(Node::pipeline("build"));
        let root = data.root().unwrap();
        let fork = data.add_child(root, Node::default().with_name("split"));
        let hook = data.add_child(fork, Node::outgoing_hook("Webhook"));
        let join = data.add_join(Node::default().with_name("join"));
        data.node_mut(join).join_sources = vec!["split".to_string()];

        classify(&mut data).unwrap();

        assert!(matches!(data.node(root).kind(), Some(NodeKind::Pipeline(_))));
        assert_eq!(data.node(fork).node_type, Some(NodeType::Fork));
        assert!(matches!(data.node(hook).kind(), Some(NodeKind::OutgoingHook(_))));
        assert!(matches!(data.node(join).kind(), Some(NodeKind::Join(sources)) if sources.len() == 1));
    }

    #[test]
    fn mismatched_types_are_collected() {
        let mut data = WorkflowData::new(Node::pipeline("build"));
        let root = data.root().unwrap();

        let mut pipeline_without_ref = Node::default().with_name("empty");
        pipeline_without_ref.node_type = Some(NodeType::Pipeline);
        data.add_child(root, pipeline_without_ref);

        let mut misplaced_join = Node::join(["build"]).with_name("inline-join");
        misplaced_join.node_type = Some(NodeType::Join);
        data.add_child(root, misplaced_join);

        let err = classify(&mut data).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::WrongNodeType {
                nodes: vec!["empty".to_string(), "inline-join".to_string()],
            }
        );
    }

    #[test]
    fn join_position_cannot_hold_pipeline() {
        let mut data = WorkflowData::new(Node::pipeline("build"));
        let mut join = Node::pipeline("deploy").with_name("deploy");
        join.node_type = Some(NodeType::Pipeline);
        data.add_join(join);

        assert!(matches!(
            classify(&mut data),
            Err(WorkflowError::WrongNodeType { nodes }) if nodes == vec!["deploy".to_string()]
        ));
    }
}
