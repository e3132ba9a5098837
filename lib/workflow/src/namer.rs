//! Deterministic auto-naming of workflow nodes.
//!
//! Names derive from a base: the pipeline name for pipeline nodes, `fork`,
//! `join`, or the hook model name for outgoing hook nodes. Counters are
//! kept per base identity (pipeline id, hook model id) so that two pipelines
//! sharing a name in different contexts do not collide in the scan.
//!
//! Naming runs in three passes over the flattened graph:
//! 1. scan named nodes for the highest `base` / `base_N` suffix per base;
//! 2. name every unnamed node `base` (first) or `base_{max+1}`, and default
//!    every empty ref to the name;
//! 3. verify that names are unique.

use crate::error::WorkflowError;
use crate::graph::WorkflowData;
use crate::node::{Node, NodeKind};
use conduit_core::{HookModelId, PipelineId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Counter {
    Pipeline(Option<PipelineId>),
    Fork,
    Join,
    OutgoingHook(Option<HookModelId>),
}

fn base(node: &Node) -> Result<(Counter, String), WorkflowError> {
    let wrong = || WorkflowError::WrongNodeType {
        nodes: vec![node.effective_ref().to_string()],
    };
    let (counter, base) = match node.kind().ok_or_else(wrong)? {
        NodeKind::Pipeline(ctx) => (Counter::Pipeline(ctx.pipeline_id), ctx.pipeline_name.clone()),
        NodeKind::Fork => (Counter::Fork, "fork".to_string()),
        NodeKind::Join(_) => (Counter::Join, "join".to_string()),
        NodeKind::OutgoingHook(ctx) => (
            Counter::OutgoingHook(ctx.hook_model_id),
            ctx.hook_model_name.clone(),
        ),
    };
    if base.is_empty() {
        return Err(wrong());
    }
    Ok((counter, base))
}

/// Index carried by `name` for `base`: 1 for the bare base, `N` for
/// `base_N`, nothing for unrelated names.
fn suffix_index(name: &str, base: &str) -> Option<u32> {
    if name == base {
        return Some(1);
    }
    name.strip_prefix(base)?
        .strip_prefix('_')?
        .parse::<u32>()
        .ok()
}

fn indexed_name(base: &str, index: u64) -> String {
    if index == 1 {
        base.to_string()
    } else {
        format!("{base}_{index}")
    }
}

/// Lowest free name for `base` once its counter is exhausted.
fn first_free(base: &str, taken: &HashSet<String>) -> String {
    let mut index = 1;
    loop {
        let name = indexed_name(base, index);
        if !taken.contains(&name) {
            return name;
        }
        index += 1;
    }
}

/// Names every unnamed node and defaults every empty ref.
///
/// Nodes must be classified first.
///
/// # Errors
///
/// Returns [`WorkflowError::WrongNodeType`] for an unclassified node and
/// [`WorkflowError::DuplicateNodeName`] when two nodes end up with the same
/// name.
pub fn assign_names(data: &mut WorkflowData) -> Result<(), WorkflowError> {
    let order = data.flatten();

    let mut highest: HashMap<Counter, u32> = HashMap::new();
    for idx in &order {
        let node = data.node(*idx);
        if node.name.is_empty() {
            continue;
        }
        let (counter, base) = base(node)?;
        if let Some(index) = suffix_index(&node.name, &base) {
            let entry = highest.entry(counter).or_default();
            *entry = (*entry).max(index);
        }
    }

    let mut taken: HashSet<String> = data
        .nodes()
        .filter(|node| !node.name.is_empty())
        .map(|node| node.name.clone())
        .collect();

    for idx in &order {
        let node = data.node_mut(*idx);
        if node.name.is_empty() {
            let (counter, base) = base(node)?;
            let current = highest.entry(counter).or_default();
            node.name = match current.checked_add(1) {
                Some(next) => {
                    *current = next;
                    indexed_name(&base, u64::from(next))
                }
                None => first_free(&base, &taken),
            };
            taken.insert(node.name.clone());
        }
        if node.reference.is_empty() {
            node.reference.clone_from(&node.name);
        }
    }

    let mut seen = HashSet::new();
    for node in data.nodes() {
        if !seen.insert(node.name.as_str()) {
            return Err(WorkflowError::DuplicateNodeName {
                name: node.name.clone(),
            });
        }
    }
    Ok(())
}
