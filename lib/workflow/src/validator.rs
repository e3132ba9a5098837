//! Workflow validation.
//!
//! Checks run in a fixed order and the first failure aborts:
//! 1. project key, icon, name pattern
//! 2. root node presence and join cardinality
//! 3. reserved keys in the root default payload
//! 4. node-type classification
//! 5. per node: pipeline, application, environment, project integration,
//!    event integrations, hooks, outgoing hook, then the application
//!    deployment strategy when the node deploys through an integration
//!
//! On success every node context has both sides of its references populated.

use crate::classify::classify;
use crate::definition::Workflow;
use crate::entity::Project;
use crate::error::WorkflowError;
use crate::graph::WorkflowData;
use crate::node::{DefaultPayload, Node};
use crate::resolver::{ResolvedEntities, Resolver};
use crate::store::Catalog;
use regex::Regex;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;
use tracing::{debug, instrument};

/// Prefix every icon must start with.
pub const ICON_PREFIX: &str = "data:image/";

/// Maximum icon size in bytes.
pub const MAX_ICON_SIZE: usize = 100_000;

/// Namespace reserved for platform-provided payload keys.
pub const RESERVED_PAYLOAD_PREFIX: &str = "cds.";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("name pattern is valid"));

/// Whether a workflow name matches the naming pattern.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

fn check_icon(icon: Option<&str>) -> Result<(), WorkflowError> {
    let Some(icon) = icon.filter(|icon| !icon.is_empty()) else {
        return Ok(());
    };
    if !icon.starts_with(ICON_PREFIX) {
        return Err(WorkflowError::IconBadFormat);
    }
    if icon.len() > MAX_ICON_SIZE {
        return Err(WorkflowError::IconBadSize { size: icon.len() });
    }
    Ok(())
}

/// Flattens nested payload objects into dotted keys.
fn payload_keys(payload: &DefaultPayload) -> Vec<String> {
    fn walk(prefix: &str, value: &JsonValue, keys: &mut Vec<String>) {
        match value {
            JsonValue::Object(map) => {
                for (key, value) in map {
                    walk(&format!("{prefix}.{key}"), value, keys);
                }
            }
            _ => keys.push(prefix.to_string()),
        }
    }

    let mut keys = Vec::new();
    for (key, value) in payload {
        walk(key, value, &mut keys);
    }
    keys
}

fn check_reserved_payload(data: &WorkflowData) -> Result<(), WorkflowError> {
    let Some(payload) = data
        .root_node()
        .and_then(|root| root.context.default_payload.as_ref())
    else {
        return Ok(());
    };
    match payload_keys(payload)
        .into_iter()
        .find(|key| key.starts_with(RESERVED_PAYLOAD_PREFIX))
    {
        Some(key) => Err(WorkflowError::ReservedPayloadKey { key }),
        None => Ok(()),
    }
}

/// Checks that a node deploying through an integration has an application
/// with a deployment strategy for it.
fn check_deployment_strategy(node: &Node, resolved: &ResolvedEntities) -> Result<(), WorkflowError> {
    let Some(integration_id) = node.context.project_integration_id else {
        return Ok(());
    };
    let Some(application_id) = node.context.application_id else {
        return Err(WorkflowError::ApplicationRequired {
            node: node.effective_ref().to_string(),
        });
    };
    let (Some(application), Some(integration)) = (
        resolved.applications.get(&application_id),
        resolved.integrations.get(&integration_id),
    ) else {
        return Ok(());
    };
    if application
        .deployment_strategies
        .contains_key(&integration.name)
    {
        Ok(())
    } else {
        Err(WorkflowError::MissingDeploymentStrategy {
            application: application.name.clone(),
            integration: integration.name.clone(),
        })
    }
}

/// Validates a workflow and resolves every node reference.
///
/// Resolved entities are added to `resolved`, including those resolved
/// before a failure.
///
/// # Errors
///
/// Returns the first validation or resolution failure.
#[instrument(skip_all, fields(project = %project.key, workflow = %workflow.name))]
pub async fn validate<C: Catalog + ?Sized>(
    catalog: &mut C,
    project: &Project,
    workflow: &mut Workflow,
    resolved: &mut ResolvedEntities,
) -> Result<(), Report<WorkflowError>> {
    if workflow.project_key.is_empty() {
        return Err(WorkflowError::MissingProjectKey.into());
    }
    check_icon(workflow.icon.as_deref())?;
    if !is_valid_name(&workflow.name) {
        return Err(WorkflowError::InvalidName {
            name: workflow.name.clone(),
        }
        .into());
    }
    if workflow.data.root().is_none() {
        return Err(WorkflowError::MissingRootNode.into());
    }
    workflow.data.check_join_cardinality()?;
    check_reserved_payload(&workflow.data)?;
    classify(&mut workflow.data)?;

    let Workflow {
        name,
        data,
        event_integrations,
        ..
    } = workflow;
    let mut resolver = Resolver::new(catalog, project, name.as_str(), resolved);
    for idx in data.flatten() {
        let node = data.node_mut(idx);
        resolver.pipeline(&mut node.context).await?;
        resolver.application(&mut node.context).await?;
        resolver.environment(&mut node.context).await?;
        resolver.project_integration(&mut node.context)?;
        resolver.event_integrations(event_integrations)?;
        resolver.hooks(&mut node.hooks).await?;
        if let Some(ctx) = node.outgoing_hook.as_mut() {
            resolver.outgoing_hook(ctx).await?;
        }
        check_deployment_strategy(node, resolver.resolved())?;
    }

    debug!(nodes = data.node_count(), "workflow is valid");
    Ok(())
}
