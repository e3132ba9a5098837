//! Hook lifecycle management.
//!
//! Hooks are registered with an external hook service that starts workflow
//! runs. Between two versions of a graph, hooks are matched by identity
//! (their UUID): hooks only in the old graph are unregistered, hooks only in
//! the new one are registered and shared hooks are left alone.
//!
//! Calls to the hook service are not transactional. A failure aborts the
//! mutation and storage is rolled back, but hooks registered earlier in the
//! same attempt stay registered; their ids are logged so that an operator
//! can reconcile them.

use crate::definition::Workflow;
use crate::error::WorkflowError;
use crate::graph::WorkflowData;
use crate::hook::HookConfig;
use async_trait::async_trait;
use conduit_core::{HookId, WorkflowId};
use rootcause::prelude::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Errors from the hook service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookServiceError {
    /// The service could not be reached or answered with a server error.
    Unavailable { message: String },
    /// The service refused the request.
    Rejected { uuid: HookId, message: String },
}

impl fmt::Display for HookServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "hook service unavailable: {message}"),
            Self::Rejected { uuid, message } => {
                write!(f, "hook service rejected hook {uuid}: {message}")
            }
        }
    }
}

impl std::error::Error for HookServiceError {}

/// What the hook service needs to register a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDefinition {
    pub uuid: HookId,
    pub project_key: String,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub node_ref: String,
    pub hook_model_name: String,
    pub config: HookConfig,
}

/// The hook service's answer to a registration.
///
/// Config entries in the answer (a generated webhook URL, for instance)
/// override the hook's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookReference {
    pub uuid: HookId,
    #[serde(default)]
    pub config: HookConfig,
}

/// External service registering hooks.
#[async_trait]
pub trait HookService: Send + Sync {
    async fn register(
        &self,
        definition: &HookDefinition,
    ) -> Result<HookReference, Report<HookServiceError>>;

    async fn unregister(&self, uuid: HookId) -> Result<(), Report<HookServiceError>>;
}

/// Hooks to register and unregister between two graph versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookDelta {
    pub register: Vec<HookId>,
    pub unregister: Vec<HookId>,
}

impl HookDelta {
    /// Delta tearing down every hook of a graph.
    #[must_use]
    pub fn teardown(data: &WorkflowData) -> Self {
        compute_delta(&WorkflowData::default(), Some(data))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.register.is_empty() && self.unregister.is_empty()
    }
}

/// Gives every hook of `new` an identity.
///
/// A hook without a UUID inherits the UUID of an unclaimed old hook on the
/// node with the same ref and of the same model; otherwise it gets a fresh
/// one.
pub fn assign_identities(new: &mut WorkflowData, old: Option<&WorkflowData>) {
    let claimed: HashSet<HookId> = new
        .hooks()
        .into_iter()
        .filter_map(|(_, hook)| hook.uuid)
        .collect();

    let mut available: HashMap<(String, String), VecDeque<HookId>> = HashMap::new();
    if let Some(old) = old {
        for (node, hook) in old.hooks() {
            let Some(uuid) = hook.uuid.filter(|uuid| !claimed.contains(uuid)) else {
                continue;
            };
            available
                .entry((
                    node.effective_ref().to_string(),
                    hook.hook_model_name.clone(),
                ))
                .or_default()
                .push_back(uuid);
        }
    }

    for idx in new.flatten() {
        let node = new.node_mut(idx);
        let reference = node.effective_ref().to_string();
        for hook in &mut node.hooks {
            if hook.uuid.is_some() {
                continue;
            }
            let inherited = available
                .get_mut(&(reference.clone(), hook.hook_model_name.clone()))
                .and_then(VecDeque::pop_front);
            hook.uuid = Some(inherited.unwrap_or_else(HookId::new));
        }
    }
}

/// Computes the hooks to register and unregister.
///
/// Hooks without an identity are ignored; call [`assign_identities`] first.
#[must_use]
pub fn compute_delta(new: &WorkflowData, old: Option<&WorkflowData>) -> HookDelta {
    let uuids = |data: &WorkflowData| -> Vec<HookId> {
        data.hooks()
            .into_iter()
            .filter_map(|(_, hook)| hook.uuid)
            .collect()
    };

    let new_ids = uuids(new);
    let old_ids = old.map(uuids).unwrap_or_default();
    let new_set: HashSet<_> = new_ids.iter().copied().collect();
    let old_set: HashSet<_> = old_ids.iter().copied().collect();

    HookDelta {
        register: new_ids
            .into_iter()
            .filter(|uuid| !old_set.contains(uuid))
            .collect(),
        unregister: old_ids
            .into_iter()
            .filter(|uuid| !new_set.contains(uuid))
            .collect(),
    }
}

fn definition(workflow: &Workflow, uuid: HookId) -> Option<HookDefinition> {
    workflow
        .data
        .hooks()
        .into_iter()
        .find(|(_, hook)| hook.uuid == Some(uuid))
        .map(|(node, hook)| HookDefinition {
            uuid,
            project_key: workflow.project_key.clone(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            node_ref: node.effective_ref().to_string(),
            hook_model_name: hook.hook_model_name.clone(),
            config: hook.config.clone(),
        })
}

fn apply_reference(workflow: &mut Workflow, reference: HookReference) {
    for idx in workflow.data.flatten() {
        let node = workflow.data.node_mut(idx);
        if let Some(hook) = node
            .hooks
            .iter_mut()
            .find(|hook| hook.uuid == Some(reference.uuid))
        {
            hook.config.extend(reference.config);
            return;
        }
    }
}

fn report_leftovers(workflow: &str, registered: &[HookId]) {
    if !registered.is_empty() {
        warn!(
            workflow,
            registered = ?registered,
            "hooks registered before the failure stay registered"
        );
    }
}

/// Registers then unregisters the hooks of `delta`.
///
/// Registration answers are merged into the workflow's hooks.
///
/// # Errors
///
/// Returns [`WorkflowError::HookService`] on the first failed call.
#[instrument(skip_all, fields(workflow = %workflow.name, register = delta.register.len(), unregister = delta.unregister.len()))]
pub async fn apply_delta<H: HookService + ?Sized>(
    service: &H,
    workflow: &mut Workflow,
    delta: &HookDelta,
) -> Result<(), Report<WorkflowError>> {
    let mut registered = Vec::with_capacity(delta.register.len());

    for uuid in &delta.register {
        let Some(definition) = definition(workflow, *uuid) else {
            continue;
        };
        match service.register(&definition).await {
            Ok(reference) => {
                apply_reference(workflow, reference);
                registered.push(*uuid);
            }
            Err(report) => {
                report_leftovers(&workflow.name, &registered);
                return Err(report).context(WorkflowError::HookService {
                    operation: "register hook",
                    workflow: workflow.name.clone(),
                });
            }
        }
    }

    if let Err(report) = unregister_hooks(service, &workflow.name, &delta.unregister).await {
        report_leftovers(&workflow.name, &registered);
        return Err(report);
    }

    debug!(registered = registered.len(), "hook delta applied");
    Ok(())
}

/// Unregisters hooks, stopping at the first failure.
///
/// # Errors
///
/// Returns [`WorkflowError::HookService`] on the first failed call.
pub async fn unregister_hooks<H: HookService + ?Sized>(
    service: &H,
    workflow: &str,
    uuids: &[HookId],
) -> Result<(), Report<WorkflowError>> {
    for uuid in uuids {
        service
            .unregister(*uuid)
            .await
            .context(WorkflowError::HookService {
                operation: "unregister hook",
                workflow: workflow.to_string(),
            })?;
    }
    Ok(())
}
