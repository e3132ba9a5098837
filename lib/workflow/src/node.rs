//! Workflow node types and contexts.
//!
//! Every node of a workflow graph has:
//! - A storage-generated numeric ID, reset on every structural update
//! - A name unique within the workflow and a ref (defaulting to the name)
//! - A type, either declared or assigned by the classification pass
//! - A context referencing the entities the node runs with
//! - The hooks that trigger it

use crate::hook::{HookConfig, NodeHook};
use crate::resolver::ResolvedEntities;
use conduit_core::{ApplicationId, EnvironmentId, HookModelId, IntegrationId, PipelineId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Storage identifier of a node row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Runs a pipeline.
    Pipeline,
    /// Fans out to its children without running anything.
    Fork,
    /// Waits for all of its sources.
    Join,
    /// Calls an external system through an outgoing hook model.
    OutgoingHook,
}

impl NodeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Fork => "fork",
            Self::Join => "join",
            Self::OutgoingHook => "outgoing_hook",
        }
    }
}

/// Default payload of a node: a JSON object.
pub type DefaultPayload = serde_json::Map<String, JsonValue>;

/// Entities a node runs with, each referenced by id, by name or both.
///
/// After validation every pair that had one side set has both sides set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub application_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<EnvironmentId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub environment_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_integration_id: Option<IntegrationId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub project_integration_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_payload: Option<DefaultPayload>,
}

impl NodeContext {
    /// Whether the context references a pipeline at all.
    #[must_use]
    pub fn has_pipeline(&self) -> bool {
        self.pipeline_id.is_some() || !self.pipeline_name.is_empty()
    }

    /// Whether the context references an application at all.
    #[must_use]
    pub fn has_application(&self) -> bool {
        self.application_id.is_some() || !self.application_name.is_empty()
    }

    /// Whether the context references a project integration at all.
    #[must_use]
    pub fn has_integration(&self) -> bool {
        self.project_integration_id.is_some() || !self.project_integration_name.is_empty()
    }
}

/// Context of an outgoing hook node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingHookContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_model_id: Option<HookModelId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hook_model_name: String,
    pub config: HookConfig,
}

impl OutgoingHookContext {
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.hook_model_id.is_some() || !self.hook_model_name.is_empty()
    }
}

/// A node of a workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "ref")]
    pub reference: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub context: NodeContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_hook: Option<OutgoingHookContext>,
    /// Refs of the nodes a join waits for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<NodeHook>,
}

/// Tagged view of a classified node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind<'a> {
    Pipeline(&'a NodeContext),
    Fork,
    Join(&'a [String]),
    OutgoingHook(&'a OutgoingHookContext),
}

impl Node {
    /// An untyped node running the named pipeline.
    #[must_use]
    pub fn pipeline(pipeline_name: impl Into<String>) -> Self {
        Self {
            context: NodeContext {
                pipeline_name: pipeline_name.into(),
                ..NodeContext::default()
            },
            ..Self::default()
        }
    }

    /// An untyped node running the pipeline with the given id.
    #[must_use]
    pub fn pipeline_id(pipeline_id: PipelineId) -> Self {
        Self {
            context: NodeContext {
                pipeline_id: Some(pipeline_id),
                ..NodeContext::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fork() -> Self {
        Self {
            node_type: Some(NodeType::Fork),
            ..Self::default()
        }
    }

    /// A join node waiting for the given refs.
    #[must_use]
    pub fn join<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            node_type: Some(NodeType::Join),
            join_sources: sources.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// An untyped node calling the named outgoing hook model.
    #[must_use]
    pub fn outgoing_hook(hook_model_name: impl Into<String>) -> Self {
        Self {
            outgoing_hook: Some(OutgoingHookContext {
                hook_model_name: hook_model_name.into(),
                ..OutgoingHookContext::default()
            }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    #[must_use]
    pub fn with_application(mut self, application_name: impl Into<String>) -> Self {
        self.context.application_name = application_name.into();
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment_name: impl Into<String>) -> Self {
        self.context.environment_name = environment_name.into();
        self
    }

    #[must_use]
    pub fn with_integration(mut self, integration_name: impl Into<String>) -> Self {
        self.context.project_integration_name = integration_name.into();
        self
    }

    #[must_use]
    pub fn with_default_payload(mut self, payload: DefaultPayload) -> Self {
        self.context.default_payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: NodeHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Returns the tagged view of the node, or `None` if it has not been
    /// classified or its type does not match its content.
    #[must_use]
    pub fn kind(&self) -> Option<NodeKind<'_>> {
        match self.node_type? {
            NodeType::Pipeline if self.context.has_pipeline() => {
                Some(NodeKind::Pipeline(&self.context))
            }
            NodeType::Fork => Some(NodeKind::Fork),
            NodeType::Join => Some(NodeKind::Join(&self.join_sources)),
            NodeType::OutgoingHook => self
                .outgoing_hook
                .as_ref()
                .filter(|ctx| ctx.has_model())
                .map(NodeKind::OutgoingHook),
            NodeType::Pipeline => None,
        }
    }

    /// The ref of the node, falling back to its name.
    #[must_use]
    pub fn effective_ref(&self) -> &str {
        if self.reference.is_empty() {
            &self.name
        } else {
            &self.reference
        }
    }

    /// Whether the node's application is linked to a repository.
    ///
    /// Only resolved applications are considered.
    #[must_use]
    pub fn is_linked_to_repository(&self, resolved: &ResolvedEntities) -> bool {
        self.context
            .application_id
            .and_then(|id| resolved.applications.get(&id))
            .is_some_and(|app| app.repository().is_some())
    }
}
