//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError` / `HookServiceError`: failures reported by collaborators
//! - `WorkflowError`: the single structured failure of every engine operation;
//!   collaborator reports are wrapped with `.context(...)` as they cross into
//!   the coordinator.

use std::fmt;

/// Stable classification of a [`WorkflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced entity does not exist.
    NotFound,
    /// The workflow definition is malformed.
    Invalid,
    /// The operation clashes with existing state.
    Conflict,
    /// A field that the operation depends on is missing.
    RequiredField,
    /// Storage or hook service failure.
    Infrastructure,
}

impl ErrorKind {
    /// Machine-readable code for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::Conflict => "conflict",
            Self::RequiredField => "required_field",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a node context or workflow refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Pipeline,
    Application,
    Environment,
    Integration,
    HookModel,
    OutgoingHookModel,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pipeline => "pipeline",
            Self::Application => "application",
            Self::Environment => "environment",
            Self::Integration => "project integration",
            Self::HookModel => "hook model",
            Self::OutgoingHookModel => "outgoing hook model",
        };
        f.write_str(name)
    }
}

/// Failures of workflow operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The owning project has no key.
    MissingProjectKey,
    /// Icon does not carry the image data prefix.
    IconBadFormat,
    /// Icon exceeds the size limit.
    IconBadSize { size: usize },
    /// Workflow name does not match the naming pattern.
    InvalidName { name: String },
    /// The graph has no root node.
    MissingRootNode,
    /// A join node declares no sources.
    JoinWithoutSources { join: String },
    /// A join source does not match any node ref.
    UnknownJoinSource { join: String, source: String },
    /// Root default payload uses the reserved namespace.
    ReservedPayloadKey { key: String },
    /// Nodes whose declared type does not match their content.
    WrongNodeType { nodes: Vec<String> },
    /// Two nodes share a name.
    DuplicateNodeName { name: String },
    /// A notification names a node ref that does not exist.
    UnknownNotificationSource { reference: String },
    /// A hook overrides a key its model does not allow to change.
    HookConfigNotConfigurable { model: String, key: String },
    /// A hook value is not in the model's choice list.
    HookConfigNotInChoices {
        model: String,
        key: String,
        value: String,
    },
    /// The application has no deployment strategy for the integration.
    MissingDeploymentStrategy {
        application: String,
        integration: String,
    },
    /// A node references an integration without an application.
    ApplicationRequired { node: String },
    /// A referenced entity does not exist in the project.
    EntityNotFound { entity: EntityKind, reference: String },
    /// A referenced entity belongs to a different project.
    NotInProject {
        entity: EntityKind,
        reference: String,
        project: String,
    },
    /// The workflow itself does not exist.
    WorkflowNotFound { project: String, workflow: String },
    /// The workflow is managed from another repository.
    AlreadyAsCode { workflow: String, repository: String },
    /// An as-code workflow needs a repository-linked root application.
    ApplicationMandatoryOnAsCode { workflow: String },
    /// Another transaction holds the workflow row.
    Locked { workflow: String },
    /// Storage failure (use as context wrapper).
    Storage {
        operation: &'static str,
        workflow: String,
    },
    /// Hook service failure (use as context wrapper).
    HookService {
        operation: &'static str,
        workflow: String,
    },
}

impl WorkflowError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EntityNotFound { .. }
            | Self::WorkflowNotFound { .. }
            | Self::NotInProject { .. } => ErrorKind::NotFound,
            Self::ApplicationRequired { .. } => ErrorKind::RequiredField,
            Self::AlreadyAsCode { .. }
            | Self::ApplicationMandatoryOnAsCode { .. }
            | Self::Locked { .. } => ErrorKind::Conflict,
            Self::Storage { .. } | Self::HookService { .. } => ErrorKind::Infrastructure,
            Self::IconBadFormat
            | Self::IconBadSize { .. }
            | Self::InvalidName { .. }
            | Self::MissingRootNode
            | Self::JoinWithoutSources { .. }
            | Self::UnknownJoinSource { .. }
            | Self::ReservedPayloadKey { .. }
            | Self::WrongNodeType { .. }
            | Self::DuplicateNodeName { .. }
            | Self::UnknownNotificationSource { .. }
            | Self::HookConfigNotConfigurable { .. }
            | Self::HookConfigNotInChoices { .. }
            | Self::MissingDeploymentStrategy { .. }
            | Self::MissingProjectKey => ErrorKind::Invalid,
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProjectKey => write!(f, "project key is required"),
            Self::IconBadFormat => write!(f, "icon must be an image data URI"),
            Self::IconBadSize { size } => {
                write!(f, "icon is too large ({size} bytes)")
            }
            Self::InvalidName { name } => {
                write!(f, "invalid workflow name '{name}'")
            }
            Self::MissingRootNode => write!(f, "workflow has no root node"),
            Self::JoinWithoutSources { join } => {
                write!(f, "join '{join}' has no source")
            }
            Self::UnknownJoinSource { join, source } => {
                write!(f, "join '{join}' references unknown node '{source}'")
            }
            Self::ReservedPayloadKey { key } => {
                write!(f, "payload key '{key}' uses the reserved 'cds.' namespace")
            }
            Self::WrongNodeType { nodes } => {
                write!(f, "wrong node type for: {}", nodes.join(", "))
            }
            Self::DuplicateNodeName { name } => {
                write!(f, "duplicate node name '{name}'")
            }
            Self::UnknownNotificationSource { reference } => {
                write!(f, "notification references unknown node '{reference}'")
            }
            Self::HookConfigNotConfigurable { model, key } => {
                write!(f, "hook {model}: parameter '{key}' is not configurable")
            }
            Self::HookConfigNotInChoices { model, key, value } => {
                write!(
                    f,
                    "hook {model}: value '{value}' is not allowed for parameter '{key}'"
                )
            }
            Self::MissingDeploymentStrategy {
                application,
                integration,
            } => {
                write!(
                    f,
                    "application {application} has no deployment strategy for integration {integration}"
                )
            }
            Self::ApplicationRequired { node } => {
                write!(f, "node '{node}' uses an integration but has no application")
            }
            Self::EntityNotFound { entity, reference } => {
                write!(f, "{entity} not found: {reference}")
            }
            Self::NotInProject {
                entity,
                reference,
                project,
            } => {
                write!(f, "{entity} {reference} does not belong to project {project}")
            }
            Self::WorkflowNotFound { project, workflow } => {
                write!(f, "workflow not found: {project}/{workflow}")
            }
            Self::AlreadyAsCode {
                workflow,
                repository,
            } => {
                write!(f, "workflow {workflow} is already managed as code from {repository}")
            }
            Self::ApplicationMandatoryOnAsCode { workflow } => {
                write!(
                    f,
                    "workflow {workflow}: an as-code workflow needs a root application linked to a repository"
                )
            }
            Self::Locked { workflow } => {
                write!(f, "workflow {workflow} is currently locked")
            }
            Self::Storage {
                operation,
                workflow,
            } => {
                write!(f, "storage failed to {operation} for workflow {workflow}")
            }
            Self::HookService {
                operation,
                workflow,
            } => {
                write!(f, "hook service failed to {operation} for workflow {workflow}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}
