//! Storage and subsystem collaborators.
//!
//! The engine never talks to a database directly. It reads entities through a
//! [`Catalog`], writes through a [`StoreTx`] obtained from a
//! [`WorkflowStore`], and commits or rolls the transaction back as a whole.
//! `conduit-store` implements these traits on PostgreSQL; tests use an
//! in-memory implementation.

use crate::definition::Workflow;
use crate::entity::{
    Application, Environment, GroupPermission, Pipeline, Project, ProjectIntegration,
};
use crate::graph::WorkflowData;
use crate::hook::HookModel;
use crate::notification::Notification;
use async_trait::async_trait;
use conduit_core::{
    ApplicationId, EnvironmentId, HookModelId, PipelineId, Principal, WorkflowId,
};
use rootcause::prelude::Report;
use std::collections::BTreeMap;
use std::fmt;

/// Errors from storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database rejected or failed the query.
    Database { message: String },
    /// The workflow row is locked by another transaction.
    Locked { workflow_id: WorkflowId },
    /// A stored value could not be decoded.
    Corrupted { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { message } => write!(f, "database error: {message}"),
            Self::Locked { workflow_id } => write!(f, "workflow {workflow_id} is locked"),
            Self::Corrupted { message } => write!(f, "corrupted record: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// How a workflow is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowLookup {
    Id(WorkflowId),
    Name(String),
    /// By the as-code origin repository.
    Repository(String),
}

impl fmt::Display for WorkflowLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name}"),
            Self::Repository(repository) => write!(f, "from {repository}"),
        }
    }
}

/// A workflow carrying the soft-delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedWorkflow {
    pub project_key: String,
    pub workflow_id: WorkflowId,
    pub name: String,
}

/// Result of a forced import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    /// An entity with the same name existed and was replaced.
    Updated,
}

/// Read access to the entities workflow nodes reference.
#[async_trait]
pub trait Catalog: Send {
    async fn project_by_key(&mut self, key: &str) -> Result<Option<Project>, Report<StoreError>>;

    async fn pipeline_by_id(
        &mut self,
        id: PipelineId,
    ) -> Result<Option<Pipeline>, Report<StoreError>>;

    async fn pipeline_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Pipeline>, Report<StoreError>>;

    async fn application_by_id(
        &mut self,
        id: ApplicationId,
    ) -> Result<Option<Application>, Report<StoreError>>;

    async fn application_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Application>, Report<StoreError>>;

    async fn environment_by_id(
        &mut self,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, Report<StoreError>>;

    async fn environment_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Environment>, Report<StoreError>>;

    /// Incoming hook models.
    async fn hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>>;

    async fn hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>>;

    async fn outgoing_hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>>;

    async fn outgoing_hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>>;

    /// Default branch of the application's repository, if known.
    async fn default_branch(
        &mut self,
        application: &Application,
    ) -> Result<Option<String>, Report<StoreError>>;
}

/// One storage transaction.
///
/// Everything written through it becomes visible on [`commit`](Self::commit)
/// and is discarded on [`rollback`](Self::rollback) or drop.
#[async_trait]
pub trait StoreTx: Catalog {
    async fn workflow_exists(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>>;

    async fn load_workflow(
        &mut self,
        project_key: &str,
        lookup: &WorkflowLookup,
    ) -> Result<Option<Workflow>, Report<StoreError>>;

    /// Loads a workflow and takes an exclusive lock on its row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] without waiting when another
    /// transaction holds the row.
    async fn load_and_lock_workflow(
        &mut self,
        project_key: &str,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>>;

    /// Inserts the workflow row with its metadata, purge tags and serialized graph.
    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>>;

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>>;

    async fn update_metadata(
        &mut self,
        id: WorkflowId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>>;

    /// Sets the soft-delete marker. Returns whether a row was marked.
    async fn mark_as_delete(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>>;

    async fn workflows_marked_to_delete(
        &mut self,
    ) -> Result<Vec<MarkedWorkflow>, Report<StoreError>>;

    async fn delete_workflow(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>>;

    /// Persists node rows, trigger edges and node hooks, assigning node ids.
    async fn insert_graph(
        &mut self,
        id: WorkflowId,
        data: &mut WorkflowData,
    ) -> Result<(), Report<StoreError>>;

    /// Deletes node rows, trigger edges and node hooks.
    async fn delete_graph(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>>;

    async fn insert_notification(
        &mut self,
        id: WorkflowId,
        notification: &mut Notification,
    ) -> Result<(), Report<StoreError>>;

    async fn delete_notifications(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>>;

    async fn link_event_integrations(
        &mut self,
        id: WorkflowId,
        integrations: &[ProjectIntegration],
    ) -> Result<(), Report<StoreError>>;

    async fn unlink_event_integrations(&mut self, id: WorkflowId)
    -> Result<(), Report<StoreError>>;

    async fn upsert_groups(
        &mut self,
        id: WorkflowId,
        groups: &[GroupPermission],
    ) -> Result<(), Report<StoreError>>;

    /// Creates the application or replaces the one with the same name.
    async fn import_application(
        &mut self,
        project: &Project,
        application: &Application,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>>;

    async fn import_environment(
        &mut self,
        project: &Project,
        environment: &Environment,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>>;

    async fn import_pipeline(
        &mut self,
        project: &Project,
        pipeline: &Pipeline,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>>;

    /// Persists the application's VCS linkage.
    async fn update_application(
        &mut self,
        application: &Application,
    ) -> Result<(), Report<StoreError>>;

    async fn commit(self) -> Result<(), Report<StoreError>>;

    async fn rollback(self) -> Result<(), Report<StoreError>>;
}

/// Source of storage transactions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, Report<StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::Database {
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "database error: connection reset");
    }

    #[test]
    fn lookup_display() {
        assert_eq!(WorkflowLookup::Name("build".to_string()).to_string(), "build");
        assert_eq!(
            WorkflowLookup::Repository("https://host/org/repo".to_string()).to_string(),
            "from https://host/org/repo"
        );
    }
}
