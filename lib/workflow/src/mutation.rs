//! Transactional workflow mutations.
//!
//! [`WorkflowService`] coordinates validation, naming, hook lifecycle and
//! storage writes. Every mutation runs inside one storage transaction that
//! is committed on success and rolled back on any failure. Hook service
//! calls happen before the commit and are not undone by a rollback.

use crate::definition::Workflow;
use crate::entity::Project;
use crate::error::WorkflowError;
use crate::lifecycle::{self, HookDelta, HookService};
use crate::namer::assign_names;
use crate::notification::{Notification, NotificationKind};
use crate::payload::default_payload;
use crate::resolver::ResolvedEntities;
use crate::store::{Catalog, MarkedWorkflow, StoreError, StoreTx, WorkflowLookup, WorkflowStore};
use crate::validator::validate;
use conduit_core::{Message, WorkflowId};
use rootcause::prelude::{Report, ResultExt};
use tracing::{debug, info, instrument, warn};

/// Options of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Skip hook registration and unregistration.
    pub disable_hook_management: bool,
}

/// A mutated workflow with the informational messages collected on the way.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub workflow: Workflow,
    pub messages: Vec<Message>,
}

/// What an insert or update inside a transaction produced.
pub(crate) struct Applied {
    pub(crate) messages: Vec<Message>,
    pub(crate) resolved: ResolvedEntities,
}

pub(crate) fn storage(operation: &'static str, workflow: &str) -> WorkflowError {
    WorkflowError::Storage {
        operation,
        workflow: workflow.to_string(),
    }
}

/// Names nodes and checks the references that depend on names.
fn finalize_graph(workflow: &mut Workflow) -> Result<(), WorkflowError> {
    assign_names(&mut workflow.data)?;
    workflow.data.check_join_sources()?;

    let refs = workflow.data.refs();
    for notification in &workflow.notifications {
        if let Some(reference) = notification
            .source_node_refs
            .iter()
            .find(|reference| !refs.contains(reference.as_str()))
        {
            return Err(WorkflowError::UnknownNotificationSource {
                reference: reference.clone(),
            });
        }
    }
    Ok(())
}

/// Coordinates workflow mutations over a store and a hook service.
pub struct WorkflowService<S, H> {
    store: S,
    hooks: H,
}

impl<S, H> WorkflowService<S, H>
where
    S: WorkflowStore,
    H: HookService,
{
    #[must_use]
    pub fn new(store: S, hooks: H) -> Self {
        Self { store, hooks }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub(crate) async fn begin(&self, workflow: &str) -> Result<S::Tx, Report<WorkflowError>> {
        self.store
            .begin()
            .await
            .context(storage("begin transaction", workflow))
    }

    /// Commits on success, rolls back on failure.
    pub(crate) async fn finish<T>(
        &self,
        tx: S::Tx,
        workflow: &str,
        result: Result<T, Report<WorkflowError>>,
    ) -> Result<T, Report<WorkflowError>> {
        match result {
            Ok(value) => {
                tx.commit().await.context(storage("commit", workflow))?;
                Ok(value)
            }
            Err(report) => {
                self.release(tx, workflow).await;
                Err(report)
            }
        }
    }

    /// Rolls back a transaction whose outcome no longer matters.
    pub(crate) async fn release(&self, tx: S::Tx, workflow: &str) {
        if let Err(report) = tx.rollback().await {
            warn!(workflow, error = %report, "rollback failed");
        }
    }

    async fn load_with(
        &self,
        project: &Project,
        lookup: WorkflowLookup,
    ) -> Result<Workflow, Report<WorkflowError>> {
        let label = lookup.to_string();
        let mut tx = self.begin(&label).await?;
        let result = async {
            let mut workflow = tx
                .load_workflow(&project.key, &lookup)
                .await
                .context(storage("load workflow", &label))?
                .ok_or_else(|| WorkflowError::WorkflowNotFound {
                    project: project.key.clone(),
                    workflow: label.clone(),
                })?;
            let mut resolved = ResolvedEntities::default();
            validate(&mut tx, project, &mut workflow, &mut resolved).await?;
            Ok::<_, Report<WorkflowError>>(workflow)
        }
        .await;
        self.release(tx, &label).await;
        result
    }

    /// Loads a workflow by name, with every node reference populated.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::WorkflowNotFound`] if there is no such
    /// workflow, or the failure of re-validating it.
    #[instrument(skip(self, project), fields(project = %project.key))]
    pub async fn load(
        &self,
        project: &Project,
        name: &str,
    ) -> Result<Workflow, Report<WorkflowError>> {
        self.load_with(project, WorkflowLookup::Name(name.to_string()))
            .await
    }

    /// Loads a workflow by id.
    #[instrument(skip(self, project), fields(project = %project.key))]
    pub async fn load_by_id(
        &self,
        project: &Project,
        id: WorkflowId,
    ) -> Result<Workflow, Report<WorkflowError>> {
        self.load_with(project, WorkflowLookup::Id(id)).await
    }

    /// Loads the workflow managed from a repository.
    #[instrument(skip(self, project), fields(project = %project.key))]
    pub async fn load_by_repository(
        &self,
        project: &Project,
        repository: &str,
    ) -> Result<Workflow, Report<WorkflowError>> {
        self.load_with(project, WorkflowLookup::Repository(repository.to_string()))
            .await
    }

    /// Whether a workflow with this name exists in the project.
    pub async fn exists(
        &self,
        project: &Project,
        name: &str,
    ) -> Result<bool, Report<WorkflowError>> {
        let mut tx = self.begin(name).await?;
        let result = tx
            .workflow_exists(&project.key, name)
            .await
            .context(storage("check existence", name));
        self.release(tx, name).await;
        result
    }

    /// Inserts a new workflow.
    ///
    /// The workflow is validated and named, its hooks are registered and its
    /// graph persisted with freshly assigned node ids.
    ///
    /// # Errors
    ///
    /// Returns the first validation, storage or hook service failure; storage
    /// is rolled back.
    #[instrument(skip_all, fields(project = %project.key, workflow = %workflow.name))]
    pub async fn insert(
        &self,
        project: &Project,
        mut workflow: Workflow,
    ) -> Result<Mutation, Report<WorkflowError>> {
        let name = workflow.name.clone();
        let mut tx = self.begin(&name).await?;
        let result = self.insert_in(&mut tx, project, &mut workflow, true).await;
        let applied = self.finish(tx, &name, result).await?;
        info!(workflow_id = %workflow.id, "workflow inserted");
        Ok(Mutation {
            workflow,
            messages: applied.messages,
        })
    }

    pub(crate) async fn insert_in(
        &self,
        tx: &mut S::Tx,
        project: &Project,
        workflow: &mut Workflow,
        manage_hooks: bool,
    ) -> Result<Applied, Report<WorkflowError>> {
        let mut messages = Vec::new();
        let mut resolved = ResolvedEntities::default();

        validate(tx, project, workflow, &mut resolved).await?;
        finalize_graph(workflow)?;
        workflow.sanitize();
        self.apply_default_payload(tx, workflow, &resolved, &mut messages)
            .await;

        tx.insert_workflow(workflow)
            .await
            .context(storage("insert workflow", &workflow.name))?;

        if workflow.groups.is_empty() {
            workflow.groups.clone_from(&project.groups);
        }
        tx.upsert_groups(workflow.id, &workflow.groups)
            .await
            .context(storage("insert groups", &workflow.name))?;

        let root_linked = workflow
            .data
            .root_node()
            .is_some_and(|root| root.is_linked_to_repository(&resolved));
        if root_linked {
            workflow.add_default_vcs_tags();
            tx.update_metadata(workflow.id, &workflow.metadata)
                .await
                .context(storage("update metadata", &workflow.name))?;
        }
        self.add_default_vcs_notification(workflow, &resolved);

        lifecycle::assign_identities(&mut workflow.data, None);
        if manage_hooks {
            let delta = lifecycle::compute_delta(&workflow.data, None);
            lifecycle::apply_delta(&self.hooks, workflow, &delta).await?;
        }

        for notification in &mut workflow.notifications {
            tx.insert_notification(workflow.id, notification)
                .await
                .context(storage("insert notification", &workflow.name))?;
        }
        tx.insert_graph(workflow.id, &mut workflow.data)
            .await
            .context(storage("insert graph", &workflow.name))?;
        tx.link_event_integrations(workflow.id, &workflow.event_integrations)
            .await
            .context(storage("link event integrations", &workflow.name))?;

        workflow.touch();
        tx.update_workflow(workflow)
            .await
            .context(storage("update workflow", &workflow.name))?;

        Ok(Applied { messages, resolved })
    }

    /// Replaces a workflow with a new version.
    ///
    /// The graph is rebuilt from scratch: node ids change, hooks are diffed
    /// against the stored version by identity.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Locked`] if another transaction holds the
    /// workflow, or the first validation, storage or hook service failure;
    /// storage is rolled back.
    #[instrument(skip_all, fields(project = %project.key, workflow = %workflow.name))]
    pub async fn update(
        &self,
        project: &Project,
        mut workflow: Workflow,
        options: UpdateOptions,
    ) -> Result<Mutation, Report<WorkflowError>> {
        let name = workflow.name.clone();
        let mut tx = self.begin(&name).await?;
        let result = self.update_in(&mut tx, project, &mut workflow, options).await;
        let applied = self.finish(tx, &name, result).await?;
        info!(workflow_id = %workflow.id, "workflow updated");
        Ok(Mutation {
            workflow,
            messages: applied.messages,
        })
    }

    pub(crate) async fn update_in(
        &self,
        tx: &mut S::Tx,
        project: &Project,
        workflow: &mut Workflow,
        options: UpdateOptions,
    ) -> Result<Applied, Report<WorkflowError>> {
        let mut messages = Vec::new();
        let mut resolved = ResolvedEntities::default();

        validate(tx, project, workflow, &mut resolved).await?;
        finalize_graph(workflow)?;

        tx.delete_notifications(workflow.id)
            .await
            .context(storage("delete notifications", &workflow.name))?;
        tx.unlink_event_integrations(workflow.id)
            .await
            .context(storage("unlink event integrations", &workflow.name))?;

        let previous = Self::lock_previous(tx, project, workflow).await?;

        tx.delete_graph(workflow.id)
            .await
            .context(storage("delete graph", &workflow.name))?;
        workflow.data.reset_ids();
        workflow.sanitize();
        self.apply_default_payload(tx, workflow, &resolved, &mut messages)
            .await;

        lifecycle::assign_identities(&mut workflow.data, Some(&previous.data));
        if options.disable_hook_management {
            debug!("hook management disabled");
        } else {
            let delta = lifecycle::compute_delta(&workflow.data, Some(&previous.data));
            debug!(
                register = delta.register.len(),
                unregister = delta.unregister.len(),
                "hook delta"
            );
            lifecycle::apply_delta(&self.hooks, workflow, &delta).await?;
        }

        tx.insert_graph(workflow.id, &mut workflow.data)
            .await
            .context(storage("insert graph", &workflow.name))?;
        for notification in &mut workflow.notifications {
            notification.id = None;
            tx.insert_notification(workflow.id, notification)
                .await
                .context(storage("insert notification", &workflow.name))?;
        }
        tx.link_event_integrations(workflow.id, &workflow.event_integrations)
            .await
            .context(storage("link event integrations", &workflow.name))?;

        workflow.touch();
        tx.update_workflow(workflow)
            .await
            .context(storage("update workflow", &workflow.name))?;

        Ok(Applied { messages, resolved })
    }

    async fn lock_previous(
        tx: &mut S::Tx,
        project: &Project,
        workflow: &Workflow,
    ) -> Result<Workflow, Report<WorkflowError>> {
        match tx.load_and_lock_workflow(&project.key, workflow.id).await {
            Ok(Some(previous)) => Ok(previous),
            Ok(None) => Err(WorkflowError::WorkflowNotFound {
                project: project.key.clone(),
                workflow: workflow.name.clone(),
            }
            .into()),
            Err(report) => {
                let context = if matches!(report.current_context(), StoreError::Locked { .. }) {
                    WorkflowError::Locked {
                        workflow: workflow.name.clone(),
                    }
                } else {
                    storage("load previous workflow", &workflow.name)
                };
                Err(report).context(context)
            }
        }
    }

    /// Deletes a workflow: unregisters its hooks, then removes its graph and
    /// its row.
    ///
    /// # Errors
    ///
    /// Returns the first hook service or storage failure; storage is rolled
    /// back.
    #[instrument(skip_all, fields(project = %workflow.project_key, workflow = %workflow.name))]
    pub async fn delete(&self, workflow: &Workflow) -> Result<(), Report<WorkflowError>> {
        let mut tx = self.begin(&workflow.name).await?;
        let result = self.delete_in(&mut tx, workflow).await;
        self.finish(tx, &workflow.name, result).await?;
        info!(workflow_id = %workflow.id, "workflow deleted");
        Ok(())
    }

    async fn delete_in(
        &self,
        tx: &mut S::Tx,
        workflow: &Workflow,
    ) -> Result<(), Report<WorkflowError>> {
        let delta = HookDelta::teardown(&workflow.data);
        lifecycle::unregister_hooks(&self.hooks, &workflow.name, &delta.unregister).await?;

        tx.delete_notifications(workflow.id)
            .await
            .context(storage("delete notifications", &workflow.name))?;
        tx.unlink_event_integrations(workflow.id)
            .await
            .context(storage("unlink event integrations", &workflow.name))?;
        tx.delete_graph(workflow.id)
            .await
            .context(storage("delete graph", &workflow.name))?;
        tx.delete_workflow(workflow.id)
            .await
            .context(storage("delete workflow", &workflow.name))?;
        Ok(())
    }

    /// Marks a workflow for deletion without touching its hooks or graph.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::WorkflowNotFound`] if there is no such workflow.
    #[instrument(skip(self, project), fields(project = %project.key))]
    pub async fn mark_as_delete(
        &self,
        project: &Project,
        name: &str,
    ) -> Result<(), Report<WorkflowError>> {
        let mut tx = self.begin(name).await?;
        let result = match tx
            .mark_as_delete(&project.key, name)
            .await
            .context(storage("mark workflow as deleted", name))
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(WorkflowError::WorkflowNotFound {
                project: project.key.clone(),
                workflow: name.to_string(),
            }
            .into()),
            Err(report) => Err(report),
        };
        self.finish(tx, name, result).await
    }

    /// Hard-deletes every workflow marked for deletion.
    ///
    /// Each workflow is deleted in its own transaction; failures are logged
    /// and skipped. Returns the number of workflows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error only if the marked workflows cannot be listed.
    #[instrument(skip(self))]
    pub async fn purge_marked_for_delete(&self) -> Result<usize, Report<WorkflowError>> {
        let mut tx = self.begin("*").await?;
        let marked = tx
            .workflows_marked_to_delete()
            .await
            .context(storage("list workflows marked for deletion", "*"));
        self.release(tx, "*").await;

        let mut purged = 0;
        for entry in marked? {
            match self.purge_one(&entry).await {
                Ok(()) => purged += 1,
                Err(report) => warn!(
                    project = %entry.project_key,
                    workflow = %entry.name,
                    error = %report,
                    "failed to purge workflow"
                ),
            }
        }
        if purged > 0 {
            info!(purged, "purged workflows marked for deletion");
        }
        Ok(purged)
    }

    async fn purge_one(&self, entry: &MarkedWorkflow) -> Result<(), Report<WorkflowError>> {
        let not_found = || WorkflowError::WorkflowNotFound {
            project: entry.project_key.clone(),
            workflow: entry.name.clone(),
        };

        let mut tx = self.begin(&entry.name).await?;
        let result = async {
            tx.project_by_key(&entry.project_key)
                .await
                .context(storage("load project", &entry.name))?
                .ok_or_else(not_found)?;
            let workflow = tx
                .load_workflow(&entry.project_key, &WorkflowLookup::Id(entry.workflow_id))
                .await
                .context(storage("load workflow", &entry.name))?
                .ok_or_else(not_found)?;
            self.delete_in(&mut tx, &workflow).await
        }
        .await;
        self.finish(tx, &entry.name, result).await
    }

    /// Sets the root default payload; failures only produce a warning.
    async fn apply_default_payload(
        &self,
        tx: &mut S::Tx,
        workflow: &mut Workflow,
        resolved: &ResolvedEntities,
        messages: &mut Vec<Message>,
    ) {
        match default_payload(tx, workflow, resolved).await {
            Ok(Some(payload)) => {
                if let Some(root) = workflow.data.root_node_mut() {
                    root.context.default_payload = Some(payload);
                }
            }
            Ok(None) => {}
            Err(report) => {
                warn!(workflow = %workflow.name, error = %report, "cannot compute default payload");
                messages.push(Message::warning(format!(
                    "default payload of workflow {} could not be computed",
                    workflow.name
                )));
            }
        }
    }

    /// Adds a commit-status notification for repository-linked nodes unless
    /// the workflow already has a VCS notification.
    fn add_default_vcs_notification(&self, workflow: &mut Workflow, resolved: &ResolvedEntities) {
        if workflow
            .notifications
            .iter()
            .any(|notification| notification.kind == NotificationKind::Vcs)
        {
            return;
        }
        let sources: Vec<String> = workflow
            .data
            .nodes()
            .filter(|node| node.is_linked_to_repository(resolved))
            .map(|node| node.name.clone())
            .collect();
        if !sources.is_empty() {
            workflow.notifications.push(Notification::default_vcs(sources));
        }
    }
}
