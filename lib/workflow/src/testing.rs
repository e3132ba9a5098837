//! In-memory collaborators for tests.

use crate::definition::Workflow;
use crate::entity::{
    Application, Environment, GroupPermission, Permission, Pipeline, Project, ProjectIntegration,
};
use crate::graph::WorkflowData;
use crate::hook::{HookConfig, HookConfigValue, HookModel};
use crate::lifecycle::{HookDefinition, HookReference, HookService, HookServiceError};
use crate::node::{Node, NodeId};
use crate::notification::Notification;
use crate::store::{
    Catalog, ImportOutcome, MarkedWorkflow, StoreError, StoreTx, WorkflowLookup, WorkflowStore,
};
use async_trait::async_trait;
use conduit_core::{
    ApplicationId, EnvironmentId, HookId, HookModelId, PipelineId, Principal, WorkflowId,
};
use rootcause::prelude::Report;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct State {
    projects: HashMap<String, Project>,
    pipelines: HashMap<PipelineId, Pipeline>,
    applications: HashMap<ApplicationId, Application>,
    environments: HashMap<EnvironmentId, Environment>,
    hook_models: Vec<HookModel>,
    outgoing_hook_models: Vec<HookModel>,
    default_branches: HashMap<ApplicationId, String>,
    workflows: HashMap<WorkflowId, Workflow>,
    graphs: HashMap<WorkflowId, usize>,
    notifications: HashMap<WorkflowId, Vec<Notification>>,
    integration_links: HashMap<WorkflowId, Vec<ProjectIntegration>>,
    groups: HashMap<WorkflowId, Vec<GroupPermission>>,
    locked: HashSet<WorkflowId>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_workflow(&self, project_key: &str, lookup: &WorkflowLookup) -> Option<&Workflow> {
        self.workflows.values().find(|workflow| {
            workflow.project_key == project_key
                && match lookup {
                    WorkflowLookup::Id(id) => workflow.id == *id,
                    WorkflowLookup::Name(name) => &workflow.name == name,
                    WorkflowLookup::Repository(repository) => {
                        workflow.from_repository.as_ref() == Some(repository)
                    }
                }
        })
    }

    fn loaded(&self, workflow: &Workflow) -> Workflow {
        let mut workflow = workflow.clone();
        workflow.notifications = self
            .notifications
            .get(&workflow.id)
            .cloned()
            .unwrap_or_default();
        workflow.event_integrations = self
            .integration_links
            .get(&workflow.id)
            .cloned()
            .unwrap_or_default();
        workflow.groups = self.groups.get(&workflow.id).cloned().unwrap_or_default();
        workflow
    }
}

/// Shared in-memory store. Transactions work on a snapshot that replaces
/// the shared state on commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Project `PRJ` with pipelines, applications, an environment, an
    /// integration and hook models.
    pub(crate) fn with_sample_project() -> Self {
        let mut state = State::default();

        let mut project = Project::new("PRJ", "Sample project");
        project.integrations.push(ProjectIntegration::new("kubernetes"));
        project.groups.push(GroupPermission {
            group: "PRJ-maintainers".to_string(),
            permission: Permission::ReadWriteExecute,
        });
        state.projects.insert(project.key.clone(), project);

        for name in ["build", "test", "deploy"] {
            let pipeline = Pipeline::new("PRJ", name);
            state.pipelines.insert(pipeline.id, pipeline);
        }
        for application in [
            Application::new("PRJ", "api")
                .with_repository("github", "org/api")
                .with_deployment_strategy("kubernetes"),
            Application::new("PRJ", "web"),
        ] {
            state.applications.insert(application.id, application);
        }
        let environment = Environment::new("PRJ", "production");
        state.environments.insert(environment.id, environment);

        state.hook_models = vec![
            HookModel::new("Scheduler")
                .with_default("retry", HookConfigValue::fixed("3"))
                .with_default("cron", HookConfigValue::configurable("0 0 * * *")),
            HookModel::new("RepositoryWebHook"),
            HookModel::new("Kafka"),
        ];
        state.outgoing_hook_models = vec![
            HookModel::new("Webhook").with_default("url", HookConfigValue::configurable("")),
        ];

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn tx(&self) -> InMemoryTx {
        InMemoryTx {
            shared: Arc::clone(&self.state),
            state: self.state.lock().unwrap().clone(),
        }
    }

    pub(crate) fn project(&self) -> Project {
        self.state.lock().unwrap().projects["PRJ"].clone()
    }

    pub(crate) fn find_pipeline(&self, name: &str) -> Option<Pipeline> {
        self.state
            .lock()
            .unwrap()
            .pipelines
            .values()
            .find(|p| p.project_key == "PRJ" && p.name == name)
            .cloned()
    }

    pub(crate) fn pipeline(&self, name: &str) -> Pipeline {
        self.find_pipeline(name).unwrap()
    }

    pub(crate) fn find_application(&self, name: &str) -> Option<Application> {
        self.state
            .lock()
            .unwrap()
            .applications
            .values()
            .find(|a| a.project_key == "PRJ" && a.name == name)
            .cloned()
    }

    pub(crate) fn application(&self, name: &str) -> Application {
        self.find_application(name).unwrap()
    }

    pub(crate) fn find_environment(&self, name: &str) -> Option<Environment> {
        self.state
            .lock()
            .unwrap()
            .environments
            .values()
            .find(|e| e.project_key == "PRJ" && e.name == name)
            .cloned()
    }

    /// Adds a pipeline to another project.
    pub(crate) fn add_foreign_pipeline(&self, project_key: &str, name: &str) -> Pipeline {
        let pipeline = Pipeline::new(project_key, name);
        self.state
            .lock()
            .unwrap()
            .pipelines
            .insert(pipeline.id, pipeline.clone());
        pipeline
    }

    pub(crate) fn remove_pipeline(&self, id: PipelineId) {
        self.state.lock().unwrap().pipelines.remove(&id);
    }

    pub(crate) fn set_default_branch(&self, application: &str, branch: &str) {
        let id = self.application(application).id;
        self.state
            .lock()
            .unwrap()
            .default_branches
            .insert(id, branch.to_string());
    }

    /// Simulates another transaction holding the workflow row.
    pub(crate) fn lock(&self, id: WorkflowId) {
        self.state.lock().unwrap().locked.insert(id);
    }

    /// An unvalidated workflow: `build` followed by `test` and `deploy`.
    pub(crate) fn sample_workflow(&self, name: &str) -> Workflow {
        let mut workflow = Workflow::new(&self.project(), name, Node::pipeline("build"));
        let root = workflow.data.root().unwrap();
        let test = workflow.data.add_child(root, Node::pipeline("test"));
        workflow.data.add_child(test, Node::pipeline("deploy"));
        workflow
    }

    /// The committed workflow row, with its notifications and links.
    pub(crate) fn stored_workflow(&self, id: WorkflowId) -> Option<Workflow> {
        let state = self.state.lock().unwrap();
        state.workflows.get(&id).map(|workflow| state.loaded(workflow))
    }

    pub(crate) fn workflow_count(&self) -> usize {
        self.state.lock().unwrap().workflows.len()
    }

    /// Number of committed node rows of a workflow.
    pub(crate) fn node_count(&self, id: WorkflowId) -> usize {
        self.state
            .lock()
            .unwrap()
            .graphs
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    /// Keeps only the ids in the stored node contexts.
    pub(crate) fn clear_context_names(&self, id: WorkflowId) {
        let mut state = self.state.lock().unwrap();
        let workflow = state.workflows.get_mut(&id).unwrap();
        for idx in workflow.data.flatten() {
            let context = &mut workflow.data.node_mut(idx).context;
            context.pipeline_name.clear();
            context.application_name.clear();
            context.environment_name.clear();
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, Report<StoreError>> {
        Ok(self.tx())
    }
}

pub(crate) struct InMemoryTx {
    shared: Arc<Mutex<State>>,
    state: State,
}

fn by_name<'a, T>(
    values: impl IntoIterator<Item = &'a T>,
    matches: impl Fn(&T) -> bool,
) -> Option<T>
where
    T: Clone + 'a,
{
    values.into_iter().find(|value| matches(value)).cloned()
}

#[async_trait]
impl Catalog for InMemoryTx {
    async fn project_by_key(&mut self, key: &str) -> Result<Option<Project>, Report<StoreError>> {
        Ok(self.state.projects.get(key).cloned())
    }

    async fn pipeline_by_id(
        &mut self,
        id: PipelineId,
    ) -> Result<Option<Pipeline>, Report<StoreError>> {
        Ok(self.state.pipelines.get(&id).cloned())
    }

    async fn pipeline_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Pipeline>, Report<StoreError>> {
        Ok(by_name(self.state.pipelines.values(), |p| {
            p.project_key == project_key && p.name == name
        }))
    }

    async fn application_by_id(
        &mut self,
        id: ApplicationId,
    ) -> Result<Option<Application>, Report<StoreError>> {
        Ok(self.state.applications.get(&id).cloned())
    }

    async fn application_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Application>, Report<StoreError>> {
        Ok(by_name(self.state.applications.values(), |a| {
            a.project_key == project_key && a.name == name
        }))
    }

    async fn environment_by_id(
        &mut self,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, Report<StoreError>> {
        Ok(self.state.environments.get(&id).cloned())
    }

    async fn environment_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Environment>, Report<StoreError>> {
        Ok(by_name(self.state.environments.values(), |e| {
            e.project_key == project_key && e.name == name
        }))
    }

    async fn hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        Ok(by_name(&self.state.hook_models, |m| m.id == id))
    }

    async fn hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        Ok(by_name(&self.state.hook_models, |m| m.name == name))
    }

    async fn outgoing_hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        Ok(by_name(&self.state.outgoing_hook_models, |m| m.id == id))
    }

    async fn outgoing_hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        Ok(by_name(&self.state.outgoing_hook_models, |m| m.name == name))
    }

    async fn default_branch(
        &mut self,
        application: &Application,
    ) -> Result<Option<String>, Report<StoreError>> {
        Ok(self.state.default_branches.get(&application.id).cloned())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn workflow_exists(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>> {
        Ok(self
            .state
            .find_workflow(project_key, &WorkflowLookup::Name(name.to_string()))
            .is_some())
    }

    async fn load_workflow(
        &mut self,
        project_key: &str,
        lookup: &WorkflowLookup,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        Ok(self
            .state
            .find_workflow(project_key, lookup)
            .map(|workflow| self.state.loaded(workflow)))
    }

    async fn load_and_lock_workflow(
        &mut self,
        project_key: &str,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        if self.state.locked.contains(&id) {
            return Err(StoreError::Locked { workflow_id: id }.into());
        }
        self.load_workflow(project_key, &WorkflowLookup::Id(id)).await
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let lookup = WorkflowLookup::Name(workflow.name.clone());
        if self.state.find_workflow(&workflow.project_key, &lookup).is_some() {
            return Err(StoreError::Database {
                message: format!("duplicate workflow {}", workflow.name),
            }
            .into());
        }
        self.state.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let mut row = workflow.clone();
        row.notifications.clear();
        row.event_integrations.clear();
        row.groups.clear();
        self.state.workflows.insert(workflow.id, row);
        Ok(())
    }

    async fn update_metadata(
        &mut self,
        id: WorkflowId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>> {
        if let Some(workflow) = self.state.workflows.get_mut(&id) {
            workflow.metadata.clone_from(metadata);
        }
        Ok(())
    }

    async fn mark_as_delete(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>> {
        let marked = self.state.workflows.values_mut().find(|workflow| {
            workflow.project_key == project_key && workflow.name == name
        });
        Ok(match marked {
            Some(workflow) => {
                workflow.to_delete = true;
                true
            }
            None => false,
        })
    }

    async fn workflows_marked_to_delete(
        &mut self,
    ) -> Result<Vec<MarkedWorkflow>, Report<StoreError>> {
        Ok(self
            .state
            .workflows
            .values()
            .filter(|workflow| workflow.to_delete)
            .map(|workflow| MarkedWorkflow {
                project_key: workflow.project_key.clone(),
                workflow_id: workflow.id,
                name: workflow.name.clone(),
            })
            .collect())
    }

    async fn delete_workflow(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        self.state.workflows.remove(&id);
        self.state.groups.remove(&id);
        Ok(())
    }

    async fn insert_graph(
        &mut self,
        id: WorkflowId,
        data: &mut WorkflowData,
    ) -> Result<(), Report<StoreError>> {
        for idx in data.flatten() {
            data.node_mut(idx).id = Some(NodeId::new(self.state.next_id()));
        }
        self.state.graphs.insert(id, data.node_count());
        Ok(())
    }

    async fn delete_graph(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        self.state.graphs.remove(&id);
        Ok(())
    }

    async fn insert_notification(
        &mut self,
        id: WorkflowId,
        notification: &mut Notification,
    ) -> Result<(), Report<StoreError>> {
        notification.id = Some(self.state.next_id());
        self.state
            .notifications
            .entry(id)
            .or_default()
            .push(notification.clone());
        Ok(())
    }

    async fn delete_notifications(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        self.state.notifications.remove(&id);
        Ok(())
    }

    async fn link_event_integrations(
        &mut self,
        id: WorkflowId,
        integrations: &[ProjectIntegration],
    ) -> Result<(), Report<StoreError>> {
        self.state
            .integration_links
            .entry(id)
            .or_default()
            .extend_from_slice(integrations);
        Ok(())
    }

    async fn unlink_event_integrations(
        &mut self,
        id: WorkflowId,
    ) -> Result<(), Report<StoreError>> {
        self.state.integration_links.remove(&id);
        Ok(())
    }

    async fn upsert_groups(
        &mut self,
        id: WorkflowId,
        groups: &[GroupPermission],
    ) -> Result<(), Report<StoreError>> {
        self.state.groups.insert(id, groups.to_vec());
        Ok(())
    }

    async fn import_application(
        &mut self,
        project: &Project,
        application: &Application,
        _principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let mut imported = application.clone();
        imported.project_key.clone_from(&project.key);
        let existing = by_name(self.state.applications.values(), |a| {
            a.project_key == project.key && a.name == application.name
        });
        let outcome = match existing {
            Some(existing) => {
                imported.id = existing.id;
                ImportOutcome::Updated
            }
            None => ImportOutcome::Created,
        };
        self.state.applications.insert(imported.id, imported);
        Ok(outcome)
    }

    async fn import_environment(
        &mut self,
        project: &Project,
        environment: &Environment,
        _principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let mut imported = environment.clone();
        imported.project_key.clone_from(&project.key);
        let existing = by_name(self.state.environments.values(), |e| {
            e.project_key == project.key && e.name == environment.name
        });
        let outcome = match existing {
            Some(existing) => {
                imported.id = existing.id;
                ImportOutcome::Updated
            }
            None => ImportOutcome::Created,
        };
        self.state.environments.insert(imported.id, imported);
        Ok(outcome)
    }

    async fn import_pipeline(
        &mut self,
        project: &Project,
        pipeline: &Pipeline,
        _principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let mut imported = pipeline.clone();
        imported.project_key.clone_from(&project.key);
        let existing = by_name(self.state.pipelines.values(), |p| {
            p.project_key == project.key && p.name == pipeline.name
        });
        let outcome = match existing {
            Some(existing) => {
                imported.id = existing.id;
                ImportOutcome::Updated
            }
            None => ImportOutcome::Created,
        };
        self.state.pipelines.insert(imported.id, imported);
        Ok(outcome)
    }

    async fn update_application(
        &mut self,
        application: &Application,
    ) -> Result<(), Report<StoreError>> {
        self.state
            .applications
            .insert(application.id, application.clone());
        Ok(())
    }

    async fn commit(self) -> Result<(), Report<StoreError>> {
        *self.shared.lock().unwrap() = self.state;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Report<StoreError>> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<String>,
    registered: Vec<HookId>,
    unregistered: Vec<HookId>,
    answer: HookConfig,
    fail_after: Option<usize>,
}

impl Recorded {
    fn should_fail(&self) -> bool {
        self.fail_after.is_some_and(|limit| self.calls.len() >= limit)
    }
}

/// Hook service recording every call.
#[derive(Debug, Default)]
pub(crate) struct RecordingHookService {
    inner: Mutex<Recorded>,
}

impl RecordingHookService {
    /// Adds an entry to every registration answer.
    pub(crate) fn answer_with(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .answer
            .insert(key.to_string(), HookConfigValue::fixed(value));
    }

    /// Fails every call once `calls` calls have succeeded.
    pub(crate) fn fail_after(&self, calls: usize) {
        self.inner.lock().unwrap().fail_after = Some(calls);
    }

    pub(crate) fn registered(&self) -> Vec<HookId> {
        self.inner.lock().unwrap().registered.clone()
    }

    pub(crate) fn unregistered(&self) -> Vec<HookId> {
        self.inner.lock().unwrap().unregistered.clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl HookService for RecordingHookService {
    async fn register(
        &self,
        definition: &HookDefinition,
    ) -> Result<HookReference, Report<HookServiceError>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.should_fail() {
            return Err(HookServiceError::Unavailable {
                message: "connection refused".to_string(),
            }
            .into());
        }
        inner.calls.push(format!("register {}", definition.uuid));
        inner.registered.push(definition.uuid);
        Ok(HookReference {
            uuid: definition.uuid,
            config: inner.answer.clone(),
        })
    }

    async fn unregister(&self, uuid: HookId) -> Result<(), Report<HookServiceError>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.should_fail() {
            return Err(HookServiceError::Rejected {
                uuid,
                message: "unknown hook".to_string(),
            }
            .into());
        }
        inner.calls.push(format!("unregister {uuid}"));
        inner.unregistered.push(uuid);
        Ok(())
    }
}
