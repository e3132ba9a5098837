//! Reference resolution of node contexts.
//!
//! Every `(id, name)` pair of a node context is resolved the same way:
//! - id set: reuse the cached entity or load it by id, check it belongs to the
//!   project, cache it and populate the name;
//! - else name set: load it by `(project, name)`, cache it and populate the id;
//! - else nothing to do.
//!
//! Caches live in a [`ResolvedEntities`] owned by the caller for the duration
//! of one validation or mutation. Entities resolved before a failure stay in
//! it.

use crate::error::{EntityKind, WorkflowError};
use crate::entity::{Application, Environment, Pipeline, Project, ProjectIntegration};
use crate::hook::{HookModel, NodeHook};
use crate::node::{NodeContext, OutgoingHookContext};
use crate::store::Catalog;
use conduit_core::{ApplicationId, EnvironmentId, HookModelId, IntegrationId, PipelineId};
use rootcause::prelude::{Report, ResultExt};
use std::collections::HashMap;
use std::fmt::Display;

/// Entities resolved during one call, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ResolvedEntities {
    pub pipelines: HashMap<PipelineId, Pipeline>,
    pub applications: HashMap<ApplicationId, Application>,
    pub environments: HashMap<EnvironmentId, Environment>,
    pub integrations: HashMap<IntegrationId, ProjectIntegration>,
    pub hook_models: HashMap<HookModelId, HookModel>,
    pub outgoing_hook_models: HashMap<HookModelId, HookModel>,
}

/// Resolves node contexts of one workflow against a catalog.
pub struct Resolver<'a, C: ?Sized> {
    catalog: &'a mut C,
    project: &'a Project,
    workflow: &'a str,
    resolved: &'a mut ResolvedEntities,
}

impl<'a, C: Catalog + ?Sized> Resolver<'a, C> {
    pub fn new(
        catalog: &'a mut C,
        project: &'a Project,
        workflow: &'a str,
        resolved: &'a mut ResolvedEntities,
    ) -> Self {
        Self {
            catalog,
            project,
            workflow,
            resolved,
        }
    }

    /// Entities resolved so far.
    pub fn resolved(&self) -> &ResolvedEntities {
        self.resolved
    }

    fn storage(&self, operation: &'static str) -> WorkflowError {
        WorkflowError::Storage {
            operation,
            workflow: self.workflow.to_string(),
        }
    }

    fn not_found(entity: EntityKind, reference: impl Display) -> WorkflowError {
        WorkflowError::EntityNotFound {
            entity,
            reference: reference.to_string(),
        }
    }

    fn check_project(
        &self,
        entity: EntityKind,
        reference: impl Display,
        project_key: &str,
    ) -> Result<(), WorkflowError> {
        if project_key == self.project.key {
            Ok(())
        } else {
            Err(WorkflowError::NotInProject {
                entity,
                reference: reference.to_string(),
                project: self.project.key.clone(),
            })
        }
    }

    /// Resolves the pipeline of a node context.
    pub async fn pipeline(&mut self, ctx: &mut NodeContext) -> Result<(), Report<WorkflowError>> {
        if let Some(id) = ctx.pipeline_id {
            if let Some(pipeline) = self.resolved.pipelines.get(&id) {
                ctx.pipeline_name.clone_from(&pipeline.name);
                return Ok(());
            }
            let pipeline = self
                .catalog
                .pipeline_by_id(id)
                .await
                .context(self.storage("load pipeline"))?
                .ok_or_else(|| Self::not_found(EntityKind::Pipeline, id))?;
            self.check_project(EntityKind::Pipeline, id, &pipeline.project_key)?;
            ctx.pipeline_name.clone_from(&pipeline.name);
            self.resolved.pipelines.insert(id, pipeline);
        } else if !ctx.pipeline_name.is_empty() {
            let pipeline = self
                .catalog
                .pipeline_by_name(&self.project.key, &ctx.pipeline_name)
                .await
                .context(self.storage("load pipeline"))?
                .ok_or_else(|| Self::not_found(EntityKind::Pipeline, &ctx.pipeline_name))?;
            ctx.pipeline_id = Some(pipeline.id);
            self.resolved.pipelines.insert(pipeline.id, pipeline);
        }
        Ok(())
    }

    /// Resolves the application of a node context.
    pub async fn application(
        &mut self,
        ctx: &mut NodeContext,
    ) -> Result<(), Report<WorkflowError>> {
        if let Some(id) = ctx.application_id {
            if let Some(application) = self.resolved.applications.get(&id) {
                ctx.application_name.clone_from(&application.name);
                return Ok(());
            }
            let application = self
                .catalog
                .application_by_id(id)
                .await
                .context(self.storage("load application"))?
                .ok_or_else(|| Self::not_found(EntityKind::Application, id))?;
            self.check_project(EntityKind::Application, id, &application.project_key)?;
            ctx.application_name.clone_from(&application.name);
            self.resolved.applications.insert(id, application);
        } else if !ctx.application_name.is_empty() {
            let application = self
                .catalog
                .application_by_name(&self.project.key, &ctx.application_name)
                .await
                .context(self.storage("load application"))?
                .ok_or_else(|| Self::not_found(EntityKind::Application, &ctx.application_name))?;
            ctx.application_id = Some(application.id);
            self.resolved.applications.insert(application.id, application);
        }
        Ok(())
    }

    /// Resolves the environment of a node context.
    pub async fn environment(
        &mut self,
        ctx: &mut NodeContext,
    ) -> Result<(), Report<WorkflowError>> {
        if let Some(id) = ctx.environment_id {
            if let Some(environment) = self.resolved.environments.get(&id) {
                ctx.environment_name.clone_from(&environment.name);
                return Ok(());
            }
            let environment = self
                .catalog
                .environment_by_id(id)
                .await
                .context(self.storage("load environment"))?
                .ok_or_else(|| Self::not_found(EntityKind::Environment, id))?;
            self.check_project(EntityKind::Environment, id, &environment.project_key)?;
            ctx.environment_name.clone_from(&environment.name);
            self.resolved.environments.insert(id, environment);
        } else if !ctx.environment_name.is_empty() {
            let environment = self
                .catalog
                .environment_by_name(&self.project.key, &ctx.environment_name)
                .await
                .context(self.storage("load environment"))?
                .ok_or_else(|| Self::not_found(EntityKind::Environment, &ctx.environment_name))?;
            ctx.environment_id = Some(environment.id);
            self.resolved.environments.insert(environment.id, environment);
        }
        Ok(())
    }

    /// Resolves the project integration of a node context.
    ///
    /// Integrations are looked up in the project itself.
    pub fn project_integration(&mut self, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let integration = if let Some(id) = ctx.project_integration_id {
            match self.resolved.integrations.get(&id) {
                Some(integration) => integration.clone(),
                None => self
                    .project
                    .integration_by_id(id)
                    .cloned()
                    .ok_or_else(|| Self::not_found(EntityKind::Integration, id))?,
            }
        } else if !ctx.project_integration_name.is_empty() {
            self.project
                .integration_by_name(&ctx.project_integration_name)
                .cloned()
                .ok_or_else(|| {
                    Self::not_found(EntityKind::Integration, &ctx.project_integration_name)
                })?
        } else {
            return Ok(());
        };

        ctx.project_integration_id = Some(integration.id);
        ctx.project_integration_name.clone_from(&integration.name);
        self.resolved.integrations.insert(integration.id, integration);
        Ok(())
    }

    /// Checks that every event integration belongs to the project.
    pub fn event_integrations(
        &self,
        integrations: &[ProjectIntegration],
    ) -> Result<(), WorkflowError> {
        for integration in integrations {
            if self.project.integration_by_id(integration.id).is_none() {
                return Err(WorkflowError::NotInProject {
                    entity: EntityKind::Integration,
                    reference: integration.name.clone(),
                    project: self.project.key.clone(),
                });
            }
        }
        Ok(())
    }

    async fn hook_model(&mut self, hook: &NodeHook) -> Result<HookModel, Report<WorkflowError>> {
        if let Some(id) = hook.hook_model_id {
            if let Some(model) = self.resolved.hook_models.get(&id) {
                return Ok(model.clone());
            }
            let model = self
                .catalog
                .hook_model_by_id(id)
                .await
                .context(self.storage("load hook model"))?
                .ok_or_else(|| Self::not_found(EntityKind::HookModel, id))?;
            self.resolved.hook_models.insert(id, model.clone());
            Ok(model)
        } else {
            let model = self
                .catalog
                .hook_model_by_name(&hook.hook_model_name)
                .await
                .context(self.storage("load hook model"))?
                .ok_or_else(|| Self::not_found(EntityKind::HookModel, &hook.hook_model_name))?;
            self.resolved.hook_models.insert(model.id, model.clone());
            Ok(model)
        }
    }

    /// Resolves the model of every hook and merges the model defaults into
    /// its config.
    pub async fn hooks(&mut self, hooks: &mut [NodeHook]) -> Result<(), Report<WorkflowError>> {
        for hook in hooks {
            if hook.hook_model_id.is_none() && hook.hook_model_name.is_empty() {
                return Err(Self::not_found(EntityKind::HookModel, "(unnamed)").into());
            }
            let model = self.hook_model(hook).await?;
            hook.hook_model_id = Some(model.id);
            hook.hook_model_name.clone_from(&model.name);
            hook.apply_model_defaults(&model)?;
        }
        Ok(())
    }

    /// Resolves the model of an outgoing hook node.
    pub async fn outgoing_hook(
        &mut self,
        ctx: &mut OutgoingHookContext,
    ) -> Result<(), Report<WorkflowError>> {
        let model = if let Some(id) = ctx.hook_model_id {
            match self.resolved.outgoing_hook_models.get(&id) {
                Some(model) => model.clone(),
                None => self
                    .catalog
                    .outgoing_hook_model_by_id(id)
                    .await
                    .context(self.storage("load outgoing hook model"))?
                    .ok_or_else(|| Self::not_found(EntityKind::OutgoingHookModel, id))?,
            }
        } else if !ctx.hook_model_name.is_empty() {
            self.catalog
                .outgoing_hook_model_by_name(&ctx.hook_model_name)
                .await
                .context(self.storage("load outgoing hook model"))?
                .ok_or_else(|| Self::not_found(EntityKind::OutgoingHookModel, &ctx.hook_model_name))?
        } else {
            return Ok(());
        };

        ctx.hook_model_id = Some(model.id);
        ctx.hook_model_name.clone_from(&model.name);
        self.resolved.outgoing_hook_models.insert(model.id, model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hook::HookConfigValue;
    use crate::testing::InMemoryStore;
    use conduit_core::PipelineId;

    #[tokio::test]
    async fn name_only_context_is_populated() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = NodeContext {
            pipeline_name: "build".to_string(),
            application_name: "api".to_string(),
            environment_name: "production".to_string(),
            ..NodeContext::default()
        };
        resolver.pipeline(&mut ctx).await.unwrap();
        resolver.application(&mut ctx).await.unwrap();
        resolver.environment(&mut ctx).await.unwrap();

        assert!(ctx.pipeline_id.is_some());
        assert!(ctx.application_id.is_some());
        assert!(ctx.environment_id.is_some());
        assert!(resolved.pipelines.contains_key(&ctx.pipeline_id.unwrap()));
    }

    #[tokio::test]
    async fn id_only_context_is_populated() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let pipeline_id = store.pipeline("build").id;
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = NodeContext {
            pipeline_id: Some(pipeline_id),
            ..NodeContext::default()
        };
        resolver.pipeline(&mut ctx).await.unwrap();
        assert_eq!(ctx.pipeline_name, "build");
    }

    #[tokio::test]
    async fn foreign_id_is_not_in_project() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let foreign = store.add_foreign_pipeline("OTHER", "build");
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = NodeContext {
            pipeline_id: Some(foreign.id),
            ..NodeContext::default()
        };
        let err = resolver.pipeline(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            WorkflowError::NotInProject { entity: EntityKind::Pipeline, .. }
        ));
        assert_eq!(err.current_context().kind(), ErrorKind::NotFound);
        assert!(resolved.pipelines.is_empty());
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = NodeContext {
            pipeline_name: "missing".to_string(),
            ..NodeContext::default()
        };
        let err = resolver.pipeline(&mut ctx).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::NotFound);

        let mut ctx = NodeContext {
            pipeline_id: Some(PipelineId::new()),
            ..NodeContext::default()
        };
        let err = resolver.pipeline(&mut ctx).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn cached_entities_are_reused() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let pipeline = store.pipeline("build");
        store.remove_pipeline(pipeline.id);
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        resolved.pipelines.insert(pipeline.id, pipeline.clone());

        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);
        let mut ctx = NodeContext {
            pipeline_id: Some(pipeline.id),
            ..NodeContext::default()
        };
        resolver.pipeline(&mut ctx).await.unwrap();
        assert_eq!(ctx.pipeline_name, "build");
    }

    #[tokio::test]
    async fn integrations_resolve_from_project() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = NodeContext {
            project_integration_name: "kubernetes".to_string(),
            ..NodeContext::default()
        };
        resolver.project_integration(&mut ctx).unwrap();
        assert!(ctx.project_integration_id.is_some());

        let foreign = ProjectIntegration::new("kafka");
        assert!(matches!(
            resolver.event_integrations(&[foreign]),
            Err(WorkflowError::NotInProject { .. })
        ));
        assert!(resolver.event_integrations(&project.integrations).is_ok());
    }

    #[tokio::test]
    async fn hooks_get_model_and_defaults() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut hooks = vec![NodeHook::new("Scheduler")];
        resolver.hooks(&mut hooks).await.unwrap();
        assert!(hooks[0].hook_model_id.is_some());
        assert_eq!(hooks[0].config_value("retry"), Some("3"));

        let mut bad = vec![NodeHook::new("Scheduler").with_config("retry", "5")];
        let err = resolver.hooks(&mut bad).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            WorkflowError::HookConfigNotConfigurable { key, .. } if key == "retry"
        ));
        assert_eq!(
            resolved.hook_models.values().next().map(|m| m.default_config["retry"].clone()),
            Some(HookConfigValue::fixed("3"))
        );
    }

    #[tokio::test]
    async fn outgoing_hook_model_is_resolved() {
        let store = InMemoryStore::with_sample_project();
        let project = store.project();
        let mut tx = store.tx();
        let mut resolved = ResolvedEntities::default();
        let mut resolver = Resolver::new(&mut tx, &project, "build", &mut resolved);

        let mut ctx = OutgoingHookContext {
            hook_model_name: "Webhook".to_string(),
            ..OutgoingHookContext::default()
        };
        resolver.outgoing_hook(&mut ctx).await.unwrap();
        assert!(ctx.hook_model_id.is_some());
        assert_eq!(resolved.outgoing_hook_models.len(), 1);
    }
}
