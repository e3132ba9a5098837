//! As-code push.
//!
//! A push imports a bundle read from a repository: the applications,
//! environments and pipelines it carries are force-imported, then the
//! workflow is inserted or reconciled with the one already stored. Pushes
//! from a branch other than the repository's default branch run the whole
//! import and then roll it back, so that a branch can be previewed without
//! changing stored state or touching the hook service.

use crate::definition::{Workflow, strip_credentials};
use crate::entity::{Application, Environment, Pipeline, Project};
use crate::error::WorkflowError;
use crate::lifecycle::HookService;
use crate::mutation::{Applied, UpdateOptions, WorkflowService, storage};
use crate::store::{ImportOutcome, StoreTx, WorkflowStore};
use conduit_core::{Message, Principal};
use rootcause::prelude::{Report, ResultExt};
use tracing::{debug, info, instrument};

/// Entities read from a repository.
#[derive(Debug, Clone)]
pub struct AsCodeBundle {
    pub workflow: Workflow,
    pub applications: Vec<Application>,
    pub environments: Vec<Environment>,
    pub pipelines: Vec<Pipeline>,
}

impl AsCodeBundle {
    #[must_use]
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            applications: Vec::new(),
            environments: Vec::new(),
            pipelines: Vec::new(),
        }
    }
}

/// Where a bundle comes from.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Origin repository URL.
    pub from_repository: Option<String>,
    pub branch: Option<String>,
    pub is_default_branch: bool,
    /// VCS server the root application gets linked to.
    pub vcs_server: Option<String>,
    /// Repository the root application gets linked to.
    pub repository_name: Option<String>,
    /// Stored workflow to reconcile with; looked up by name when absent.
    pub previous: Option<Workflow>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            from_repository: None,
            branch: None,
            is_default_branch: true,
            vcs_server: None,
            repository_name: None,
            previous: None,
        }
    }
}

/// Result of a push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub messages: Vec<Message>,
    /// The imported workflow. Not stored when pushed from another branch.
    pub workflow: Workflow,
    pub previous: Option<Workflow>,
}

fn import_message(kind: &str, name: &str, outcome: ImportOutcome) -> Message {
    match outcome {
        ImportOutcome::Created => Message::info(format!("{kind} {name} has been created")),
        ImportOutcome::Updated => Message::info(format!("{kind} {name} has been updated")),
    }
}

impl<S, H> WorkflowService<S, H>
where
    S: WorkflowStore,
    H: HookService,
{
    /// Imports an as-code bundle.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::AlreadyAsCode`] when the stored workflow is
    /// managed from another repository,
    /// [`WorkflowError::ApplicationMandatoryOnAsCode`] when the root node of
    /// an as-code workflow has no repository-linked application, or the
    /// first import, validation, storage or hook service failure.
    #[instrument(skip_all, fields(project = %project.key, workflow = %bundle.workflow.name, branch = ?options.branch))]
    pub async fn push(
        &self,
        project: &Project,
        bundle: AsCodeBundle,
        options: PushOptions,
        principal: &Principal,
    ) -> Result<PushOutcome, Report<WorkflowError>> {
        let AsCodeBundle {
            mut workflow,
            applications,
            environments,
            pipelines,
        } = bundle;
        let name = workflow.name.clone();
        let origin = options.from_repository.as_deref().map(strip_credentials);

        let previous = match options.previous.clone() {
            Some(previous) => Some(previous),
            None if self.exists(project, &name).await? => Some(self.load(project, &name).await?),
            None => None,
        };
        if let Some(stored) = previous
            .as_ref()
            .and_then(|previous| previous.from_repository.as_deref())
        {
            if origin.as_deref() != Some(stored) {
                return Err(WorkflowError::AlreadyAsCode {
                    workflow: name,
                    repository: stored.to_string(),
                }
                .into());
            }
        }

        let mut tx = self.begin(&name).await?;
        let result = async {
            let mut messages = Vec::new();
            for application in &applications {
                let outcome = tx
                    .import_application(project, application, principal)
                    .await
                    .context(storage("import application", &name))?;
                messages.push(import_message("application", &application.name, outcome));
            }
            for environment in &environments {
                let outcome = tx
                    .import_environment(project, environment, principal)
                    .await
                    .context(storage("import environment", &name))?;
                messages.push(import_message("environment", &environment.name, outcome));
            }
            for pipeline in &pipelines {
                let outcome = tx
                    .import_pipeline(project, pipeline, principal)
                    .await
                    .context(storage("import pipeline", &name))?;
                messages.push(import_message("pipeline", &pipeline.name, outcome));
            }

            workflow.from_repository.clone_from(&origin);
            let applied = match previous.as_ref() {
                Some(previous) => {
                    workflow.id = previous.id;
                    let options = UpdateOptions {
                        disable_hook_management: !options.is_default_branch,
                    };
                    self.update_in(&mut tx, project, &mut workflow, options)
                        .await?
                }
                None => {
                    self.insert_in(&mut tx, project, &mut workflow, options.is_default_branch)
                        .await?
                }
            };
            messages.extend(applied.messages.clone());

            self.link_root_application(&mut tx, &workflow, &applied, &options, origin.is_some())
                .await?;
            Ok::<_, Report<WorkflowError>>(messages)
        }
        .await;

        let messages = match result {
            Ok(messages) => messages,
            Err(report) => {
                self.release(tx, &name).await;
                return Err(report);
            }
        };
        if options.is_default_branch {
            tx.commit().await.context(storage("commit", &name))?;
            info!(workflow_id = %workflow.id, "workflow pushed");
        } else {
            self.release(tx, &name).await;
            debug!("rolled back, not pushed from the default branch");
        }

        Ok(PushOutcome {
            messages,
            workflow,
            previous,
        })
    }

    /// Links the root application to the pushed repository and persists it.
    async fn link_root_application(
        &self,
        tx: &mut S::Tx,
        workflow: &Workflow,
        applied: &Applied,
        options: &PushOptions,
        as_code: bool,
    ) -> Result<(), Report<WorkflowError>> {
        let application = workflow
            .data
            .root_node()
            .and_then(|root| root.context.application_id)
            .and_then(|id| applied.resolved.applications.get(&id));
        let Some(application) = application else {
            if as_code {
                return Err(WorkflowError::ApplicationMandatoryOnAsCode {
                    workflow: workflow.name.clone(),
                }
                .into());
            }
            return Ok(());
        };

        let mut application = application.clone();
        if let (Some(server), Some(repository)) = (&options.vcs_server, &options.repository_name) {
            application.vcs_server = Some(server.clone());
            application.repository_fullname = Some(repository.clone());
        }
        if as_code && !application.has_vcs_linkage() {
            return Err(WorkflowError::ApplicationMandatoryOnAsCode {
                workflow: workflow.name.clone(),
            }
            .into());
        }
        tx.update_application(&application)
            .await
            .context(storage("update application", &workflow.name))?;
        Ok(())
    }
}
