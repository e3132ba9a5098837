//! Catalog reads: projects and the entities workflow nodes reference.

use crate::rows::{
    ApplicationRow, EnvironmentRow, HookModelRow, IntegrationRow, PipelineRow, ProjectRow,
    database,
};
use crate::transaction::PgTransaction;
use async_trait::async_trait;
use conduit_core::{ApplicationId, EnvironmentId, HookModelId, PipelineId};
use conduit_workflow::store::{Catalog, StoreError};
use conduit_workflow::{Application, Environment, HookModel, Pipeline, Project};
use rootcause::prelude::Report;

const INCOMING: &str = "incoming";
const OUTGOING: &str = "outgoing";

impl PgTransaction {
    async fn hook_model(
        &mut self,
        direction: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        let row: Option<HookModelRow> = sqlx::query_as(&format!(
            "SELECT id, name, default_config FROM hook_models WHERE direction = $1 AND {column} = $2"
        ))
        .bind(direction)
        .bind(value)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_model()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Catalog for PgTransaction {
    async fn project_by_key(&mut self, key: &str) -> Result<Option<Project>, Report<StoreError>> {
        let row: Option<ProjectRow> =
            sqlx::query_as("SELECT id, key, name, groups FROM projects WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let integrations: Vec<IntegrationRow> = sqlx::query_as(
            r#"
            SELECT id, name
            FROM project_integrations
            WHERE project_key = $1
            ORDER BY name
            "#,
        )
        .bind(key)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?;
        let integrations = integrations
            .into_iter()
            .map(IntegrationRow::try_into_integration)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(row.try_into_project(integrations)?))
    }

    async fn pipeline_by_id(
        &mut self,
        id: PipelineId,
    ) -> Result<Option<Pipeline>, Report<StoreError>> {
        let row: Option<PipelineRow> =
            sqlx::query_as("SELECT id, project_key, name FROM pipelines WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_pipeline()?)),
            None => Ok(None),
        }
    }

    async fn pipeline_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Pipeline>, Report<StoreError>> {
        let row: Option<PipelineRow> = sqlx::query_as(
            "SELECT id, project_key, name FROM pipelines WHERE project_key = $1 AND name = $2",
        )
        .bind(project_key)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_pipeline()?)),
            None => Ok(None),
        }
    }

    async fn application_by_id(
        &mut self,
        id: ApplicationId,
    ) -> Result<Option<Application>, Report<StoreError>> {
        let row: Option<ApplicationRow> = sqlx::query_as(
            r#"
            SELECT id, project_key, name, vcs_server, repository_fullname,
                   deployment_strategies, variables
            FROM applications
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_application()?)),
            None => Ok(None),
        }
    }

    async fn application_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Application>, Report<StoreError>> {
        let row: Option<ApplicationRow> = sqlx::query_as(
            r#"
            SELECT id, project_key, name, vcs_server, repository_fullname,
                   deployment_strategies, variables
            FROM applications
            WHERE project_key = $1 AND name = $2
            "#,
        )
        .bind(project_key)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_application()?)),
            None => Ok(None),
        }
    }

    async fn environment_by_id(
        &mut self,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, Report<StoreError>> {
        let row: Option<EnvironmentRow> =
            sqlx::query_as("SELECT id, project_key, name FROM environments WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_environment()?)),
            None => Ok(None),
        }
    }

    async fn environment_by_name(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<Option<Environment>, Report<StoreError>> {
        let row: Option<EnvironmentRow> = sqlx::query_as(
            "SELECT id, project_key, name FROM environments WHERE project_key = $1 AND name = $2",
        )
        .bind(project_key)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(r.try_into_environment()?)),
            None => Ok(None),
        }
    }

    async fn hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        self.hook_model(INCOMING, "id", &id.to_string()).await
    }

    async fn hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        self.hook_model(INCOMING, "name", name).await
    }

    async fn outgoing_hook_model_by_id(
        &mut self,
        id: HookModelId,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        self.hook_model(OUTGOING, "id", &id.to_string()).await
    }

    async fn outgoing_hook_model_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<HookModel>, Report<StoreError>> {
        self.hook_model(OUTGOING, "name", name).await
    }

    async fn default_branch(
        &mut self,
        application: &Application,
    ) -> Result<Option<String>, Report<StoreError>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT default_branch FROM applications WHERE id = $1")
                .bind(application.id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?;

        Ok(row.and_then(|(branch,)| branch))
    }
}
