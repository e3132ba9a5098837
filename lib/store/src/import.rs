//! Forced imports of as-code entities.
//!
//! An import replaces the entity with the same name in the project, keeping
//! its id so that existing node references stay valid.

use crate::rows::{database, to_json};
use crate::transaction::PgTransaction;
use conduit_core::Principal;
use conduit_workflow::store::{ImportOutcome, StoreError};
use conduit_workflow::{Application, Environment, Pipeline, Project};
use rootcause::prelude::Report;
use tracing::{debug, instrument};

/// `xmax` is zero on rows created by the statement.
fn outcome(inserted: bool) -> ImportOutcome {
    if inserted {
        ImportOutcome::Created
    } else {
        ImportOutcome::Updated
    }
}

impl PgTransaction {
    #[instrument(skip_all, fields(project = %project.key, application = %application.name))]
    pub(crate) async fn upsert_application(
        &mut self,
        project: &Project,
        application: &Application,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let (inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO applications
                (id, project_key, name, vcs_server, repository_fullname,
                 deployment_strategies, variables, last_modified_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (project_key, name) DO UPDATE
            SET vcs_server = EXCLUDED.vcs_server,
                repository_fullname = EXCLUDED.repository_fullname,
                deployment_strategies = EXCLUDED.deployment_strategies,
                variables = EXCLUDED.variables,
                last_modified_by = EXCLUDED.last_modified_by
            RETURNING (xmax = 0)
            "#,
        )
        .bind(application.id.to_string())
        .bind(&project.key)
        .bind(&application.name)
        .bind(&application.vcs_server)
        .bind(&application.repository_fullname)
        .bind(to_json("deployment strategies", &application.deployment_strategies)?)
        .bind(to_json("application variables", &application.variables)?)
        .bind(&principal.username)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;

        debug!(inserted, "application imported");
        Ok(outcome(inserted))
    }

    #[instrument(skip_all, fields(project = %project.key, environment = %environment.name))]
    pub(crate) async fn upsert_environment(
        &mut self,
        project: &Project,
        environment: &Environment,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let (inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO environments (id, project_key, name, last_modified_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_key, name) DO UPDATE
            SET last_modified_by = EXCLUDED.last_modified_by
            RETURNING (xmax = 0)
            "#,
        )
        .bind(environment.id.to_string())
        .bind(&project.key)
        .bind(&environment.name)
        .bind(&principal.username)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;

        Ok(outcome(inserted))
    }

    #[instrument(skip_all, fields(project = %project.key, pipeline = %pipeline.name))]
    pub(crate) async fn upsert_pipeline(
        &mut self,
        project: &Project,
        pipeline: &Pipeline,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        let (inserted,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO pipelines (id, project_key, name, last_modified_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_key, name) DO UPDATE
            SET last_modified_by = EXCLUDED.last_modified_by
            RETURNING (xmax = 0)
            "#,
        )
        .bind(pipeline.id.to_string())
        .bind(&project.key)
        .bind(&pipeline.name)
        .bind(&principal.username)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;

        Ok(outcome(inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xmax_flag_maps_to_outcome() {
        assert_eq!(outcome(true), ImportOutcome::Created);
        assert_eq!(outcome(false), ImportOutcome::Updated);
    }
}
