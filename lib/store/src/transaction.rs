//! Transactions and workflow persistence.

use crate::rows::{
    GroupRow, IntegrationRow, MarkedRow, NotificationRow, WORKFLOW_COLUMNS, WorkflowRow, database,
    to_json,
};
use async_trait::async_trait;
use conduit_core::{Principal, WorkflowId};
use conduit_workflow::store::{
    ImportOutcome, MarkedWorkflow, StoreError, StoreTx, WorkflowLookup, WorkflowStore,
};
use conduit_workflow::{
    Application, Environment, GroupPermission, Notification, NodeId, Pipeline, Project,
    ProjectIntegration, Workflow, WorkflowData,
};
use rootcause::prelude::Report;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// Workflow store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, Report<StoreError>> {
        let tx = self.pool.begin().await.map_err(database)?;
        Ok(PgTransaction { tx })
    }
}

/// An open PostgreSQL transaction. Dropping it rolls back.
pub struct PgTransaction {
    pub(crate) tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    /// Attaches notifications, event integrations and groups to a loaded row.
    async fn complete(&mut self, row: WorkflowRow) -> Result<Workflow, Report<StoreError>> {
        let mut workflow = row.try_into_workflow()?;
        let id = workflow.id.to_string();

        let notifications: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, kind, source_node_refs, settings
            FROM workflow_notifications
            WHERE workflow_id = $1
            ORDER BY id
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?;
        workflow.notifications = notifications
            .into_iter()
            .map(NotificationRow::try_into_notification)
            .collect::<Result<_, _>>()?;

        let integrations: Vec<IntegrationRow> = sqlx::query_as(
            r#"
            SELECT pi.id, pi.name
            FROM workflow_event_integrations wei
            JOIN project_integrations pi ON pi.id = wei.integration_id
            WHERE wei.workflow_id = $1
            ORDER BY pi.name
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?;
        workflow.event_integrations = integrations
            .into_iter()
            .map(IntegrationRow::try_into_integration)
            .collect::<Result<_, _>>()?;

        let groups: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT group_name, permission
            FROM workflow_groups
            WHERE workflow_id = $1
            ORDER BY group_name
            "#,
        )
        .bind(&id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?;
        workflow.groups = groups
            .into_iter()
            .map(GroupRow::try_into_group)
            .collect::<Result<_, _>>()?;

        Ok(workflow)
    }

    async fn exists_by_id(&mut self, id: WorkflowId) -> Result<bool, Report<StoreError>> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM workflows WHERE id = $1)")
                .bind(id.to_string())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(database)?;
        Ok(exists)
    }
}

fn history_length(workflow: &Workflow) -> i32 {
    i32::try_from(workflow.history_length).unwrap_or(i32::MAX)
}

#[async_trait]
impl StoreTx for PgTransaction {
    async fn workflow_exists(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM workflows WHERE project_key = $1 AND name = $2)",
        )
        .bind(project_key)
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(exists)
    }

    async fn load_workflow(
        &mut self,
        project_key: &str,
        lookup: &WorkflowLookup,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        let (column, value) = match lookup {
            WorkflowLookup::Id(id) => ("id", id.to_string()),
            WorkflowLookup::Name(name) => ("name", name.clone()),
            WorkflowLookup::Repository(repository) => ("from_repository", repository.clone()),
        };
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE project_key = $1 AND {column} = $2"
        ))
        .bind(project_key)
        .bind(value)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(self.complete(r).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn load_and_lock_workflow(
        &mut self,
        project_key: &str,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE project_key = $1 AND id = $2 FOR UPDATE SKIP LOCKED"
        ))
        .bind(project_key)
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database)?;

        match row {
            Some(r) => Ok(Some(self.complete(r).await?)),
            None if self.exists_by_id(id).await? => {
                debug!("workflow row is locked by another transaction");
                Err(StoreError::Locked { workflow_id: id }.into())
            }
            None => Ok(None),
        }
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, project_id, project_key, name, description, icon, history_length,
                 from_repository, purge_tags, metadata, labels, to_delete, workflow_data,
                 updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.project_id.to_string())
        .bind(&workflow.project_key)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.icon)
        .bind(history_length(workflow))
        .bind(&workflow.from_repository)
        .bind(to_json("purge tags", &workflow.purge_tags)?)
        .bind(to_json("metadata", &workflow.metadata)?)
        .bind(to_json("labels", &workflow.labels)?)
        .bind(workflow.to_delete)
        .bind(to_json("workflow data", &workflow.data)?)
        .bind(workflow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, icon = $4, history_length = $5,
                from_repository = $6, purge_tags = $7, metadata = $8, labels = $9,
                to_delete = $10, workflow_data = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.icon)
        .bind(history_length(workflow))
        .bind(&workflow.from_repository)
        .bind(to_json("purge tags", &workflow.purge_tags)?)
        .bind(to_json("metadata", &workflow.metadata)?)
        .bind(to_json("labels", &workflow.labels)?)
        .bind(workflow.to_delete)
        .bind(to_json("workflow data", &workflow.data)?)
        .bind(workflow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn update_metadata(
        &mut self,
        id: WorkflowId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query("UPDATE workflows SET metadata = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(to_json("metadata", metadata)?)
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    async fn mark_as_delete(
        &mut self,
        project_key: &str,
        name: &str,
    ) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query(
            "UPDATE workflows SET to_delete = TRUE WHERE project_key = $1 AND name = $2",
        )
        .bind(project_key)
        .bind(name)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn workflows_marked_to_delete(
        &mut self,
    ) -> Result<Vec<MarkedWorkflow>, Report<StoreError>> {
        let rows: Vec<MarkedRow> = sqlx::query_as(
            r#"
            SELECT id, project_key, name
            FROM workflows
            WHERE to_delete
            ORDER BY project_key, name
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database)?;

        Ok(rows
            .into_iter()
            .map(MarkedRow::try_into_marked)
            .collect::<Result<_, _>>()?)
    }

    async fn delete_workflow(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(nodes = data.node_count()))]
    async fn insert_graph(
        &mut self,
        id: WorkflowId,
        data: &mut WorkflowData,
    ) -> Result<(), Report<StoreError>> {
        let workflow_id = id.to_string();
        let mut rows = HashMap::new();

        for idx in data.flatten() {
            let parent = data.parent(idx).and_then(|parent| rows.get(&parent).copied());
            let node = data.node(idx);
            let node_type = node.node_type.map(|t| t.as_str()).unwrap_or_default();
            let (node_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO workflow_nodes
                    (workflow_id, parent_id, name, ref, node_type, context, outgoing_hook,
                     join_sources)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(&workflow_id)
            .bind(parent)
            .bind(&node.name)
            .bind(node.effective_ref())
            .bind(node_type)
            .bind(to_json("node context", &node.context)?)
            .bind(
                node.outgoing_hook
                    .as_ref()
                    .map(|ctx| to_json("outgoing hook", ctx))
                    .transpose()?,
            )
            .bind(to_json("join sources", &node.join_sources)?)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(database)?;

            for hook in &node.hooks {
                let Some(uuid) = hook.uuid else {
                    return Err(StoreError::Corrupted {
                        message: format!(
                            "hook {} on node {} has no identity",
                            hook.hook_model_name, node.name
                        ),
                    }
                    .into());
                };
                sqlx::query(
                    r#"
                    INSERT INTO workflow_node_hooks
                        (uuid, node_id, workflow_id, hook_model_id, hook_model_name, config)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(uuid.to_string())
                .bind(node_id)
                .bind(&workflow_id)
                .bind(hook.hook_model_id.map(|id| id.to_string()))
                .bind(&hook.hook_model_name)
                .bind(to_json("hook config", &hook.config)?)
                .execute(&mut *self.tx)
                .await
                .map_err(database)?;
            }

            rows.insert(idx, node_id);
            data.node_mut(idx).id = Some(NodeId::new(node_id));
        }

        Ok(())
    }

    async fn delete_graph(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    async fn insert_notification(
        &mut self,
        id: WorkflowId,
        notification: &mut Notification,
    ) -> Result<(), Report<StoreError>> {
        let (notification_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_notifications (workflow_id, kind, source_node_refs, settings)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(id.to_string())
        .bind(notification.kind.as_str())
        .bind(to_json("notification sources", &notification.source_node_refs)?)
        .bind(to_json("notification settings", &notification.settings)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(database)?;

        notification.id = Some(notification_id);
        Ok(())
    }

    async fn delete_notifications(&mut self, id: WorkflowId) -> Result<(), Report<StoreError>> {
        sqlx::query("DELETE FROM workflow_notifications WHERE workflow_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    async fn link_event_integrations(
        &mut self,
        id: WorkflowId,
        integrations: &[ProjectIntegration],
    ) -> Result<(), Report<StoreError>> {
        for integration in integrations {
            sqlx::query(
                r#"
                INSERT INTO workflow_event_integrations (workflow_id, integration_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id.to_string())
            .bind(integration.id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        }
        Ok(())
    }

    async fn unlink_event_integrations(
        &mut self,
        id: WorkflowId,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query("DELETE FROM workflow_event_integrations WHERE workflow_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        Ok(())
    }

    async fn upsert_groups(
        &mut self,
        id: WorkflowId,
        groups: &[GroupPermission],
    ) -> Result<(), Report<StoreError>> {
        for group in groups {
            sqlx::query(
                r#"
                INSERT INTO workflow_groups (workflow_id, group_name, permission)
                VALUES ($1, $2, $3)
                ON CONFLICT (workflow_id, group_name)
                DO UPDATE SET permission = EXCLUDED.permission
                "#,
            )
            .bind(id.to_string())
            .bind(&group.group)
            .bind(group.permission.level())
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
        }
        Ok(())
    }

    async fn import_application(
        &mut self,
        project: &Project,
        application: &Application,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        self.upsert_application(project, application, principal)
            .await
    }

    async fn import_environment(
        &mut self,
        project: &Project,
        environment: &Environment,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        self.upsert_environment(project, environment, principal)
            .await
    }

    async fn import_pipeline(
        &mut self,
        project: &Project,
        pipeline: &Pipeline,
        principal: &Principal,
    ) -> Result<ImportOutcome, Report<StoreError>> {
        self.upsert_pipeline(project, pipeline, principal).await
    }

    async fn update_application(
        &mut self,
        application: &Application,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query(
            "UPDATE applications SET vcs_server = $2, repository_fullname = $3 WHERE id = $1",
        )
        .bind(application.id.to_string())
        .bind(&application.vcs_server)
        .bind(&application.repository_fullname)
        .execute(&mut *self.tx)
        .await
        .map_err(database)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), Report<StoreError>> {
        self.tx.commit().await.map_err(database)?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Report<StoreError>> {
        self.tx.rollback().await.map_err(database)?;
        Ok(())
    }
}
