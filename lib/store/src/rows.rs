//! Row types and their conversion into domain types.
//!
//! Ids are stored as their prefixed display form. Nested values that the
//! engine treats as a whole (graph data, metadata, hook configs) are JSONB.

use chrono::{DateTime, Utc};
use conduit_core::ParseIdError;
use conduit_workflow::entity::Variable;
use conduit_workflow::notification::NotificationSettings;
use conduit_workflow::store::{MarkedWorkflow, StoreError};
use conduit_workflow::{
    Application, Environment, GroupPermission, HookModel, Notification, NotificationKind,
    Permission, Pipeline, Project, ProjectIntegration, Workflow,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::fmt::Display;
use std::str::FromStr;

pub(crate) fn database(error: sqlx::Error) -> StoreError {
    StoreError::Database {
        message: error.to_string(),
    }
}

fn corrupted(what: &str, error: impl Display) -> StoreError {
    StoreError::Corrupted {
        message: format!("{what}: {error}"),
    }
}

pub(crate) fn parse_id<T>(raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = ParseIdError>,
{
    T::from_str(raw).map_err(|e| corrupted(raw, e))
}

fn from_json<T: DeserializeOwned>(what: &str, value: JsonValue) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| corrupted(what, e))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(what: &str, value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| corrupted(what, e))
}

#[derive(FromRow)]
pub(crate) struct ProjectRow {
    pub(crate) id: String,
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) groups: JsonValue,
}

impl ProjectRow {
    pub(crate) fn try_into_project(
        self,
        integrations: Vec<ProjectIntegration>,
    ) -> Result<Project, StoreError> {
        Ok(Project {
            id: parse_id(&self.id)?,
            groups: from_json("project groups", self.groups)?,
            key: self.key,
            name: self.name,
            integrations,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct IntegrationRow {
    pub(crate) id: String,
    pub(crate) name: String,
}

impl IntegrationRow {
    pub(crate) fn try_into_integration(self) -> Result<ProjectIntegration, StoreError> {
        Ok(ProjectIntegration {
            id: parse_id(&self.id)?,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct PipelineRow {
    pub(crate) id: String,
    pub(crate) project_key: String,
    pub(crate) name: String,
}

impl PipelineRow {
    pub(crate) fn try_into_pipeline(self) -> Result<Pipeline, StoreError> {
        Ok(Pipeline {
            id: parse_id(&self.id)?,
            project_key: self.project_key,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct ApplicationRow {
    pub(crate) id: String,
    pub(crate) project_key: String,
    pub(crate) name: String,
    pub(crate) vcs_server: Option<String>,
    pub(crate) repository_fullname: Option<String>,
    pub(crate) deployment_strategies: JsonValue,
    pub(crate) variables: JsonValue,
}

impl ApplicationRow {
    pub(crate) fn try_into_application(self) -> Result<Application, StoreError> {
        let variables: Vec<Variable> = from_json("application variables", self.variables)?;
        Ok(Application {
            id: parse_id(&self.id)?,
            deployment_strategies: from_json("deployment strategies", self.deployment_strategies)?,
            project_key: self.project_key,
            name: self.name,
            vcs_server: self.vcs_server,
            repository_fullname: self.repository_fullname,
            variables,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct EnvironmentRow {
    pub(crate) id: String,
    pub(crate) project_key: String,
    pub(crate) name: String,
}

impl EnvironmentRow {
    pub(crate) fn try_into_environment(self) -> Result<Environment, StoreError> {
        Ok(Environment {
            id: parse_id(&self.id)?,
            project_key: self.project_key,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct HookModelRow {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) default_config: JsonValue,
}

impl HookModelRow {
    pub(crate) fn try_into_model(self) -> Result<HookModel, StoreError> {
        Ok(HookModel {
            id: parse_id(&self.id)?,
            default_config: from_json("hook model config", self.default_config)?,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct WorkflowRow {
    pub(crate) id: String,
    pub(crate) project_id: String,
    pub(crate) project_key: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) icon: Option<String>,
    pub(crate) history_length: i32,
    pub(crate) from_repository: Option<String>,
    pub(crate) purge_tags: JsonValue,
    pub(crate) metadata: JsonValue,
    pub(crate) labels: JsonValue,
    pub(crate) to_delete: bool,
    pub(crate) workflow_data: JsonValue,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Columns selected into a [`WorkflowRow`].
pub(crate) const WORKFLOW_COLUMNS: &str = "id, project_id, project_key, name, description, \
     icon, history_length, from_repository, purge_tags, metadata, labels, to_delete, \
     workflow_data, updated_at";

impl WorkflowRow {
    /// Converts the row alone; notifications, links and groups are loaded
    /// separately.
    pub(crate) fn try_into_workflow(self) -> Result<Workflow, StoreError> {
        Ok(Workflow {
            id: parse_id(&self.id)?,
            project_id: parse_id(&self.project_id)?,
            history_length: u32::try_from(self.history_length)
                .map_err(|e| corrupted("history length", e))?,
            purge_tags: from_json("purge tags", self.purge_tags)?,
            metadata: from_json("metadata", self.metadata)?,
            labels: from_json("labels", self.labels)?,
            data: from_json("workflow data", self.workflow_data)?,
            project_key: self.project_key,
            name: self.name,
            description: self.description,
            icon: self.icon,
            from_repository: self.from_repository,
            to_delete: self.to_delete,
            notifications: Vec::new(),
            event_integrations: Vec::new(),
            groups: Vec::new(),
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct MarkedRow {
    pub(crate) id: String,
    pub(crate) project_key: String,
    pub(crate) name: String,
}

impl MarkedRow {
    pub(crate) fn try_into_marked(self) -> Result<MarkedWorkflow, StoreError> {
        Ok(MarkedWorkflow {
            workflow_id: parse_id(&self.id)?,
            project_key: self.project_key,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct NotificationRow {
    pub(crate) id: i64,
    pub(crate) kind: String,
    pub(crate) source_node_refs: JsonValue,
    pub(crate) settings: JsonValue,
}

impl NotificationRow {
    pub(crate) fn try_into_notification(self) -> Result<Notification, StoreError> {
        let kind = NotificationKind::parse(&self.kind)
            .ok_or_else(|| corrupted("notification kind", &self.kind))?;
        let settings: NotificationSettings = from_json("notification settings", self.settings)?;
        Ok(Notification {
            id: Some(self.id),
            kind,
            source_node_refs: from_json("notification sources", self.source_node_refs)?,
            settings,
        })
    }
}

#[derive(FromRow)]
pub(crate) struct GroupRow {
    pub(crate) group_name: String,
    pub(crate) permission: i32,
}

impl GroupRow {
    pub(crate) fn try_into_group(self) -> Result<GroupPermission, StoreError> {
        let permission = Permission::from_level(self.permission)
            .ok_or_else(|| corrupted("group permission", self.permission))?;
        Ok(GroupPermission {
            group: self.group_name,
            permission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_workflow::Node;
    use serde_json::json;

    fn workflow_row(workflow: &Workflow) -> WorkflowRow {
        WorkflowRow {
            id: workflow.id.to_string(),
            project_id: workflow.project_id.to_string(),
            project_key: workflow.project_key.clone(),
            name: workflow.name.clone(),
            description: Some("nightly".to_string()),
            icon: None,
            history_length: 20,
            from_repository: None,
            purge_tags: json!(["git.branch"]),
            metadata: json!({"default_tags": "git.branch,git.author"}),
            labels: json!([]),
            to_delete: false,
            workflow_data: to_json("workflow data", &workflow.data).unwrap(),
            updated_at: workflow.updated_at,
        }
    }

    #[test]
    fn workflow_row_converts() {
        let project = Project::new("PRJ", "Project");
        let mut workflow = Workflow::new(&project, "build", Node::pipeline("build").with_name("build"));
        let root = workflow.data.root().unwrap();
        workflow
            .data
            .add_child(root, Node::pipeline("deploy").with_name("deploy"));

        let converted = workflow_row(&workflow).try_into_workflow().unwrap();

        assert_eq!(converted.id, workflow.id);
        assert_eq!(converted.project_id, project.id);
        assert_eq!(converted.purge_tags, vec!["git.branch".to_string()]);
        assert_eq!(converted.data.edge_names(), workflow.data.edge_names());
    }

    #[test]
    fn invalid_id_is_corrupted() {
        let project = Project::new("PRJ", "Project");
        let workflow = Workflow::new(&project, "build", Node::pipeline("build"));
        let mut row = workflow_row(&workflow);
        row.id = "not-an-id".to_string();

        assert!(matches!(
            row.try_into_workflow(),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn id_of_another_entity_is_corrupted() {
        let project = Project::new("PRJ", "Project");
        let workflow = Workflow::new(&project, "build", Node::pipeline("build"));
        let mut row = workflow_row(&workflow);
        row.project_id = workflow.id.to_string();

        assert!(matches!(
            row.try_into_workflow(),
            Err(StoreError::Corrupted { message }) if message.contains("is not a ProjectId")
        ));
    }

    #[test]
    fn negative_history_length_is_corrupted() {
        let project = Project::new("PRJ", "Project");
        let workflow = Workflow::new(&project, "build", Node::pipeline("build"));
        let mut row = workflow_row(&workflow);
        row.history_length = -1;

        assert!(row.try_into_workflow().is_err());
    }

    #[test]
    fn notification_row_converts() {
        let row = NotificationRow {
            id: 7,
            kind: "vcs".to_string(),
            source_node_refs: json!(["build"]),
            settings: json!({"on_success": "always", "on_start": true}),
        };
        let notification = row.try_into_notification().unwrap();
        assert_eq!(notification.id, Some(7));
        assert_eq!(notification.kind, NotificationKind::Vcs);
        assert!(notification.settings.on_start);

        let unknown = NotificationRow {
            id: 8,
            kind: "carrier-pigeon".to_string(),
            source_node_refs: json!([]),
            settings: json!({}),
        };
        assert!(unknown.try_into_notification().is_err());
    }

    #[test]
    fn group_levels_convert() {
        let row = GroupRow {
            group_name: "ops".to_string(),
            permission: 7,
        };
        assert_eq!(
            row.try_into_group().unwrap().permission,
            Permission::ReadWriteExecute
        );
        let bad = GroupRow {
            group_name: "ops".to_string(),
            permission: 3,
        };
        assert!(bad.try_into_group().is_err());
    }
}
