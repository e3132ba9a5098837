//! Entities owned by neighbouring subsystems.
//!
//! The engine only reads these: nodes reference them by id or by name, the
//! resolver loads them through a [`Catalog`](crate::store::Catalog) and caches
//! them for the duration of one call.

use conduit_core::{ApplicationId, EnvironmentId, IntegrationId, PipelineId, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A project: the tenant every workflow and entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub key: String,
    pub name: String,
    /// Integrations configured on the project.
    #[serde(default)]
    pub integrations: Vec<ProjectIntegration>,
    /// Default permissions inherited by new workflows.
    #[serde(default)]
    pub groups: Vec<GroupPermission>,
}

impl Project {
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            key: key.into(),
            name: name.into(),
            integrations: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Returns the project integration with the given id.
    #[must_use]
    pub fn integration_by_id(&self, id: IntegrationId) -> Option<&ProjectIntegration> {
        self.integrations.iter().find(|i| i.id == id)
    }

    /// Returns the project integration with the given name.
    #[must_use]
    pub fn integration_by_name(&self, name: &str) -> Option<&ProjectIntegration> {
        self.integrations.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub project_key: String,
    pub name: String,
}

impl Pipeline {
    #[must_use]
    pub fn new(project_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            project_key: project_key.into(),
            name: name.into(),
        }
    }
}

/// A project variable carried by an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// An application, optionally linked to a repository on a VCS server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub project_key: String,
    pub name: String,
    #[serde(default)]
    pub vcs_server: Option<String>,
    #[serde(default)]
    pub repository_fullname: Option<String>,
    /// Deployment parameters keyed by integration name.
    #[serde(default)]
    pub deployment_strategies: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Application {
    #[must_use]
    pub fn new(project_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ApplicationId::new(),
            project_key: project_key.into(),
            name: name.into(),
            vcs_server: None,
            repository_fullname: None,
            deployment_strategies: BTreeMap::new(),
            variables: Vec::new(),
        }
    }

    /// Links the application to a repository.
    #[must_use]
    pub fn with_repository(
        mut self,
        vcs_server: impl Into<String>,
        repository_fullname: impl Into<String>,
    ) -> Self {
        self.vcs_server = Some(vcs_server.into());
        self.repository_fullname = Some(repository_fullname.into());
        self
    }

    /// Adds an (empty) deployment strategy for an integration.
    #[must_use]
    pub fn with_deployment_strategy(mut self, integration: impl Into<String>) -> Self {
        self.deployment_strategies
            .insert(integration.into(), BTreeMap::new());
        self
    }

    /// Returns the repository name when the application is linked to one.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.repository_fullname
            .as_deref()
            .filter(|repo| !repo.is_empty())
    }

    /// Whether both the VCS server and the repository are set.
    #[must_use]
    pub fn has_vcs_linkage(&self) -> bool {
        self.vcs_server.as_deref().is_some_and(|s| !s.is_empty()) && self.repository().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_key: String,
    pub name: String,
}

impl Environment {
    #[must_use]
    pub fn new(project_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::new(),
            project_key: project_key.into(),
            name: name.into(),
        }
    }
}

/// An integration configured on a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIntegration {
    pub id: IntegrationId,
    pub name: String,
}

impl ProjectIntegration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: IntegrationId::new(),
            name: name.into(),
        }
    }
}

/// Permission level of a group on a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    ReadExecute,
    ReadWriteExecute,
}

impl Permission {
    /// Numeric level as stored.
    #[must_use]
    pub fn level(self) -> i32 {
        match self {
            Self::Read => 4,
            Self::ReadExecute => 5,
            Self::ReadWriteExecute => 7,
        }
    }

    /// Parses a stored level.
    #[must_use]
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            4 => Some(Self::Read),
            5 => Some(Self::ReadExecute),
            7 => Some(Self::ReadWriteExecute),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermission {
    pub group: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
}
