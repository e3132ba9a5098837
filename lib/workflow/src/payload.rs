//! Default payload of the root node.
//!
//! When the root node runs with an application linked to a repository, its
//! payload tells runs which branch of which repository to build.

use crate::definition::Workflow;
use crate::node::DefaultPayload;
use crate::resolver::ResolvedEntities;
use crate::store::{Catalog, StoreError};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;

/// Branch used when the repository does not tell its default branch.
pub const DEFAULT_BRANCH: &str = "master";

pub const GIT_BRANCH_KEY: &str = "git.branch";
pub const GIT_REPOSITORY_KEY: &str = "git.repository";

/// Computes the root node's default payload.
///
/// Returns `None` when the root application is not linked to a repository
/// or the payload already names a branch.
///
/// # Errors
///
/// Returns an error if the default branch cannot be read.
pub async fn default_payload<C: Catalog + ?Sized>(
    catalog: &mut C,
    workflow: &Workflow,
    resolved: &ResolvedEntities,
) -> Result<Option<DefaultPayload>, Report<StoreError>> {
    let Some(root) = workflow.data.root_node() else {
        return Ok(None);
    };
    let Some(application) = root
        .context
        .application_id
        .and_then(|id| resolved.applications.get(&id))
    else {
        return Ok(None);
    };
    let Some(repository) = application.repository() else {
        return Ok(None);
    };

    let mut payload = root.context.default_payload.clone().unwrap_or_default();
    if payload.contains_key(GIT_BRANCH_KEY) {
        return Ok(None);
    }

    let branch = catalog
        .default_branch(application)
        .await?
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    payload.insert(GIT_BRANCH_KEY.to_string(), JsonValue::String(branch));
    payload.insert(
        GIT_REPOSITORY_KEY.to_string(),
        JsonValue::String(repository.to_string()),
    );
    Ok(Some(payload))
}
