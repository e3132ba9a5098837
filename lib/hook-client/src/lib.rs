//! HTTP client for the hook service.
//!
//! Registration posts a [`HookDefinition`] to `{base_url}/task` and reads
//! back a [`HookReference`]. Unregistration deletes `{base_url}/task/{uuid}`.
//!
//! Transport failures and 5xx answers are reported as
//! [`HookServiceError::Unavailable`]; 4xx answers as
//! [`HookServiceError::Rejected`].

use async_trait::async_trait;
use conduit_core::HookId;
use conduit_workflow::{HookDefinition, HookReference, HookService, HookServiceError};
use reqwest::StatusCode;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Hook service connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HookClientConfig {
    /// Base URL of the hook service.
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

impl HookClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// [`HookService`] backed by the hook service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpHookService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHookService {
    /// Builds a client from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &HookClientConfig) -> Result<Self, Report<HookServiceError>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| HookServiceError::Unavailable {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/task", self.base_url)
    }

    fn task_url(&self, uuid: HookId) -> String {
        format!("{}/task/{uuid}", self.base_url)
    }
}

fn unavailable(error: &reqwest::Error) -> HookServiceError {
    HookServiceError::Unavailable {
        message: error.to_string(),
    }
}

/// Maps a non-success answer to an error.
fn classify(status: StatusCode, uuid: HookId, body: String) -> HookServiceError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if status.is_client_error() {
        HookServiceError::Rejected { uuid, message }
    } else {
        HookServiceError::Unavailable { message }
    }
}

async fn failure(response: reqwest::Response, uuid: HookId) -> HookServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(%uuid, %status, body = %body, "hook service returned error");
    classify(status, uuid, body)
}

#[async_trait]
impl HookService for HttpHookService {
    #[instrument(skip_all, fields(uuid = %definition.uuid, model = %definition.hook_model_name))]
    async fn register(
        &self,
        definition: &HookDefinition,
    ) -> Result<HookReference, Report<HookServiceError>> {
        let response = self
            .client
            .post(self.tasks_url())
            .json(definition)
            .send()
            .await
            .map_err(|e| unavailable(&e))?;

        if !response.status().is_success() {
            return Err(failure(response, definition.uuid).await.into());
        }

        let reference: HookReference = response.json().await.map_err(|e| unavailable(&e))?;
        debug!("hook registered");
        Ok(reference)
    }

    #[instrument(skip(self))]
    async fn unregister(&self, uuid: HookId) -> Result<(), Report<HookServiceError>> {
        let response = self
            .client
            .delete(self.task_url(uuid))
            .send()
            .await
            .map_err(|e| unavailable(&e))?;

        // Already gone.
        if response.status() == StatusCode::NOT_FOUND {
            debug!("hook was not registered");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(failure(response, uuid).await.into());
        }

        debug!("hook unregistered");
        Ok(())
    }
}
