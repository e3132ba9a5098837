//! Hooks: external triggers attached to workflow nodes.
//!
//! A hook instance names a [`HookModel`] and carries a config map. Before a
//! hook is persisted or registered its config is merged against the model's
//! default config: missing keys are back-filled, non-configurable keys must
//! keep the model value and keys with a choice list must pick a member of it.

use crate::error::WorkflowError;
use conduit_core::{HookId, HookModelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a hook config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfigValue {
    pub value: String,
    #[serde(default)]
    pub configurable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multiple_choice_list: Vec<String>,
}

impl HookConfigValue {
    /// A configurable value without a choice list.
    #[must_use]
    pub fn configurable(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            configurable: true,
            multiple_choice_list: Vec::new(),
        }
    }

    /// A value the hook instance cannot change.
    #[must_use]
    pub fn fixed(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            configurable: false,
            multiple_choice_list: Vec::new(),
        }
    }

    /// Restricts the value to a choice list.
    #[must_use]
    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.multiple_choice_list = choices.into_iter().map(Into::into).collect();
        self
    }
}

/// Config of a hook, keyed by parameter name.
pub type HookConfig = BTreeMap<String, HookConfigValue>;

/// A hook model from the hook-model registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookModel {
    pub id: HookModelId,
    pub name: String,
    #[serde(default)]
    pub default_config: HookConfig,
}

impl HookModel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: HookModelId::new(),
            name: name.into(),
            default_config: HookConfig::new(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: HookConfigValue) -> Self {
        self.default_config.insert(key.into(), value);
        self
    }
}

/// A hook attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHook {
    /// Identity at the hook service; assigned before registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<HookId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_model_id: Option<HookModelId>,
    #[serde(default)]
    pub hook_model_name: String,
    #[serde(default)]
    pub config: HookConfig,
}

impl NodeHook {
    /// A hook of the named model with an empty config.
    #[must_use]
    pub fn new(hook_model_name: impl Into<String>) -> Self {
        Self {
            hook_model_name: hook_model_name.into(),
            ..Self::default()
        }
    }

    /// Sets a config value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(
            key.into(),
            HookConfigValue {
                value: value.into(),
                ..HookConfigValue::default()
            },
        );
        self
    }

    /// Returns the value of a config key.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(|v| v.value.as_str())
    }

    /// Merges the model defaults into this hook's config.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-configurable key was changed or a value is
    /// outside the key's choice list.
    pub fn apply_model_defaults(&mut self, model: &HookModel) -> Result<(), WorkflowError> {
        for (key, default) in &model.default_config {
            let Some(current) = self.config.get_mut(key) else {
                self.config.insert(key.clone(), default.clone());
                continue;
            };

            if !default.configurable && current.value != default.value {
                return Err(WorkflowError::HookConfigNotConfigurable {
                    model: model.name.clone(),
                    key: key.clone(),
                });
            }
            if !default.multiple_choice_list.is_empty()
                && !default.multiple_choice_list.contains(&current.value)
            {
                return Err(WorkflowError::HookConfigNotInChoices {
                    model: model.name.clone(),
                    key: key.clone(),
                    value: current.value.clone(),
                });
            }

            current.configurable = default.configurable;
            current
                .multiple_choice_list
                .clone_from(&default.multiple_choice_list);
        }
        Ok(())
    }
}
