//! Workflow notifications.
//!
//! Notifications are replaced wholesale on every update: the coordinator
//! deletes the stored set and inserts the workflow's current one.

use serde::{Deserialize, Serialize};

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Email,
    Jabber,
    /// Commit status pushed to the repository's VCS server.
    Vcs,
}

impl NotificationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Jabber => "jabber",
            Self::Vcs => "vcs",
        }
    }

    /// Parses a stored kind.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "jabber" => Some(Self::Jabber),
            "vcs" => Some(Self::Vcs),
            _ => None,
        }
    }
}

/// When a notification fires for a given outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyWhen {
    Always,
    #[default]
    Change,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub on_success: NotifyWhen,
    pub on_failure: NotifyWhen,
    pub on_start: bool,
    pub send_to_groups: bool,
    pub send_to_author: bool,
    pub recipients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<NotificationTemplate>,
}

/// A notification attached to a set of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Storage id, assigned on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Refs of the nodes whose runs trigger the notification.
    #[serde(default)]
    pub source_node_refs: Vec<String>,
    #[serde(default)]
    pub settings: NotificationSettings,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationKind, source_node_refs: Vec<String>) -> Self {
        Self {
            id: None,
            kind,
            source_node_refs,
            settings: NotificationSettings::default(),
        }
    }

    /// The commit-status notification added to repository-linked workflows.
    #[must_use]
    pub fn default_vcs(source_node_refs: Vec<String>) -> Self {
        Self {
            id: None,
            kind: NotificationKind::Vcs,
            source_node_refs,
            settings: NotificationSettings {
                on_success: NotifyWhen::Always,
                on_failure: NotifyWhen::Always,
                on_start: true,
                ..NotificationSettings::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in [
            NotificationKind::Email,
            NotificationKind::Jabber,
            NotificationKind::Vcs,
        ] {
            assert_eq!(NotificationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationKind::parse("slack"), None);
    }

    #[test]
    fn default_vcs_notifies_every_outcome() {
        let notification = Notification::default_vcs(vec!["build".to_string()]);
        assert_eq!(notification.kind, NotificationKind::Vcs);
        assert_eq!(notification.settings.on_failure, NotifyWhen::Always);
        assert!(notification.settings.on_start);
    }
}
