//! Identifiers of conduit entities.
//!
//! Every id wraps a ULID and renders as `<prefix>_<ulid>` (`wf_01J...`,
//! `pip_01J...`). Parsing accepts that form or a bare ULID, and rejects a
//! value carrying the prefix of another entity, so a pipeline id stored in
//! an application column is caught when the row is read back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string is not a valid id of the requested kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The value is prefixed for another entity.
    WrongPrefix {
        id_type: &'static str,
        found: String,
    },
    /// The ULID part does not parse.
    InvalidUlid {
        id_type: &'static str,
        reason: String,
    },
}

impl ParseIdError {
    /// Name of the id type that failed to parse.
    #[must_use]
    pub fn id_type(&self) -> &'static str {
        match self {
            Self::WrongPrefix { id_type, .. } | Self::InvalidUlid { id_type, .. } => id_type,
        }
    }
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPrefix { id_type, found } => {
                write!(f, "{found:?} is not a {id_type}")
            }
            Self::InvalidUlid { id_type, reason } => {
                write!(f, "failed to parse {id_type}: {reason}")
            }
        }
    }
}

impl std::error::Error for ParseIdError {}

/// Splits `value` into its prefix and ULID parts. A bare ULID has no prefix.
fn split_prefixed(value: &str) -> (Option<&str>, &str) {
    match value.rsplit_once('_') {
        Some((prefix, ulid)) => (Some(prefix), ulid),
        None => (None, value),
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Display prefix of this id kind.
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (prefix, ulid) = split_prefixed(s);
                if prefix.is_some_and(|prefix| prefix != Self::PREFIX) {
                    return Err(ParseIdError::WrongPrefix {
                        id_type: stringify!($name),
                        found: s.to_string(),
                    });
                }
                Ulid::from_str(ulid)
                    .map(Self)
                    .map_err(|e| ParseIdError::InvalidUlid {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

entity_id!(
    /// Author of a change, as recorded in `last_modified_by` columns.
    UserId => "usr"
);

entity_id!(
    /// Project owning workflows and the entities they reference.
    ProjectId => "prj"
);

entity_id!(WorkflowId => "wf");

entity_id!(PipelineId => "pip");

entity_id!(ApplicationId => "app");

entity_id!(EnvironmentId => "env");

entity_id!(
    /// Integration configured on a project (deployment target or event bus).
    IntegrationId => "int"
);

entity_id!(
    /// Hook model, incoming or outgoing.
    HookModelId => "hkm"
);

entity_id!(
    /// Stable identity of a hook instance.
    ///
    /// Survives graph replacement and node renames, and is the reference
    /// handed to the external hook service.
    HookId => "hook"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_with_their_prefix() {
        assert!(HookId::new().to_string().starts_with("hook_"));
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert_eq!(PipelineId::PREFIX, "pip");
    }

    #[test]
    fn prefixed_and_bare_forms_parse() {
        let id = WorkflowId::new();
        assert_eq!(id.to_string().parse::<WorkflowId>().unwrap(), id);

        let ulid = Ulid::new();
        let bare: WorkflowId = ulid.to_string().parse().unwrap();
        assert_eq!(bare, WorkflowId::from_ulid(ulid));
    }

    #[test]
    fn other_entity_prefix_is_rejected() {
        let pipeline = PipelineId::new().to_string();

        let err = pipeline.parse::<ApplicationId>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::WrongPrefix {
                id_type: "ApplicationId",
                found: pipeline,
            }
        );
    }

    #[test]
    fn invalid_ulid_is_rejected() {
        let err = "wf_not-a-ulid".parse::<WorkflowId>().unwrap_err();
        assert!(matches!(err, ParseIdError::InvalidUlid { .. }));
        assert_eq!(err.id_type(), "WorkflowId");
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let ulid = Ulid::new();
        let json = serde_json::to_string(&HookId::from_ulid(ulid)).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));
        assert_eq!(serde_json::from_str::<HookId>(&json).unwrap(), HookId::from_ulid(ulid));
    }
}
