//! Attribution of changes.

use crate::id::UserId;
use serde::{Deserialize, Serialize};

/// Who performed a change.
///
/// The engine never interprets it; it is threaded through imports so that
/// subsystems can record authorship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User identifier.
    pub id: UserId,
    /// Display name used in audit trails.
    pub username: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}
