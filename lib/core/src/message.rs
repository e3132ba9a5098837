//! Informational messages collected by mutations.
//!
//! Messages never abort an operation. Imports report what they created,
//! updated or had to skip; the coordinator reports recoverable problems such
//! as a default payload that could not be computed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    /// Something happened as requested.
    Info,
    /// Something was skipped or degraded but the operation went on.
    Warning,
}

/// A non-fatal, human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity.
    pub level: MessageLevel,
    /// Text for the caller.
    pub text: String,
}

impl Message {
    /// Creates an informational message.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    /// Creates a warning message.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            MessageLevel::Info => write!(f, "{}", self.text),
            MessageLevel::Warning => write!(f, "warning: {}", self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_display_is_prefixed() {
        let msg = Message::warning("application app1 has no repository");
        assert_eq!(msg.to_string(), "warning: application app1 has no repository");
        assert_eq!(Message::info("done").to_string(), "done");
    }
}
