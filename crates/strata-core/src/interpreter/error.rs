//! Registry configuration errors.
//!
//! These are startup problems, never per-file results.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Same id registered again under another version without `replace`.
    #[error("Interpreter '{id}' is already registered at version {existing} (attempted {attempted})")]
    DuplicateRegistration {
        id: String,
        existing: String,
        attempted: String,
    },

    /// A rule points at an interpreter id nobody registered.
    #[error("Rule '{rule_id}' targets unregistered interpreter '{target}'")]
    UnresolvedRuleTarget { rule_id: String, target: String },

    /// The rule itself is malformed.
    #[error("Invalid rule '{rule_id}': {message}")]
    InvalidRule { rule_id: String, message: String },
}
